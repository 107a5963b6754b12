//! Voice render benchmarks for SFORZATO
//!
//! Measures the per-block cost of the generator and sampler paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sforzato::sample::SampleData;
use sforzato::{LoopMode, Region, Resources, StereoBuffer, TriggerEvent, Voice};
use std::sync::Arc;

const SAMPLE_RATE: f32 = 48000.0;
const BLOCK: usize = 256;

fn bench_sine_generator(c: &mut Criterion) {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let mut block = StereoBuffer::new(BLOCK);

    let region = Arc::new(Region {
        sample: "*sine".to_string(),
        ..Default::default()
    });
    voice.start_voice(region, 0, TriggerEvent::note_on(69, 1.0), &mut resources);

    c.bench_function("voice_render_sine_256", |b| {
        b.iter(|| {
            voice.render_block(&resources, &mut block);
            black_box(block.left()[0]);
        })
    });
}

fn bench_unison_saw(c: &mut Criterion) {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let mut block = StereoBuffer::new(BLOCK);

    let region = Arc::new(Region {
        sample: "*saw".to_string(),
        oscillator_multi: 7,
        oscillator_detune: 25.0,
        ..Default::default()
    });
    voice.start_voice(region, 0, TriggerEvent::note_on(57, 1.0), &mut resources);

    c.bench_function("voice_render_unison7_saw_256", |b| {
        b.iter(|| {
            voice.render_block(&resources, &mut block);
            black_box(block.left()[0]);
        })
    });
}

fn bench_looped_sample(c: &mut Criterion) {
    let mut resources = Resources::new(1, BLOCK);
    let data: Vec<f32> = (0..48000)
        .map(|i| (i as f32 * 0.01).sin() * 0.5)
        .collect();
    resources
        .file_pool
        .add_file("loop.wav", SampleData::new_mono(data, SAMPLE_RATE));

    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let mut block = StereoBuffer::new(BLOCK);

    let region = Arc::new(Region {
        sample: "loop.wav".to_string(),
        loop_mode: LoopMode::LoopContinuous,
        loop_start: 100,
        loop_end: 40000,
        pitch_keycenter: 60,
        ..Default::default()
    });
    voice.start_voice(region, 0, TriggerEvent::note_on(64, 1.0), &mut resources);

    c.bench_function("voice_render_looped_sample_256", |b| {
        b.iter(|| {
            voice.render_block(&resources, &mut block);
            black_box(block.left()[0]);
        })
    });
}

criterion_group!(
    benches,
    bench_sine_generator,
    bench_unison_saw,
    bench_looped_sample
);
criterion_main!(benches);
