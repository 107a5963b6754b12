//! Voice engine tests for SFORZATO
//!
//! Tests cover:
//! - State machine transitions (idle, playing, clean-me-up)
//! - Silent rendering for free and disabled voices
//! - Generator pitch accuracy and initial delay handling
//! - One-shot sample clamping and loop wrapping
//! - Sustain pedal deferral and off groups
//! - Crossfade shortcut equivalence
//! - Configuration idempotency

mod common;

use common::{assert_samples_are_finite, calculate_peak, calculate_rms, dominant_frequency};
use sforzato::adsr::EgDescriptor;
use sforzato::mod_matrix::{ModKey, ModTarget};
use sforzato::region::CrossfadeRange;
use sforzato::sample::SampleData;
use sforzato::{
    LoopMode, Region, Resources, StereoBuffer, TriggerEvent, Voice, VoiceState,
};
use std::sync::Arc;

const SAMPLE_RATE: f32 = 48000.0;
const BLOCK: usize = 64;

fn sine_region() -> Region {
    Region {
        sample: "*sine".to_string(),
        pitch_keycenter: 69,
        ..Default::default()
    }
}

/// Renders `count` blocks, gathering both channels.
fn render_blocks(
    voice: &mut Voice,
    resources: &mut Resources,
    count: usize,
) -> (Vec<f32>, Vec<f32>) {
    let mut block = StereoBuffer::new(BLOCK);
    let mut left = Vec::with_capacity(count * BLOCK);
    let mut right = Vec::with_capacity(count * BLOCK);
    for _ in 0..count {
        voice.render_block(resources, &mut block);
        left.extend_from_slice(block.left());
        right.extend_from_slice(block.right());
        resources.advance_block();
    }
    (left, right)
}

// --- Free voice renders exact zeros ---
#[test]
fn test_free_voice_renders_silence() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    let (left, right) = render_blocks(&mut voice, &mut resources, 4);
    assert!(left.iter().all(|&s| s == 0.0));
    assert!(right.iter().all(|&s| s == 0.0));
    assert!(voice.is_free());
}

// --- S1: disabled region never starts ---
#[test]
fn test_disabled_region_silent_start() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    let region = Arc::new(Region {
        disabled: true,
        ..sine_region()
    });
    voice.start_voice(region, 0, TriggerEvent::note_on(64, 0.7), &mut resources);

    assert_eq!(voice.state(), VoiceState::Idle);
    let (left, _) = render_blocks(&mut voice, &mut resources, 2);
    assert!(left.iter().all(|&s| s == 0.0));
}

// --- S2: sine generator at A4 ---
#[test]
fn test_sine_at_a4() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    voice.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let (left, right) = render_blocks(&mut voice, &mut resources, 80);
    assert_samples_are_finite(&left);

    for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        assert!((l - r).abs() < 1e-6, "L/R mismatch at {}: {} vs {}", i, l, r);
    }

    // Skip the first blocks while smoothers settle.
    let settled = &left[BLOCK * 8..];
    let frequency = dominant_frequency(settled, SAMPLE_RATE);
    assert!(
        (frequency - 440.0).abs() < 5.0,
        "expected 440 Hz, measured {}",
        frequency
    );

    let peak = calculate_peak(settled);
    assert!(peak > 0.9 && peak < 1.1, "expected ~unity peak, got {}", peak);
}

// --- Invariant 6: pitch ratio scales the generator frequency ---
#[test]
fn test_generator_follows_keytrack() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    // Three semitones above the keycenter.
    voice.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(72, 1.0),
        &mut resources,
    );

    let (left, _) = render_blocks(&mut voice, &mut resources, 80);
    let frequency = dominant_frequency(&left[BLOCK * 8..], SAMPLE_RATE);
    let expected = 440.0 * 2.0f32.powf(3.0 / 12.0);
    assert!(
        (frequency - expected).abs() < 6.0,
        "expected {} Hz, measured {}",
        expected,
        frequency
    );
}

// --- Invariant 4: trigger delay renders leading silence ---
#[test]
fn test_trigger_delay_keeps_head_silent() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    voice.start_voice(
        Arc::new(sine_region()),
        70,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let (left, _) = render_blocks(&mut voice, &mut resources, 2);
    assert!(
        left[..BLOCK].iter().all(|&s| s == 0.0),
        "first block should be fully silent"
    );
    assert!(
        left[BLOCK..BLOCK + 6].iter().all(|&s| s == 0.0),
        "delay remainder should be silent"
    );
    assert!(
        left[BLOCK + 6..].iter().any(|&s| s != 0.0),
        "audio should begin after the delay"
    );
}

// --- Release before the envelope delay elapsed goes to clean-up ---
#[test]
fn test_release_before_audible_cleans_up() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    let region = Region {
        delay: 1.0, // a full second of onset delay
        ..sine_region()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );
    voice.release(0, &mut resources);
    assert_eq!(voice.state(), VoiceState::CleanMeUp);
}

// --- Invariant 3: finished envelope transitions to clean-up ---
#[test]
fn test_release_tail_reaches_cleanup() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    let region = Region {
        amp_eg: EgDescriptor {
            release: 0.005, // 240 frames
            ..Default::default()
        },
        ..sine_region()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    render_blocks(&mut voice, &mut resources, 2);
    voice.release(0, &mut resources);
    assert!(voice.released_or_free());

    let mut blocks_until_cleanup = 0;
    while voice.state() == VoiceState::Playing && blocks_until_cleanup < 20 {
        render_blocks(&mut voice, &mut resources, 1);
        blocks_until_cleanup += 1;
    }
    assert_eq!(voice.state(), VoiceState::CleanMeUp);
    assert!(
        blocks_until_cleanup <= 6,
        "240-frame release should finish within 6 blocks, took {}",
        blocks_until_cleanup
    );

    let (tail, _) = render_blocks(&mut voice, &mut resources, 1);
    assert!(tail.iter().all(|&s| s == 0.0), "clean-up voice must be silent");
}

// --- S3: one-shot sample clamps at its end ---
#[test]
fn test_one_shot_sample_end_clamp() {
    let mut resources = Resources::new(1, BLOCK);
    resources
        .file_pool
        .add_file("hit.wav", SampleData::new_mono(vec![0.5; 100], SAMPLE_RATE));

    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let region = Region {
        sample: "hit.wav".to_string(),
        loop_mode: LoopMode::OneShot,
        sample_end: 100,
        pitch_keycenter: 60,
        ..Default::default()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(60, 1.0),
        &mut resources,
    );

    // Block 1 plays entirely inside the sample.
    let (first, _) = render_blocks(&mut voice, &mut resources, 1);
    assert!(calculate_rms(&first) > 0.1, "first block should be audible");
    assert_eq!(voice.state(), VoiceState::Playing);

    // Block 2 crosses frame 100: the zero-length release fires inside it
    // and the remaining envelope drains through the gain smoother.
    let (second, _) = render_blocks(&mut voice, &mut resources, 1);
    assert!(second[..16].iter().any(|&s| s != 0.0));
    assert!(
        calculate_rms(&second[48..]) < calculate_rms(&second[..32]),
        "tail after the clamp should be dying out"
    );
    assert_eq!(voice.state(), VoiceState::CleanMeUp);

    // The envelope is finished, so the next block is exact silence.
    let (third, _) = render_blocks(&mut voice, &mut resources, 1);
    assert!(third.iter().all(|&s| s == 0.0));
}

// --- One-shot regions ignore note-off ---
#[test]
fn test_one_shot_ignores_note_off() {
    let mut resources = Resources::new(1, BLOCK);
    resources
        .file_pool
        .add_file("hit.wav", SampleData::new_mono(vec![0.5; 48000], SAMPLE_RATE));

    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let region = Region {
        sample: "hit.wav".to_string(),
        loop_mode: LoopMode::OneShot,
        pitch_keycenter: 60,
        ..Default::default()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(60, 1.0),
        &mut resources,
    );

    voice.register_note_off(0, 60, 0.0, &mut resources);
    assert!(
        !voice.released_or_free(),
        "one-shot must keep playing through note-off"
    );
}

// --- Invariant 5: looping keeps the cursor inside the loop ---
#[test]
fn test_loop_wrap_bounds_cursor() {
    let mut resources = Resources::new(1, BLOCK);
    let cycle: Vec<f32> = (0..50).map(|i| (i as f32 / 50.0) - 0.5).collect();
    resources
        .file_pool
        .add_file("loop.wav", SampleData::new_mono(cycle, SAMPLE_RATE));

    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let region = Region {
        sample: "loop.wav".to_string(),
        loop_mode: LoopMode::LoopContinuous,
        loop_start: 10,
        loop_end: 39,
        pitch_keycenter: 60,
        ..Default::default()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(60, 1.0),
        &mut resources,
    );

    for _ in 0..50 {
        render_blocks(&mut voice, &mut resources, 1);
        assert!(
            voice.source_position() <= 39,
            "cursor {} escaped the loop",
            voice.source_position()
        );
        assert_eq!(voice.state(), VoiceState::Playing);
    }
}

// --- S4: sustain pedal defers the release ---
#[test]
fn test_sustain_holds_then_releases() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    voice.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    // Pedal down.
    resources.midi.cc_event(0, 64, 0.9);
    render_blocks(&mut voice, &mut resources, 1);

    voice.register_note_off(0, 69, 0.0, &mut resources);
    assert_eq!(voice.state(), VoiceState::Playing);
    assert!(!voice.released_or_free(), "release must be deferred");

    // Pedal up.
    resources.midi.cc_event(0, 64, 0.1);
    voice.register_cc(0, 64, 0.1, &mut resources);
    assert!(voice.released_or_free(), "release should begin immediately");
}

// --- S5: off group swap ---
#[test]
fn test_off_group_swap() {
    let mut resources = Resources::new(2, BLOCK);
    let mut voice_b = Voice::new(1, SAMPLE_RATE, BLOCK);

    let region_b = Region {
        group: 5,
        off_by: Some(3),
        ..sine_region()
    };
    voice_b.start_voice(
        Arc::new(region_b),
        0,
        TriggerEvent::note_on(67, 1.0),
        &mut resources,
    );

    let region_a = Region {
        group: 3,
        ..sine_region()
    };
    assert!(voice_b.check_off_group(&region_a, 10, 60, &mut resources));
    assert!(voice_b.released_or_free(), "off() should have fired");
}

// --- S6: crossfade shortcut equals the explicit multiply ---
#[test]
fn test_crossfade_shortcut_matches_plain_gain() {
    let mut resources = Resources::new(2, BLOCK);
    resources.midi.cc_event(0, 1, 0.5);
    resources.advance_block();

    let mut plain = Voice::new(0, SAMPLE_RATE, BLOCK);
    plain.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let mut faded = Voice::new(1, SAMPLE_RATE, BLOCK);
    let region = Region {
        xfade_cc_in: vec![CrossfadeRange {
            cc: 1,
            lo: 0.0,
            hi: 1.0,
        }],
        xfade_cc_curve: sforzato::region::CrossfadeCurve::Gain,
        ..sine_region()
    };
    faded.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let mut plain_block = StereoBuffer::new(BLOCK);
    let mut faded_block = StereoBuffer::new(BLOCK);
    for _ in 0..8 {
        // One CC event per block: the smoother may take its fast path.
        resources.midi.cc_event(0, 1, 0.5);
        plain.render_block(&resources, &mut plain_block);
        faded.render_block(&resources, &mut faded_block);
        for (p, f) in plain_block.left().iter().zip(faded_block.left()) {
            assert!(
                (p * 0.5 - f).abs() < 1e-5,
                "crossfaded output {} should be half of {}",
                f,
                p
            );
        }
        resources.advance_block();
    }
}

// --- Round trip 7: unison of one equals the single path ---
#[test]
fn test_unison_of_one_is_bit_equal_to_single() {
    let mut resources = Resources::new(2, BLOCK);

    let mut single = Voice::new(0, SAMPLE_RATE, BLOCK);
    single.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let mut unison = Voice::new(1, SAMPLE_RATE, BLOCK);
    let region = Region {
        oscillator_multi: 1,
        oscillator_detune: 0.0,
        ..sine_region()
    };
    unison.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let (single_left, _) = render_blocks(&mut single, &mut resources, 8);
    let (unison_left, _) = render_blocks(&mut unison, &mut resources, 8);
    for (i, (a, b)) in single_left.iter().zip(unison_left.iter()).enumerate() {
        assert_eq!(
            a.to_bits(),
            b.to_bits(),
            "bit mismatch at {}: {} vs {}",
            i,
            a,
            b
        );
    }
}

// --- Round trip 8: setting the sample rate twice changes nothing ---
#[test]
fn test_set_sample_rate_idempotent() {
    let mut resources = Resources::new(2, BLOCK);

    let mut once = Voice::new(0, SAMPLE_RATE, BLOCK);
    let mut twice = Voice::new(1, SAMPLE_RATE, BLOCK);
    twice.set_sample_rate(SAMPLE_RATE);
    twice.set_sample_rate(SAMPLE_RATE);

    once.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );
    twice.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let (a, _) = render_blocks(&mut once, &mut resources, 4);
    let (b, _) = render_blocks(&mut twice, &mut resources, 4);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
}

// --- Pitch bend re-reads from the MIDI state each block ---
#[test]
fn test_pitch_bend_shifts_frequency() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    voice.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    resources.midi.pitch_bend_event(0, 1.0);
    voice.register_pitch_wheel(0, 1.0);

    let (left, _) = render_blocks(&mut voice, &mut resources, 100);
    // Measure after the bend smoother settled.
    let settled = &left[BLOCK * 30..];
    let frequency = dominant_frequency(settled, SAMPLE_RATE);
    let expected = 440.0 * 2.0f32.powf(200.0 / 1200.0);
    assert!(
        (frequency - expected).abs() < 8.0,
        "expected {} Hz with full bend, measured {}",
        expected,
        frequency
    );
}

// --- Matrix pitch target multiplies in as cents ---
#[test]
fn test_mod_matrix_pitch_target() {
    let mut resources = Resources::new(1, BLOCK);
    let target = resources
        .mod_matrix
        .register_target(ModKey::new(ModTarget::Pitch, 0));

    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    voice.start_voice(
        Arc::new(sine_region()),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    let mut block = StereoBuffer::new(BLOCK);
    let mut left = Vec::new();
    for _ in 0..80 {
        resources
            .mod_matrix
            .set_modulation(target, 0, &[1200.0; BLOCK]);
        voice.render_block(&resources, &mut block);
        left.extend_from_slice(block.left());
        resources.advance_block();
    }

    let frequency = dominant_frequency(&left[BLOCK * 8..], SAMPLE_RATE);
    assert!(
        (frequency - 880.0).abs() < 10.0,
        "+1200 cents should double 440 Hz, measured {}",
        frequency
    );
}

// --- CC-triggered voices pitch at the keycenter ---
#[test]
fn test_cc_trigger_uses_keycenter() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    let region = Region {
        pitch_keycenter: 57, // A3
        ..sine_region()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::cc(30, 0.5),
        &mut resources,
    );
    assert_eq!(
        voice.trigger_event().unwrap().event_type,
        sforzato::TriggerEventType::Cc
    );

    let (left, _) = render_blocks(&mut voice, &mut resources, 80);
    let frequency = dominant_frequency(&left[BLOCK * 8..], SAMPLE_RATE);
    assert!(
        (frequency - 220.0).abs() < 4.0,
        "expected 220 Hz, measured {}",
        frequency
    );
}

// --- Power follower tracks output level ---
#[test]
fn test_average_power_rises_and_decays() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);

    let region = Region {
        amp_eg: EgDescriptor {
            release: 0.002,
            ..Default::default()
        },
        ..sine_region()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );

    render_blocks(&mut voice, &mut resources, 40);
    let playing_power = voice.average_power();
    assert!(playing_power > 0.01, "playing voice should meter power");

    voice.release(0, &mut resources);
    render_blocks(&mut voice, &mut resources, 60);
    assert!(
        voice.average_power() < playing_power * 0.5,
        "power should decay after release"
    );
}

// --- Stereo sample keeps its channels distinct ---
#[test]
fn test_stereo_sample_renders_both_channels() {
    let mut resources = Resources::new(1, BLOCK);
    let left_data = vec![0.5f32; 48000];
    let right_data = vec![-0.25f32; 48000];
    resources.file_pool.add_file(
        "stereo.wav",
        SampleData::new_stereo(left_data, right_data, SAMPLE_RATE),
    );

    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    let region = Region {
        sample: "stereo.wav".to_string(),
        pitch_keycenter: 60,
        ..Default::default()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(60, 1.0),
        &mut resources,
    );

    let (left, right) = render_blocks(&mut voice, &mut resources, 8);
    assert_samples_are_finite(&left);
    assert_samples_are_finite(&right);

    let left_rms = calculate_rms(&left[BLOCK..]);
    let right_rms = calculate_rms(&right[BLOCK..]);
    assert!(left_rms > 0.1, "left channel should carry signal");
    assert!(right_rms > 0.05, "right channel should carry signal");
    assert!(
        (left_rms / right_rms - 2.0).abs() < 0.3,
        "channel balance should follow the source: {} vs {}",
        left_rms,
        right_rms
    );
}

// --- Sample quality is reported per region ---
#[test]
fn test_sample_quality_query() {
    let mut resources = Resources::new(1, BLOCK);
    let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
    assert_eq!(voice.current_sample_quality(), 2);

    let region = Region {
        sample_quality: 1,
        ..sine_region()
    };
    voice.start_voice(
        Arc::new(region),
        0,
        TriggerEvent::note_on(69, 1.0),
        &mut resources,
    );
    assert_eq!(voice.current_sample_quality(), 1);
}
