//! Wavetable Module
//!
//! This module provides the wavetable oscillator used by generator regions
//! (`*sine`, `*saw`, ...) together with the pool of shared tables. One table
//! holds a single cycle of a waveform; oscillators read it with a phase
//! accumulator driven by a per-sample frequency span, so pitch modulation is
//! sample-accurate.
//!
//! # Quality
//!
//! Table reads honor the region's sample quality: quality 1 truncates to the
//! nearest stored frame, quality 2 interpolates linearly, quality 3 and
//! above reads through a third-order Hermite kernel. The tables carry guard
//! frames on both sides so no read branches on wraparound.

use crate::interpolate::interpolate_hermite3;
use std::collections::HashMap;
use std::f32::consts::PI;
use std::sync::Arc;

/// Number of frames in one built-in table cycle.
const WAVETABLE_SIZE: usize = 1024;

/// Harmonics summed into the built-in saw/square/triangle tables.
const WAVETABLE_HARMONICS: usize = 48;

/// One cycle of a waveform, shared between voices.
///
/// The stored data is padded with the cycle's last frame in front and its
/// first two frames behind, so every interpolation kernel sees a correct
/// circular neighborhood without wrapping arithmetic.
#[derive(Debug, Clone)]
pub struct Wavetable {
    data: Vec<f32>,
}

impl Wavetable {
    /// Builds a table from one waveform cycle.
    pub fn from_cycle(cycle: Vec<f32>) -> Self {
        let first = cycle.first().copied().unwrap_or(0.0);
        let second = cycle.get(1).copied().unwrap_or(first);
        let last = cycle.last().copied().unwrap_or(0.0);

        let mut data = Vec::with_capacity(cycle.len() + 3);
        data.push(last);
        data.extend_from_slice(&cycle);
        data.push(first);
        data.push(second);
        Self { data }
    }

    /// Number of frames in the cycle (guard frames excluded).
    pub fn size(&self) -> usize {
        self.data.len() - 3
    }

    /// Truncating read at `phase` in [0, 1).
    #[inline]
    pub fn read_truncating(&self, phase: f32) -> f32 {
        let position = phase * self.size() as f32;
        self.data[1 + position as usize]
    }

    /// Linearly interpolated read at `phase` in [0, 1).
    #[inline]
    pub fn read_linear(&self, phase: f32) -> f32 {
        let position = phase * self.size() as f32;
        let index = position as usize;
        let frac = position - index as f32;
        let x0 = self.data[1 + index];
        let x1 = self.data[2 + index];
        x0 + frac * (x1 - x0)
    }

    /// Third-order Hermite read at `phase` in [0, 1).
    #[inline]
    pub fn read_hermite(&self, phase: f32) -> f32 {
        let position = phase * self.size() as f32;
        let index = position as usize;
        let frac = position - index as f32;
        interpolate_hermite3(&self.data, 1 + index, frac)
    }
}

fn build_sine() -> Wavetable {
    let cycle = (0..WAVETABLE_SIZE)
        .map(|i| (2.0 * PI * i as f32 / WAVETABLE_SIZE as f32).sin())
        .collect();
    Wavetable::from_cycle(cycle)
}

/// Builds a harmonic sum table and normalizes it to unit peak.
fn build_harmonic_sum(amplitude: impl Fn(usize) -> f32, phase: impl Fn(usize) -> f32) -> Wavetable {
    let mut cycle = vec![0.0f32; WAVETABLE_SIZE];
    for harmonic in 1..=WAVETABLE_HARMONICS {
        let gain = amplitude(harmonic);
        if gain == 0.0 {
            continue;
        }
        let offset = phase(harmonic);
        for (i, sample) in cycle.iter_mut().enumerate() {
            let t = i as f32 / WAVETABLE_SIZE as f32;
            *sample += gain * (2.0 * PI * (harmonic as f32 * t + offset)).sin();
        }
    }

    let peak = cycle.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak > 0.0 {
        for sample in cycle.iter_mut() {
            *sample /= peak;
        }
    }
    Wavetable::from_cycle(cycle)
}

fn build_saw() -> Wavetable {
    build_harmonic_sum(|h| 1.0 / h as f32, |_| 0.0)
}

fn build_square() -> Wavetable {
    build_harmonic_sum(|h| if h % 2 == 1 { 1.0 / h as f32 } else { 0.0 }, |_| 0.0)
}

fn build_triangle() -> Wavetable {
    build_harmonic_sum(
        |h| {
            if h % 2 == 1 {
                let sign = if (h / 2) % 2 == 1 { -1.0 } else { 1.0 };
                sign / (h * h) as f32
            } else {
                0.0
            }
        },
        |_| 0.0,
    )
}

/// Pool of shared wavetables: the four built-in shapes plus file-backed
/// cycles registered by the loader.
#[derive(Debug, Clone)]
pub struct WavePool {
    sine: Arc<Wavetable>,
    triangle: Arc<Wavetable>,
    square: Arc<Wavetable>,
    saw: Arc<Wavetable>,
    file_waves: HashMap<String, Arc<Wavetable>>,
}

impl WavePool {
    /// Builds the pool with the four standard tables.
    pub fn new() -> Self {
        log::debug!(
            "building wave pool: {} frames/table, {} harmonics",
            WAVETABLE_SIZE,
            WAVETABLE_HARMONICS
        );
        Self {
            sine: Arc::new(build_sine()),
            triangle: Arc::new(build_triangle()),
            square: Arc::new(build_square()),
            saw: Arc::new(build_saw()),
            file_waves: HashMap::new(),
        }
    }

    /// Gets the sine table.
    pub fn get_wave_sin(&self) -> Arc<Wavetable> {
        Arc::clone(&self.sine)
    }

    /// Gets the triangle table.
    pub fn get_wave_triangle(&self) -> Arc<Wavetable> {
        Arc::clone(&self.triangle)
    }

    /// Gets the square table.
    pub fn get_wave_square(&self) -> Arc<Wavetable> {
        Arc::clone(&self.square)
    }

    /// Gets the saw table.
    pub fn get_wave_saw(&self) -> Arc<Wavetable> {
        Arc::clone(&self.saw)
    }

    /// Gets a file-backed table by sample name, falling back to the sine
    /// table when the name was never registered.
    pub fn get_file_wave(&self, name: &str) -> Arc<Wavetable> {
        match self.file_waves.get(name) {
            Some(table) => Arc::clone(table),
            None => {
                log::debug!("file wave '{}' not registered, using sine", name);
                Arc::clone(&self.sine)
            }
        }
    }

    /// Registers one waveform cycle under a sample name (loader side,
    /// not realtime).
    pub fn add_file_wave(&mut self, name: &str, cycle: Vec<f32>) {
        self.file_waves
            .insert(name.to_string(), Arc::new(Wavetable::from_cycle(cycle)));
    }
}

impl Default for WavePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Phase-accumulator oscillator reading a shared wavetable.
#[derive(Debug, Clone)]
pub struct WavetableOscillator {
    /// Table being read; None renders silence
    table: Option<Arc<Wavetable>>,

    /// Current phase in [0, 1)
    phase: f32,

    /// Reciprocal of the sample rate
    sample_interval: f32,

    /// Interpolated reads when at least 2
    quality: i32,
}

impl WavetableOscillator {
    /// Creates an oscillator with no table attached.
    pub fn new() -> Self {
        Self {
            table: None,
            phase: 0.0,
            sample_interval: 1.0 / 44100.0,
            quality: 1,
        }
    }

    /// Sets the sample rate used for phase increments.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_interval = 1.0 / sample_rate;
    }

    /// Attaches a table.
    pub fn set_wavetable(&mut self, table: Arc<Wavetable>) {
        self.table = Some(table);
    }

    /// Sets the read quality (1 truncating, 2 linear, >= 3 Hermite).
    pub fn set_quality(&mut self, quality: i32) {
        self.quality = quality;
    }

    /// Gets the read quality.
    pub fn quality(&self) -> i32 {
        self.quality
    }

    /// Resets the phase to the cycle start.
    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    /// Renders a block with a per-sample frequency span and a per-sample
    /// detune ratio span.
    pub fn process_modulated(&mut self, frequencies: &[f32], detunes: &[f32], out: &mut [f32]) {
        debug_assert_eq!(frequencies.len(), out.len());
        debug_assert_eq!(detunes.len(), out.len());

        let table = match &self.table {
            Some(table) => table,
            None => {
                out.fill(0.0);
                return;
            }
        };

        let quality = self.quality;
        let mut phase = self.phase;
        for ((sample, &freq), &detune) in out.iter_mut().zip(frequencies).zip(detunes) {
            *sample = read_table(table, quality, phase);
            phase += freq * detune * self.sample_interval;
            phase -= phase.floor();
        }
        self.phase = phase;
    }

    /// Renders a block with a constant detune ratio.
    pub fn process(&mut self, frequencies: &[f32], detune: f32, out: &mut [f32]) {
        debug_assert_eq!(frequencies.len(), out.len());

        let table = match &self.table {
            Some(table) => table,
            None => {
                out.fill(0.0);
                return;
            }
        };

        let quality = self.quality;
        let mut phase = self.phase;
        for (sample, &freq) in out.iter_mut().zip(frequencies) {
            *sample = read_table(table, quality, phase);
            phase += freq * detune * self.sample_interval;
            phase -= phase.floor();
        }
        self.phase = phase;
    }
}

#[inline]
fn read_table(table: &Wavetable, quality: i32, phase: f32) -> f32 {
    match quality {
        q if q <= 1 => table.read_truncating(phase),
        2 => table.read_linear(phase),
        _ => table.read_hermite(phase),
    }
}

impl Default for WavetableOscillator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn render(osc: &mut WavetableOscillator, freq: f32, frames: usize) -> Vec<f32> {
        let frequencies = vec![freq; frames];
        let mut out = vec![0.0f32; frames];
        osc.process(&frequencies, 1.0, &mut out);
        out
    }

    #[test]
    fn test_sine_table_is_unit_cycle() {
        let table = build_sine();
        assert_eq!(table.size(), WAVETABLE_SIZE);
        assert!((table.read_linear(0.25) - 1.0).abs() < 1e-3);
        assert!((table.read_linear(0.75) + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_oscillator_period_matches_frequency() {
        let pool = WavePool::new();
        let mut osc = WavetableOscillator::new();
        osc.set_sample_rate(SAMPLE_RATE);
        osc.set_wavetable(pool.get_wave_sin());
        osc.set_quality(2);

        // 480 Hz at 48 kHz: a period of exactly 100 frames.
        let out = render(&mut osc, 480.0, 200);
        assert!((out[0] - out[100]).abs() < 1e-2, "period should be 100 frames");
    }

    #[test]
    fn test_silent_without_table() {
        let mut osc = WavetableOscillator::new();
        let out = render(&mut osc, 440.0, 64);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_detune_doubles_rate() {
        let pool = WavePool::new();

        let mut reference = WavetableOscillator::new();
        reference.set_sample_rate(SAMPLE_RATE);
        reference.set_wavetable(pool.get_wave_sin());
        reference.set_quality(2);
        let ref_out = render(&mut reference, 880.0, 128);

        let mut detuned = WavetableOscillator::new();
        detuned.set_sample_rate(SAMPLE_RATE);
        detuned.set_wavetable(pool.get_wave_sin());
        detuned.set_quality(2);
        let frequencies = vec![440.0f32; 128];
        let mut det_out = vec![0.0f32; 128];
        detuned.process(&frequencies, 2.0, &mut det_out);

        for (a, b) in ref_out.iter().zip(det_out.iter()) {
            assert!((a - b).abs() < 1e-4, "2x detune should equal doubled frequency");
        }
    }

    #[test]
    fn test_hermite_read_wraps_cleanly() {
        let table = build_sine();
        let size = table.size() as f32;
        let phase = (size - 0.5) / size;
        let expected = (2.0 * PI * phase).sin();
        assert!(
            (table.read_hermite(phase) - expected).abs() < 1e-3,
            "hermite read near the wrap should follow the cycle"
        );
    }

    #[test]
    fn test_unregistered_file_wave_falls_back_to_sine() {
        let pool = WavePool::new();
        let fallback = pool.get_file_wave("missing.wav");
        assert!((fallback.read_linear(0.25) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_tables_are_normalized() {
        for table in [build_saw(), build_square(), build_triangle()] {
            let peak = (0..table.size())
                .map(|i| table.read_truncating(i as f32 / table.size() as f32).abs())
                .fold(0.0f32, f32::max);
            assert!((peak - 1.0).abs() < 1e-3, "table peak {} not normalized", peak);
        }
    }
}
