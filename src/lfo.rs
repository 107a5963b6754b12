//! LFO Module
//!
//! This module provides the per-voice low-frequency oscillators. Each LFO
//! is configured from a region descriptor at voice start and fills one
//! bipolar span per block; the voice folds the span into its pitch
//! envelope per sample and uses the block tail value for gain and filter
//! cutoff modulation.
//!
//! # Timing
//!
//! An LFO can wait out an onset delay and fade in afterwards. A non-zero
//! `beats` descriptor field syncs the rate to the tempo the engine last
//! registered (one period per `beats` quarter notes).

use crate::region::{LfoDescriptor, LfoWaveform};

/// Per-voice LFO generator.
#[derive(Debug, Clone)]
pub struct Lfo {
    desc: LfoDescriptor,
    phase: f32,

    /// Frames rendered since the voice started
    position: u64,

    delay_frames: u64,
    fade_frames: u64,

    /// Rate after tempo resolution, in Hz
    rate_hz: f32,

    sample_rate: f32,
    active: bool,
}

impl Lfo {
    /// Creates an inactive LFO.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            desc: LfoDescriptor::default(),
            phase: 0.0,
            position: 0,
            delay_frames: 0,
            fade_frames: 0,
            rate_hz: 0.0,
            sample_rate,
            active: false,
        }
    }

    /// Configures the LFO from a region descriptor and starts it.
    ///
    /// `seconds_per_quarter` resolves tempo-synced rates.
    pub fn configure(&mut self, desc: &LfoDescriptor, seconds_per_quarter: f32) {
        self.desc = *desc;
        self.rate_hz = if desc.beats > 0.0 {
            1.0 / (desc.beats * seconds_per_quarter.max(1e-3))
        } else {
            desc.freq
        };
        self.delay_frames = (desc.delay.max(0.0) * self.sample_rate) as u64;
        self.fade_frames = (desc.fade.max(0.0) * self.sample_rate) as u64;
        self.phase = 0.0;
        self.position = 0;
        self.active = true;
    }

    /// Updates the sample rate. The rate is re-resolved on the next
    /// configure call.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Stops the LFO and clears its phase.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.position = 0;
        self.active = false;
    }

    /// Whether the LFO has been configured since the last reset.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Descriptor the LFO was configured with.
    pub fn descriptor(&self) -> &LfoDescriptor {
        &self.desc
    }

    /// Fills a bipolar span for this block and advances the LFO.
    pub fn fill_block(&mut self, out: &mut [f32]) {
        if !self.active {
            out.fill(0.0);
            return;
        }

        let increment = self.rate_hz / self.sample_rate;
        for sample in out.iter_mut() {
            if self.position < self.delay_frames {
                *sample = 0.0;
                self.position += 1;
                continue;
            }

            let fade_gain = if self.fade_frames > 0 {
                let since_delay = self.position - self.delay_frames;
                (since_delay as f32 / self.fade_frames as f32).min(1.0)
            } else {
                1.0
            };

            *sample = self.shape() * fade_gain;
            self.phase += increment;
            self.phase -= self.phase.floor();
            self.position += 1;
        }
    }

    fn shape(&self) -> f32 {
        let p = self.phase;
        match self.desc.waveform {
            LfoWaveform::Sine => (2.0 * std::f32::consts::PI * p).sin(),
            LfoWaveform::Triangle => {
                if p < 0.5 {
                    4.0 * p - 1.0
                } else {
                    3.0 - 4.0 * p
                }
            }
            LfoWaveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoWaveform::Saw => 2.0 * p - 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 1000.0;

    #[test]
    fn test_inactive_outputs_zero() {
        let mut lfo = Lfo::new(SAMPLE_RATE);
        let mut block = [1.0f32; 16];
        lfo.fill_block(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_delay_silences_onset() {
        let mut lfo = Lfo::new(SAMPLE_RATE);
        lfo.configure(
            &LfoDescriptor {
                freq: 50.0,
                delay: 0.01, // 10 frames
                ..Default::default()
            },
            0.5,
        );

        let mut block = [0.0f32; 30];
        lfo.fill_block(&mut block);
        assert!(block[..10].iter().all(|&s| s == 0.0));
        assert!(block[10..].iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_fade_ramps_amplitude() {
        let mut lfo = Lfo::new(SAMPLE_RATE);
        lfo.configure(
            &LfoDescriptor {
                freq: 250.0, // period of 4 frames
                waveform: LfoWaveform::Square,
                fade: 0.1, // 100 frames
                ..Default::default()
            },
            0.5,
        );

        let mut block = [0.0f32; 100];
        lfo.fill_block(&mut block);
        assert!(block[1].abs() < block[97].abs());
    }

    #[test]
    fn test_tempo_sync_resolves_rate() {
        let mut lfo = Lfo::new(SAMPLE_RATE);
        // One period per beat at 0.5 s/beat = 2 Hz.
        lfo.configure(
            &LfoDescriptor {
                freq: 99.0,
                beats: 1.0,
                waveform: LfoWaveform::Saw,
                ..Default::default()
            },
            0.5,
        );

        // After half a period (250 frames) the saw should be near 0.
        let mut block = vec![0.0f32; 250];
        lfo.fill_block(&mut block);
        assert!((block[249] - 0.0).abs() < 0.05, "got {}", block[249]);
    }

    #[test]
    fn test_sine_period() {
        let mut lfo = Lfo::new(SAMPLE_RATE);
        lfo.configure(
            &LfoDescriptor {
                freq: 100.0, // 10-frame period
                ..Default::default()
            },
            0.5,
        );

        let mut block = [0.0f32; 21];
        lfo.fill_block(&mut block);
        assert!((block[0] - block[10]).abs() < 1e-4);
        assert!((block[10] - block[20]).abs() < 1e-4);
    }
}
