//! Filter Module
//!
//! This module provides the per-voice filter and EQ slots. Each slot wraps
//! a biquad pair (one per channel) configured from a region descriptor at
//! voice start, with cutoff keytracking and velocity tracking folded in at
//! that point. During rendering the cutoff can be pushed around in cents by
//! the filter EG and LFOs; coefficients are recomputed once per block when
//! the offset changes.
//!
//! # Biquad Filters
//!
//! The core is a second-order IIR section in Direct Form II Transposed:
//! y[n] = b0*x[n] + z1
//! z1 = b1*x[n] - a1*y[n] + z2
//! z2 = b2*x[n] - a2*y[n]

use crate::region::{FilterDescriptor, FilterKind, Region};
use crate::tuning::cents_factor;
use std::f32::consts::PI;

/// Second-order IIR section.
#[derive(Debug, Clone)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    z1: f32,
    z2: f32,
}

impl Default for Biquad {
    /// Passthrough section.
    fn default() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        }
    }
}

impl Biquad {
    #[inline]
    fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    fn process_buffer(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    fn copy_coefficients_from(&mut self, other: &Biquad) {
        self.b0 = other.b0;
        self.b1 = other.b1;
        self.b2 = other.b2;
        self.a1 = other.a1;
        self.a2 = other.a2;
    }

    /// Standard bilinear-transform coefficients for the classic responses.
    fn set_response(&mut self, kind: FilterKind, cutoff: f32, resonance: f32, sample_rate: f32) {
        let cutoff = cutoff.clamp(10.0, sample_rate * 0.49);
        let omega = 2.0 * PI * cutoff / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * resonance.max(0.001));

        let a0 = 1.0 + alpha;

        match kind {
            FilterKind::LowPass => {
                self.b0 = (1.0 - cos_omega) / 2.0;
                self.b1 = 1.0 - cos_omega;
                self.b2 = (1.0 - cos_omega) / 2.0;
                self.a1 = -2.0 * cos_omega;
                self.a2 = 1.0 - alpha;
            }

            FilterKind::HighPass => {
                self.b0 = (1.0 + cos_omega) / 2.0;
                self.b1 = -(1.0 + cos_omega);
                self.b2 = (1.0 + cos_omega) / 2.0;
                self.a1 = -2.0 * cos_omega;
                self.a2 = 1.0 - alpha;
            }

            FilterKind::BandPass => {
                self.b0 = alpha;
                self.b1 = 0.0;
                self.b2 = -alpha;
                self.a1 = -2.0 * cos_omega;
                self.a2 = 1.0 - alpha;
            }

            FilterKind::Notch => {
                self.b0 = 1.0;
                self.b1 = -2.0 * cos_omega;
                self.b2 = 1.0;
                self.a1 = -2.0 * cos_omega;
                self.a2 = 1.0 - alpha;
            }

            FilterKind::AllPass => {
                self.b0 = 1.0 - alpha;
                self.b1 = -2.0 * cos_omega;
                self.b2 = 1.0 + alpha;
                self.a1 = -2.0 * cos_omega;
                self.a2 = 1.0 - alpha;
            }
        }

        self.b0 /= a0;
        self.b1 /= a0;
        self.b2 /= a0;
        self.a1 /= a0;
        self.a2 /= a0;
    }

    /// Peaking-EQ coefficients with bandwidth in octaves.
    fn set_peaking(&mut self, frequency: f32, bandwidth: f32, gain_db: f32, sample_rate: f32) {
        let frequency = frequency.clamp(10.0, sample_rate * 0.49);
        let amp = 10.0f32.powf(gain_db / 40.0);
        let omega = 2.0 * PI * frequency / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha =
            sin_omega * ((2.0f32.ln() / 2.0) * bandwidth.max(0.01) * omega / sin_omega).sinh();

        let a0 = 1.0 + alpha / amp;
        self.b0 = (1.0 + alpha * amp) / a0;
        self.b1 = -2.0 * cos_omega / a0;
        self.b2 = (1.0 - alpha * amp) / a0;
        self.a1 = -2.0 * cos_omega / a0;
        self.a2 = (1.0 - alpha / amp) / a0;
    }
}

/// A per-voice filter slot configured from a region descriptor.
#[derive(Debug, Clone)]
pub struct FilterSlot {
    left: Biquad,
    right: Biquad,
    desc: FilterDescriptor,

    /// Cutoff in Hz after key and velocity tracking
    base_cutoff: f32,

    /// Last cutoff modulation applied, in cents
    current_mod_cents: f32,

    sample_rate: f32,
}

impl FilterSlot {
    /// Creates an inert slot.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            left: Biquad::default(),
            right: Biquad::default(),
            desc: FilterDescriptor::default(),
            base_cutoff: 20000.0,
            current_mod_cents: 0.0,
            sample_rate,
        }
    }

    /// Configures the slot from a region's filter list entry.
    pub fn setup(&mut self, region: &Region, index: usize, key: u8, velocity: f32) {
        let desc = match region.filters.get(index) {
            Some(desc) => *desc,
            None => return,
        };

        let tracking_cents = (key as f32 - desc.keycenter as f32) * desc.keytrack
            + desc.veltrack * velocity;
        self.desc = desc;
        self.base_cutoff = desc.cutoff * cents_factor(tracking_cents);
        self.current_mod_cents = 0.0;
        self.left.reset();
        self.right.reset();
        self.update_coefficients();
    }

    /// Updates the sample rate; coefficients follow on the next setup.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.update_coefficients();
    }

    /// Clears the filter memory.
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Filters a block in place. `cutoff_mod_cents` shifts the tracked
    /// cutoff; coefficients refresh when it moved since the last block.
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: Option<&mut [f32]>,
        cutoff_mod_cents: f32,
    ) {
        if (cutoff_mod_cents - self.current_mod_cents).abs() > 0.01 {
            self.current_mod_cents = cutoff_mod_cents;
            self.update_coefficients();
        }

        self.left.process_buffer(left);
        if let Some(right) = right {
            self.right.process_buffer(right);
        }
    }

    fn update_coefficients(&mut self) {
        let cutoff = self.base_cutoff * cents_factor(self.current_mod_cents);
        self.left
            .set_response(self.desc.kind, cutoff, self.desc.resonance, self.sample_rate);
        self.right.copy_coefficients_from(&self.left);
    }
}

/// A per-voice EQ band configured from a region descriptor.
#[derive(Debug, Clone)]
pub struct EqSlot {
    left: Biquad,
    right: Biquad,
    sample_rate: f32,
}

impl EqSlot {
    /// Creates an inert band.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            left: Biquad::default(),
            right: Biquad::default(),
            sample_rate,
        }
    }

    /// Configures the band from a region's EQ list entry.
    pub fn setup(&mut self, region: &Region, index: usize, velocity: f32) {
        let desc = match region.eqs.get(index) {
            Some(desc) => *desc,
            None => return,
        };

        let frequency = desc.frequency + desc.vel2frequency * velocity;
        let gain = desc.gain + desc.vel2gain * velocity;
        self.left.reset();
        self.right.reset();
        self.left
            .set_peaking(frequency, desc.bandwidth, gain, self.sample_rate);
        self.right.copy_coefficients_from(&self.left);
    }

    /// Updates the sample rate; coefficients follow on the next setup.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Clears the band memory.
    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    /// Equalizes a block in place.
    pub fn process(&mut self, left: &mut [f32], right: Option<&mut [f32]>) {
        self.left.process_buffer(left);
        if let Some(right) = right {
            self.right.process_buffer(right);
        }
    }
}
