//! Power Follower Module
//!
//! This module provides the slewed mean-square meter each voice updates at
//! the end of its render block. The voice manager reads the value as a
//! stealing score: quiet, dying voices report low power and are reclaimed
//! first.

/// Attack time constant in seconds (rising power).
const FOLLOWER_ATTACK: f32 = 5e-3;

/// Release time constant in seconds (falling power).
const FOLLOWER_RELEASE: f32 = 50e-3;

/// Running mean-square meter over rendered blocks.
#[derive(Debug, Clone)]
pub struct PowerFollower {
    average: f32,
    sample_rate: f32,
}

impl PowerFollower {
    /// Creates a follower at rest.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            average: 0.0,
            sample_rate,
        }
    }

    /// Updates the sample rate used for the slew constants.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Folds one rendered stereo block into the meter.
    pub fn process(&mut self, left: &[f32], right: &[f32]) {
        debug_assert_eq!(left.len(), right.len());
        if left.is_empty() {
            return;
        }

        let sum: f32 = left
            .iter()
            .zip(right.iter())
            .map(|(&l, &r)| l * l + r * r)
            .sum();
        let mean_square = sum / (2.0 * left.len() as f32);

        let tau = if mean_square > self.average {
            FOLLOWER_ATTACK
        } else {
            FOLLOWER_RELEASE
        };
        let alpha = 1.0 - (-(left.len() as f32) / (tau * self.sample_rate)).exp();
        self.average += alpha * (mean_square - self.average);
    }

    /// Current meter value.
    pub fn average_power(&self) -> f32 {
        self.average
    }

    /// Clears the meter.
    pub fn clear(&mut self) {
        self.average = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let follower = PowerFollower::new(48000.0);
        assert_eq!(follower.average_power(), 0.0);
    }

    #[test]
    fn test_rises_with_signal() {
        let mut follower = PowerFollower::new(48000.0);
        let block = vec![0.5f32; 256];
        for _ in 0..20 {
            follower.process(&block, &block);
        }
        assert!(follower.average_power() > 0.1);
    }

    #[test]
    fn test_decays_in_silence() {
        let mut follower = PowerFollower::new(48000.0);
        let loud = vec![0.8f32; 256];
        for _ in 0..20 {
            follower.process(&loud, &loud);
        }
        let peak = follower.average_power();

        let silent = vec![0.0f32; 256];
        for _ in 0..40 {
            follower.process(&silent, &silent);
        }
        assert!(follower.average_power() < peak * 0.5);
    }

    #[test]
    fn test_clear_resets() {
        let mut follower = PowerFollower::new(48000.0);
        let block = vec![1.0f32; 64];
        follower.process(&block, &block);
        follower.clear();
        assert_eq!(follower.average_power(), 0.0);
    }
}
