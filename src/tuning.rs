//! Tuning Module
//!
//! This module maps MIDI keys to frequencies. The default mapping is equal
//! temperament with A4 = 440 Hz; a tuning can carry per-key fractional
//! offsets (loaded from a Scala-style retuning), and an optional stretch
//! tuning layer bends the extremes of the keyboard the way a tuned piano
//! does.

/// Converts a (possibly fractional) MIDI key to a frequency in Hz.
///
/// A4 (key 69) maps to 440 Hz.
pub fn midi_note_frequency(key: f32) -> f32 {
    440.0 * 2.0f32.powf((key - 69.0) / 12.0)
}

/// The ratio `2^(cents/1200)`.
#[inline]
pub fn cents_factor(cents: f32) -> f32 {
    2.0f32.powf(cents / 1200.0)
}

/// Key-to-frequency mapping with per-key fractional offsets.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Offset added to each key, in fractional keys
    key_offsets: [f32; 128],
}

impl Tuning {
    /// Creates the identity 12-TET tuning.
    pub fn new() -> Self {
        Self {
            key_offsets: [0.0; 128],
        }
    }

    /// Sets the retuning offset of one key, in fractional keys.
    pub fn set_key_offset(&mut self, key: u8, offset: f32) {
        if (key as usize) < 128 {
            self.key_offsets[key as usize] = offset;
        }
    }

    /// Gets the retuned fractional 12-TET key number for a MIDI key.
    pub fn key_fractional_12tet(&self, key: u8) -> f32 {
        let index = (key as usize).min(127);
        key as f32 + self.key_offsets[index]
    }

    /// Gets the frequency of a MIDI key after retuning.
    pub fn frequency_of_key(&self, key: u8) -> f32 {
        midi_note_frequency(self.key_fractional_12tet(key))
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::new()
    }
}

/// Piano-style stretch layer over the base tuning.
///
/// The stretch follows a cubic curve centered on A4: keys near the middle
/// are untouched, the bass is flattened and the treble sharpened by up to
/// `amount_cents` at the keyboard extremes.
#[derive(Debug, Clone)]
pub struct StretchTuning {
    amount_cents: f32,
}

impl StretchTuning {
    /// Creates a stretch layer with the given extreme deviation in cents.
    pub fn new(amount_cents: f32) -> Self {
        Self { amount_cents }
    }

    /// Pitch ratio to apply for a fractional key.
    pub fn ratio_for_fractional_key(&self, key: f32) -> f32 {
        let normalized = ((key - 69.0) / 60.0).clamp(-1.0, 1.0);
        let cents = self.amount_cents * normalized * normalized * normalized;
        cents_factor(cents)
    }
}
