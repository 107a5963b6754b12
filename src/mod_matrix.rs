//! Modulation Matrix Module
//!
//! This module provides the per-voice modulation span registry. Sources
//! (host automation, MIDI routings, generators outside the voice) publish a
//! float span per (target, voice) pair before the voices render; a voice
//! caches opaque target ids at start and asks for the spans each block. A
//! missing span means "no modulation this block".
//!
//! # Handles
//!
//! Target handles are plain indices into the matrix's target table. They
//! stay valid for the lifetime of the matrix, so a voice may cache them at
//! `start_voice` and reuse them until `reset`.

use serde::{Deserialize, Serialize};

/// Enumeration of per-voice modulation destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModTarget {
    /// Amplitude, in percent of the base gain
    Amplitude,

    /// Volume, in dB
    Volume,

    /// Pan, in percent
    Pan,

    /// Stereo position, in percent
    Position,

    /// Stereo width, in percent
    Width,

    /// Pitch, in cents
    Pitch,

    /// Oscillator unison detune, in cents
    OscillatorDetune,

    /// Oscillator FM/RM depth, in percent
    OscillatorModDepth,

    /// Filter cutoff, in cents
    FilterCutoff,
}

/// Lookup key for a target: destination plus the region it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModKey {
    /// Modulation destination
    pub target: ModTarget,

    /// Region the routing was declared on
    pub region_id: u32,
}

impl ModKey {
    /// Creates a key.
    pub fn new(target: ModTarget, region_id: u32) -> Self {
        Self { target, region_id }
    }
}

/// Opaque handle to a registered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModTargetId(usize);

#[derive(Debug, Clone)]
struct TargetSlot {
    key: ModKey,

    /// One span per voice; `published[v]` frames are valid this block
    buffers: Vec<Vec<f32>>,
    published: Vec<usize>,
}

/// Per-voice modulation span registry.
#[derive(Debug, Clone)]
pub struct ModMatrix {
    num_voices: usize,
    block_size: usize,
    targets: Vec<TargetSlot>,
}

impl ModMatrix {
    /// Creates a matrix sized for a voice count and maximum block size.
    pub fn new(num_voices: usize, block_size: usize) -> Self {
        Self {
            num_voices,
            block_size,
            targets: Vec::new(),
        }
    }

    /// Registers a target, returning its handle. Registering the same key
    /// twice returns the existing handle. Loader side, not realtime.
    pub fn register_target(&mut self, key: ModKey) -> ModTargetId {
        if let Some(id) = self.find_target(&key) {
            return id;
        }
        self.targets.push(TargetSlot {
            key,
            buffers: (0..self.num_voices)
                .map(|_| vec![0.0; self.block_size])
                .collect(),
            published: vec![0; self.num_voices],
        });
        ModTargetId(self.targets.len() - 1)
    }

    /// Looks up the handle for a key.
    pub fn find_target(&self, key: &ModKey) -> Option<ModTargetId> {
        self.targets
            .iter()
            .position(|slot| slot.key == *key)
            .map(ModTargetId)
    }

    /// Marks a voice as active on its region's targets. Called by the
    /// voice when it starts.
    pub fn init_voice(&mut self, voice_id: usize, _region_id: u32, _delay: usize) {
        for slot in self.targets.iter_mut() {
            if voice_id < slot.published.len() {
                slot.published[voice_id] = 0;
            }
        }
    }

    /// Releases a voice's routings. Called by the voice on release.
    pub fn release_voice(&mut self, _voice_id: usize, _region_id: u32, _delay: usize) {}

    /// Publishes a modulation span for (target, voice) for this block.
    pub fn set_modulation(&mut self, target: ModTargetId, voice_id: usize, values: &[f32]) {
        let slot = &mut self.targets[target.0];
        if voice_id >= slot.buffers.len() || values.len() > self.block_size {
            return;
        }
        slot.buffers[voice_id][..values.len()].copy_from_slice(values);
        slot.published[voice_id] = values.len();
    }

    /// Borrows the span published for (target, voice), or `None` when
    /// nothing was published this block.
    pub fn get_modulation(&self, target: ModTargetId, voice_id: usize) -> Option<&[f32]> {
        let slot = self.targets.get(target.0)?;
        let len = *slot.published.get(voice_id)?;
        if len == 0 {
            None
        } else {
            Some(&slot.buffers[voice_id][..len])
        }
    }

    /// Invalidates all published spans. Call once per block, before
    /// sources publish the next round.
    pub fn advance_block(&mut self) {
        for slot in self.targets.iter_mut() {
            slot.published.fill(0);
        }
    }
}
