//! Resources Module
//!
//! This module bundles the collaborators every voice shares: the
//! modulation matrix, the MIDI state, the sample and wavetable pools, the
//! tuning layers and the scratch buffer pool. The engine owns one
//! `Resources` and lends it to each voice call for exactly the duration of
//! that call; nothing in here is voice-specific.

use crate::buffer_pool::BufferPool;
use crate::midi_state::MidiState;
use crate::mod_matrix::ModMatrix;
use crate::sample::FilePool;
use crate::tuning::{StretchTuning, Tuning};
use crate::wavetable::WavePool;

/// Float scratch buffers held ready per engine. Sized for the deepest
/// concurrent checkout of the render stages, with headroom.
const SCRATCH_FLOAT_SLOTS: usize = 8;

/// Integer scratch buffers (sample index spans).
const SCRATCH_INDEX_SLOTS: usize = 2;

/// Shared collaborator bundle for the voice engine.
#[derive(Debug)]
pub struct Resources {
    pub mod_matrix: ModMatrix,
    pub midi: MidiState,
    pub file_pool: FilePool,
    pub wave_pool: WavePool,
    pub tuning: Tuning,
    pub stretch_tuning: Option<StretchTuning>,
    pub buffer_pool: BufferPool,
}

impl Resources {
    /// Creates the bundle for a voice count and maximum block size.
    pub fn new(num_voices: usize, max_block_frames: usize) -> Self {
        Self {
            mod_matrix: ModMatrix::new(num_voices, max_block_frames),
            midi: MidiState::new(),
            file_pool: FilePool::new(),
            wave_pool: WavePool::new(),
            tuning: Tuning::new(),
            stretch_tuning: None,
            buffer_pool: BufferPool::new(
                SCRATCH_FLOAT_SLOTS,
                SCRATCH_INDEX_SLOTS,
                max_block_frames,
            ),
        }
    }

    /// Ends the current block: clears published modulation spans and the
    /// MIDI event lists. Call after all voices rendered.
    pub fn advance_block(&mut self) {
        self.mod_matrix.advance_block();
        self.midi.advance_block();
    }
}
