//! ADSR Envelope Module
//!
//! This module provides the block-oriented envelope generator driving a
//! voice's amplitude, and optionally its pitch and filter cutoff. The
//! envelope follows the classic SFZ shape: delay, attack, hold, decay,
//! sustain, release.
//!
//! # Sample accuracy
//!
//! Release requests carry a frame offset relative to the next rendered
//! block, so a note-off landing mid-block starts the release exactly at
//! that frame. The whole envelope is filled into a span once per block;
//! per-sample multiplies happen downstream in the voice.

use serde::{Deserialize, Serialize};

/// Sustain levels at or below this are treated as silence after decay.
const SUSTAIN_FLOOR: f32 = 1e-4;

/// Envelope timing description, in seconds, as read from a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EgDescriptor {
    /// Delay before the attack starts, in seconds
    pub delay: f32,

    /// Attack time in seconds
    pub attack: f32,

    /// Hold time at peak level, in seconds
    pub hold: f32,

    /// Decay time in seconds
    pub decay: f32,

    /// Sustain level (0.0 to 1.0)
    pub sustain: f32,

    /// Release time in seconds
    pub release: f32,

    /// Level the attack ramps from (0.0 to 1.0)
    pub start: f32,
}

impl Default for EgDescriptor {
    fn default() -> Self {
        Self {
            delay: 0.0,
            attack: 0.0,
            hold: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
            start: 0.0,
        }
    }
}

/// Enumeration of envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    /// Not started
    Idle,

    /// Waiting out the pre-attack delay
    Delay,

    /// Rising to peak level
    Attack,

    /// Holding at peak level
    Hold,

    /// Falling to sustain level
    Decay,

    /// Holding at sustain level until release
    Sustain,

    /// Falling to zero
    Release,

    /// Finished; output is zero
    Done,
}

/// Block-oriented DAHDSR envelope generator.
#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    stage: EnvelopeStage,

    /// Stage lengths in frames
    delay_frames: u32,
    attack_frames: u32,
    hold_frames: u32,
    decay_frames: u32,
    release_frames: u32,

    /// Levels
    start_level: f32,
    sustain: f32,
    current: f32,

    /// Frames left in the current timed stage
    stage_remaining: u32,

    /// Per-frame increment for the current ramp stage
    step: f32,

    /// Release offset pending for the next block fill
    pending_release: Option<usize>,

    released: bool,
}

impl AdsrEnvelope {
    /// Creates an idle envelope.
    pub fn new() -> Self {
        Self {
            stage: EnvelopeStage::Idle,
            delay_frames: 0,
            attack_frames: 0,
            hold_frames: 0,
            decay_frames: 0,
            release_frames: 0,
            start_level: 0.0,
            sustain: 1.0,
            current: 0.0,
            stage_remaining: 0,
            step: 0.0,
            pending_release: None,
            released: false,
        }
    }

    /// Starts the envelope from a region descriptor.
    ///
    /// `extra_delay_frames` is the trigger offset within the block that
    /// started the voice; it extends the descriptor's own delay.
    pub fn start(&mut self, desc: &EgDescriptor, sample_rate: f32, extra_delay_frames: usize) {
        let to_frames = |seconds: f32| (seconds.max(0.0) * sample_rate).round() as u32;

        self.delay_frames = to_frames(desc.delay) + extra_delay_frames as u32;
        self.attack_frames = to_frames(desc.attack);
        self.hold_frames = to_frames(desc.hold);
        self.decay_frames = to_frames(desc.decay);
        self.release_frames = to_frames(desc.release);
        self.start_level = desc.start.clamp(0.0, 1.0);
        self.sustain = desc.sustain.clamp(0.0, 1.0);
        self.current = 0.0;
        self.pending_release = None;
        self.released = false;

        self.stage = EnvelopeStage::Delay;
        self.stage_remaining = self.delay_frames;
        self.step = 0.0;
    }

    /// Schedules the release to begin at `delay` frames into the next
    /// block fill.
    pub fn start_release(&mut self, delay: usize) {
        if !self.released {
            self.released = true;
            self.pending_release = Some(delay);
        }
    }

    /// Overrides the release time, in frames. Used for forced fast
    /// releases (`off`) and the one-shot end-of-sample clamp.
    pub fn set_release_frames(&mut self, frames: u32) {
        self.release_frames = frames;
    }

    /// Frames left before the attack would begin. Zero once the delay
    /// stage has been passed.
    pub fn remaining_delay_frames(&self) -> usize {
        if self.stage == EnvelopeStage::Delay {
            self.stage_remaining as usize
        } else {
            0
        }
    }

    /// True while the envelope still produces (or will produce) signal.
    pub fn is_smoothing(&self) -> bool {
        self.stage != EnvelopeStage::Idle && self.stage != EnvelopeStage::Done
    }

    /// True once a release has been requested.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Current envelope level.
    pub fn current_level(&self) -> f32 {
        self.current
    }

    /// Gets the current envelope stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Returns the envelope to idle.
    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.current = 0.0;
        self.stage_remaining = 0;
        self.step = 0.0;
        self.pending_release = None;
        self.released = false;
    }

    /// Fills `out` with the next block of envelope values.
    pub fn get_block(&mut self, out: &mut [f32]) {
        let release_at = match self.pending_release.take() {
            Some(offset) if offset >= out.len() => {
                // Release lands beyond this block; keep it pending.
                self.pending_release = Some(offset - out.len());
                None
            }
            other => other,
        };

        for (i, sample) in out.iter_mut().enumerate() {
            if release_at == Some(i) {
                self.enter_release();
            }
            *sample = self.tick();
        }
    }

    fn enter_release(&mut self) {
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Done | EnvelopeStage::Release => {}
            _ => {
                self.stage = EnvelopeStage::Release;
                self.stage_remaining = self.release_frames;
                self.step = if self.release_frames > 0 {
                    -self.current / self.release_frames as f32
                } else {
                    0.0
                };
                if self.release_frames == 0 {
                    self.current = 0.0;
                    self.stage = EnvelopeStage::Done;
                }
            }
        }
    }

    fn tick(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Done => 0.0,

            EnvelopeStage::Delay => {
                if self.stage_remaining > 0 {
                    self.stage_remaining -= 1;
                    0.0
                } else {
                    self.enter_attack();
                    self.tick()
                }
            }

            EnvelopeStage::Attack => {
                if self.stage_remaining > 0 {
                    self.stage_remaining -= 1;
                    self.current = (self.current + self.step).min(1.0);
                    self.current
                } else {
                    self.current = 1.0;
                    self.stage = EnvelopeStage::Hold;
                    self.stage_remaining = self.hold_frames;
                    self.tick()
                }
            }

            EnvelopeStage::Hold => {
                if self.stage_remaining > 0 {
                    self.stage_remaining -= 1;
                    self.current
                } else {
                    self.enter_decay();
                    self.tick()
                }
            }

            EnvelopeStage::Decay => {
                if self.stage_remaining > 0 {
                    self.stage_remaining -= 1;
                    self.current = (self.current + self.step).max(self.sustain);
                    self.current
                } else {
                    self.current = self.sustain;
                    if self.sustain <= SUSTAIN_FLOOR {
                        self.stage = EnvelopeStage::Done;
                        self.current = 0.0;
                    } else {
                        self.stage = EnvelopeStage::Sustain;
                    }
                    self.current
                }
            }

            EnvelopeStage::Sustain => self.current,

            EnvelopeStage::Release => {
                if self.stage_remaining > 0 {
                    self.stage_remaining -= 1;
                    self.current = (self.current + self.step).max(0.0);
                    self.current
                } else {
                    self.current = 0.0;
                    self.stage = EnvelopeStage::Done;
                    0.0
                }
            }
        }
    }

    fn enter_attack(&mut self) {
        self.stage = EnvelopeStage::Attack;
        self.stage_remaining = self.attack_frames;
        self.current = self.start_level;
        self.step = if self.attack_frames > 0 {
            (1.0 - self.start_level) / self.attack_frames as f32
        } else {
            0.0
        };
        if self.attack_frames == 0 {
            self.current = 1.0;
            self.stage = EnvelopeStage::Hold;
            self.stage_remaining = self.hold_frames;
        }
    }

    fn enter_decay(&mut self) {
        self.stage = EnvelopeStage::Decay;
        self.stage_remaining = self.decay_frames;
        self.step = if self.decay_frames > 0 {
            (self.sustain - self.current) / self.decay_frames as f32
        } else {
            0.0
        };
        if self.decay_frames == 0 {
            self.current = self.sustain;
            if self.sustain <= SUSTAIN_FLOOR {
                self.stage = EnvelopeStage::Done;
                self.current = 0.0;
            } else {
                self.stage = EnvelopeStage::Sustain;
            }
        }
    }
}

impl Default for AdsrEnvelope {
    fn default() -> Self {
        Self::new()
    }
}
