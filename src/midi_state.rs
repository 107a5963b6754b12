//! MIDI State Module
//!
//! This module keeps the controller state voices read while rendering:
//! current CC values, pitch bend, channel aftertouch and tempo, plus the
//! time-ordered event lists for the current block. Event delays are frame
//! offsets relative to the block start; the engine clears the lists after
//! every block.

/// Number of MIDI controllers tracked.
pub const NUM_CCS: usize = 128;

/// Events pre-reserved per controller so steady CC streams do not allocate.
const EVENTS_CAPACITY: usize = 16;

/// Per-block controller and pitch state.
#[derive(Debug, Clone)]
pub struct MidiState {
    cc_values: [f32; NUM_CCS],
    cc_block_start: [f32; NUM_CCS],
    cc_events: Vec<Vec<(usize, f32)>>,
    pitch_bend: f32,
    pitch_bend_block_start: f32,
    pitch_events: Vec<(usize, f32)>,
    aftertouch: f32,
    tempo_spq: f32,
}

impl MidiState {
    /// Creates a state with all controllers at zero and 120 BPM.
    pub fn new() -> Self {
        Self {
            cc_values: [0.0; NUM_CCS],
            cc_block_start: [0.0; NUM_CCS],
            cc_events: (0..NUM_CCS)
                .map(|_| Vec::with_capacity(EVENTS_CAPACITY))
                .collect(),
            pitch_bend: 0.0,
            pitch_bend_block_start: 0.0,
            pitch_events: Vec::with_capacity(EVENTS_CAPACITY),
            aftertouch: 0.0,
            tempo_spq: 0.5,
        }
    }

    /// Records a CC event at a frame offset within the current block.
    pub fn cc_event(&mut self, delay: usize, cc: u8, value: f32) {
        debug_assert!((0.0..=1.0).contains(&value));
        if (cc as usize) < NUM_CCS {
            self.cc_events[cc as usize].push((delay, value));
            self.cc_values[cc as usize] = value;
        }
    }

    /// Records a pitch-bend event. `value` is normalized to [-1, 1].
    pub fn pitch_bend_event(&mut self, delay: usize, value: f32) {
        debug_assert!((-1.0..=1.0).contains(&value));
        self.pitch_events.push((delay, value));
        self.pitch_bend = value;
    }

    /// Records a channel aftertouch value in [0, 1].
    pub fn aftertouch_event(&mut self, _delay: usize, value: f32) {
        self.aftertouch = value;
    }

    /// Records a tempo change, in seconds per quarter note.
    pub fn tempo_event(&mut self, _delay: usize, seconds_per_quarter: f32) {
        if seconds_per_quarter > 0.0 {
            self.tempo_spq = seconds_per_quarter;
        }
    }

    /// Current value of a controller.
    pub fn get_cc_value(&self, cc: u8) -> f32 {
        if (cc as usize) < NUM_CCS {
            self.cc_values[cc as usize]
        } else {
            0.0
        }
    }

    /// This block's events for a controller, in arrival order.
    pub fn get_cc_events(&self, cc: u8) -> &[(usize, f32)] {
        if (cc as usize) < NUM_CCS {
            &self.cc_events[cc as usize]
        } else {
            &[]
        }
    }

    /// This block's pitch-bend events.
    pub fn get_pitch_events(&self) -> &[(usize, f32)] {
        &self.pitch_events
    }

    /// Current pitch-bend value in [-1, 1].
    pub fn get_pitch_bend(&self) -> f32 {
        self.pitch_bend
    }

    /// Controller value as of the start of the current block, before this
    /// block's events. Event envelopes ramp from here.
    pub fn get_cc_value_at_block_start(&self, cc: u8) -> f32 {
        if (cc as usize) < NUM_CCS {
            self.cc_block_start[cc as usize]
        } else {
            0.0
        }
    }

    /// Pitch-bend value as of the start of the current block.
    pub fn get_pitch_bend_at_block_start(&self) -> f32 {
        self.pitch_bend_block_start
    }

    /// Current channel aftertouch in [0, 1].
    pub fn get_aftertouch(&self) -> f32 {
        self.aftertouch
    }

    /// Current tempo in seconds per quarter note.
    pub fn tempo_spq(&self) -> f32 {
        self.tempo_spq
    }

    /// Drops this block's event lists; values persist into the next block
    /// and become that block's start values.
    pub fn advance_block(&mut self) {
        for events in self.cc_events.iter_mut() {
            events.clear();
        }
        self.pitch_events.clear();
        self.cc_block_start = self.cc_values;
        self.pitch_bend_block_start = self.pitch_bend;
    }
}

impl Default for MidiState {
    fn default() -> Self {
        Self::new()
    }
}
