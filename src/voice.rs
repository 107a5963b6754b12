//! Voice Module
//!
//! This module provides the per-voice synthesis engine: one triggered
//! region, one note, rendered one realtime block at a time. A voice walks
//! a small state machine (idle, playing, clean-me-up) and per block runs
//! the pipeline: raw fill (sample playback or generator), amplitude stage
//! (envelope, volume, crossfades), pan/width/position stage, filter and EQ
//! stage, power follower.
//!
//! # Realtime discipline
//!
//! Nothing on the render path allocates, locks or does I/O. All scratch
//! memory is checked out from the shared buffer pool; when the pool is
//! exhausted the affected stage is skipped for the block and rendering
//! continues degraded instead of blocking.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::adsr::AdsrEnvelope;
use crate::audio_buffer::StereoBuffer;
use crate::buffer_pool::BufferGuard;
use crate::filter::{EqSlot, FilterSlot};
use crate::flex_eg::FlexEg;
use crate::lfo::Lfo;
use crate::mod_matrix::{ModKey, ModTarget, ModTargetId};
use crate::power_follower::PowerFollower;
use crate::region::{
    crossfade_in, crossfade_out, GeneratorKind, LoopMode, OffMode, Region, TriggerEvent,
    TriggerEventType,
};
use crate::resources::Resources;
use crate::sample::SamplePromise;
use crate::smoother::Smoother;
use crate::tuning::{cents_factor, midi_note_frequency};
use crate::wavetable::WavetableOscillator;

/// Unison oscillators a voice carries.
pub const OSCILLATORS_PER_VOICE: usize = 9;

/// Default per-voice slot capacities. Reconfigurable while the voice is
/// free.
const DEFAULT_FILTERS_PER_VOICE: usize = 2;
const DEFAULT_EQS_PER_VOICE: usize = 3;
const DEFAULT_LFOS_PER_VOICE: usize = 4;
const DEFAULT_FLEX_EGS_PER_VOICE: usize = 4;

/// Smoothing times for the control smoothers. The gain smoother sits on
/// the envelope-shaped span, so it stays short to de-click without
/// softening attacks.
const GAIN_SMOOTHING_SECONDS: f32 = 0.001;
const BEND_SMOOTHING_SECONDS: f32 = 0.005;
const XFADE_SMOOTHING_SECONDS: f32 = 0.005;

/// Release time `off` forces in fast mode.
const OFF_RELEASE_SECONDS: f32 = 0.006;

/// +3 dB makeup applied after the equal-power pan stages.
const PAN_MAKEUP_GAIN: f32 = 1.412_537_5;

#[inline]
fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Lifecycle state of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Free slot; no region attached
    Idle,

    /// Rendering a triggered region (possibly releasing)
    Playing,

    /// Envelope finished; waiting for the manager to reset the slot
    CleanMeUp,
}

/// Callback fired on every state transition.
pub type StateListener = Box<dyn FnMut(usize, VoiceState) + Send>;

/// One polyphonic voice.
pub struct Voice {
    id: usize,
    state: VoiceState,
    state_listener: Option<StateListener>,

    sample_rate: f32,
    samples_per_block: usize,

    region: Option<Arc<Region>>,
    promise: Option<SamplePromise>,
    trigger_event: Option<TriggerEvent>,

    // Playback cursor, in oversampled source frames
    source_position: usize,
    float_position_offset: f32,
    speed_ratio: f32,
    pitch_ratio: f32,

    base_gain: f32,
    base_volume_db: f32,

    gain_smoother: Smoother,
    bend_smoother: Smoother,
    xfade_smoother: Smoother,

    eg_amplitude: AdsrEnvelope,
    eg_pitch: AdsrEnvelope,
    eg_filter: AdsrEnvelope,
    pitch_eg_enabled: bool,
    filter_eg_enabled: bool,

    oscillators: [WavetableOscillator; OSCILLATORS_PER_VOICE],
    wave_unison_size: usize,
    wave_detune_ratio: [f32; OSCILLATORS_PER_VOICE],
    wave_left_gain: [f32; OSCILLATORS_PER_VOICE],
    wave_right_gain: [f32; OSCILLATORS_PER_VOICE],
    gaussian_spare: Option<f32>,

    filters: Vec<FilterSlot>,
    eqs: Vec<EqSlot>,
    lfos: Vec<Lfo>,
    flex_egs: Vec<FlexEg>,

    // Block-rate modulation totals gathered before the stages run
    block_gain_db_mod: f32,
    block_cutoff_cents_mod: f32,

    age: i64,
    trigger_delay: Option<i64>,
    initial_delay: i64,
    note_is_off: bool,

    // Cached modulation target handles, valid between start and reset
    amplitude_target: Option<ModTargetId>,
    volume_target: Option<ModTargetId>,
    pan_target: Option<ModTargetId>,
    position_target: Option<ModTargetId>,
    width_target: Option<ModTargetId>,
    pitch_target: Option<ModTargetId>,
    osc_detune_target: Option<ModTargetId>,
    osc_mod_depth_target: Option<ModTargetId>,
    filter_cutoff_target: Option<ModTargetId>,

    // Sister ring: ids of the neighbors, self-looped when alone
    sister_prev: usize,
    sister_next: usize,

    power_follower: PowerFollower,
    sample_quality: i32,

    rng: SmallRng,
}

impl Voice {
    /// Creates a free voice for slot `id`.
    pub fn new(id: usize, sample_rate: f32, samples_per_block: usize) -> Self {
        let mut voice = Self {
            id,
            state: VoiceState::Idle,
            state_listener: None,
            sample_rate,
            samples_per_block,
            region: None,
            promise: None,
            trigger_event: None,
            source_position: 0,
            float_position_offset: 0.0,
            speed_ratio: 1.0,
            pitch_ratio: 1.0,
            base_gain: 1.0,
            base_volume_db: 0.0,
            gain_smoother: Smoother::new(),
            bend_smoother: Smoother::new(),
            xfade_smoother: Smoother::new(),
            eg_amplitude: AdsrEnvelope::new(),
            eg_pitch: AdsrEnvelope::new(),
            eg_filter: AdsrEnvelope::new(),
            pitch_eg_enabled: false,
            filter_eg_enabled: false,
            oscillators: std::array::from_fn(|_| WavetableOscillator::new()),
            wave_unison_size: 0,
            wave_detune_ratio: [1.0; OSCILLATORS_PER_VOICE],
            wave_left_gain: [0.0; OSCILLATORS_PER_VOICE],
            wave_right_gain: [0.0; OSCILLATORS_PER_VOICE],
            gaussian_spare: None,
            filters: (0..DEFAULT_FILTERS_PER_VOICE)
                .map(|_| FilterSlot::new(sample_rate))
                .collect(),
            eqs: (0..DEFAULT_EQS_PER_VOICE)
                .map(|_| EqSlot::new(sample_rate))
                .collect(),
            lfos: (0..DEFAULT_LFOS_PER_VOICE).map(|_| Lfo::new(sample_rate)).collect(),
            flex_egs: (0..DEFAULT_FLEX_EGS_PER_VOICE)
                .map(|_| FlexEg::new(sample_rate))
                .collect(),
            block_gain_db_mod: 0.0,
            block_cutoff_cents_mod: 0.0,
            age: 0,
            trigger_delay: None,
            initial_delay: 0,
            note_is_off: false,
            amplitude_target: None,
            volume_target: None,
            pan_target: None,
            position_target: None,
            width_target: None,
            pitch_target: None,
            osc_detune_target: None,
            osc_mod_depth_target: None,
            filter_cutoff_target: None,
            sister_prev: id,
            sister_next: id,
            power_follower: PowerFollower::new(sample_rate),
            sample_quality: 2,
            rng: SmallRng::seed_from_u64((id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1),
        };
        voice.set_sample_rate(sample_rate);
        voice
    }

    /// Installs (or clears) the state transition listener.
    pub fn set_state_listener(&mut self, listener: Option<StateListener>) {
        self.state_listener = listener;
    }

    // ===== Queries =====

    /// Voice slot id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// A voice is free iff it is idle.
    pub fn is_free(&self) -> bool {
        self.state == VoiceState::Idle
    }

    /// Free, finished, or already releasing.
    pub fn released_or_free(&self) -> bool {
        self.state != VoiceState::Playing || self.eg_amplitude.is_released()
    }

    /// Playback cursor in original-rate frames.
    pub fn source_position(&self) -> usize {
        match &self.promise {
            Some(promise) => self.source_position / promise.oversampling_factor() as usize,
            None => 0,
        }
    }

    /// Power follower value for voice stealing heuristics.
    pub fn average_power(&self) -> f32 {
        self.power_follower.average_power()
    }

    /// Frames rendered since the trigger, net of the trigger delay.
    pub fn age(&self) -> i64 {
        self.age
    }

    /// Interpolation quality currently in effect.
    pub fn current_sample_quality(&self) -> i32 {
        self.sample_quality
    }

    /// The event this voice was started with.
    pub fn trigger_event(&self) -> Option<TriggerEvent> {
        self.trigger_event
    }

    /// Region currently attached, if any.
    pub fn region(&self) -> Option<&Arc<Region>> {
        self.region.as_ref()
    }

    // ===== Sister ring =====

    /// Next voice in the sister ring.
    pub fn sister_next(&self) -> usize {
        self.sister_next
    }

    /// Previous voice in the sister ring.
    pub fn sister_prev(&self) -> usize {
        self.sister_prev
    }

    /// Sets the next ring neighbor.
    pub fn set_next_sister_voice(&mut self, id: usize) {
        self.sister_next = id;
    }

    /// Sets the previous ring neighbor.
    pub fn set_previous_sister_voice(&mut self, id: usize) {
        self.sister_prev = id;
    }

    // ===== Configuration (non-realtime, voice must be free) =====

    /// Updates the sample rate and every rate-dependent component.
    /// Calling twice with the same rate changes nothing.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.gain_smoother
            .set_smoothing_seconds(GAIN_SMOOTHING_SECONDS, sample_rate);
        self.bend_smoother
            .set_smoothing_seconds(BEND_SMOOTHING_SECONDS, sample_rate);
        self.xfade_smoother
            .set_smoothing_seconds(XFADE_SMOOTHING_SECONDS, sample_rate);
        self.power_follower.set_sample_rate(sample_rate);
        for filter in self.filters.iter_mut() {
            filter.set_sample_rate(sample_rate);
        }
        for eq in self.eqs.iter_mut() {
            eq.set_sample_rate(sample_rate);
        }
        for lfo in self.lfos.iter_mut() {
            lfo.set_sample_rate(sample_rate);
        }
        for eg in self.flex_egs.iter_mut() {
            eg.set_sample_rate(sample_rate);
        }
        for osc in self.oscillators.iter_mut() {
            osc.set_sample_rate(sample_rate);
        }
    }

    /// Updates the maximum block size.
    pub fn set_samples_per_block(&mut self, samples_per_block: usize) {
        self.samples_per_block = samples_per_block;
    }

    /// Resizes the filter slot list. Ignored while the voice plays.
    pub fn set_max_filters_per_voice(&mut self, count: usize) {
        if !self.is_free() {
            return;
        }
        self.filters
            .resize_with(count, || FilterSlot::new(self.sample_rate));
    }

    /// Resizes the EQ slot list. Ignored while the voice plays.
    pub fn set_max_eqs_per_voice(&mut self, count: usize) {
        if !self.is_free() {
            return;
        }
        self.eqs.resize_with(count, || EqSlot::new(self.sample_rate));
    }

    /// Resizes the LFO list. Ignored while the voice plays.
    pub fn set_max_lfos_per_voice(&mut self, count: usize) {
        if !self.is_free() {
            return;
        }
        self.lfos.resize_with(count, || Lfo::new(self.sample_rate));
    }

    /// Resizes the flex envelope list. Ignored while the voice plays.
    pub fn set_max_flex_egs_per_voice(&mut self, count: usize) {
        if !self.is_free() {
            return;
        }
        self.flex_egs
            .resize_with(count, || FlexEg::new(self.sample_rate));
    }

    /// Enables the per-voice pitch EG.
    pub fn set_pitch_eg_enabled(&mut self, enabled: bool) {
        self.pitch_eg_enabled = enabled;
    }

    /// Enables the per-voice filter EG.
    pub fn set_filter_eg_enabled(&mut self, enabled: bool) {
        self.filter_eg_enabled = enabled;
    }

    // ===== Lifecycle =====

    /// Starts the voice on a region.
    ///
    /// A disabled region leaves the voice idle. A sampled region whose
    /// promise cannot be acquired sends the voice straight to clean-up.
    /// `delay` is the trigger offset in frames within the next block.
    pub fn start_voice(
        &mut self,
        region: Arc<Region>,
        delay: usize,
        event: TriggerEvent,
        resources: &mut Resources,
    ) {
        debug_assert!((0.0..=1.0).contains(&event.value));
        if region.disabled {
            return;
        }

        self.trigger_event = Some(event);
        self.note_is_off = false;

        if !region.is_oscillator() {
            match resources.file_pool.get_file_promise(&region.sample) {
                Some(promise) => self.promise = Some(promise),
                None => {
                    log::debug!("voice {}: no promise for sample '{}'", self.id, region.sample);
                    self.region = Some(region);
                    self.switch_state(VoiceState::CleanMeUp);
                    return;
                }
            }
        }

        let velocity = event.value;
        let note = match event.event_type {
            TriggerEventType::NoteOn => event.number,
            TriggerEventType::Cc => region.pitch_keycenter,
        };

        // Base pitch ratio: retuned key, region variation, stretch layer.
        let retuned_key = resources.tuning.key_fractional_12tet(note);
        let mut pitch_ratio = region.base_pitch_variation(retuned_key, velocity);
        if region.pitch_random > 0.0 {
            pitch_ratio *=
                cents_factor(self.rng.gen_range(-region.pitch_random..=region.pitch_random));
        }
        if let Some(stretch) = &resources.stretch_tuning {
            pitch_ratio *= stretch.ratio_for_fractional_key(retuned_key);
        }
        self.pitch_ratio = pitch_ratio;

        if let Some(promise) = &self.promise {
            let oversampling = promise.oversampling_factor();
            self.speed_ratio = promise.sample_rate() * oversampling as f32 / self.sample_rate;
            self.source_position = region.offset.saturating_mul(oversampling as usize);
            self.float_position_offset = 0.0;
        }

        if region.is_oscillator() {
            self.setup_oscillators(&region, resources);
            self.setup_oscillator_unison(&region);
        }

        self.sample_quality = region.sample_quality;
        self.base_gain = region.base_gain(velocity);
        self.base_volume_db = region.volume;

        self.eg_amplitude.start(&region.amp_eg, self.sample_rate, 0);
        if self.pitch_eg_enabled {
            if let Some(desc) = &region.pitch_eg {
                self.eg_pitch.start(desc, self.sample_rate, 0);
            }
        }
        if self.filter_eg_enabled {
            if let Some(desc) = &region.filter_eg {
                self.eg_filter.start(desc, self.sample_rate, 0);
            }
        }

        for index in 0..region.filters.len().min(self.filters.len()) {
            self.filters[index].setup(&region, index, note, velocity);
        }
        for index in 0..region.eqs.len().min(self.eqs.len()) {
            self.eqs[index].setup(&region, index, velocity);
        }
        for index in 0..region.lfos.len().min(self.lfos.len()) {
            self.lfos[index].configure(&region.lfos[index], resources.midi.tempo_spq());
        }
        for index in 0..region.flex_egs.len().min(self.flex_egs.len()) {
            self.flex_egs[index].configure(&region.flex_egs[index]);
        }

        // Smoothers jump to their trigger-time values so the first block
        // does not ramp in from stale state. The gain smoother starts at
        // zero with the envelope.
        self.gain_smoother.reset(0.0);
        let mut xfade = 1.0;
        for range in &region.xfade_cc_in {
            xfade *= crossfade_in(
                range,
                resources.midi.get_cc_value(range.cc),
                region.xfade_cc_curve,
            );
        }
        for range in &region.xfade_cc_out {
            xfade *= crossfade_out(
                range,
                resources.midi.get_cc_value(range.cc),
                region.xfade_cc_curve,
            );
        }
        self.xfade_smoother.reset(xfade);
        self.bend_smoother
            .reset(bend_factor(&region, resources.midi.get_pitch_bend()));

        self.initial_delay = delay as i64 + (region.delay.max(0.0) * self.sample_rate) as i64;
        self.trigger_delay = Some(delay as i64);
        self.age = 0;
        self.block_gain_db_mod = 0.0;
        self.block_cutoff_cents_mod = 0.0;

        let region_id = region.id;
        let matrix = &resources.mod_matrix;
        self.amplitude_target = matrix.find_target(&ModKey::new(ModTarget::Amplitude, region_id));
        self.volume_target = matrix.find_target(&ModKey::new(ModTarget::Volume, region_id));
        self.pan_target = matrix.find_target(&ModKey::new(ModTarget::Pan, region_id));
        self.position_target = matrix.find_target(&ModKey::new(ModTarget::Position, region_id));
        self.width_target = matrix.find_target(&ModKey::new(ModTarget::Width, region_id));
        self.pitch_target = matrix.find_target(&ModKey::new(ModTarget::Pitch, region_id));
        self.osc_detune_target =
            matrix.find_target(&ModKey::new(ModTarget::OscillatorDetune, region_id));
        self.osc_mod_depth_target =
            matrix.find_target(&ModKey::new(ModTarget::OscillatorModDepth, region_id));
        self.filter_cutoff_target =
            matrix.find_target(&ModKey::new(ModTarget::FilterCutoff, region_id));
        resources.mod_matrix.init_voice(self.id, region_id, delay);

        self.region = Some(region);
        self.switch_state(VoiceState::Playing);
    }

    /// Starts the release phase at `delay` frames into the next block.
    ///
    /// A release landing before the envelope's pre-attack delay has
    /// elapsed means the note never became audible; the voice jumps
    /// straight to clean-up.
    pub fn release(&mut self, delay: usize, resources: &mut Resources) {
        if self.state != VoiceState::Playing {
            return;
        }
        if self.eg_amplitude.is_released() {
            return;
        }

        let frames_until_audible =
            self.eg_amplitude.remaining_delay_frames() as i64 + self.initial_delay;
        if frames_until_audible > delay as i64 {
            self.switch_state(VoiceState::CleanMeUp);
            return;
        }

        self.eg_amplitude.start_release(delay);
        if self.pitch_eg_enabled {
            self.eg_pitch.start_release(delay);
        }
        if self.filter_eg_enabled {
            self.eg_filter.start_release(delay);
        }
        for eg in self.flex_egs.iter_mut() {
            if eg.is_active() {
                eg.release();
            }
        }
        if let Some(region) = &self.region {
            resources.mod_matrix.release_voice(self.id, region.id, delay);
        }
    }

    /// Forces a release with the region's off-mode timing.
    pub fn off(&mut self, delay: usize, resources: &mut Resources) {
        if self.state != VoiceState::Playing {
            return;
        }
        if let Some(region) = &self.region {
            let release_seconds = match region.off_mode {
                OffMode::Fast => OFF_RELEASE_SECONDS,
                OffMode::Time => region.off_time.max(0.0),
            };
            self.eg_amplitude
                .set_release_frames((release_seconds * self.sample_rate) as u32);
        }
        self.release(delay, resources);
    }

    /// Returns the voice to the free state. Idempotent. The voice's own
    /// ring pointers return to the self-loop; neighbors are expected to
    /// have been re-linked by the manager (see [`splice_out_of_ring`]).
    pub fn reset(&mut self) {
        self.switch_state(VoiceState::Idle);
        self.region = None;
        self.promise = None;
        self.trigger_event = None;
        self.source_position = 0;
        self.float_position_offset = 0.0;
        self.speed_ratio = 1.0;
        self.pitch_ratio = 1.0;
        self.base_gain = 1.0;
        self.base_volume_db = 0.0;
        self.gain_smoother.reset(0.0);
        self.bend_smoother.reset(1.0);
        self.xfade_smoother.reset(1.0);
        self.eg_amplitude.reset();
        self.eg_pitch.reset();
        self.eg_filter.reset();
        for filter in self.filters.iter_mut() {
            filter.reset();
        }
        for eq in self.eqs.iter_mut() {
            eq.reset();
        }
        for lfo in self.lfos.iter_mut() {
            lfo.reset();
        }
        for eg in self.flex_egs.iter_mut() {
            eg.reset();
        }
        for osc in self.oscillators.iter_mut() {
            osc.reset_phase();
        }
        self.wave_unison_size = 0;
        self.gaussian_spare = None;
        self.block_gain_db_mod = 0.0;
        self.block_cutoff_cents_mod = 0.0;
        self.age = 0;
        self.trigger_delay = None;
        self.initial_delay = 0;
        self.note_is_off = false;
        self.amplitude_target = None;
        self.volume_target = None;
        self.pan_target = None;
        self.position_target = None;
        self.width_target = None;
        self.pitch_target = None;
        self.osc_detune_target = None;
        self.osc_mod_depth_target = None;
        self.filter_cutoff_target = None;
        self.sister_prev = self.id;
        self.sister_next = self.id;
        self.power_follower.clear();
        self.sample_quality = 2;
    }

    // ===== Event intake =====

    /// Handles a note-off for this voice's note.
    ///
    /// One-shot regions play through. When sustain checking is on and the
    /// sustain pedal is held, the release is deferred until the pedal
    /// falls below the threshold (see [`Voice::register_cc`]).
    pub fn register_note_off(
        &mut self,
        delay: usize,
        note: u8,
        velocity: f32,
        resources: &mut Resources,
    ) {
        debug_assert!((0.0..=1.0).contains(&velocity));
        if self.state != VoiceState::Playing {
            return;
        }
        let Some(region) = self.region.clone() else {
            return;
        };
        let Some(trigger) = self.trigger_event else {
            return;
        };
        if trigger.event_type != TriggerEventType::NoteOn || trigger.number != note {
            return;
        }

        self.note_is_off = true;

        if region.loop_mode == LoopMode::OneShot {
            return;
        }
        if region.check_sustain
            && resources.midi.get_cc_value(region.sustain_cc) >= region.sustain_threshold
        {
            return;
        }
        self.release(delay, resources);
    }

    /// Handles a CC change. Fires a deferred release when the sustain
    /// pedal drops below the threshold after the note went off.
    pub fn register_cc(&mut self, delay: usize, cc: u8, value: f32, resources: &mut Resources) {
        debug_assert!((0.0..=1.0).contains(&value));
        if !self.note_is_off {
            return;
        }
        let Some(region) = self.region.clone() else {
            return;
        };
        if region.check_sustain && cc == region.sustain_cc && value < region.sustain_threshold {
            self.release(delay, resources);
        }
    }

    /// Accepts a pitch-wheel event. Pitch is re-read from the MIDI state
    /// during block assembly, so nothing else happens here.
    pub fn register_pitch_wheel(&mut self, _delay: usize, value: f32) {
        debug_assert!((-1.0..=1.0).contains(&value));
    }

    /// Accepts an aftertouch event; consumed via the MIDI state.
    pub fn register_aftertouch(&mut self, _delay: usize, value: f32) {
        debug_assert!((0.0..=1.0).contains(&value));
    }

    /// Accepts a tempo event; tempo-synced LFOs resolve their rate from
    /// the MIDI state when the voice starts.
    pub fn register_tempo(&mut self, _delay: usize, seconds_per_quarter: f32) {
        debug_assert!(seconds_per_quarter > 0.0);
    }

    /// Off-group check: turns this voice off when `other` was triggered
    /// in the group this voice's region listens to.
    pub fn check_off_group(
        &mut self,
        other: &Region,
        delay: usize,
        note: u8,
        resources: &mut Resources,
    ) -> bool {
        let Some(region) = self.region.clone() else {
            return false;
        };
        let Some(trigger) = self.trigger_event else {
            return false;
        };
        if trigger.event_type != TriggerEventType::NoteOn {
            return false;
        }
        if region.off_by == Some(other.group)
            && (region.group != other.group || trigger.number != note)
        {
            self.off(delay, resources);
            return true;
        }
        false
    }

    // ===== Rendering =====

    /// Renders the next block of stereo audio for this voice. A voice
    /// that is not playing renders exact zeros; the power follower meters
    /// the output either way so stealing scores keep decaying.
    pub fn render_block(&mut self, resources: &Resources, out: &mut StereoBuffer) {
        out.clear();
        let frames = out.frames();
        if frames == 0 {
            return;
        }
        debug_assert!(frames <= self.samples_per_block);

        if self.state == VoiceState::Playing {
            if let Some(region) = self.region.clone() {
                let skip = self.initial_delay.clamp(0, frames as i64) as usize;
                self.initial_delay -= skip as i64;

                if skip < frames {
                    let pitch_mod_guard =
                        self.compute_block_modulation(resources, frames - skip, &region);
                    let pitch_mod = pitch_mod_guard.as_deref();

                    let (left_all, right_all) = out.channels_mut();
                    let left = &mut left_all[skip..];
                    let right = &mut right_all[skip..];

                    let stereo = if region.is_oscillator() {
                        self.fill_with_generator(resources, left, right, skip, pitch_mod, &region)
                    } else {
                        self.fill_with_data(resources, left, right, skip, pitch_mod, &region);
                        self.promise
                            .as_ref()
                            .map(|promise| promise.get_data().is_stereo())
                            .unwrap_or(false)
                    };
                    drop(pitch_mod_guard);

                    self.amplitude_stage(resources, left, right, skip, &region);
                    self.pan_stage(resources, left, right, skip, stereo, &region);
                    self.filter_stage(resources, left, right, skip, &region);
                }

                self.advance_age(frames);
                if !self.eg_amplitude.is_smoothing() {
                    self.switch_state(VoiceState::CleanMeUp);
                }
            }
        }

        self.power_follower.process(out.left(), out.right());

        debug_assert!(out.left().iter().all(|s| s.is_finite()));
        debug_assert!(out.right().iter().all(|s| s.is_finite()));
    }

    // ===== Internals =====

    fn switch_state(&mut self, new_state: VoiceState) {
        if self.state != new_state {
            self.state = new_state;
            if let Some(listener) = self.state_listener.as_mut() {
                listener(self.id, new_state);
            }
        }
    }

    fn advance_age(&mut self, frames: usize) {
        self.age += frames as i64;
        if let Some(delay) = self.trigger_delay.take() {
            self.age = (self.age - delay).max(0);
        }
    }

    /// Borrows the modulation span for a cached target, aligned to the
    /// rendered sub-span.
    fn modulation<'a>(
        &self,
        resources: &'a Resources,
        target: Option<ModTargetId>,
        skip: usize,
        frames: usize,
    ) -> Option<&'a [f32]> {
        let span = resources.mod_matrix.get_modulation(target?, self.id)?;
        if span.len() >= skip + frames {
            Some(&span[skip..skip + frames])
        } else {
            None
        }
    }

    fn fill_control_span(
        &self,
        resources: &Resources,
        base: f32,
        target: Option<ModTargetId>,
        scale: f32,
        skip: usize,
        out: &mut [f32],
    ) {
        out.fill(base);
        if let Some(span) = self.modulation(resources, target, skip, out.len()) {
            for (value, &modulation) in out.iter_mut().zip(span) {
                *value += modulation;
            }
        }
        for value in out.iter_mut() {
            *value *= scale;
        }
    }

    /// Advances the voice-internal modulators (LFOs, flex EGs, pitch and
    /// filter EGs) for this block. Gain and cutoff contributions become
    /// block-rate scalars; pitch contributions accumulate per sample in
    /// cents into the returned span.
    fn compute_block_modulation<'a>(
        &mut self,
        resources: &'a Resources,
        frames: usize,
        region: &Region,
    ) -> Option<BufferGuard<'a>> {
        self.block_gain_db_mod = 0.0;
        self.block_cutoff_cents_mod = 0.0;

        let lfos_running = self.lfos.iter().any(|lfo| lfo.is_active());
        let flex_running = self.flex_egs.iter().any(|eg| eg.is_active());
        let pitch_eg_running = self.pitch_eg_enabled && region.pitch_eg.is_some();
        let filter_eg_running = self.filter_eg_enabled && region.filter_eg.is_some();
        if !lfos_running && !flex_running && !pitch_eg_running && !filter_eg_running {
            return None;
        }

        let wants_pitch_span = (pitch_eg_running && region.pitch_eg_depth != 0.0)
            || self
                .lfos
                .iter()
                .any(|lfo| lfo.is_active() && lfo.descriptor().pitch_depth != 0.0)
            || self
                .flex_egs
                .iter()
                .any(|eg| eg.is_active() && eg.descriptor().pitch_depth != 0.0);

        let mut pitch_guard = if wants_pitch_span {
            resources.buffer_pool.get_buffer(frames)
        } else {
            None
        };

        let mut scratch = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return None,
        };

        for lfo in self.lfos.iter_mut() {
            if !lfo.is_active() {
                continue;
            }
            lfo.fill_block(&mut scratch);
            let desc = *lfo.descriptor();
            if desc.pitch_depth != 0.0 {
                if let Some(pitch) = pitch_guard.as_deref_mut() {
                    for (cents, &value) in pitch.iter_mut().zip(scratch.iter()) {
                        *cents += value * desc.pitch_depth;
                    }
                }
            }
            let tail = scratch[frames - 1];
            self.block_gain_db_mod += tail * desc.gain_depth;
            self.block_cutoff_cents_mod += tail * desc.cutoff_depth;
        }

        for eg in self.flex_egs.iter_mut() {
            if !eg.is_active() {
                continue;
            }
            eg.fill_block(&mut scratch);
            let pitch_depth = eg.descriptor().pitch_depth;
            let gain_depth = eg.descriptor().gain_depth;
            if pitch_depth != 0.0 {
                if let Some(pitch) = pitch_guard.as_deref_mut() {
                    for (cents, &value) in pitch.iter_mut().zip(scratch.iter()) {
                        *cents += value * pitch_depth;
                    }
                }
            }
            self.block_gain_db_mod += scratch[frames - 1] * gain_depth;
        }

        if pitch_eg_running {
            self.eg_pitch.get_block(&mut scratch);
            if let Some(pitch) = pitch_guard.as_deref_mut() {
                for (cents, &value) in pitch.iter_mut().zip(scratch.iter()) {
                    *cents += value * region.pitch_eg_depth;
                }
            }
        }

        if filter_eg_running {
            self.eg_filter.get_block(&mut scratch);
            self.block_cutoff_cents_mod += scratch[frames - 1] * region.filter_eg_depth;
        }

        pitch_guard
    }

    /// Applies the per-sample pitch modifiers to a pitch span: the bend
    /// envelope through the bend smoother, the matrix `Pitch` target, and
    /// the voice-internal cents accumulated by
    /// [`Voice::compute_block_modulation`].
    fn pitch_envelope(
        &mut self,
        resources: &Resources,
        pitch_span: &mut [f32],
        skip: usize,
        pitch_mod_cents: Option<&[f32]>,
        region: &Region,
    ) {
        let frames = pitch_span.len();

        if let Some(mut bend) = resources.buffer_pool.get_buffer(frames) {
            let events = resources.midi.get_pitch_events();
            build_linear_envelope(
                events,
                resources.midi.get_pitch_bend_at_block_start(),
                skip,
                &mut bend,
            );
            for value in bend.iter_mut() {
                *value = bend_factor(region, *value);
            }
            let can_shortcut = events.len() <= 1;
            self.bend_smoother.process_in_place(&mut bend, can_shortcut);
            for (pitch, &factor) in pitch_span.iter_mut().zip(bend.iter()) {
                *pitch *= factor;
            }
        }

        if let Some(span) = self.modulation(resources, self.pitch_target, skip, frames) {
            for (pitch, &cents) in pitch_span.iter_mut().zip(span) {
                *pitch *= cents_factor(cents);
            }
        }

        if let Some(cents_span) = pitch_mod_cents {
            for (pitch, &cents) in pitch_span.iter_mut().zip(cents_span) {
                *pitch *= cents_factor(cents);
            }
        }
    }

    /// Sample playback fill: resamples the promise's data into the block,
    /// wrapping loops or clamping at the sample end.
    fn fill_with_data(
        &mut self,
        resources: &Resources,
        left: &mut [f32],
        right: &mut [f32],
        skip: usize,
        pitch_mod: Option<&[f32]>,
        region: &Region,
    ) {
        let frames = left.len();
        let promise = match self.promise.clone() {
            Some(promise) => promise,
            None => return,
        };
        let data = promise.get_data();
        let source_frames = data.frames();
        if source_frames == 0 {
            return;
        }

        let mut jumps = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };
        let mut coeffs = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };
        let mut indices = match resources.buffer_pool.get_index_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };

        let base_jump = self.pitch_ratio * self.speed_ratio;
        jumps.fill(base_jump);
        self.pitch_envelope(resources, &mut jumps, skip, pitch_mod, region);

        // Cumulative displacement from the current cursor, fractional
        // carry included.
        jumps[0] += self.float_position_offset;
        let mut accumulator = 0.0f32;
        for jump in jumps.iter_mut() {
            accumulator += *jump;
            *jump = accumulator;
        }

        let position = self.source_position as i32;
        for i in 0..frames {
            let displaced = jumps[i];
            let whole = displaced as i32;
            coeffs[i] = displaced - whole as f32;
            indices[i] = position + whole;
        }

        let oversampling = promise.oversampling_factor();
        let (loop_start, loop_end) = region.loop_range(oversampling);
        if region.loops() && loop_end < source_frames {
            let start = loop_start as i32;
            let end = loop_end as i32;
            let span = end + 1 - start;
            for index in indices.iter_mut() {
                if *index > end {
                    *index = start + (*index - start) % span;
                }
            }
        } else {
            let end =
                (region.true_sample_end(oversampling).min(source_frames) as i32 - 1).max(0);
            if let Some(first) = indices.iter().position(|&index| index > end) {
                // Ran off the end of a one-shot or non-looping sample.
                self.eg_amplitude.set_release_frames(0);
                self.eg_amplitude.start_release(first);
                for i in first..frames {
                    indices[i] = end;
                    coeffs[i] = 1.0;
                }
            }
        }

        match data.right.as_ref() {
            Some(right_source) => {
                interpolate_channel(&data.left, &indices, &coeffs, self.sample_quality, left);
                interpolate_channel(right_source, &indices, &coeffs, self.sample_quality, right);
            }
            None => {
                interpolate_channel(&data.left, &indices, &coeffs, self.sample_quality, left);
                right.copy_from_slice(left);
            }
        }

        self.source_position = indices[frames - 1].max(0) as usize;
        self.float_position_offset = coeffs[frames - 1];

        debug_assert!(left.iter().all(|s| s.is_finite()));
        debug_assert!(right.iter().all(|s| s.is_finite()));
    }

    /// Generator fill: noise, a single wavetable, a detuned unison stack,
    /// or a two-oscillator RM/FM pair. Returns whether the output is
    /// genuinely stereo.
    fn fill_with_generator(
        &mut self,
        resources: &Resources,
        left: &mut [f32],
        right: &mut [f32],
        skip: usize,
        pitch_mod: Option<&[f32]>,
        region: &Arc<Region>,
    ) -> bool {
        let frames = left.len();

        match region.generator_kind() {
            GeneratorKind::Silence => return false,
            GeneratorKind::Noise => {
                for sample in left.iter_mut() {
                    *sample = self.rng.gen_range(-1.0..=1.0);
                }
                for sample in right.iter_mut() {
                    *sample = self.rng.gen_range(-1.0..=1.0);
                }
                return true;
            }
            GeneratorKind::GaussianNoise => {
                for sample in left.iter_mut() {
                    *sample = self.gaussian();
                }
                for sample in right.iter_mut() {
                    *sample = self.gaussian();
                }
                return true;
            }
            _ => {}
        }

        let mut frequencies = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return false,
        };
        frequencies.fill(self.pitch_ratio * midi_note_frequency(region.pitch_keycenter as f32));
        self.pitch_envelope(resources, &mut frequencies, skip, pitch_mod, region);

        let mode = region.oscillator_mode;
        let multi = region.oscillator_multi;

        if mode <= 0 && multi < 2 {
            // Single oscillator, duplicated to both channels.
            self.oscillators[0].process(&frequencies, 1.0, left);
            right.copy_from_slice(left);
            return false;
        }

        if mode <= 0 && multi >= 3 {
            // Unison stack mixed with the complementary pan gains.
            let mut osc_out = match resources.buffer_pool.get_buffer(frames) {
                Some(buffer) => buffer,
                None => return false,
            };
            let detune_mod = self.modulation(resources, self.osc_detune_target, skip, frames);
            for u in 0..self.wave_unison_size {
                match detune_mod {
                    Some(mod_span) => {
                        let mut detunes = match resources.buffer_pool.get_buffer(frames) {
                            Some(buffer) => buffer,
                            None => return true,
                        };
                        for (detune, &cents) in detunes.iter_mut().zip(mod_span) {
                            *detune = cents_factor(cents) * self.wave_detune_ratio[u];
                        }
                        self.oscillators[u].process_modulated(
                            &frequencies,
                            &detunes,
                            &mut osc_out,
                        );
                    }
                    None => {
                        self.oscillators[u].process(
                            &frequencies,
                            self.wave_detune_ratio[u],
                            &mut osc_out,
                        );
                    }
                }
                for i in 0..frames {
                    left[i] += osc_out[i] * self.wave_left_gain[u];
                    right[i] += osc_out[i] * self.wave_right_gain[u];
                }
            }
            return true;
        }

        // Modulated pair: oscillator 1 modulates oscillator 0.
        let mut modulator = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return false,
        };
        match self.modulation(resources, self.osc_detune_target, skip, frames) {
            Some(mod_span) => {
                let mut detunes = match resources.buffer_pool.get_buffer(frames) {
                    Some(buffer) => buffer,
                    None => return false,
                };
                for (detune, &cents) in detunes.iter_mut().zip(mod_span) {
                    *detune = cents_factor(cents) * self.wave_detune_ratio[1];
                }
                self.oscillators[1].process_modulated(&frequencies, &detunes, &mut modulator);
            }
            None => {
                self.oscillators[1].process(
                    &frequencies,
                    self.wave_detune_ratio[1],
                    &mut modulator,
                );
            }
        }

        // Depth is in percent, as is its modulation.
        match self.modulation(resources, self.osc_mod_depth_target, skip, frames) {
            Some(depth_span) => {
                for (value, &depth) in modulator.iter_mut().zip(depth_span) {
                    *value *= (region.oscillator_mod_depth + depth) * 0.01;
                }
            }
            None => {
                let depth = region.oscillator_mod_depth * 0.01;
                for value in modulator.iter_mut() {
                    *value *= depth;
                }
            }
        }

        match mode {
            0 => {
                // Ring modulation.
                self.oscillators[0].process(&frequencies, 1.0, left);
                for (sample, &factor) in left.iter_mut().zip(modulator.iter()) {
                    *sample *= factor;
                }
            }
            _ => {
                // Frequency modulation; phase modulation (mode 1) is not
                // implemented and takes this path too.
                for (freq, &deviation) in frequencies.iter_mut().zip(modulator.iter()) {
                    *freq += deviation * *freq;
                }
                self.oscillators[0].process(&frequencies, 1.0, left);
            }
        }
        right.copy_from_slice(left);
        false
    }

    /// Configures the oscillator bank for a generator region.
    fn setup_oscillators(&mut self, region: &Region, resources: &Resources) {
        let table = match region.generator_kind() {
            GeneratorKind::Sine => Some(resources.wave_pool.get_wave_sin()),
            GeneratorKind::Triangle => Some(resources.wave_pool.get_wave_triangle()),
            GeneratorKind::Square => Some(resources.wave_pool.get_wave_square()),
            GeneratorKind::Saw => Some(resources.wave_pool.get_wave_saw()),
            GeneratorKind::FileWave => Some(resources.wave_pool.get_file_wave(&region.sample)),
            GeneratorKind::Noise | GeneratorKind::GaussianNoise | GeneratorKind::Silence => None,
        };
        for osc in self.oscillators.iter_mut() {
            osc.set_sample_rate(self.sample_rate);
            osc.set_quality(region.sample_quality);
            osc.reset_phase();
            if let Some(table) = &table {
                osc.set_wavetable(Arc::clone(table));
            }
        }
        self.gaussian_spare = None;
    }

    /// Computes the unison detune ratios and the complementary triangular
    /// pan gains.
    fn setup_oscillator_unison(&mut self, region: &Region) {
        let mode = region.oscillator_mode;
        let multi = region.oscillator_multi;

        if mode <= 0 && multi < 2 {
            self.wave_unison_size = 1;
            self.wave_detune_ratio[0] = 1.0;
            self.wave_left_gain[0] = 1.0;
            self.wave_right_gain[0] = 1.0;
            return;
        }

        if mode > 0 || multi < 3 {
            // Carrier plus modulator.
            self.wave_unison_size = 2;
            self.wave_detune_ratio[0] = 1.0;
            self.wave_detune_ratio[1] = cents_factor(region.oscillator_detune);
            self.wave_left_gain[0] = 1.0;
            self.wave_right_gain[0] = 1.0;
            self.wave_left_gain[1] = 1.0;
            self.wave_right_gain[1] = 1.0;
            return;
        }

        let size = (multi as usize).min(OSCILLATORS_PER_VOICE);
        self.wave_unison_size = size;
        let detune = region.oscillator_detune;

        let mut detunes = [0.0f32; OSCILLATORS_PER_VOICE];
        detunes[0] = 0.0;
        detunes[1] = -detune;
        detunes[2] = detune;
        for i in 3..size {
            let step = ((i - 1) / 2) as f32;
            let sign = if i % 2 == 1 { -1.0 } else { 1.0 };
            detunes[i] = sign * 0.25 * step * detune;
        }
        for i in 0..size {
            self.wave_detune_ratio[i] = cents_factor(detunes[i]);
        }

        self.wave_left_gain[..size].fill(0.0);
        self.wave_right_gain[..size].fill(0.0);
        for i in 0..=(size - 2) {
            let gain = 1.0 - i as f32 / (size - 1) as f32;
            self.wave_left_gain[size - 1 - i] = gain;
            self.wave_right_gain[i] = gain;
        }
    }

    fn gaussian(&mut self) -> f32 {
        if let Some(spare) = self.gaussian_spare.take() {
            return spare;
        }
        let u1: f32 = self.rng.gen::<f32>().max(1e-12);
        let u2: f32 = self.rng.gen();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        // Scale so ~4 sigma stays inside [-1, 1].
        self.gaussian_spare = Some(radius * theta.sin() * 0.25);
        radius * theta.cos() * 0.25
    }

    /// Amplitude stage: envelope, base gain, matrix amplitude/volume,
    /// gain smoother, crossfades.
    fn amplitude_stage(
        &mut self,
        resources: &Resources,
        left: &mut [f32],
        right: &mut [f32],
        skip: usize,
        region: &Arc<Region>,
    ) {
        let frames = left.len();
        let mut amplitude = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };
        self.eg_amplitude.get_block(&mut amplitude);

        for value in amplitude.iter_mut() {
            *value *= self.base_gain;
        }
        if let Some(span) = self.modulation(resources, self.amplitude_target, skip, frames) {
            for (value, &modulation) in amplitude.iter_mut().zip(span) {
                *value *= modulation / 100.0;
            }
        }
        let volume_gain = db_to_gain(self.base_volume_db) * db_to_gain(self.block_gain_db_mod);
        for value in amplitude.iter_mut() {
            *value *= volume_gain;
        }
        if let Some(span) = self.modulation(resources, self.volume_target, skip, frames) {
            for (value, &modulation) in amplitude.iter_mut().zip(span) {
                *value *= db_to_gain(modulation);
            }
        }

        self.gain_smoother.process_in_place(&mut amplitude, false);
        self.apply_crossfades(resources, &mut amplitude, skip, region);

        for i in 0..frames {
            left[i] *= amplitude[i];
            right[i] *= amplitude[i];
        }
    }

    /// Multiplies the CC crossfade envelopes into the amplitude span.
    fn apply_crossfades(
        &mut self,
        resources: &Resources,
        amplitude: &mut [f32],
        skip: usize,
        region: &Arc<Region>,
    ) {
        if region.xfade_cc_in.is_empty() && region.xfade_cc_out.is_empty() {
            return;
        }
        let frames = amplitude.len();
        let mut xfade = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };
        let mut cc_envelope = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };

        xfade.fill(1.0);
        let curve = region.xfade_cc_curve;
        let mut can_shortcut = true;

        for range in &region.xfade_cc_in {
            let events = resources.midi.get_cc_events(range.cc);
            can_shortcut &= events.len() <= 1;
            build_linear_envelope(
                events,
                resources.midi.get_cc_value_at_block_start(range.cc),
                skip,
                &mut cc_envelope,
            );
            for (gain, &value) in xfade.iter_mut().zip(cc_envelope.iter()) {
                *gain *= crossfade_in(range, value, curve);
            }
        }
        for range in &region.xfade_cc_out {
            let events = resources.midi.get_cc_events(range.cc);
            can_shortcut &= events.len() <= 1;
            build_linear_envelope(
                events,
                resources.midi.get_cc_value_at_block_start(range.cc),
                skip,
                &mut cc_envelope,
            );
            for (gain, &value) in xfade.iter_mut().zip(cc_envelope.iter()) {
                *gain *= crossfade_out(range, value, curve);
            }
        }

        self.xfade_smoother.process_in_place(&mut xfade, can_shortcut);
        for (value, &gain) in amplitude.iter_mut().zip(xfade.iter()) {
            *value *= gain;
        }
    }

    /// Pan stage. Mono sources fan out to both channels and get one
    /// equal-power pan; stereo sources run pan, width and position in
    /// sequence. Both paths end with the +3 dB makeup.
    fn pan_stage(
        &mut self,
        resources: &Resources,
        left: &mut [f32],
        right: &mut [f32],
        skip: usize,
        stereo: bool,
        region: &Arc<Region>,
    ) {
        let frames = left.len();
        let mut span = match resources.buffer_pool.get_buffer(frames) {
            Some(buffer) => buffer,
            None => return,
        };

        if !stereo {
            right.copy_from_slice(left);
            self.fill_control_span(resources, region.pan, self.pan_target, 0.01, skip, &mut span);
            apply_equal_power_pan(&span, left, right);
        } else {
            self.fill_control_span(resources, region.pan, self.pan_target, 0.01, skip, &mut span);
            apply_equal_power_pan(&span, left, right);

            self.fill_control_span(
                resources,
                region.width,
                self.width_target,
                0.01,
                skip,
                &mut span,
            );
            for i in 0..frames {
                let mid = 0.5 * (left[i] + right[i]);
                let side = 0.5 * (left[i] - right[i]) * span[i];
                left[i] = mid + side;
                right[i] = mid - side;
            }

            self.fill_control_span(
                resources,
                region.position,
                self.position_target,
                0.01,
                skip,
                &mut span,
            );
            apply_equal_power_pan(&span, left, right);
        }

        for i in 0..frames {
            left[i] *= PAN_MAKEUP_GAIN;
            right[i] *= PAN_MAKEUP_GAIN;
        }
    }

    /// Filter and EQ stage, in place over both channels.
    fn filter_stage(
        &mut self,
        resources: &Resources,
        left: &mut [f32],
        right: &mut [f32],
        skip: usize,
        region: &Arc<Region>,
    ) {
        let frames = left.len();
        let mut cutoff_mod_cents = self.block_cutoff_cents_mod;
        if let Some(span) = self.modulation(resources, self.filter_cutoff_target, skip, frames) {
            cutoff_mod_cents += span[span.len() - 1];
        }

        for index in 0..region.filters.len().min(self.filters.len()) {
            self.filters[index].process(left, Some(&mut *right), cutoff_mod_cents);
        }
        for index in 0..region.eqs.len().min(self.eqs.len()) {
            self.eqs[index].process(left, Some(&mut *right));
        }
    }
}

/// Bend factor for a normalized wheel value under a region's bend ranges,
/// with step quantization.
fn bend_factor(region: &Region, value: f32) -> f32 {
    let mut cents = if value >= 0.0 {
        value * region.bend_up
    } else {
        -value * region.bend_down
    };
    if region.bend_step > 1.0 {
        cents = (cents / region.bend_step).round() * region.bend_step;
    }
    cents_factor(cents)
}

/// Builds a per-sample control envelope from timestamped events, ramping
/// linearly toward each event value and holding the last one. `skip`
/// shifts event delays into the rendered sub-span.
fn build_linear_envelope(
    events: &[(usize, f32)],
    start_value: f32,
    skip: usize,
    out: &mut [f32],
) {
    let mut value = start_value;
    let mut from = 0usize;
    for &(delay, target) in events {
        let at = delay.saturating_sub(skip).min(out.len());
        if at > from {
            let step = (target - value) / (at - from) as f32;
            let mut ramp = value;
            for sample in &mut out[from..at] {
                ramp += step;
                *sample = ramp;
            }
        }
        value = target;
        from = at;
    }
    for sample in &mut out[from..] {
        *sample = value;
    }
}

fn apply_equal_power_pan(pan: &[f32], left: &mut [f32], right: &mut [f32]) {
    for i in 0..pan.len() {
        let position = pan[i].clamp(-1.0, 1.0);
        let angle = (position + 1.0) * std::f32::consts::FRAC_PI_4;
        left[i] *= angle.cos();
        right[i] *= angle.sin();
    }
}

fn interpolate_channel(
    source: &[f32],
    indices: &[i32],
    coeffs: &[f32],
    quality: i32,
    out: &mut [f32],
) {
    use crate::interpolate::{interpolate_bspline3, interpolate_linear};
    match quality {
        1 => {
            for i in 0..out.len() {
                out[i] = interpolate_linear(source, indices[i].max(0) as usize, coeffs[i]);
            }
        }
        _ => {
            // Quality 2 and above; sinc is reserved and maps here too.
            for i in 0..out.len() {
                out[i] = interpolate_bspline3(source, indices[i].max(0) as usize, coeffs[i]);
            }
        }
    }
}

/// Unlinks a voice from its sister ring, repairing the neighbors and
/// restoring the voice's self-loop.
pub fn splice_out_of_ring(voices: &mut [Voice], id: usize) {
    let prev = voices[id].sister_prev;
    let next = voices[id].sister_next;
    voices[prev].sister_next = next;
    voices[next].sister_prev = prev;
    voices[id].sister_prev = id;
    voices[id].sister_next = id;
}

/// Links a (self-looped) voice into the ring right after `anchor`.
pub fn insert_into_ring(voices: &mut [Voice], anchor: usize, id: usize) {
    if anchor == id {
        return;
    }
    debug_assert_eq!(voices[id].sister_prev, id);
    debug_assert_eq!(voices[id].sister_next, id);
    let next = voices[anchor].sister_next;
    voices[anchor].sister_next = id;
    voices[id].sister_prev = anchor;
    voices[id].sister_next = next;
    voices[next].sister_prev = id;
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;
    const BLOCK: usize = 64;

    fn make_voices(count: usize) -> Vec<Voice> {
        (0..count).map(|i| Voice::new(i, SAMPLE_RATE, BLOCK)).collect()
    }

    #[test]
    fn test_new_voice_is_free_and_self_looped() {
        let voice = Voice::new(3, SAMPLE_RATE, BLOCK);
        assert!(voice.is_free());
        assert_eq!(voice.sister_prev(), 3);
        assert_eq!(voice.sister_next(), 3);
        assert!(voice.trigger_event().is_none());
    }

    #[test]
    fn test_disabled_region_stays_idle() {
        let mut resources = Resources::new(1, BLOCK);
        let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
        let region = Arc::new(Region {
            sample: "*sine".to_string(),
            disabled: true,
            ..Default::default()
        });

        voice.start_voice(region, 0, TriggerEvent::note_on(64, 0.7), &mut resources);
        assert!(voice.is_free());
    }

    #[test]
    fn test_missing_promise_goes_to_cleanup() {
        let mut resources = Resources::new(1, BLOCK);
        let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
        let region = Arc::new(Region {
            sample: "not_loaded.wav".to_string(),
            ..Default::default()
        });

        voice.start_voice(region, 0, TriggerEvent::note_on(60, 1.0), &mut resources);
        assert_eq!(voice.state(), VoiceState::CleanMeUp);
    }

    #[test]
    fn test_state_listener_fires_on_transitions() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc as StdArc;

        let transitions = StdArc::new(AtomicUsize::new(0));
        let counter = StdArc::clone(&transitions);

        let mut resources = Resources::new(1, BLOCK);
        let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
        voice.set_state_listener(Some(Box::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let region = Arc::new(Region {
            sample: "*sine".to_string(),
            ..Default::default()
        });
        voice.start_voice(region, 0, TriggerEvent::note_on(69, 1.0), &mut resources);
        voice.reset();
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reset_is_idempotent_and_restores_invariants() {
        let mut resources = Resources::new(1, BLOCK);
        let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
        let region = Arc::new(Region {
            sample: "*saw".to_string(),
            ..Default::default()
        });
        voice.start_voice(region, 0, TriggerEvent::note_on(60, 1.0), &mut resources);

        voice.reset();
        voice.reset();
        assert!(voice.is_free());
        assert!(voice.region().is_none());
        assert_eq!(voice.sister_prev(), 0);
        assert_eq!(voice.sister_next(), 0);
    }

    #[test]
    fn test_sister_ring_splice() {
        let mut voices = make_voices(4);
        insert_into_ring(&mut voices, 0, 1);
        insert_into_ring(&mut voices, 1, 2);

        // Ring is 0 -> 1 -> 2 -> 0.
        assert_eq!(voices[0].sister_next(), 1);
        assert_eq!(voices[1].sister_next(), 2);
        assert_eq!(voices[2].sister_next(), 0);
        for id in 0..3 {
            let next = voices[id].sister_next();
            let prev = voices[id].sister_prev();
            assert_eq!(voices[next].sister_prev(), id);
            assert_eq!(voices[prev].sister_next(), id);
        }

        splice_out_of_ring(&mut voices, 1);
        assert_eq!(voices[1].sister_prev(), 1);
        assert_eq!(voices[1].sister_next(), 1);
        assert_eq!(voices[0].sister_next(), 2);
        assert_eq!(voices[2].sister_prev(), 0);
    }

    #[test]
    fn test_unison_layout_detunes_and_gains() {
        let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
        let region = Region {
            sample: "*saw".to_string(),
            oscillator_multi: 5,
            oscillator_detune: 40.0,
            ..Default::default()
        };
        voice.setup_oscillator_unison(&region);

        assert_eq!(voice.wave_unison_size, 5);
        assert!((voice.wave_detune_ratio[0] - 1.0).abs() < 1e-6);
        assert!((voice.wave_detune_ratio[1] - cents_factor(-40.0)).abs() < 1e-6);
        assert!((voice.wave_detune_ratio[2] - cents_factor(40.0)).abs() < 1e-6);
        // i = 3: n = 1, odd index, -0.25 * 40 = -10 cents
        assert!((voice.wave_detune_ratio[3] - cents_factor(-10.0)).abs() < 1e-6);
        // i = 4: n = 1, even index, +10 cents
        assert!((voice.wave_detune_ratio[4] - cents_factor(10.0)).abs() < 1e-6);

        // Complementary triangular gain pairs.
        assert_eq!(voice.wave_left_gain[0], 0.0);
        assert_eq!(voice.wave_right_gain[4], 0.0);
        assert!((voice.wave_left_gain[4] - 1.0).abs() < 1e-6);
        assert!((voice.wave_right_gain[0] - 1.0).abs() < 1e-6);
        for i in 0..5 {
            let sum = voice.wave_left_gain[i] + voice.wave_right_gain[i];
            assert!((sum - 1.0).abs() < 1e-6, "gain pair {} should sum to 1", i);
        }
    }

    #[test]
    fn test_check_off_group() {
        let mut resources = Resources::new(2, BLOCK);
        let mut voice = Voice::new(0, SAMPLE_RATE, BLOCK);
        let own_region = Arc::new(Region {
            sample: "*sine".to_string(),
            group: 5,
            off_by: Some(3),
            ..Default::default()
        });
        voice.start_voice(own_region, 0, TriggerEvent::note_on(62, 1.0), &mut resources);

        let other = Region {
            group: 3,
            ..Default::default()
        };
        assert!(voice.check_off_group(&other, 10, 64, &mut resources));
        assert!(voice.released_or_free());

        let unrelated = Region {
            group: 9,
            ..Default::default()
        };
        let mut fresh = Voice::new(1, SAMPLE_RATE, BLOCK);
        let region = Arc::new(Region {
            sample: "*sine".to_string(),
            group: 5,
            off_by: Some(3),
            ..Default::default()
        });
        fresh.start_voice(region, 0, TriggerEvent::note_on(62, 1.0), &mut resources);
        assert!(!fresh.check_off_group(&unrelated, 0, 64, &mut resources));
    }

    #[test]
    fn test_bend_factor_quantization() {
        let region = Region {
            bend_up: 200.0,
            bend_down: -200.0,
            bend_step: 100.0,
            ..Default::default()
        };
        // 0.4 * 200 = 80 cents, quantized to 100.
        assert!((bend_factor(&region, 0.4) - cents_factor(100.0)).abs() < 1e-6);
        // -0.2 * 200 = -40 cents, quantized to 0.
        assert!((bend_factor(&region, -0.2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_build_linear_envelope_ramps_and_holds() {
        let events = [(4usize, 1.0f32)];
        let mut out = [0.0f32; 8];
        build_linear_envelope(&events, 0.0, 0, &mut out);
        assert!(out[0] > 0.0 && out[0] < 1.0);
        assert!((out[3] - 1.0).abs() < 1e-6);
        assert!(out[4..].iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_build_linear_envelope_no_events_is_constant() {
        let mut out = [9.0f32; 6];
        build_linear_envelope(&[], 0.3, 0, &mut out);
        assert!(out.iter().all(|&v| (v - 0.3).abs() < 1e-6));
    }
}
