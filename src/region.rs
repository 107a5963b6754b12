//! Region Module
//!
//! A region is the set of SFZ opcodes selecting and shaping one key range.
//! The voice engine treats regions as immutable while a voice holds one;
//! everything here is plain data plus the small helper math the voice calls
//! at trigger time (pitch variation, velocity gain, crossfade curves).
//!
//! Regions serialize to JSON so instrument configurations can be stored and
//! round-tripped without the SFZ text layer.

use crate::adsr::EgDescriptor;
use crate::tuning::cents_factor;
use serde::{Deserialize, Serialize};

/// Loop behavior of a sampled region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopMode {
    /// Play through once, honoring note-off
    NoLoop,

    /// Play through once, ignoring note-off
    OneShot,

    /// Loop between the loop points while the note is held
    LoopSustain,

    /// Loop between the loop points until the envelope ends
    LoopContinuous,
}

/// How `off` picks its release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffMode {
    /// Engine-default fast release
    Fast,

    /// Use the region's `off_time`
    Time,
}

/// Crossfade curve shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossfadeCurve {
    /// Linear in gain
    Gain,

    /// Equal-power (square root)
    Power,
}

/// One CC-driven crossfade range, values normalized to [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrossfadeRange {
    pub cc: u8,
    pub lo: f32,
    pub hi: f32,
}

/// A filter slot description on a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub kind: FilterKind,

    /// Cutoff in Hz at the keycenter
    pub cutoff: f32,

    /// Resonance (Q)
    pub resonance: f32,

    /// Cutoff keytracking in cents per key
    pub keytrack: f32,

    /// Key the cutoff is specified at
    pub keycenter: u8,

    /// Cutoff velocity tracking in cents at full velocity
    pub veltrack: f32,
}

/// Filter responses available on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    LowPass,
    HighPass,
    BandPass,
    Notch,
    AllPass,
}

impl Default for FilterDescriptor {
    fn default() -> Self {
        Self {
            kind: FilterKind::LowPass,
            cutoff: 20000.0,
            resonance: 0.707,
            keytrack: 0.0,
            keycenter: 60,
            veltrack: 0.0,
        }
    }
}

/// An EQ band description on a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EqDescriptor {
    /// Band center in Hz
    pub frequency: f32,

    /// Bandwidth in octaves
    pub bandwidth: f32,

    /// Band gain in dB
    pub gain: f32,

    /// Center shift in Hz at full velocity
    pub vel2frequency: f32,

    /// Gain shift in dB at full velocity
    pub vel2gain: f32,
}

impl Default for EqDescriptor {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            bandwidth: 1.0,
            gain: 0.0,
            vel2frequency: 0.0,
            vel2gain: 0.0,
        }
    }
}

/// LFO waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LfoWaveform {
    Sine,
    Triangle,
    Square,
    Saw,
}

/// A per-voice LFO description.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LfoDescriptor {
    /// Rate in Hz; ignored when `beats` is set
    pub freq: f32,

    /// Tempo-synced period in quarter-note beats (0 = free-running)
    pub beats: f32,

    pub waveform: LfoWaveform,

    /// Onset delay in seconds
    pub delay: f32,

    /// Fade-in after the delay, in seconds
    pub fade: f32,

    /// Pitch modulation depth in cents
    pub pitch_depth: f32,

    /// Gain modulation depth in dB
    pub gain_depth: f32,

    /// Filter cutoff modulation depth in cents
    pub cutoff_depth: f32,
}

impl Default for LfoDescriptor {
    fn default() -> Self {
        Self {
            freq: 5.0,
            beats: 0.0,
            waveform: LfoWaveform::Sine,
            delay: 0.0,
            fade: 0.0,
            pitch_depth: 0.0,
            gain_depth: 0.0,
            cutoff_depth: 0.0,
        }
    }
}

/// One breakpoint of a flex envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlexPoint {
    /// Time to reach `level` from the previous point, in seconds
    pub time: f32,

    /// Target level
    pub level: f32,
}

/// A multi-point envelope description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexEgDescriptor {
    pub points: Vec<FlexPoint>,

    /// Index the envelope holds at until release; past the end = no hold
    pub sustain_point: usize,

    /// Pitch modulation depth in cents
    pub pitch_depth: f32,

    /// Gain modulation depth in dB
    pub gain_depth: f32,
}

impl Default for FlexEgDescriptor {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            sustain_point: usize::MAX,
            pitch_depth: 0.0,
            gain_depth: 0.0,
        }
    }
}

/// What a generator region renders, decided by its sample name. File-backed
/// cycles look their table up in the wave pool under the region's sample
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Noise,
    GaussianNoise,
    Silence,
    Sine,
    Triangle,
    Square,
    Saw,
    FileWave,
}

/// What triggered a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEventType {
    NoteOn,
    Cc,
}

/// The event a voice was started with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_type: TriggerEventType,

    /// Note number or CC number
    pub number: u8,

    /// Velocity or CC value, normalized to [0, 1]
    pub value: f32,
}

impl TriggerEvent {
    /// Creates a note-on trigger.
    pub fn note_on(note: u8, velocity: f32) -> Self {
        Self {
            event_type: TriggerEventType::NoteOn,
            number: note,
            value: velocity,
        }
    }

    /// Creates a CC trigger.
    pub fn cc(cc: u8, value: f32) -> Self {
        Self {
            event_type: TriggerEventType::Cc,
            number: cc,
            value,
        }
    }
}

/// All region parameters the voice engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: u32,

    /// Sample name: a file pool key, or `*sine`-style generator name
    pub sample: String,

    pub disabled: bool,

    // Sample playback
    pub loop_mode: LoopMode,

    /// Loop points in original-rate frames
    pub loop_start: usize,
    pub loop_end: usize,

    /// Playback start offset in original-rate frames
    pub offset: usize,

    /// Claimed end of the sample in original-rate frames
    pub sample_end: usize,

    /// Onset delay in seconds
    pub delay: f32,

    /// Interpolation quality: 1 linear, 2 B-spline, above reserved
    pub sample_quality: i32,

    // Pitch
    pub pitch_keycenter: u8,

    /// Cents per key away from the keycenter
    pub pitch_keytrack: f32,

    /// Cents at full velocity
    pub pitch_veltrack: f32,

    /// Uniform random cents drawn once per trigger
    pub pitch_random: f32,

    /// Semitones
    pub transpose: i32,

    /// Cents
    pub tune: f32,

    /// Bend range upward in cents
    pub bend_up: f32,

    /// Bend range downward in cents (negative)
    pub bend_down: f32,

    /// Bend quantization step in cents (1 = continuous)
    pub bend_step: f32,

    // Amplitude
    /// Volume in dB
    pub volume: f32,

    /// Amplitude in percent
    pub amplitude: f32,

    /// Velocity tracking in percent
    pub amp_veltrack: f32,

    /// Pan in percent, -100 (left) to 100 (right)
    pub pan: f32,

    /// Stereo width in percent
    pub width: f32,

    /// Stereo position in percent
    pub position: f32,

    // Envelopes
    pub amp_eg: EgDescriptor,
    pub pitch_eg: Option<EgDescriptor>,

    /// Pitch EG depth in cents
    pub pitch_eg_depth: f32,

    pub filter_eg: Option<EgDescriptor>,

    /// Filter EG depth in cents
    pub filter_eg_depth: f32,

    // Polyphony groups
    pub group: i64,
    pub off_by: Option<i64>,
    pub off_mode: OffMode,

    /// Release time for `off` in `Time` mode, in seconds
    pub off_time: f32,

    // Sustain pedal
    pub check_sustain: bool,
    pub sustain_cc: u8,

    /// Pedal-down threshold on the sustain CC, normalized
    pub sustain_threshold: f32,

    // CC crossfades
    pub xfade_cc_in: Vec<CrossfadeRange>,
    pub xfade_cc_out: Vec<CrossfadeRange>,
    pub xfade_cc_curve: CrossfadeCurve,

    // Oscillator
    /// Force wavetable playback for file samples
    pub oscillator: bool,

    /// 0 = ring modulation, 1 = phase modulation (unimplemented, treated
    /// as FM), 2 = frequency modulation
    pub oscillator_mode: i32,

    /// Unison oscillator count
    pub oscillator_multi: u32,

    /// Unison detune in cents
    pub oscillator_detune: f32,

    /// Modulation depth in percent for RM/FM modes
    pub oscillator_mod_depth: f32,

    // Per-voice chains
    pub filters: Vec<FilterDescriptor>,
    pub eqs: Vec<EqDescriptor>,
    pub lfos: Vec<LfoDescriptor>,
    pub flex_egs: Vec<FlexEgDescriptor>,
}

impl Default for Region {
    fn default() -> Self {
        Self {
            id: 0,
            sample: String::new(),
            disabled: false,
            loop_mode: LoopMode::NoLoop,
            loop_start: 0,
            loop_end: usize::MAX,
            offset: 0,
            sample_end: usize::MAX,
            delay: 0.0,
            sample_quality: 2,
            pitch_keycenter: 60,
            pitch_keytrack: 100.0,
            pitch_veltrack: 0.0,
            pitch_random: 0.0,
            transpose: 0,
            tune: 0.0,
            bend_up: 200.0,
            bend_down: -200.0,
            bend_step: 1.0,
            volume: 0.0,
            amplitude: 100.0,
            amp_veltrack: 100.0,
            pan: 0.0,
            width: 100.0,
            position: 0.0,
            amp_eg: EgDescriptor::default(),
            pitch_eg: None,
            pitch_eg_depth: 0.0,
            filter_eg: None,
            filter_eg_depth: 0.0,
            group: 0,
            off_by: None,
            off_mode: OffMode::Fast,
            off_time: 0.0,
            check_sustain: true,
            sustain_cc: 64,
            sustain_threshold: 0.5,
            xfade_cc_in: Vec::new(),
            xfade_cc_out: Vec::new(),
            xfade_cc_curve: CrossfadeCurve::Power,
            oscillator: false,
            oscillator_mode: 0,
            oscillator_multi: 0,
            oscillator_detune: 0.0,
            oscillator_mod_depth: 0.0,
            filters: Vec::new(),
            eqs: Vec::new(),
            lfos: Vec::new(),
            flex_egs: Vec::new(),
        }
    }
}

impl Region {
    /// Whether the region renders from a generator instead of sample data.
    pub fn is_oscillator(&self) -> bool {
        self.oscillator || self.sample.starts_with('*')
    }

    /// What the generator renders, by sample name.
    pub fn generator_kind(&self) -> GeneratorKind {
        match self.sample.as_str() {
            "*noise" => GeneratorKind::Noise,
            "*gnoise" => GeneratorKind::GaussianNoise,
            "*silence" => GeneratorKind::Silence,
            "*sine" => GeneratorKind::Sine,
            "*tri" | "*triangle" => GeneratorKind::Triangle,
            "*square" => GeneratorKind::Square,
            "*saw" => GeneratorKind::Saw,
            other if other.starts_with('*') => GeneratorKind::Sine,
            _ => GeneratorKind::FileWave,
        }
    }

    /// Whether playback wraps between the loop points.
    pub fn loops(&self) -> bool {
        matches!(self.loop_mode, LoopMode::LoopSustain | LoopMode::LoopContinuous)
    }

    /// Pitch ratio for a retuned fractional key and a velocity, combining
    /// keytracking, velocity tracking, transpose and tune.
    pub fn base_pitch_variation(&self, key: f32, velocity: f32) -> f32 {
        let cents = (key - self.pitch_keycenter as f32) * self.pitch_keytrack
            + self.pitch_veltrack * velocity
            + self.tune
            + self.transpose as f32 * 100.0;
        cents_factor(cents)
    }

    /// Linear gain for a velocity under `amp_veltrack`.
    pub fn velocity_gain(&self, velocity: f32) -> f32 {
        let tracking = self.amp_veltrack / 100.0;
        (1.0 - tracking) + tracking * velocity * velocity
    }

    /// Base linear gain at trigger: `amplitude` scaling times the
    /// velocity curve.
    pub fn base_gain(&self, velocity: f32) -> f32 {
        self.amplitude / 100.0 * self.velocity_gain(velocity)
    }

    /// Claimed end frame scaled into the oversampled source domain.
    pub fn true_sample_end(&self, oversampling: u32) -> usize {
        self.sample_end.saturating_mul(oversampling as usize)
    }

    /// Loop points scaled into the oversampled source domain.
    pub fn loop_range(&self, oversampling: u32) -> (usize, usize) {
        (
            self.loop_start.saturating_mul(oversampling as usize),
            self.loop_end.saturating_mul(oversampling as usize),
        )
    }
}

/// Fade-in gain of a crossfade range at a CC value.
pub fn crossfade_in(range: &CrossfadeRange, value: f32, curve: CrossfadeCurve) -> f32 {
    if value < range.lo {
        0.0
    } else if value >= range.hi || range.hi <= range.lo {
        1.0
    } else {
        let position = (value - range.lo) / (range.hi - range.lo);
        match curve {
            CrossfadeCurve::Gain => position,
            CrossfadeCurve::Power => position.sqrt(),
        }
    }
}

/// Fade-out gain of a crossfade range at a CC value.
pub fn crossfade_out(range: &CrossfadeRange, value: f32, curve: CrossfadeCurve) -> f32 {
    if value <= range.lo || range.hi <= range.lo {
        1.0
    } else if value > range.hi {
        0.0
    } else {
        let position = 1.0 - (value - range.lo) / (range.hi - range.lo);
        match curve {
            CrossfadeCurve::Gain => position,
            CrossfadeCurve::Power => position.sqrt(),
        }
    }
}
