//! SFORZATO - Per-Voice SFZ Synthesis Engine
//!
//! This crate provides the per-voice core of an SFZ sampler: the unit
//! that, given a triggered region, a stream of MIDI-level events and a
//! realtime block clock, produces the next block of stereo audio for
//! exactly one note. A polyphonic engine multiplexes many [`Voice`]s over
//! one shared [`Resources`] bundle.
//!
//! # Architecture
//!
//! - **Voice**: state machine and render pipeline (fill, amplitude, pan,
//!   filter stages)
//! - **Region**: the SFZ opcodes the voice consumes, immutable while held
//! - **AdsrEnvelope / FlexEg / Lfo**: per-voice modulation generators
//! - **Wavetable / WavePool**: generator oscillators and shared tables
//! - **SamplePromise / FilePool**: decoded PCM shared into voices
//! - **ModMatrix**: per-voice modulation spans published per block
//! - **BufferPool**: bounded, allocation-free block scratch
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sforzato::{Region, Resources, StereoBuffer, TriggerEvent, Voice};
//!
//! let mut resources = Resources::new(1, 128);
//! let mut voice = Voice::new(0, 48000.0, 128);
//! let mut block = StereoBuffer::new(128);
//!
//! let region = Arc::new(Region {
//!     sample: "*sine".to_string(),
//!     ..Default::default()
//! });
//! voice.start_voice(region, 0, TriggerEvent::note_on(69, 1.0), &mut resources);
//! voice.render_block(&resources, &mut block);
//! ```

pub mod adsr;
pub mod audio_buffer;
pub mod buffer_pool;
pub mod filter;
pub mod flex_eg;
pub mod interpolate;
pub mod lfo;
pub mod midi_state;
pub mod mod_matrix;
pub mod power_follower;
pub mod region;
pub mod resources;
pub mod sample;
pub mod smoother;
pub mod tuning;
pub mod voice;
pub mod wavetable;

pub use adsr::{AdsrEnvelope, EgDescriptor, EnvelopeStage};
pub use audio_buffer::StereoBuffer;
pub use buffer_pool::BufferPool;
pub use filter::{EqSlot, FilterSlot};
pub use midi_state::MidiState;
pub use mod_matrix::{ModKey, ModMatrix, ModTarget, ModTargetId};
pub use region::{LoopMode, OffMode, Region, TriggerEvent, TriggerEventType};
pub use resources::Resources;
pub use sample::{FilePool, SampleData, SamplePromise};
pub use voice::{insert_into_ring, splice_out_of_ring, Voice, VoiceState};
pub use wavetable::{WavePool, Wavetable, WavetableOscillator};
