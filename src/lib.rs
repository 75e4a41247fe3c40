//! multitracker - a real-time polyphonic note-rendering engine.
//!
//! This library provides the native synthesis core for sequencer apps: an
//! in-memory mixer that tracks active notes per instrument, generates sine
//! or sampled audio per voice, applies ADSR envelopes, and streams the
//! soft-limited stereo mix to the platform audio output.
//!
//! All shared state lives in a single [`Synthesizer`] behind one mutex,
//! locked by the audio thread for each render and by controller threads for
//! each note/instrument operation. [`AudioEngine`] owns the output stream
//! and exposes the boolean-result facade that UI/sequencer/FFI layers call.

pub mod audio;
pub mod synth;

// Re-export commonly used types
pub use audio::{engine::AudioEngine, export::export_to_wav};
pub use synth::{EngineError, EnvelopeParams, InstrumentId, InstrumentKind, Synthesizer};
