//! Audio output and offline rendering.
//!
//! This module connects the synthesis core to the outside world. It
//! supports:
//! - Real-time playback through the platform output via rodio
//! - A boolean-result control facade for UI/sequencer/FFI callers
//! - Offline bouncing of note events to WAV files

pub mod engine;
pub mod export;

pub use engine::AudioEngine;
pub use export::{export_to_wav, NoteEvent};
