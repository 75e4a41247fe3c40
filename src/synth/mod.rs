//! The polyphonic synthesis core.
//!
//! This module provides the in-memory note-rendering engine: instruments,
//! active voices, ADSR envelopes, signal generation, and the mixing pass
//! that sums everything into an interleaved stereo buffer. It has no notion
//! of musical time — callers feed it note-on/note-off events and pull
//! rendered buffers.

mod envelope;
mod instrument;
mod oscillator;
mod synthesizer;
mod voice;

pub use envelope::{Envelope, EnvelopeParams, EnvelopeStage, MIN_STAGE_SECONDS};
pub use instrument::{
    Instrument, InstrumentId, InstrumentKind, InstrumentStore, NoteSample, MAX_INSTRUMENTS,
};
pub use oscillator::{note_to_frequency, SamplePlayer, SineOscillator};
pub use synthesizer::{EngineError, Synthesizer, VOICE_AMPLITUDE};
pub use voice::{Voice, VoiceKey, VoiceRegistry};

/// Highest valid MIDI note number.
pub const MAX_NOTE: u8 = 127;

/// Lowest sample rate the engine will run at or accept for stored buffers.
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest sample rate the engine will run at or accept for stored buffers.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Note names within an octave, used for readable logging.
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable name with octave.
///
/// # Examples
///
/// ```
/// use multitracker::synth::note_to_name;
///
/// assert_eq!(note_to_name(60), "C4");
/// assert_eq!(note_to_name(69), "A4");
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}
