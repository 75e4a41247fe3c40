//! Per-voice signal generation.
//!
//! Two generator paths exist: a sine oscillator for synthesized notes, and a
//! sample player that streams a note's pre-loaded PCM buffer at a rate that
//! corrects for the buffer's native sample rate differing from the engine's.
//! Neither path applies gain; envelope and volume shaping happen in the
//! mixing loop.

use std::f32::consts::TAU;
use std::sync::Arc;

/// Reference tuning: MIDI note 69 (A4) sounds at 440 Hz.
const A4_NOTE: i32 = 69;
const A4_FREQUENCY: f32 = 440.0;

/// Scale factor between 16-bit PCM and normalized float samples.
const I16_SCALE: f32 = 32_768.0;

/// Converts a MIDI note number to its equal-temperament frequency in Hz.
///
/// # Examples
///
/// ```
/// use multitracker::synth::note_to_frequency;
///
/// assert!((note_to_frequency(69) - 440.0).abs() < 1e-3);
/// ```
pub fn note_to_frequency(note: u8) -> f32 {
    A4_FREQUENCY * 2f32.powf((note as i32 - A4_NOTE) as f32 / 12.0)
}

/// Sine oscillator with its phase kept in [0, 2π).
#[derive(Debug, Clone)]
pub struct SineOscillator {
    frequency: f32,
    phase: f32,
}

impl SineOscillator {
    /// Creates an oscillator tuned to the given MIDI note, starting at
    /// phase zero.
    pub fn new(note: u8) -> Self {
        Self {
            frequency: note_to_frequency(note),
            phase: 0.0,
        }
    }

    /// Produces the next sample in [-1, 1] and advances the phase by one
    /// output frame.
    pub fn next_sample(&mut self, sample_rate: u32) -> f32 {
        let sample = self.phase.sin();
        self.phase += TAU * self.frequency / sample_rate as f32;
        if self.phase >= TAU {
            self.phase -= TAU;
        }
        sample
    }
}

/// Streams a note's stored PCM buffer at a continuously advancing
/// fractional position.
///
/// The position advances by `source_rate / engine_rate` per output frame, so
/// a buffer captured at a different rate than the engine runs at still
/// sounds at its recorded pitch. There is no additional per-note pitch
/// shifting: each note number carries its own buffer.
#[derive(Debug, Clone)]
pub struct SamplePlayer {
    data: Arc<Vec<i16>>,
    /// Continuous playback position into `data`.
    position: f64,
    /// Source samples consumed per output frame.
    step: f64,
    exhausted: bool,
}

impl SamplePlayer {
    /// Creates a player over `data` (16-bit mono PCM recorded at
    /// `source_rate`), producing output frames at `engine_rate`.
    pub fn new(data: Arc<Vec<i16>>, source_rate: u32, engine_rate: u32) -> Self {
        Self {
            data,
            position: 0.0,
            step: source_rate as f64 / engine_rate as f64,
            exhausted: false,
        }
    }

    /// Produces the next sample in [-1, 1] and advances the position.
    ///
    /// `looping` reflects whether the owning voice's envelope is still in a
    /// held stage (attack/decay/sustain): while it is, the buffer wraps
    /// around at the end; once the voice is releasing, the buffer plays out
    /// once and the player goes silent.
    pub fn next_sample(&mut self, looping: bool) -> f32 {
        if self.exhausted || self.data.is_empty() {
            return 0.0;
        }

        let len = self.data.len();
        if self.position >= len as f64 {
            if looping {
                self.position %= len as f64;
            } else {
                self.exhausted = true;
                return 0.0;
            }
        }

        // Linear interpolation between the two samples straddling the
        // fractional position.
        let index = self.position as usize;
        let frac = (self.position - index as f64) as f32;
        let current = self.data[index] as f32 / I16_SCALE;
        let next = if index + 1 < len {
            self.data[index + 1] as f32 / I16_SCALE
        } else if looping {
            self.data[0] as f32 / I16_SCALE
        } else {
            current
        };

        self.position += self.step;
        current + (next - current) * frac
    }

    /// Whether the buffer has played out without looping.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
