//! Audio engine for real-time note rendering.
//!
//! Provides the high-level interface that controller threads (UI, sequencer,
//! FFI glue) use to drive the synthesizer, with audio output via rodio.
//!
//! The engine is an explicit context object: constructing it opens the audio
//! output and starts streaming, dropping it shuts everything down. There is
//! no global engine state.

use crate::synth::{EnvelopeParams, InstrumentId, InstrumentKind, Synthesizer};
use anyhow::{Context, Result};
use rodio::{OutputStream, OutputStreamHandle, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default sample rate for audio synthesis (44.1 kHz standard).
pub const SAMPLE_RATE: u32 = 44_100;

/// Frames rendered per buffer period.
/// Smaller = lower latency but more lock round-trips per second.
const BUFFER_FRAMES: usize = 256;

/// State shared between the engine facade and the audio source.
/// Atomics, so the audio thread can check them without the synth lock.
struct SharedState {
    /// Whether the output should pull from the synthesizer at all.
    playing: AtomicBool,
}

/// Audio source that streams rendered buffers from the synthesizer.
/// Implements rodio's `Source` trait for playback.
struct SynthSource {
    /// The synthesizer, shared with the controlling threads.
    synth: Arc<Mutex<Synthesizer>>,
    /// Shared playback flags.
    state: Arc<SharedState>,
    /// Interleaved stereo buffer of rendered samples.
    buffer: Vec<f32>,
    /// Read position within the buffer.
    buf_pos: usize,
    /// Engine sample rate, reported to rodio.
    sample_rate: u32,
}

impl SynthSource {
    fn new(synth: Arc<Mutex<Synthesizer>>, state: Arc<SharedState>, sample_rate: u32) -> Self {
        Self {
            synth,
            state,
            buffer: vec![0.0; BUFFER_FRAMES * 2],
            buf_pos: BUFFER_FRAMES * 2, // Start at end to trigger first render
            sample_rate,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        // Render a new buffer period when the current one is exhausted.
        if self.buf_pos >= self.buffer.len() {
            if !self.state.playing.load(Ordering::Relaxed) {
                // Stopped: emit silence without touching the synthesizer.
                self.buffer.fill(0.0);
            } else if let Ok(mut synth) = self.synth.lock() {
                synth.render(&mut self.buffer);
            } else {
                // A poisoned lock must never panic the audio thread; the
                // stream degrades to silence instead.
                self.buffer.fill(0.0);
            }
            self.buf_pos = 0;
        }

        let sample = self.buffer[self.buf_pos];
        self.buf_pos += 1;
        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2 // Stereo
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Infinite stream
    }
}

/// The main audio engine: the synthesizer plus the platform output stream.
///
/// All control methods reduce internal [`EngineError`](crate::synth::EngineError)
/// values to boolean success/failure (logging the details), which is the
/// contract the FFI/controller layer expects: nothing besides booleans and
/// generated IDs crosses the boundary.
pub struct AudioEngine {
    /// The synthesizer (wrapped for sharing with the audio thread).
    synth: Arc<Mutex<Synthesizer>>,
    /// Shared playback state.
    state: Arc<SharedState>,
    /// Engine sample rate after validation.
    sample_rate: u32,
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    /// Audio output handle.
    _stream_handle: OutputStreamHandle,
}

impl AudioEngine {
    /// Creates an engine at the default 44.1 kHz sample rate and starts
    /// streaming.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio output device cannot be opened or the
    /// stream cannot be started.
    pub fn new() -> Result<Self> {
        Self::with_sample_rate(SAMPLE_RATE)
    }

    /// Creates an engine at a specific sample rate.
    ///
    /// Rates outside the supported range fall back to the default with a
    /// warning (see [`Synthesizer::new`]).
    pub fn with_sample_rate(sample_rate: u32) -> Result<Self> {
        let synthesizer = Synthesizer::new(sample_rate);
        let sample_rate = synthesizer.sample_rate();
        let synth = Arc::new(Mutex::new(synthesizer));
        let state = Arc::new(SharedState {
            playing: AtomicBool::new(true),
        });

        let (stream, stream_handle) =
            OutputStream::try_default().context("Failed to open audio output")?;

        let source = SynthSource::new(Arc::clone(&synth), Arc::clone(&state), sample_rate);
        stream_handle
            .play_raw(source)
            .context("Failed to start audio playback")?;

        tracing::info!("audio engine started at {sample_rate} Hz");

        Ok(Self {
            synth,
            state,
            sample_rate,
            _stream: stream,
            _stream_handle: stream_handle,
        })
    }

    /// Runs `f` on the locked synthesizer, or returns None when the lock is
    /// poisoned (a controller thread panicked mid-operation).
    fn with_synth<T>(&self, f: impl FnOnce(&mut Synthesizer) -> T) -> Option<T> {
        match self.synth.lock() {
            Ok(mut synth) => Some(f(&mut synth)),
            Err(_) => {
                tracing::error!("synthesizer lock poisoned; operation dropped");
                None
            }
        }
    }

    /// Creates an instrument and returns its ID, or None on failure.
    ///
    /// # Arguments
    ///
    /// * `kind` - How the instrument renders (fixed for its lifetime)
    /// * `name` - Display name for logging
    /// * `volume` - Initial volume, clamped to [0, 1]
    pub fn create_instrument(
        &self,
        kind: InstrumentKind,
        name: &str,
        volume: f32,
    ) -> Option<InstrumentId> {
        self.with_synth(|synth| match synth.create_instrument(kind, name, volume) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("create_instrument failed: {e}");
                None
            }
        })
        .flatten()
    }

    /// Unloads an instrument, ending all of its voices.
    pub fn unload_instrument(&self, id: InstrumentId) -> bool {
        self.with_synth(|synth| synth.unload_instrument(id))
            .unwrap_or(false)
    }

    /// Sets an instrument's volume (clamped to [0, 1]).
    pub fn set_instrument_volume(&self, id: InstrumentId, volume: f32) -> bool {
        self.with_synth(|synth| match synth.set_instrument_volume(id, volume) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("set_instrument_volume failed: {e}");
                false
            }
        })
        .unwrap_or(false)
    }

    /// Sets an instrument's ADSR envelope. Attack/decay/release are in
    /// seconds, sustain is a level in [0, 1]; all are clamped to their
    /// valid domains.
    pub fn set_instrument_envelope(
        &self,
        id: InstrumentId,
        attack: f32,
        decay: f32,
        sustain: f32,
        release: f32,
    ) -> bool {
        let params = EnvelopeParams::new(attack, decay, sustain, release);
        self.with_synth(|synth| match synth.set_instrument_envelope(id, params) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("set_instrument_envelope failed: {e}");
                false
            }
        })
        .unwrap_or(false)
    }

    /// Stores a pre-decoded 16-bit mono PCM buffer for one note of a
    /// sample-capable instrument.
    ///
    /// # Arguments
    ///
    /// * `id` - Target instrument
    /// * `note` - MIDI note number the buffer belongs to (0-127)
    /// * `data` - PCM samples, as produced by the external file loader
    /// * `sample_rate` - The buffer's native capture rate in Hz
    pub fn store_sample(
        &self,
        id: InstrumentId,
        note: u8,
        data: Vec<i16>,
        sample_rate: u32,
    ) -> bool {
        self.with_synth(|synth| match synth.store_sample(id, note, data, sample_rate) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("store_sample failed: {e}");
                false
            }
        })
        .unwrap_or(false)
    }

    /// Starts (or retriggers) a note.
    ///
    /// # Arguments
    ///
    /// * `id` - Instrument to play
    /// * `note` - MIDI note number (0-127)
    /// * `velocity` - Note velocity, clamped to 1-127
    pub fn note_on(&self, id: InstrumentId, note: u8, velocity: u8) -> bool {
        self.with_synth(|synth| match synth.note_on(id, note, velocity) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("note_on failed: {e}");
                false
            }
        })
        .unwrap_or(false)
    }

    /// Releases a note, letting it ring out its envelope release tail.
    /// Releasing a note that is not sounding still succeeds.
    pub fn note_off(&self, id: InstrumentId, note: u8) -> bool {
        self.with_synth(|synth| match synth.note_off(id, note) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("note_off failed: {e}");
                false
            }
        })
        .unwrap_or(false)
    }

    /// Releases all notes.
    ///
    /// # Arguments
    ///
    /// * `immediate` - If true, voices stop at once instead of releasing
    pub fn all_notes_off(&self, immediate: bool) {
        self.with_synth(|synth| synth.all_notes_off(immediate));
    }

    /// Sets the master volume (clamped to [0, 1]).
    pub fn set_master_volume(&self, volume: f32) {
        self.with_synth(|synth| synth.set_master_volume(volume));
    }

    /// Returns the master volume.
    pub fn master_volume(&self) -> f32 {
        self.with_synth(|synth| synth.master_volume()).unwrap_or(0.0)
    }

    /// Returns the engine sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Resumes pulling rendered audio from the synthesizer.
    pub fn start(&self) {
        self.state.playing.store(true, Ordering::Relaxed);
    }

    /// Stops output; the stream keeps running but emits silence and the
    /// synthesizer is left untouched (voices freeze in place).
    pub fn stop(&self) {
        self.state.playing.store(false, Ordering::Relaxed);
    }

    /// Whether the output is currently pulling from the synthesizer.
    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Relaxed)
    }

    /// IDs of all loaded instruments, in creation order.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        self.with_synth(|synth| synth.instrument_ids())
            .unwrap_or_default()
    }

    /// Number of currently-sounding voices (including release tails).
    pub fn active_voice_count(&self) -> usize {
        self.with_synth(|synth| synth.active_voice_count())
            .unwrap_or(0)
    }

    /// Returns the shared synthesizer, for callers that need to render
    /// offline through the same instance.
    #[allow(dead_code)]
    pub fn synthesizer(&self) -> &Arc<Mutex<Synthesizer>> {
        &self.synth
    }
}
