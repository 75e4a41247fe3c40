//! The polyphonic synthesizer: instrument store, voice registry, and the
//! mixing engine that renders them into an interleaved stereo buffer.
//!
//! All state lives in one value so a single lock can protect every public
//! operation (see the crate docs for the concurrency model). Rendering is
//! deterministic: the only clock is a frame counter advanced by `render`.

use thiserror::Error;

use super::envelope::EnvelopeParams;
use super::instrument::{check_note, InstrumentId, InstrumentKind, InstrumentStore};
use super::voice::{Voice, VoiceKey, VoiceRegistry};
use super::{MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};

/// Fixed per-voice baseline amplitude.
///
/// Every voice contributes at most this much signal before velocity,
/// envelope, and volume scaling. The baseline does not shrink as polyphony
/// grows; constructive summing past full scale is absorbed by the tanh soft
/// limiter instead, so loudness stays stable when voices come and go.
pub const VOICE_AMPLITUDE: f32 = 0.2;

/// Sample rate used when a caller asks for one outside the supported range.
const FALLBACK_SAMPLE_RATE: u32 = 44_100;

/// Errors produced by synthesizer operations.
///
/// These stay inside the engine; the [`AudioEngine`](crate::audio::engine::AudioEngine)
/// facade reduces them to the boolean results that cross to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The referenced instrument ID is not loaded. Engine state is
    /// unchanged.
    #[error("unknown instrument id {0}")]
    UnknownInstrument(InstrumentId),

    /// A note number outside the MIDI range 0-127, which has no sane value
    /// to clamp to.
    #[error("note {0} is outside the MIDI range 0-127")]
    InvalidNote(u8),

    /// The instrument store is at its capacity.
    #[error("instrument limit reached")]
    TooManyInstruments,

    /// A sample was offered to an instrument kind that never reads its
    /// sample table.
    #[error("instrument {id} ({kind:?}) does not accept samples")]
    NotSampleCapable {
        id: InstrumentId,
        kind: InstrumentKind,
    },

    /// A sample buffer's native rate is outside the supported range.
    #[error("sample rate {0} Hz is outside the supported range")]
    InvalidSampleRate(u32),

    /// A voice refers to an instrument that is no longer loaded. Unload
    /// cascades voice removal in the same critical section, so this can
    /// only mean the registry is corrupt; render responds with silence.
    #[error("voice for note {note} refers to unloaded instrument {instrument}")]
    StaleVoice { instrument: InstrumentId, note: u8 },
}

/// The in-memory note-rendering engine.
///
/// Tracks loaded instruments and active voices, and mixes everything into
/// interleaved stereo f32 on each [`render`](Synthesizer::render) call. The
/// caller (the audio output layer) is expected to wrap this in a mutex and
/// hold the lock for the duration of each operation.
#[derive(Debug)]
pub struct Synthesizer {
    sample_rate: u32,
    master_volume: f32,
    instruments: InstrumentStore,
    voices: VoiceRegistry,
    /// Frames rendered since construction; the engine's monotonic clock.
    clock: u64,
}

impl Synthesizer {
    /// Creates a synthesizer rendering at `sample_rate` Hz.
    ///
    /// Rates outside the supported hardware range fall back to 44.1 kHz
    /// with a warning rather than failing.
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            sample_rate
        } else {
            tracing::warn!(
                "unsupported sample rate {sample_rate} Hz, falling back to {FALLBACK_SAMPLE_RATE}"
            );
            FALLBACK_SAMPLE_RATE
        };
        Self {
            sample_rate,
            master_volume: 1.0,
            instruments: InstrumentStore::new(),
            voices: VoiceRegistry::new(),
            clock: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Master volume in [0, 1], applied on top of per-instrument volume.
    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Sets the master volume, silently clamping to [0, 1].
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    /// Creates an instrument and returns its ID. Volume is clamped to
    /// [0, 1]; the envelope starts at [`EnvelopeParams::default`].
    pub fn create_instrument(
        &mut self,
        kind: InstrumentKind,
        name: &str,
        volume: f32,
    ) -> Result<InstrumentId, EngineError> {
        let id = self.instruments.create(kind, name, volume)?;
        tracing::info!("created {kind:?} instrument '{name}' with id {id}");
        Ok(id)
    }

    /// Unloads an instrument and removes all of its voices in the same
    /// critical section, so no render can observe a voice whose instrument
    /// is gone. Returns false when the ID is not loaded (double unloads are
    /// harmless).
    pub fn unload_instrument(&mut self, id: InstrumentId) -> bool {
        if !self.instruments.remove(id) {
            tracing::debug!("unload for instrument {id} which is not loaded");
            return false;
        }
        self.voices.remove_for_instrument(id);
        tracing::info!("unloaded instrument {id}");
        true
    }

    /// Sets an instrument's volume, silently clamping to [0, 1].
    pub fn set_instrument_volume(
        &mut self,
        id: InstrumentId,
        volume: f32,
    ) -> Result<(), EngineError> {
        let instrument = self
            .instruments
            .get_mut(id)
            .ok_or(EngineError::UnknownInstrument(id))?;
        instrument.set_volume(volume);
        Ok(())
    }

    /// Sets an instrument's envelope, silently clamping each parameter.
    /// Voices already sounding pick up the new parameters on their next
    /// rendered frame.
    pub fn set_instrument_envelope(
        &mut self,
        id: InstrumentId,
        params: EnvelopeParams,
    ) -> Result<(), EngineError> {
        let instrument = self
            .instruments
            .get_mut(id)
            .ok_or(EngineError::UnknownInstrument(id))?;
        instrument.set_envelope(params);
        Ok(())
    }

    /// Stores a pre-decoded PCM buffer for one note of a sample-capable
    /// instrument. `sample_rate` is the buffer's native capture rate.
    pub fn store_sample(
        &mut self,
        id: InstrumentId,
        note: u8,
        data: Vec<i16>,
        sample_rate: u32,
    ) -> Result<(), EngineError> {
        check_note(note)?;
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(EngineError::InvalidSampleRate(sample_rate));
        }
        let instrument = self
            .instruments
            .get_mut(id)
            .ok_or(EngineError::UnknownInstrument(id))?;
        instrument.store_sample(note, data, sample_rate)?;
        tracing::debug!("stored sample for instrument {id} note {note} at {sample_rate} Hz");
        Ok(())
    }

    /// Starts (or retriggers) a note.
    ///
    /// Velocity is clamped to 1-127 so a note-on can never produce a voice
    /// that is silent by accident. If the key is already sounding the voice
    /// is replaced: the new velocity and a fresh phase win.
    pub fn note_on(
        &mut self,
        id: InstrumentId,
        note: u8,
        velocity: u8,
    ) -> Result<(), EngineError> {
        check_note(note)?;
        let velocity = velocity.clamp(1, 127);
        let instrument = self
            .instruments
            .get(id)
            .ok_or(EngineError::UnknownInstrument(id))?;

        let key = VoiceKey {
            instrument: id,
            note,
        };
        let voice = Voice::start(instrument, note, velocity, self.clock, self.sample_rate);
        self.voices.start(key, voice);
        tracing::debug!("note on: instrument {id} note {note} velocity {velocity}");
        Ok(())
    }

    /// Releases a note, letting it ring through its envelope's release
    /// tail.
    ///
    /// A note-off for a note that is not sounding is a logged no-op and
    /// still succeeds: sequencer timing races make stray note-offs common
    /// and harmless.
    pub fn note_off(&mut self, id: InstrumentId, note: u8) -> Result<(), EngineError> {
        check_note(note)?;
        let instrument = self
            .instruments
            .get(id)
            .ok_or(EngineError::UnknownInstrument(id))?;
        let params = instrument.envelope();

        let key = VoiceKey {
            instrument: id,
            note,
        };
        if self.voices.release(key, &params, self.clock, self.sample_rate) {
            tracing::debug!("note off: instrument {id} note {note}");
        } else {
            tracing::debug!("note off for silent note {note} on instrument {id}, ignoring");
        }
        Ok(())
    }

    /// Releases every active voice. With `immediate` set the voices are
    /// dropped on the spot instead of ringing out their release tails.
    pub fn all_notes_off(&mut self, immediate: bool) {
        if immediate {
            self.voices.clear();
            return;
        }
        for (key, voice) in self.voices.iter_mut() {
            if let Some(instrument) = self.instruments.get(key.instrument) {
                voice
                    .envelope
                    .trigger_release(&instrument.envelope(), self.clock, self.sample_rate);
            }
        }
    }

    /// IDs of all loaded instruments, in creation order.
    pub fn instrument_ids(&self) -> Vec<InstrumentId> {
        self.instruments.ids()
    }

    /// Number of currently-sounding voices (including release tails).
    pub fn active_voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Renders the next buffer period into `output` (interleaved stereo:
    /// two f32 samples per frame).
    ///
    /// This is the audio-callback entry point and never fails: an internal
    /// inconsistency clears the buffer to silence and logs, rather than
    /// letting anything escape into the callback. An empty buffer is a
    /// no-op.
    pub fn render(&mut self, output: &mut [f32]) {
        if let Err(err) = self.render_frames(output) {
            tracing::error!("render fault, emitting silence: {err}");
            output.fill(0.0);
        }
    }

    /// The fallible mixing pass behind [`render`](Synthesizer::render).
    ///
    /// Zeroes the buffer, accumulates every active voice into both
    /// channels, applies the tanh soft limiter, advances the clock, and
    /// sweeps finished voices.
    fn render_frames(&mut self, output: &mut [f32]) -> Result<(), EngineError> {
        output.fill(0.0);
        let frames = output.len() / 2;
        if frames == 0 {
            return Ok(());
        }
        let output = &mut output[..frames * 2];

        let sample_rate = self.sample_rate;
        let master = self.master_volume;
        let clock = self.clock;

        for (key, voice) in self.voices.iter_mut() {
            let instrument = self
                .instruments
                .get(key.instrument)
                .ok_or(EngineError::StaleVoice {
                    instrument: key.instrument,
                    note: key.note,
                })?;
            let gain =
                VOICE_AMPLITUDE * instrument.volume() * (voice.velocity as f32 / 127.0) * master;
            let params = instrument.envelope();

            for frame in 0..frames {
                let sample = voice.next_sample(&params, clock + frame as u64, sample_rate) * gain;
                output[frame * 2] += sample;
                output[frame * 2 + 1] += sample;
                if voice.is_finished() {
                    break;
                }
            }
        }

        self.clock += frames as u64;

        // Soft limiting: bounds the summed signal to (-1, 1) no matter how
        // many voices landed constructively.
        for sample in output.iter_mut() {
            *sample = sample.tanh();
        }

        self.voices.sweep_finished();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::envelope::EnvelopeStage;

    const RATE: u32 = 44_100;

    fn sine_synth() -> (Synthesizer, InstrumentId) {
        let mut synth = Synthesizer::new(RATE);
        let id = synth
            .create_instrument(InstrumentKind::SineWave, "sine", 1.0)
            .unwrap();
        (synth, id)
    }

    fn render_frames(synth: &mut Synthesizer, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0f32; frames * 2];
        synth.render(&mut buffer);
        buffer
    }

    #[test]
    fn test_unsupported_sample_rate_falls_back() {
        assert_eq!(Synthesizer::new(0).sample_rate(), 44_100);
        assert_eq!(Synthesizer::new(1_000_000).sample_rate(), 44_100);
        assert_eq!(Synthesizer::new(48_000).sample_rate(), 48_000);
    }

    #[test]
    fn test_render_with_no_voices_is_silent() {
        let (mut synth, _) = sine_synth();
        let buffer = render_frames(&mut synth, 512);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_render_empty_and_odd_buffers() {
        let (mut synth, id) = sine_synth();
        synth.note_on(id, 60, 100).unwrap();

        let mut empty: [f32; 0] = [];
        synth.render(&mut empty);

        // An odd-length buffer renders the whole frames and zeroes the
        // trailing sample.
        let mut odd = vec![9.0f32; 7];
        synth.render(&mut odd);
        assert_eq!(odd[6], 0.0);
    }

    #[test]
    fn test_note_on_unknown_instrument_fails() {
        let (mut synth, id) = sine_synth();
        synth.unload_instrument(id);
        assert_eq!(
            synth.note_on(id, 60, 100),
            Err(EngineError::UnknownInstrument(id))
        );
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_note_on_rejects_out_of_range_note() {
        let (mut synth, id) = sine_synth();
        assert_eq!(synth.note_on(id, 128, 100), Err(EngineError::InvalidNote(128)));
        assert_eq!(synth.note_off(id, 200), Err(EngineError::InvalidNote(200)));
    }

    #[test]
    fn test_velocity_clamping() {
        let (mut synth, id) = sine_synth();

        synth.note_on(id, 60, 200).unwrap();
        let key = VoiceKey {
            instrument: id,
            note: 60,
        };
        assert_eq!(synth.voices.get(key).unwrap().velocity, 127);

        synth.note_on(id, 61, 0).unwrap();
        let key = VoiceKey {
            instrument: id,
            note: 61,
        };
        assert_eq!(synth.voices.get(key).unwrap().velocity, 1);
    }

    #[test]
    fn test_retrigger_keeps_single_voice_with_new_velocity() {
        let (mut synth, id) = sine_synth();
        synth.note_on(id, 60, 100).unwrap();
        synth.note_on(id, 60, 55).unwrap();

        assert_eq!(synth.active_voice_count(), 1);
        let key = VoiceKey {
            instrument: id,
            note: 60,
        };
        assert_eq!(synth.voices.get(key).unwrap().velocity, 55);
    }

    #[test]
    fn test_released_voice_expires_after_release_tail() {
        let (mut synth, id) = sine_synth();
        synth
            .set_instrument_envelope(id, EnvelopeParams::new(0.01, 0.05, 0.7, 0.1))
            .unwrap();
        synth.note_on(id, 60, 100).unwrap();
        synth.note_off(id, 60).unwrap();

        // 0.2 s of rendering comfortably covers the 0.1 s release.
        render_frames(&mut synth, (RATE as usize) / 5);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_stray_note_off_succeeds_and_changes_nothing() {
        let (mut synth, id) = sine_synth();
        assert!(synth.note_off(id, 42).is_ok());
        assert_eq!(synth.active_voice_count(), 0);

        let buffer = render_frames(&mut synth, 256);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_unload_cascades_active_voices() {
        let (mut synth, id) = sine_synth();
        for note in [60u8, 64, 67] {
            synth.note_on(id, note, 120).unwrap();
        }
        assert_eq!(synth.active_voice_count(), 3);

        assert!(synth.unload_instrument(id));
        assert_eq!(synth.active_voice_count(), 0);

        let buffer = render_frames(&mut synth, 512);
        assert!(buffer.iter().all(|&s| s == 0.0));

        // Double unload is a harmless no-op reported as "not found".
        assert!(!synth.unload_instrument(id));
    }

    #[test]
    fn test_soft_limiter_bounds_heavy_polyphony() {
        let (mut synth, id) = sine_synth();
        for note in 40u8..60 {
            synth.note_on(id, note, 127).unwrap();
        }
        assert_eq!(synth.active_voice_count(), 20);

        let buffer = render_frames(&mut synth, 2048);
        let peak = buffer.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        assert!(peak > 0.1, "20 voices should produce signal, peak {peak}");
        assert!(
            buffer.iter().all(|&s| (-1.0..=1.0).contains(&s)),
            "limiter must bound output to [-1, 1]"
        );
    }

    #[test]
    fn test_envelope_progresses_during_render() {
        // 0.1 s of audio pushes the envelope well past its 0.01 s attack.
        let (mut synth, id) = sine_synth();
        synth
            .set_instrument_envelope(id, EnvelopeParams::new(0.01, 0.05, 0.7, 0.3))
            .unwrap();
        synth.note_on(id, 60, 100).unwrap();

        let buffer = render_frames(&mut synth, 4410);
        assert!(buffer.iter().any(|&s| s.abs() > 0.01), "buffer is silent");

        let key = VoiceKey {
            instrument: id,
            note: 60,
        };
        let stage = synth.voices.get(key).unwrap().envelope.stage();
        assert!(
            matches!(stage, EnvelopeStage::Decay | EnvelopeStage::Sustain),
            "envelope should have left attack, got {stage:?}"
        );
    }

    #[test]
    fn test_sample_instrument_renders_stored_buffer() {
        let mut synth = Synthesizer::new(RATE);
        let id = synth
            .create_instrument(InstrumentKind::SampleBased, "kit", 1.0)
            .unwrap();
        synth
            .store_sample(id, 60, vec![12_000i16; RATE as usize], RATE)
            .unwrap();
        synth.note_on(id, 60, 127).unwrap();

        let buffer = render_frames(&mut synth, 1024);
        assert!(buffer.iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn test_sample_instrument_falls_back_to_sine_for_missing_note() {
        let mut synth = Synthesizer::new(RATE);
        let id = synth
            .create_instrument(InstrumentKind::SampleBased, "kit", 1.0)
            .unwrap();
        synth.store_sample(id, 36, vec![8_000i16; 64], RATE).unwrap();

        // Note 72 has no sample; the voice must still sound via the sine
        // path.
        synth.note_on(id, 72, 127).unwrap();
        let buffer = render_frames(&mut synth, 1024);
        assert!(buffer.iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn test_store_sample_validation() {
        let mut synth = Synthesizer::new(RATE);
        let id = synth
            .create_instrument(InstrumentKind::SampleBased, "kit", 1.0)
            .unwrap();
        assert_eq!(
            synth.store_sample(id, 200, vec![0; 4], RATE),
            Err(EngineError::InvalidNote(200))
        );
        assert_eq!(
            synth.store_sample(id, 60, vec![0; 4], 0),
            Err(EngineError::InvalidSampleRate(0))
        );
    }

    #[test]
    fn test_mix_matches_limited_sum_of_independent_renders() {
        let frames = 512;

        // Instrument A alone: a sine playing note 60.
        let (mut sine_only, _) = sine_synth();
        let sine_id = sine_only.instrument_ids()[0];
        sine_only.note_on(sine_id, 60, 100).unwrap();
        let sine_buffer = render_frames(&mut sine_only, frames);

        // Instrument B alone: a sampled note 60.
        let mut sample_only = Synthesizer::new(RATE);
        let sample_data = vec![10_000i16; RATE as usize];
        let sample_id = sample_only
            .create_instrument(InstrumentKind::SampleBased, "kit", 1.0)
            .unwrap();
        sample_only
            .store_sample(sample_id, 60, sample_data.clone(), RATE)
            .unwrap();
        sample_only.note_on(sample_id, 60, 100).unwrap();
        let sample_buffer = render_frames(&mut sample_only, frames);

        // Both together in one engine.
        let mut combined = Synthesizer::new(RATE);
        let a = combined
            .create_instrument(InstrumentKind::SineWave, "sine", 1.0)
            .unwrap();
        let b = combined
            .create_instrument(InstrumentKind::SampleBased, "kit", 1.0)
            .unwrap();
        combined.store_sample(b, 60, sample_data, RATE).unwrap();
        combined.note_on(a, 60, 100).unwrap();
        combined.note_on(b, 60, 100).unwrap();
        let combined_buffer = render_frames(&mut combined, frames);

        // The independent renders are already tanh-limited; undo that to
        // recover the raw sums before comparing.
        for i in 0..frames * 2 {
            let expected = (sine_buffer[i].atanh() + sample_buffer[i].atanh()).tanh();
            assert!(
                (combined_buffer[i] - expected).abs() < 1e-4,
                "sample {i}: expected {expected}, got {}",
                combined_buffer[i]
            );
        }
    }

    #[test]
    fn test_all_notes_off() {
        let (mut synth, id) = sine_synth();
        for note in [60u8, 64, 67] {
            synth.note_on(id, note, 100).unwrap();
        }

        // Graceful release keeps the voices ringing their tails.
        synth.all_notes_off(false);
        assert_eq!(synth.active_voice_count(), 3);
        render_frames(&mut synth, RATE as usize);
        assert_eq!(synth.active_voice_count(), 0);

        for note in [60u8, 64, 67] {
            synth.note_on(id, note, 100).unwrap();
        }
        synth.all_notes_off(true);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_master_volume_clamped_and_applied() {
        let (mut synth, id) = sine_synth();
        synth.set_master_volume(2.0);
        assert_eq!(synth.master_volume(), 1.0);
        synth.set_master_volume(-1.0);
        assert_eq!(synth.master_volume(), 0.0);

        synth.note_on(id, 60, 127).unwrap();
        let buffer = render_frames(&mut synth, 512);
        assert!(
            buffer.iter().all(|&s| s == 0.0),
            "zero master volume must silence the mix"
        );
    }

    #[test]
    fn test_instrument_ids_track_lifecycle() {
        let mut synth = Synthesizer::new(RATE);
        let a = synth
            .create_instrument(InstrumentKind::SineWave, "a", 1.0)
            .unwrap();
        let b = synth
            .create_instrument(InstrumentKind::SampleBased, "b", 1.0)
            .unwrap();
        assert_eq!(synth.instrument_ids(), vec![a, b]);

        synth.unload_instrument(a);
        assert_eq!(synth.instrument_ids(), vec![b]);
    }
}
