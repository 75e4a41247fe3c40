//! Voice records and the active-voice registry.
//!
//! A voice is the runtime state of one currently-sounding
//! (instrument, note) pair: velocity, envelope, and generator position. The
//! registry keys voices by that composite pair in a single map, so velocity,
//! phase, and envelope state can never drift apart the way parallel per-note
//! maps can.

use std::collections::HashMap;

use super::envelope::{Envelope, EnvelopeParams, EnvelopeStage};
use super::instrument::{Instrument, InstrumentId};
use super::oscillator::{SamplePlayer, SineOscillator};

/// Composite key identifying one sounding note. At most one voice exists
/// per key at any instant; a second note-on for the same key retriggers
/// (replaces) the voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceKey {
    pub instrument: InstrumentId,
    pub note: u8,
}

/// The signal generator backing a voice, chosen once at note-on.
#[derive(Debug, Clone)]
enum VoiceGenerator {
    /// Synthesized sine wave. Also the fallback when a sample-capable
    /// instrument has no buffer stored for the note.
    Sine(SineOscillator),
    /// Playback of the note's stored PCM buffer.
    Sample(SamplePlayer),
}

/// Runtime state of one currently-sounding note.
#[derive(Debug, Clone)]
pub struct Voice {
    /// Note velocity, clamped to 1-127 at note-on; scales amplitude
    /// linearly as velocity/127.
    pub velocity: u8,
    /// Sample-clock instant the voice started.
    pub started_at: u64,
    pub envelope: Envelope,
    generator: VoiceGenerator,
}

impl Voice {
    /// Creates a voice for `note` on `instrument`, starting its envelope in
    /// Attack at clock instant `now`.
    ///
    /// The generator is picked here: a stored sample if the instrument has
    /// one for this note, otherwise a sine oscillator. A voice holds onto
    /// the buffer it started with, so replacing the instrument's sample
    /// mid-note does not glitch playback.
    pub fn start(instrument: &Instrument, note: u8, velocity: u8, now: u64, engine_rate: u32) -> Self {
        let generator = match instrument.sample_for(note) {
            Some(sample) => VoiceGenerator::Sample(SamplePlayer::new(
                sample.data.clone(),
                sample.sample_rate,
                engine_rate,
            )),
            None => VoiceGenerator::Sine(SineOscillator::new(note)),
        };
        Self {
            velocity,
            started_at: now,
            envelope: Envelope::new(now),
            generator,
        }
    }

    /// Produces the envelope-shaped sample for clock instant `now`.
    ///
    /// Velocity, instrument volume, and master volume are applied by the
    /// mixing loop, not here.
    pub fn next_sample(&mut self, params: &EnvelopeParams, now: u64, sample_rate: u32) -> f32 {
        let gain = self.envelope.advance(params, now, sample_rate);
        if !self.envelope.is_active() {
            return 0.0;
        }
        let held = matches!(
            self.envelope.stage(),
            EnvelopeStage::Attack | EnvelopeStage::Decay | EnvelopeStage::Sustain
        );
        let raw = match &mut self.generator {
            VoiceGenerator::Sine(osc) => osc.next_sample(sample_rate),
            VoiceGenerator::Sample(player) => player.next_sample(held),
        };
        raw * gain
    }

    /// Whether the voice no longer contributes and can be removed.
    pub fn is_finished(&self) -> bool {
        !self.envelope.is_active()
    }
}

/// All currently-sounding voices, keyed by (instrument, note).
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    voices: HashMap<VoiceKey, Voice>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self {
            voices: HashMap::new(),
        }
    }

    /// Inserts the voice for `key`, replacing any voice already sounding
    /// there (retrigger semantics: the new velocity and phase win).
    pub fn start(&mut self, key: VoiceKey, voice: Voice) {
        self.voices.insert(key, voice);
    }

    /// Triggers the release of the voice for `key`. Returns false when no
    /// voice is sounding for the key (a stray note-off).
    pub fn release(
        &mut self,
        key: VoiceKey,
        params: &EnvelopeParams,
        now: u64,
        sample_rate: u32,
    ) -> bool {
        match self.voices.get_mut(&key) {
            Some(voice) => {
                voice.envelope.trigger_release(params, now, sample_rate);
                true
            }
            None => false,
        }
    }

    /// Removes every voice belonging to `instrument`, used when the
    /// instrument is unloaded.
    pub fn remove_for_instrument(&mut self, instrument: InstrumentId) {
        self.voices.retain(|key, _| key.instrument != instrument);
    }

    /// Drops voices whose envelope has reached Off. Called after each
    /// mixing pass — the only place voices are deleted, so a voice can
    /// never disappear mid-render.
    pub fn sweep_finished(&mut self) {
        self.voices.retain(|_, voice| !voice.is_finished());
    }

    /// Hard-stops every voice without a release tail.
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn get(&self, key: VoiceKey) -> Option<&Voice> {
        self.voices.get(&key)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&VoiceKey, &mut Voice)> {
        self.voices.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::instrument::{InstrumentKind, InstrumentStore};

    const RATE: u32 = 44_100;

    fn test_instrument(store: &mut InstrumentStore) -> InstrumentId {
        store.create(InstrumentKind::SineWave, "test", 1.0).unwrap()
    }

    #[test]
    fn test_retrigger_replaces_voice() {
        let mut store = InstrumentStore::new();
        let id = test_instrument(&mut store);
        let instrument = store.get(id).unwrap();
        let key = VoiceKey {
            instrument: id,
            note: 60,
        };

        let mut registry = VoiceRegistry::new();
        registry.start(key, Voice::start(instrument, 60, 100, 0, RATE));
        registry.start(key, Voice::start(instrument, 60, 40, 500, RATE));

        assert_eq!(registry.len(), 1);
        let voice = registry.get(key).unwrap();
        assert_eq!(voice.velocity, 40);
        assert_eq!(voice.started_at, 500);
    }

    #[test]
    fn test_stray_release_reports_missing() {
        let mut registry = VoiceRegistry::new();
        let mut store = InstrumentStore::new();
        let id = test_instrument(&mut store);
        let params = store.get(id).unwrap().envelope();

        let key = VoiceKey {
            instrument: id,
            note: 64,
        };
        assert!(!registry.release(key, &params, 0, RATE));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_finished_voices() {
        let mut store = InstrumentStore::new();
        let id = test_instrument(&mut store);
        let instrument = store.get(id).unwrap();
        let params = instrument.envelope();

        let held = VoiceKey {
            instrument: id,
            note: 60,
        };
        let released = VoiceKey {
            instrument: id,
            note: 62,
        };

        let mut registry = VoiceRegistry::new();
        registry.start(held, Voice::start(instrument, 60, 100, 0, RATE));
        registry.start(released, Voice::start(instrument, 62, 100, 0, RATE));

        // Release one voice and run both far past its release tail.
        registry.release(released, &params, 0, RATE);
        let far = (RATE as u64) * 10;
        for (_, voice) in registry.iter_mut() {
            voice.next_sample(&params, far, RATE);
        }
        registry.sweep_finished();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(held).is_some());
        assert!(registry.get(released).is_none());
    }

    #[test]
    fn test_remove_for_instrument_only_touches_that_instrument() {
        let mut store = InstrumentStore::new();
        let a = test_instrument(&mut store);
        let b = test_instrument(&mut store);

        let mut registry = VoiceRegistry::new();
        for note in [60u8, 64, 67] {
            let key = VoiceKey {
                instrument: a,
                note,
            };
            registry.start(key, Voice::start(store.get(a).unwrap(), note, 100, 0, RATE));
        }
        let b_key = VoiceKey {
            instrument: b,
            note: 60,
        };
        registry.start(b_key, Voice::start(store.get(b).unwrap(), 60, 100, 0, RATE));

        registry.remove_for_instrument(a);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(b_key).is_some());
    }
}
