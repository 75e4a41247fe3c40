//! Instrument metadata and the instrument store.
//!
//! Instruments carry everything a voice needs to render: the generator kind,
//! volume, envelope parameters, and (for sample-capable kinds) a per-note
//! table of pre-loaded PCM buffers. The store hands out monotonically
//! increasing IDs that are never reused, even after an unload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::envelope::EnvelopeParams;
use super::synthesizer::EngineError;
use super::MAX_NOTE;

/// Maximum number of concurrently loaded instruments.
pub const MAX_INSTRUMENTS: usize = 32;

/// Unique identifier for a loaded instrument.
///
/// Assigned by the store at creation; IDs increase monotonically and are
/// never reused, so a stale ID held by a caller can never alias a newer
/// instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(u32);

impl InstrumentId {
    /// Returns the raw ID value (for logging/FFI marshalling).
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an instrument renders its voices, fixed at creation time.
///
/// Sample-capable kinds accept per-note buffers through `store_sample`; a
/// sine instrument that should gain samples must be re-created as a
/// sample-capable kind rather than migrating in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Pure sine synthesis for every note.
    SineWave,
    /// Per-note PCM buffers loaded from plain sample files.
    SampleBased,
    /// Per-note PCM buffers extracted from a SoundFont preset by the
    /// external loader.
    Sf2Based,
    /// Per-note PCM buffers resolved from an SFZ definition by the
    /// external loader.
    SfzBased,
}

impl InstrumentKind {
    /// Whether this kind accepts per-note sample buffers.
    pub fn is_sample_capable(&self) -> bool {
        !matches!(self, InstrumentKind::SineWave)
    }
}

/// A pre-loaded PCM buffer for one note, with its native capture rate.
///
/// The buffer arrives fully decoded from the external file loader; the
/// engine never parses audio files itself.
#[derive(Debug, Clone)]
pub struct NoteSample {
    /// 16-bit mono PCM samples.
    pub data: Arc<Vec<i16>>,
    /// Rate the buffer was captured at, in Hz.
    pub sample_rate: u32,
}

/// A loaded instrument: generator kind, mixing volume, envelope, and the
/// per-note sample table.
#[derive(Debug, Clone)]
pub struct Instrument {
    id: InstrumentId,
    kind: InstrumentKind,
    name: String,
    volume: f32,
    envelope: EnvelopeParams,
    samples: BTreeMap<u8, NoteSample>,
}

impl Instrument {
    fn new(id: InstrumentId, kind: InstrumentKind, name: &str, volume: f32) -> Self {
        Self {
            id,
            kind,
            name: name.to_string(),
            volume: volume.clamp(0.0, 1.0),
            envelope: EnvelopeParams::default(),
            samples: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instrument volume in [0, 1], independent of master volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the instrument volume, silently clamping to [0, 1].
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn envelope(&self) -> EnvelopeParams {
        self.envelope
    }

    /// Sets the envelope, silently clamping each parameter to its domain.
    pub fn set_envelope(&mut self, params: EnvelopeParams) {
        self.envelope = params.clamped();
    }

    /// Stores (or replaces) the PCM buffer for `note`.
    ///
    /// Fails for sine instruments: the generator kind is fixed at creation
    /// and sine instruments never consult a sample table. Voices already
    /// sounding on `note` keep the buffer they started with; the new buffer
    /// applies from the next note-on.
    pub fn store_sample(
        &mut self,
        note: u8,
        data: Vec<i16>,
        sample_rate: u32,
    ) -> Result<(), EngineError> {
        if !self.kind.is_sample_capable() {
            return Err(EngineError::NotSampleCapable {
                id: self.id,
                kind: self.kind,
            });
        }
        self.samples.insert(
            note,
            NoteSample {
                data: Arc::new(data),
                sample_rate,
            },
        );
        Ok(())
    }

    /// Returns the stored buffer for `note`, if any. Notes without a buffer
    /// fall back to sine synthesis in the voice layer.
    pub fn sample_for(&self, note: u8) -> Option<&NoteSample> {
        self.samples.get(&note)
    }

    /// Number of notes with a stored buffer.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Owns all loaded instruments, keyed by their store-assigned ID.
#[derive(Debug)]
pub struct InstrumentStore {
    instruments: BTreeMap<InstrumentId, Instrument>,
    next_id: u32,
}

impl Default for InstrumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentStore {
    pub fn new() -> Self {
        Self {
            instruments: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Creates an instrument and returns its new ID.
    ///
    /// Volume is clamped to [0, 1]; the envelope starts at
    /// [`EnvelopeParams::default`]. Fails once [`MAX_INSTRUMENTS`]
    /// instruments are loaded.
    pub fn create(
        &mut self,
        kind: InstrumentKind,
        name: &str,
        volume: f32,
    ) -> Result<InstrumentId, EngineError> {
        if self.instruments.len() >= MAX_INSTRUMENTS {
            return Err(EngineError::TooManyInstruments);
        }
        let id = InstrumentId(self.next_id);
        self.next_id += 1;
        self.instruments.insert(id, Instrument::new(id, kind, name, volume));
        Ok(id)
    }

    /// Removes an instrument. Returns false when the ID is not loaded
    /// (already unloaded or never existed).
    pub fn remove(&mut self, id: InstrumentId) -> bool {
        self.instruments.remove(&id).is_some()
    }

    pub fn get(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.get(&id)
    }

    pub fn get_mut(&mut self, id: InstrumentId) -> Option<&mut Instrument> {
        self.instruments.get_mut(&id)
    }

    /// IDs of all loaded instruments, in creation order.
    pub fn ids(&self) -> Vec<InstrumentId> {
        self.instruments.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

/// Validates a MIDI note number, the one parameter with no sane default to
/// clamp to.
pub(crate) fn check_note(note: u8) -> Result<(), EngineError> {
    if note > MAX_NOTE {
        return Err(EngineError::InvalidNote(note));
    }
    Ok(())
}
