//! ADSR envelope generation.
//!
//! Every voice owns an [`Envelope`]: a small state machine that shapes the
//! voice's gain over time. Envelopes are driven by the synthesizer's running
//! sample clock rather than wall-clock time, which keeps rendering
//! deterministic regardless of callback scheduling.

use serde::{Deserialize, Serialize};

/// Minimum length of the timed envelope stages, in seconds.
///
/// Enforced when parameters are set (see [`EnvelopeParams::clamped`]) so the
/// render-time ramp math never divides by zero.
pub const MIN_STAGE_SECONDS: f32 = 0.001;

/// Per-instrument ADSR parameters.
///
/// Stored on the instrument and shared by all of its voices. Values are
/// clamped at the point they are set on the instrument, not at render time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    /// Attack time in seconds: gain ramps linearly 0 -> 1.
    pub attack: f32,

    /// Decay time in seconds: gain ramps linearly 1 -> `sustain`.
    pub decay: f32,

    /// Sustain level in [0, 1], held until release is triggered.
    pub sustain: f32,

    /// Release time in seconds: gain ramps linearly to 0 from whatever
    /// value was active when the note was released.
    pub release: f32,
}

impl EnvelopeParams {
    /// Creates a parameter set, clamping each value to its valid domain.
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
        .clamped()
    }

    /// Returns a copy with all values clamped to their valid domains:
    /// timed stages to at least [`MIN_STAGE_SECONDS`], sustain to [0, 1].
    pub fn clamped(self) -> Self {
        Self {
            attack: self.attack.max(MIN_STAGE_SECONDS),
            decay: self.decay.max(MIN_STAGE_SECONDS),
            sustain: self.sustain.clamp(0.0, 1.0),
            release: self.release.max(MIN_STAGE_SECONDS),
        }
    }
}

impl Default for EnvelopeParams {
    /// A general-purpose keyboard envelope: fast attack, short decay,
    /// strong sustain, and an audible release tail.
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.05,
            sustain: 0.7,
            release: 0.3,
        }
    }
}

/// The stage an envelope is currently in.
///
/// Stages progress Attack -> Decay -> Sustain; a release can be triggered
/// from any of those and runs Release -> Off. `Off` is terminal: the voice
/// no longer contributes and can be removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

/// Per-voice ADSR envelope state.
///
/// Tracks the current stage, the sample-clock instant that stage began, and
/// (for Release) the gain captured when the release was triggered.
#[derive(Debug, Clone)]
pub struct Envelope {
    stage: EnvelopeStage,
    /// Sample-clock instant the current stage began.
    stage_start: u64,
    /// Gain at the moment release was triggered; the release stage ramps
    /// from this value down to zero.
    release_from: f32,
}

impl Envelope {
    /// Creates an envelope entering its Attack stage at clock instant `now`.
    pub fn new(now: u64) -> Self {
        Self {
            stage: EnvelopeStage::Attack,
            stage_start: now,
            release_from: 0.0,
        }
    }

    /// Returns the gain in [0, 1] for clock instant `now`, advancing the
    /// stage machine across any boundaries that `now` has passed.
    ///
    /// `now` is a frame count on the synthesizer's sample clock; stage
    /// lengths come from `params` in seconds and convert via `sample_rate`.
    pub fn advance(&mut self, params: &EnvelopeParams, now: u64, sample_rate: u32) -> f32 {
        let rate = sample_rate as f32;
        loop {
            let elapsed = now.saturating_sub(self.stage_start) as f32 / rate;
            match self.stage {
                EnvelopeStage::Attack => {
                    if elapsed < params.attack {
                        return elapsed / params.attack;
                    }
                    self.stage = EnvelopeStage::Decay;
                    self.stage_start += (params.attack * rate) as u64;
                }
                EnvelopeStage::Decay => {
                    if elapsed < params.decay {
                        return 1.0 - (1.0 - params.sustain) * (elapsed / params.decay);
                    }
                    self.stage = EnvelopeStage::Sustain;
                    self.stage_start += (params.decay * rate) as u64;
                }
                EnvelopeStage::Sustain => return params.sustain,
                EnvelopeStage::Release => {
                    if elapsed < params.release {
                        return self.release_from * (1.0 - elapsed / params.release);
                    }
                    self.stage = EnvelopeStage::Off;
                    return 0.0;
                }
                EnvelopeStage::Off => return 0.0,
            }
        }
    }

    /// Begins the Release stage, capturing the gain active at `now` so the
    /// release ramps from wherever the envelope actually was.
    ///
    /// Triggering release on an envelope already releasing (or Off) is a
    /// no-op; the original ramp keeps running.
    pub fn trigger_release(&mut self, params: &EnvelopeParams, now: u64, sample_rate: u32) {
        if matches!(self.stage, EnvelopeStage::Release | EnvelopeStage::Off) {
            return;
        }
        let gain = self.advance(params, now, sample_rate);
        self.stage = EnvelopeStage::Release;
        self.stage_start = now;
        self.release_from = gain;
    }

    /// Whether the envelope still contributes gain (every stage except Off).
    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Off
    }

    /// Returns the current stage.
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }
}
