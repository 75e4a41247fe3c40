//! Audio export functionality.
//!
//! Bounces a timed list of note events to a WAV file by rendering them
//! offline through the synthesizer. The engine has no notion of musical
//! time, so events are stamped in plain seconds; converting beats and tempo
//! into seconds is the sequencer's job.

use crate::synth::{InstrumentId, Synthesizer};
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::time::Duration;

/// Buffer size for rendering chunks, in frames.
/// Larger buffers are more efficient but quantize event timing more
/// coarsely.
const RENDER_BUFFER_FRAMES: usize = 512;

/// A timed note event for offline rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// When the event fires, in seconds from the start of the bounce.
    pub at: f64,
    /// Target instrument.
    pub instrument: InstrumentId,
    /// MIDI note number (0-127).
    pub note: u8,
    /// True for note-on, false for note-off.
    pub on: bool,
    /// Velocity for note-on events (clamped to 1-127 by the engine);
    /// ignored for note-off.
    pub velocity: u8,
}

impl NoteEvent {
    /// Creates a note-on event.
    pub fn on(at: f64, instrument: InstrumentId, note: u8, velocity: u8) -> Self {
        Self {
            at,
            instrument,
            note,
            on: true,
            velocity,
        }
    }

    /// Creates a note-off event.
    pub fn off(at: f64, instrument: InstrumentId, note: u8) -> Self {
        Self {
            at,
            instrument,
            note,
            on: false,
            velocity: 0,
        }
    }
}

/// Renders note events through `synth` and writes the result to a 16-bit
/// stereo WAV file.
///
/// Events may arrive in any order; they are sorted by time, with note-offs
/// ahead of note-ons at equal timestamps so retriggers behave like a played
/// performance. Rendering continues for the full `duration`, which should
/// include enough tail for the final release.
///
/// # Arguments
///
/// * `synth` - The synthesizer to render through (instruments already set up)
/// * `events` - Note events with timestamps in seconds
/// * `duration` - Total length of the bounce
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Errors
///
/// Returns an error if the output file cannot be created or written.
pub fn export_to_wav<P, F>(
    synth: &mut Synthesizer,
    events: &[NoteEvent],
    duration: Duration,
    output_path: P,
    mut progress_callback: Option<F>,
) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    let mut events: Vec<NoteEvent> = events.to_vec();
    events.sort_by(|a, b| a.at.total_cmp(&b.at).then(a.on.cmp(&b.on)));

    let sample_rate = synth.sample_rate();
    let total_frames = (duration.as_secs_f64() * sample_rate as f64) as usize;

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).with_context(|| {
        format!(
            "Failed to create output WAV file: {}",
            output_path.as_ref().display()
        )
    })?;

    let mut buffer = vec![0.0f32; RENDER_BUFFER_FRAMES * 2];
    let mut current_frame = 0usize;
    let mut event_idx = 0usize;

    while current_frame < total_frames {
        // Dispatch events that fall at or before the current position.
        let current_time = current_frame as f64 / sample_rate as f64;
        while event_idx < events.len() && events[event_idx].at <= current_time {
            let event = events[event_idx];
            let delivered = if event.on {
                synth.note_on(event.instrument, event.note, event.velocity).is_ok()
            } else {
                synth.note_off(event.instrument, event.note).is_ok()
            };
            if !delivered {
                tracing::warn!(
                    "skipping event for instrument {} note {}",
                    event.instrument,
                    event.note
                );
            }
            event_idx += 1;
        }

        // Render the next chunk.
        let frames = (total_frames - current_frame).min(RENDER_BUFFER_FRAMES);
        synth.render(&mut buffer[..frames * 2]);

        // Write to WAV (interleaved stereo, 16-bit).
        for &sample in &buffer[..frames * 2] {
            let pcm = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(pcm)?;
        }

        current_frame += frames;

        if let Some(ref mut callback) = progress_callback {
            callback(current_frame as f32 / total_frames as f32);
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::InstrumentKind;
    use std::path::PathBuf;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    fn test_bounce_chord_to_wav() {
        let mut synth = Synthesizer::new(44_100);
        let id = synth
            .create_instrument(InstrumentKind::SineWave, "sine", 1.0)
            .unwrap();

        let events = vec![
            NoteEvent::on(0.0, id, 60, 100),
            NoteEvent::on(0.1, id, 64, 100),
            NoteEvent::on(0.2, id, 67, 100),
            NoteEvent::off(0.5, id, 60),
            NoteEvent::off(0.5, id, 64),
            NoteEvent::off(0.5, id, 67),
        ];

        let path = temp_wav("multitracker_bounce_test.wav");
        let mut progress = Vec::new();
        export_to_wav(
            &mut synth,
            &events,
            Duration::from_secs(1),
            &path,
            Some(|p: f32| progress.push(p)),
        )
        .unwrap();

        // Re-read and verify shape and content.
        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(reader.duration(), 44_100);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert!(samples.iter().any(|&s| s.abs() > 100), "bounce is silent");

        assert!(!progress.is_empty());
        assert!((progress.last().unwrap() - 1.0).abs() < 1e-6);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_events_for_unknown_instruments_are_skipped() {
        let mut synth = Synthesizer::new(44_100);
        let id = synth
            .create_instrument(InstrumentKind::SineWave, "sine", 1.0)
            .unwrap();
        synth.unload_instrument(id);

        let events = vec![NoteEvent::on(0.0, id, 60, 100)];
        let path = temp_wav("multitracker_bounce_skip_test.wav");
        export_to_wav(
            &mut synth,
            &events,
            Duration::from_millis(100),
            &path,
            None::<fn(f32)>,
        )
        .unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert!(reader.samples::<i16>().all(|s| s.unwrap() == 0));

        std::fs::remove_file(&path).ok();
    }
}
