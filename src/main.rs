//! multitracker - command-line exerciser for the note-rendering engine.
//!
//! Stands in for the engine's external collaborators (UI, sequencer, FFI
//! glue): it creates instruments, fires timed note events at the engine, and
//! either plays them live through the audio output or bounces them to a WAV
//! file.
//!
//! # Usage
//!
//! ```bash
//! cargo run                           # play the demo arpeggio live
//! cargo run -- --patch pads.json     # load instruments from a patch file
//! cargo run -- --bounce out.wav      # render offline instead of playing
//! ```
//!
//! A patch file is a JSON document describing the instruments to load:
//!
//! ```json
//! {
//!   "instruments": [
//!     {
//!       "name": "soft pad",
//!       "kind": "sine_wave",
//!       "volume": 0.8,
//!       "envelope": { "attack": 0.2, "decay": 0.1, "sustain": 0.6, "release": 0.8 }
//!     }
//!   ]
//! }
//! ```

use multitracker::audio::{export_to_wav, NoteEvent};
use multitracker::synth::{note_to_name, EnvelopeParams, InstrumentId, InstrumentKind};
use multitracker::{AudioEngine, Synthesizer};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default length of the demo performance, in seconds. Long enough for the
/// closing chord's release tail.
const DEFAULT_DURATION: f64 = 4.0;

/// Command-line options for the exerciser.
struct CliOptions {
    /// Patch file describing the instruments to load.
    patch: Option<PathBuf>,
    /// Bounce to this WAV file instead of playing live.
    bounce: Option<PathBuf>,
    /// Total demo length in seconds.
    duration: f64,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--patch <file.json>` or `-p <file.json>`: load instruments from a patch file
    /// - `--bounce <out.wav>` or `-b <out.wav>`: render offline to a WAV file
    /// - `--duration <secs>` or `-d <secs>`: total demo length
    /// - `--help` or `-h`: print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut patch: Option<PathBuf> = None;
        let mut bounce: Option<PathBuf> = None;
        let mut duration = DEFAULT_DURATION;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--patch" | "-p" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --patch requires a path argument");
                        std::process::exit(1);
                    }
                    patch = Some(PathBuf::from(&args[i]));
                }
                "--bounce" | "-b" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --bounce requires a path argument");
                        std::process::exit(1);
                    }
                    bounce = Some(PathBuf::from(&args[i]));
                }
                "--duration" | "-d" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --duration requires a number of seconds");
                        std::process::exit(1);
                    }
                    duration = args[i]
                        .parse()
                        .with_context(|| format!("Invalid duration: {}", args[i]))?;
                }
                "--help" | "-h" => {
                    eprintln!("multitracker - note-rendering engine exerciser");
                    eprintln!();
                    eprintln!(
                        "Usage: {} [OPTIONS]",
                        args.first().unwrap_or(&"multitracker".to_string())
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -p, --patch FILE     Load instruments from a JSON patch file");
                    eprintln!("  -b, --bounce FILE    Render the demo to a WAV file instead of playing");
                    eprintln!("  -d, --duration SECS  Total demo length (default: {DEFAULT_DURATION})");
                    eprintln!("  -h, --help           Print this help message");
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        Ok(Self {
            patch,
            bounce,
            duration,
        })
    }
}

/// One instrument definition in a patch file.
#[derive(Debug, Deserialize)]
struct PatchInstrument {
    name: String,
    #[serde(default = "default_kind")]
    kind: InstrumentKind,
    #[serde(default = "default_volume")]
    volume: f32,
    #[serde(default)]
    envelope: Option<EnvelopeParams>,
}

/// A patch file: the set of instruments the demo plays.
#[derive(Debug, Deserialize)]
struct Patch {
    instruments: Vec<PatchInstrument>,
}

fn default_kind() -> InstrumentKind {
    InstrumentKind::SineWave
}

fn default_volume() -> f32 {
    1.0
}

impl Patch {
    /// The built-in patch used when no file is given: one sine lead.
    fn demo() -> Self {
        Self {
            instruments: vec![PatchInstrument {
                name: "demo lead".to_string(),
                kind: InstrumentKind::SineWave,
                volume: 1.0,
                envelope: Some(EnvelopeParams::new(0.01, 0.05, 0.7, 0.3)),
            }],
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read patch file: {}", path.display()))?;
        let patch: Patch = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse patch file: {}", path.display()))?;
        if patch.instruments.is_empty() {
            return Err(anyhow!("Patch file defines no instruments"));
        }
        Ok(patch)
    }
}

/// Builds the demo performance: an ascending arpeggio per instrument,
/// closed by a held C-major chord. Instruments are staggered slightly so
/// layered patches stay audible as separate parts.
fn demo_events(instruments: &[InstrumentId]) -> Vec<NoteEvent> {
    let mut events = Vec::new();
    for (index, &id) in instruments.iter().enumerate() {
        let offset = index as f64 * 0.05;
        for (step, note) in [60u8, 64, 67, 72].into_iter().enumerate() {
            let at = offset + step as f64 * 0.4;
            events.push(NoteEvent::on(at, id, note, 100));
            events.push(NoteEvent::off(at + 0.35, id, note));
        }
        for note in [60u8, 64, 67] {
            events.push(NoteEvent::on(offset + 1.8, id, note, 90));
            events.push(NoteEvent::off(offset + 2.8, id, note));
        }
    }
    events
}

/// Plays the events live through the audio output, sleeping between event
/// times the way a sequencer would.
fn run_live(patch: &Patch, duration: f64) -> Result<()> {
    let engine = AudioEngine::new()?;

    let mut ids = Vec::new();
    for instrument in &patch.instruments {
        let id = engine
            .create_instrument(instrument.kind, &instrument.name, instrument.volume)
            .ok_or_else(|| anyhow!("Engine refused instrument '{}'", instrument.name))?;
        if let Some(env) = instrument.envelope {
            engine.set_instrument_envelope(id, env.attack, env.decay, env.sustain, env.release);
        }
        ids.push(id);
    }

    let mut events = demo_events(&ids);
    events.sort_by(|a, b| a.at.total_cmp(&b.at).then(a.on.cmp(&b.on)));

    println!(
        "Playing demo through {} instrument(s) at {} Hz...",
        ids.len(),
        engine.sample_rate()
    );

    let started = Instant::now();
    for event in &events {
        let due = Duration::from_secs_f64(event.at);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
        if event.on {
            println!("  note on  {}", note_to_name(event.note));
            engine.note_on(event.instrument, event.note, event.velocity);
        } else {
            engine.note_off(event.instrument, event.note);
        }
    }

    // Let the release tails ring out before shutting the stream down.
    let deadline = Instant::now() + Duration::from_secs_f64(duration.max(0.5));
    while engine.active_voice_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }

    println!("Done.");
    Ok(())
}

/// Renders the events offline and writes them to a WAV file. Needs no audio
/// device, so it also works headless.
fn run_bounce(patch: &Patch, output: &Path, duration: f64) -> Result<()> {
    let mut synth = Synthesizer::new(multitracker::audio::engine::SAMPLE_RATE);

    let mut ids = Vec::new();
    for instrument in &patch.instruments {
        let id = synth
            .create_instrument(instrument.kind, &instrument.name, instrument.volume)
            .map_err(|e| anyhow!("Engine refused instrument '{}': {e}", instrument.name))?;
        if let Some(env) = instrument.envelope {
            synth.set_instrument_envelope(id, env)?;
        }
        ids.push(id);
    }

    let events = demo_events(&ids);
    println!("Bouncing {} events to {}...", events.len(), output.display());

    export_to_wav(
        &mut synth,
        &events,
        Duration::from_secs_f64(duration),
        output,
        Some(|progress: f32| {
            tracing::trace!("bounce progress: {:.0}%", progress * 100.0);
        }),
    )?;

    println!("Done.");
    Ok(())
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    // Initialize logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let patch = match &cli.patch {
        Some(path) => Patch::load(path)?,
        None => Patch::demo(),
    };

    match &cli.bounce {
        Some(output) => run_bounce(&patch, output, cli.duration),
        None => run_live(&patch, cli.duration),
    }
}
