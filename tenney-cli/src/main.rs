// tenney-cli/src/main.rs

//! Console front-end for the Tenney pitch tracker.
//!
//! - `tenney listen`: live capture, prints the nearest just ratio as you play
//! - `tenney ratio HZ`: one-shot ratio lookup for a frequency
//! - `tenney interval A/B C/D`: distance between two ratios

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tenney_core::audio::{self, CHUNK_CHANNEL_CAPACITY};
use tenney_core::display::display_slot;
use tenney_core::ratio::cents_between;
use tenney_core::session::Session;
use tenney_core::{
    DisplayRecord, InstrumentProfile, PipelineConfig, PitchPipeline, Ratio, nearest_with_neighbors,
    tuning,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How often the display slot is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "tenney", version, about = "Real-time just-intonation pitch tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track the microphone and print the nearest ratio to the root
    Listen {
        #[command(flatten)]
        tuning: TuningArgs,
        /// Instrument profile: strings, voice or microtonal
        #[arg(long, value_parser = parse_profile)]
        profile: Option<InstrumentProfile>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f64>,
        /// Print one JSON record per line
        #[arg(long)]
        json: bool,
    },
    /// Look up the nearest ratio for a frequency
    Ratio {
        /// Frequency in Hz
        hz: f64,
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(long)]
        json: bool,
    },
    /// Distance between two ratios, e.g. `3/2 5/4`
    Interval { from: Ratio, to: Ratio },
}

/// Settings shared by every command that needs a root and a prime limit.
#[derive(Args)]
struct TuningArgs {
    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Root frequency in Hz (1/1)
    #[arg(long)]
    root: Option<f64>,
    /// Largest prime allowed in a ratio
    #[arg(long)]
    limit: Option<u32>,
}

impl TuningArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = self.root {
            config.root_hz = root;
        }
        if let Some(limit) = self.limit {
            config.prime_limit = limit;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_profile(name: &str) -> Result<InstrumentProfile, String> {
    InstrumentProfile::from_name(name).ok_or_else(|| {
        let known: Vec<&str> = InstrumentProfile::ALL.iter().map(|p| p.name()).collect();
        format!("unknown profile '{}', expected one of: {}", name, known.join(", "))
    })
}

/// Loads a pipeline configuration from a JSON file.
fn load_config(path: &Path) -> Result<PipelineConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Listen {
            tuning,
            profile,
            seconds,
            json,
        } => {
            let mut config = tuning.resolve()?;
            if let Some(profile) = profile {
                config.profile = profile;
            }
            listen(config, seconds, json)
        }
        Commands::Ratio { hz, tuning, json } => lookup(hz, &tuning.resolve()?, json),
        Commands::Interval { from, to } => interval(&from, &to),
    }
}

fn listen(mut config: PipelineConfig, seconds: Option<f64>, json: bool) -> Result<()> {
    let deadline = match seconds {
        Some(s) if s.is_finite() && s > 0.0 => Some(Instant::now() + Duration::from_secs_f64(s)),
        Some(s) => bail!("--seconds must be a positive number, got {s}"),
        None => None,
    };

    let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(CHUNK_CHANNEL_CAPACITY);
    let capture = audio::request_capture(chunk_tx).context("could not start audio capture")?;
    config.sample_rate = capture.sample_rate();

    let pipeline = PitchPipeline::new(config.clone())?;
    let (publisher, reader) = display_slot();
    let session = Session::spawn_monitored(pipeline, chunk_rx, publisher, capture.health())
        .context("failed to start the analysis thread")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install the Ctrl+C handler")?;

    info!(
        root_hz = config.root_hz,
        prime_limit = config.prime_limit,
        profile = config.profile.name(),
        "listening, press Ctrl+C to stop"
    );

    let mut stdout = io::stdout().lock();
    while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        if let Some(record) = reader.latest() {
            print_record(&mut stdout, &record, json)?;
        }
        thread::sleep(POLL_INTERVAL);
    }
    if !json {
        writeln!(stdout)?;
    }

    capture.stop()?;
    session.shutdown();
    Ok(())
}

fn print_record(out: &mut impl Write, record: &DisplayRecord, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
        return Ok(());
    }
    let note = tuning::find_nearest_note(record.hz)
        .map(|(name, _)| name)
        .unwrap_or_default();
    write!(
        out,
        "\r{:>9} {:+7.1}c {:9.2} Hz {:<4} [{} | {}] conf {:.2}   ",
        record.ratio_text,
        record.cents,
        record.hz,
        note,
        record.lower_text,
        record.higher_text,
        record.confidence
    )?;
    out.flush()?;
    Ok(())
}

fn lookup(hz: f64, config: &PipelineConfig, json: bool) -> Result<()> {
    let Some(result) = nearest_with_neighbors(hz, config.root_hz, config.prime_limit) else {
        bail!("{hz} Hz is not a usable frequency");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    let main = result.main;
    println!(
        "{} Hz over {} Hz ({}-limit): {} ({:+.2} cents)",
        hz, config.root_hz, config.prime_limit, main, result.cents
    );
    println!("  octave fold   {}", main.octave);
    println!("  tenney height {:.3}", main.tenney_height());
    if let Some(monzo) = main.monzo() {
        println!("  monzo         {monzo}");
    }
    println!("  lower         {} ({:.2} cents)", result.lower, result.lower.cents());
    println!("  higher        {} ({:.2} cents)", result.higher, result.higher.cents());
    Ok(())
}

fn interval(from: &Ratio, to: &Ratio) -> Result<()> {
    let step = from
        .interval_to(to)
        .context("interval does not fit in a 64-bit ratio")?;
    println!("{from} -> {to}: {:+.3} cents", cents_between(from, to));
    println!("  interval      {step}");
    if let Some(monzo) = step.monzo() {
        println!("  monzo         {monzo}");
    }
    println!("  tenney height {:.3}", step.tenney_height());
    Ok(())
}
