//! Command-line front-end for the readout simulation engine.
//!
//! No XML/config-file loader is provided (programmatic configuration only),
//! so the demo detector built here is fixed: one readout unit over a single
//! pixel column. It exists to exercise `romesim-sim` end to end from a
//! recorded hit-log, not to reproduce every board the original tool could
//! describe.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use thiserror::Error;

use romesim_core::{Pixel, Vec3};
use romesim_detector::{Detector, FixedStateMachine};
use romesim_io::{load_hit_log, HitLogWriter};
use romesim_readout::{BufferPolicy, ChildReadPolicy, PixelReadPolicy, ReadoutCell};
use romesim_sim::Simulation;

type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hit-log error: {0}")]
    HitLog(#[from] romesim_io::Error),

    #[error("simulation error: {0}")]
    Sim(#[from] romesim_sim::Error),
}

/// Readout-cell simulation engine.
#[derive(Parser)]
#[command(name = "romesim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a recorded hit-log file
    Inspect {
        /// Hit-log file to read
        input: PathBuf,
    },

    /// Replay a hit-log through the demo detector and write the accepted hits
    Replay {
        /// Hit-log file to replay as the event queue
        input: PathBuf,

        /// Where to write the accepted-hit log
        #[arg(short, long)]
        output: PathBuf,

        /// Tick to stop the run at; defaults to the last recorded timestamp
        #[arg(long)]
        stop_tick: Option<i64>,

        /// Verbose per-run diagnostics
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { input } => inspect(&input),
        Commands::Replay { input, output, stop_tick, verbose } => replay(&input, &output, stop_tick, verbose),
    }
}

fn inspect(input: &PathBuf) -> Result<()> {
    let log = load_hit_log(input)?;
    println!("File: {}", input.display());
    println!("Hits: {}", log.hits.len());
    println!("Trigger-on ticks: {}", log.trigger_on_ticks.len());
    if let Some(len) = log.trigger_length {
        println!("Trigger length: {len}");
    }
    println!("Triggered events: {}", log.triggered_event_indices.len());

    if !log.hits.is_empty() {
        let min_t = log.hits.iter().map(|h| h.timestamp).min().unwrap();
        let max_t = log.hits.iter().map(|h| h.timestamp).max().unwrap();
        println!("Timestamp range: {min_t} - {max_t}");
    }
    Ok(())
}

fn replay(input: &PathBuf, output: &PathBuf, stop_tick: Option<i64>, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("Reading: {}", input.display());
    }
    let start = Instant::now();
    let log = load_hit_log(input)?;
    if verbose {
        eprintln!("  {} hits read", log.hits.len());
    }

    let stop_tick = stop_tick.unwrap_or_else(|| log.hits.iter().map(|h| h.timestamp).max().unwrap_or(0) + 1);

    let mut sim = Simulation::builder()
        .with_detector(demo_detector())
        .with_events(log.hits)
        .with_stop_tick(stop_tick)
        .with_trigger_length(log.trigger_length.unwrap_or(0))
        .with_trigger_on_ticks(log.trigger_on_ticks)
        .build();

    let ticks = sim.run_to_completion()?;
    let elapsed = start.elapsed();

    let placed: usize = ticks.iter().map(|t| t.hits_placed).sum();
    let rejected: usize = ticks.iter().map(|t| t.hits_rejected).sum();
    if verbose {
        eprintln!("  {placed} hits placed, {rejected} hits rejected over {} ticks", ticks.len());
    }

    let mut writer = HitLogWriter::create(output)?;
    for detector in sim.detectors_mut() {
        writer.write_hits(&detector.take_accepted())?;
    }
    writer.flush()?;

    println!("Replayed {} ticks in {:.2}s", ticks.len(), elapsed.as_secs_f64());
    println!("Accepted: {placed}, rejected: {rejected}");
    Ok(())
}

/// `CU -> Column -> PixCell -> Pixel`, the literal cell names
/// [`FixedStateMachine`] drives its `LdCol`/`RdCol` states by — see
/// `fixed_state_machine.rs`'s own test tree for the same shape.
fn demo_detector() -> Detector {
    let pixel = Pixel::new("pixel", 1, Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0)).with_threshold(1.0);
    let pixcell = ReadoutCell::new_with_pixels("PixCell", 0, BufferPolicy::fifo(16), PixelReadPolicy::pptb_or(0), vec![pixel]);
    let column = ReadoutCell::new_with_cells("Column", 0, BufferPolicy::fifo(16), ChildReadPolicy::no_full_read(), vec![pixcell]);
    let root = ReadoutCell::new_with_cells("CU", 0, BufferPolicy::fifo(16), ChildReadPolicy::no_full_read(), vec![column]);
    Detector::new("board", 0, root, 16, 0, Box::new(FixedStateMachine::new()))
}
