//! trace-kernel CLI: synthetic processing runs and sample acquisition.

mod config;
mod orchestrator;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lib_acquire::{AssemblerConfig, SampleAssembler};
use lib_types::{Codes, Seconds, Trace};
use orchestrator::TraceSummary;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "trace-kernel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Run processing steps on synthetic traces
    Run {
        /// Path to the run configuration (JSON or TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Write results to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assemble a line-oriented sample stream into traces
    Acquire {
        /// Input file, `-` for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Samples per emitted trace
        #[arg(short, long, default_value = "128")]
        buffer_size: usize,

        /// Timestamp lines at this many lines per second instead of the wall clock
        #[arg(short, long)]
        rate: Option<f64>,

        /// Codes of the emitted traces, as NET.STA.LOC.CHA
        #[arg(long, default_value = "...")]
        codes: String,

        /// Keep non-integral sampling rates
        #[arg(long)]
        allow_uneven: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Run { config, output } => {
            run_config(&config, output.as_deref(), cli.format)?;
        }
        Commands::Acquire { input, buffer_size, rate, codes, allow_uneven } => {
            let codes: Codes = codes.parse().context("Invalid --codes")?;
            let config = AssemblerConfig {
                buffer_size,
                codes,
                disallow_uneven_sampling_rates: !allow_uneven,
                ..AssemblerConfig::default()
            };
            acquire(&input, config, Clock::new(rate)?, cli.format)?;
        }
    }

    Ok(())
}

fn run_config(config_path: &Path, output: Option<&Path>, format: OutputFormat) -> Result<()> {
    tracing::info!("Loading configuration from {:?}", config_path);

    let config = config::load_config(config_path)?;
    let orchestrator = orchestrator::Orchestrator::new(config)?;
    let results = orchestrator.run()?;

    match output {
        Some(path) => {
            let mut f = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            output::write_results(&results, &mut f, format)?;
            tracing::info!("Results written to {:?}", path);
        }
        None => {
            let stdout = io::stdout();
            output::write_results(&results, &mut stdout.lock(), format)?;
        }
    }
    Ok(())
}

/// Source of arrival times for input lines.
enum Clock {
    Wall,
    /// Line `i` arrives at `i / rate` seconds.
    Synthetic { rate: f64 },
}

impl Clock {
    fn new(rate: Option<f64>) -> Result<Self> {
        match rate {
            None => Ok(Clock::Wall),
            Some(rate) if rate > 0.0 && rate.is_finite() => Ok(Clock::Synthetic { rate }),
            Some(rate) => anyhow::bail!("--rate must be positive, got {}", rate),
        }
    }

    fn time(&self, line: usize) -> Seconds {
        match self {
            Clock::Wall => Seconds(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or_default(),
            ),
            Clock::Synthetic { rate } => Seconds(line as f64 / rate),
        }
    }
}

fn acquire(input: &Path, config: AssemblerConfig, clock: Clock, format: OutputFormat) -> Result<()> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(input).with_context(|| format!("Failed to open {:?}", input))?;
        Box::new(BufReader::new(f))
    };

    let mut assembler = SampleAssembler::new(config).context("Invalid assembler settings")?;
    let (tx, rx) = mpsc::channel::<Arc<Trace>>();
    assembler.register(move |tr: Arc<Trace>| {
        // the receiver outlives the assembler
        let _ = tx.send(tr);
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();
    output::write_trace_header(&mut out, format)?;

    let mut ntraces = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {:?}", input))?;
        assembler.push_line(&line, clock.time(i))?;
        for tr in rx.try_iter() {
            output::write_trace(&TraceSummary::from(tr.as_ref()), &mut out, format)?;
            ntraces += 1;
        }
        out.flush()?;
    }

    tracing::info!(
        "Input exhausted: {} traces emitted, {} samples left unassembled",
        ntraces,
        assembler.pending()
    );
    Ok(())
}
