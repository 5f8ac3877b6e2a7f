// steptrace: replayable semantic steps from an instrumented run

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use steptrace::engine::constants::DEFAULT_ENTRY_POINT;
use steptrace::event::wire::load_trace_file;
use steptrace::{EngineConfig, TraceAssembler, TraceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// The full result as pretty-printed JSON
    Json,
    /// One explanation per step
    Text,
}

/// Turn a trace document into replayable semantic steps
#[derive(Debug, Parser)]
#[command(name = "steptrace", version, about)]
struct Cli {
    /// Trace document written by the instrumented binary
    trace: PathBuf,

    /// File holding the captured standard output of the run
    #[arg(long, value_name = "FILE")]
    stdout: Option<PathBuf>,

    /// File holding the captured standard error of the run
    #[arg(long, value_name = "FILE")]
    stderr: Option<PathBuf>,

    /// Function known to exist in the program (repeatable)
    #[arg(long = "function", value_name = "NAME")]
    functions: Vec<String>,

    /// Function whose first entry starts the program
    #[arg(long, value_name = "NAME", default_value = DEFAULT_ENTRY_POINT)]
    entry: String,

    /// Ignore the captured standard error
    #[arg(long)]
    no_stderr: bool,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,
}

fn read_capture(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read captured output {}", path.display())),
        None => Ok(String::new()),
    }
}

fn write_result(result: &TraceResult, format: Format) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, result)?;
            writeln!(out)?;
        }
        Format::Text => {
            for step in result {
                writeln!(
                    out,
                    "{:>4}  {:<12} {}",
                    step.index,
                    step.frame.frame_id,
                    step.explanation()
                )?;
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let loaded = load_trace_file(&cli.trace)
        .with_context(|| format!("Failed to load trace {}", cli.trace.display()))?;
    info!(
        "loaded {} events ({} skipped) from {}",
        loaded.events.len(),
        loaded.skipped.len(),
        cli.trace.display()
    );

    let stdout = read_capture(cli.stdout.as_deref())?;
    let stderr = read_capture(cli.stderr.as_deref())?;

    let config = EngineConfig {
        entry_point: cli.entry,
        capture_stderr: !cli.no_stderr,
        ..EngineConfig::default()
    };
    let mut assembler = TraceAssembler::new(config);
    for err in loaded.skipped {
        assembler.record_diagnostic(err);
    }
    for event in &loaded.events {
        assembler.process(event);
    }
    let result = assembler.finish(&stdout, &stderr, &cli.functions);

    write_result(&result, cli.format)
}
