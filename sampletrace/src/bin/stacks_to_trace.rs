//! Convert sampled thread dumps to a Chrome DevTools trace.
//!
//! This binary reads a stack-sample dump (thread sections followed by an
//! `<n>ns` delta line per snapshot) and writes a JSON trace that the
//! Performance panel of Chrome DevTools can load.
//!
//! # Usage
//!
//! ```bash
//! stacks_to_trace -i stacks.txt -o events.json
//! stacks_to_trace --thread '^Render thread$' --ignore org.lwjgl,sun.misc
//! stacks_to_trace --find-only --cmdline '.*javaw.*-cp.*'
//! ```

use clap::Parser;
use log::info;
use regex::Regex;
use sampletrace::compiler::{
    Compiler, CompilerConfig, DEFAULT_IGNORED, DEFAULT_MAX_SAMPLES, DEFAULT_THREAD_PATTERN,
    parse_ignored,
};
use sampletrace::process::find_process;
use sampletrace::timeline::DEFAULT_IDLE_BUDGET;
use devtools_trace::TraceEvent;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[cfg(windows)]
const DEFAULT_CMDLINE: &str = ".*javaw.exe.*-cp.*";
#[cfg(not(windows))]
const DEFAULT_CMDLINE: &str = ".*javaw.*-cp.*";

#[derive(Parser, Debug)]
#[command(name = "stacks_to_trace")]
#[command(about = "Convert sampled thread dumps to a Chrome DevTools trace")]
#[command(version)]
struct Args {
    /// Input stack dump
    #[arg(short, long, default_value = "stacks.txt")]
    input: PathBuf,

    /// Output trace file
    #[arg(short, long, default_value = "events.json")]
    output: PathBuf,

    /// Regex selecting the profiled thread by name
    #[arg(long, default_value = DEFAULT_THREAD_PATTERN)]
    thread: String,

    /// Regex used to find the profiled process by command line
    #[arg(long, default_value = DEFAULT_CMDLINE)]
    cmdline: String,

    /// Executable name hint to speed up the process search; empty checks all
    #[arg(long, default_value = "java")]
    name_contains: String,

    /// Maximum number of snapshots to read
    #[arg(long, default_value_t = DEFAULT_MAX_SAMPLES)]
    samples: usize,

    /// Only find the process id and exit
    #[arg(long)]
    find_only: bool,

    /// Comma-separated substrings; stacks touching them collapse to one node
    #[arg(long, default_value = DEFAULT_IGNORED)]
    ignore: String,

    /// Snapshots per profile chunk (defaults to a single chunk)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Nominal duration of one sample in nanoseconds
    #[arg(long, default_value_t = DEFAULT_IDLE_BUDGET)]
    idle_budget: i64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Serialize every event in memory, then write `path` in one call.
fn write_output(path: &Path, events: &[TraceEvent]) -> Result<(), Box<dyn std::error::Error>> {
    let json = devtools_trace::write_events(Vec::new(), events)?;
    fs::write(path, json)
        .map_err(|e| format!("Failed to write output file '{}': {}", path.display(), e))?;
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Validate patterns and budget before touching any file
    let cmdline = Regex::new(&args.cmdline)
        .map_err(|e| format!("invalid command line pattern '{}': {}", args.cmdline, e))?;

    let config = CompilerConfig {
        thread_pattern: args.thread,
        ignored: parse_ignored(&args.ignore),
        max_samples: args.samples,
        idle_budget: args.idle_budget,
        chunk_size: args.chunk_size,
        ..Default::default()
    };
    let mut compiler = Compiler::new(config)?;

    if args.find_only {
        let found = find_process(&cmdline, &args.name_contains)?;
        info!("found: {}", found.cmdline);
        info!("pid: {}", found.pid);
        return Ok(());
    }

    let input_file = File::open(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;
    let summary = compiler.run(BufReader::new(input_file))?;
    if !summary.end_of_stream {
        info!("stopped after {} snapshots", summary.snapshots);
    }
    let events = compiler.finish();

    write_output(&args.output, &events)?;

    info!(
        "Converted '{}' -> '{}' ({} events)",
        args.input.display(),
        args.output.display(),
        events.len()
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devtools_trace::TraceFile;
    use sampletrace::compiler::compile;
    use std::io::Cursor;

    const INPUT: &str = "\
\"Client thread\" #1
\tat A.run(A.java:1)
2000000ns
";

    fn events() -> Vec<TraceEvent> {
        compile(Cursor::new(INPUT), CompilerConfig::default()).unwrap()
    }

    #[test]
    fn output_is_a_complete_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let events = events();

        write_output(&path, &events).unwrap();

        let written = fs::read(&path).unwrap();
        assert_eq!(written, devtools_trace::write_events(Vec::new(), &events).unwrap());
        let trace = TraceFile::parse(File::open(&path).unwrap()).unwrap();
        assert_eq!(trace.events.len(), events.len());
    }

    #[test]
    fn unwritable_output_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("events.json");

        let err = write_output(&path, &events()).unwrap_err();
        assert!(err.to_string().contains("Failed to write output file"));
        assert!(!path.exists());
    }

    #[test]
    fn existing_output_is_replaced_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        fs::write(&path, "x".repeat(1 << 16)).unwrap();

        write_output(&path, &events()).unwrap();

        assert!(TraceFile::parse(File::open(&path).unwrap()).is_ok());
    }
}
