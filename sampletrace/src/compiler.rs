//! One compilation run: snapshots in, trace events out.
//!
//! # Example
//!
//! ```no_run
//! use sampletrace::compiler::{Compiler, CompilerConfig};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("stacks.txt").unwrap());
//! let output = BufWriter::new(File::create("events.json").unwrap());
//!
//! let mut compiler = Compiler::new(CompilerConfig::default()).unwrap();
//! compiler.run(input).unwrap();
//! let events = compiler.finish();
//! devtools_trace::write_events(output, &events).unwrap();
//! ```

use crate::emit::{DEFAULT_TIME_UNIT, TraceEmitter};
use crate::snapshot::{SnapshotError, SnapshotReader};
use crate::timeline::{DEFAULT_GAP_THRESHOLD, DEFAULT_IDLE_BUDGET, Timeline};
use crate::tree::{CallTree, NodeId};
use devtools_trace::TraceEvent;
use log::{debug, info, warn};
use regex::Regex;
use std::io::BufRead;
use thiserror::Error;

/// Errors that can occur during compilation.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid thread pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("idle budget must not be negative, got {0}ns")]
    NegativeIdleBudget(i64),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("write error: {0}")]
    Write(#[from] devtools_trace::WriteError),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

pub const DEFAULT_THREAD_PATTERN: &str = "^Client thread$";
pub const DEFAULT_IGNORED: &str = "org.lwjgl";
pub const DEFAULT_MAX_SAMPLES: usize = 100_000;

/// Configuration for a compilation run.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Regex selecting the sampled thread by name.
    pub thread_pattern: String,
    /// Substrings marking frames whose whole stack is collapsed.
    pub ignored: Vec<String>,
    /// Upper bound on snapshots read per run.
    pub max_samples: usize,
    /// Nominal duration of one sample, in nanoseconds.
    pub idle_budget: i64,
    /// Elapsed time above the budget still attributed to the sample, in
    /// nanoseconds. Negative values act as 0.
    pub gap_threshold: i64,
    /// Nanoseconds per emitted time unit.
    pub time_unit: i64,
    /// Snapshots per `ProfileChunk`; `None` emits a single chunk.
    pub chunk_size: Option<usize>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            thread_pattern: DEFAULT_THREAD_PATTERN.to_string(),
            ignored: parse_ignored(DEFAULT_IGNORED),
            max_samples: DEFAULT_MAX_SAMPLES,
            idle_budget: DEFAULT_IDLE_BUDGET,
            gap_threshold: DEFAULT_GAP_THRESHOLD,
            time_unit: DEFAULT_TIME_UNIT,
            chunk_size: None,
        }
    }
}

/// Split a comma-separated ignore list, dropping empty entries.
pub fn parse_ignored(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Outcome of [`Compiler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Snapshots turned into samples.
    pub snapshots: usize,
    /// Snapshots dropped because of a malformed delta line or because their
    /// delta would overflow the clock.
    pub skipped: usize,
    /// Live tree nodes after the run, root included.
    pub nodes: usize,
    /// Whether the input was exhausted (as opposed to hitting the sample cap).
    pub end_of_stream: bool,
}

/// Owns all state of one run. Nothing is shared between compilers.
pub struct Compiler {
    config: CompilerConfig,
    thread_pattern: Regex,
    tree: CallTree,
    timeline: Timeline,
    emitter: TraceEmitter,
    events: Vec<TraceEvent>,
    last_top: Option<NodeId>,
    chunks: usize,
    since_flush: usize,
}

impl Compiler {
    /// Create a compiler. Fails when the thread pattern is not a valid regex
    /// or the idle budget is negative.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        if config.idle_budget < 0 {
            return Err(ConvertError::NegativeIdleBudget(config.idle_budget));
        }
        let thread_pattern = Regex::new(&config.thread_pattern)?;
        let emitter = TraceEmitter::new(config.time_unit);
        let timeline = Timeline::new(config.idle_budget, config.gap_threshold);
        let events = vec![
            emitter.tracing_started(0),
            emitter.thread_name(),
            emitter.profile(0),
        ];

        Ok(Self {
            config,
            thread_pattern,
            tree: CallTree::new(),
            timeline,
            emitter,
            events,
            last_top: None,
            chunks: 0,
            since_flush: 0,
        })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    /// Current absolute clock, in nanoseconds.
    pub fn clock(&self) -> i64 {
        self.timeline.clock()
    }

    /// Read snapshots until end of input or until `max_samples` were taken.
    ///
    /// Snapshots with a malformed delta line are logged and skipped; I/O
    /// errors abort the run.
    pub fn run<R: BufRead>(&mut self, reader: R) -> Result<RunSummary> {
        let mut snapshots = SnapshotReader::new(
            reader,
            self.thread_pattern.clone(),
            self.config.ignored.clone(),
        );
        let mut summary = RunSummary::default();

        while summary.snapshots < self.config.max_samples {
            let snapshot = match snapshots.next_snapshot(&mut self.tree) {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    summary.end_of_stream = true;
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    warn!("skipping snapshot: {}", e);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            debug!(
                "sample: {}, delta: {}ns, depth: {}",
                summary.snapshots, snapshot.delta, snapshot.depth
            );
            let tree = &mut self.tree;
            let recorded = self.timeline.record(snapshot.delta, snapshot.top, tree);
            if recorded.is_none() {
                warn!(
                    "skipping snapshot: delta of {}ns overflows the clock at {}ns",
                    snapshot.delta,
                    self.timeline.clock()
                );
                summary.skipped += 1;
                continue;
            }
            self.last_top = Some(snapshot.top);
            summary.snapshots += 1;

            self.since_flush += 1;
            if self
                .config
                .chunk_size
                .is_some_and(|size| size > 0 && self.since_flush >= size)
            {
                self.flush();
            }
        }

        summary.nodes = self.tree.len();
        info!(
            "read {} snapshots ({} skipped) over {} lines, {} nodes",
            summary.snapshots,
            summary.skipped,
            snapshots.line_num(),
            summary.nodes
        );
        Ok(summary)
    }

    /// Emit a chunk with the pending samples and the nodes created since the
    /// previous chunk.
    fn flush(&mut self) {
        let samples = self.timeline.drain();
        let clock = self.timeline.clock();
        let new_nodes = self.tree.drain_new();
        let event = self.emitter.profile_chunk(new_nodes, &samples, clock);
        self.events.push(event);
        self.chunks += 1;
        self.since_flush = 0;
    }

    /// Close the run and return every event in emission order.
    ///
    /// The last chunk is emitted when samples are pending, and at least one
    /// chunk is emitted even for an empty input.
    pub fn finish(mut self) -> Vec<TraceEvent> {
        let top = match self.last_top {
            Some(top) => top,
            None => self.tree.resolve::<&str>(&[]),
        };

        if self.timeline.pending() > 0 || self.chunks == 0 {
            self.flush();
        }

        let clock = self.timeline.clock();
        if let Some(node) = self.tree.get(top) {
            self.events.push(self.emitter.function_call_begin(node, 0));
            self.events.push(self.emitter.function_call_end(clock));
        }

        self.events
    }
}

/// Compile a whole input in one go.
pub fn compile<R: BufRead>(reader: R, config: CompilerConfig) -> Result<Vec<TraceEvent>> {
    let mut compiler = Compiler::new(config)?;
    compiler.run(reader)?;
    Ok(compiler.finish())
}
