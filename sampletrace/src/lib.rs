//! Compile sampled thread dumps into Chrome DevTools CPU profiles.
//!
//! The input is a stream of thread-dump snapshots, each closed by the time
//! elapsed since the previous one. The stacks of one thread are interned into
//! a call tree, the elapsed times become sample durations (with long pauses
//! split off as idle samples), and the result is emitted as a DevTools trace
//! that the Performance panel can load.
//!
//! # Modules
//!
//! - [`frame`] - Decode a single stack element into a call site
//! - [`tree`] - Intern stacks into a call tree with stable node ids
//! - [`snapshot`] - Read snapshots and resolve their stacks
//! - [`timeline`] - Turn elapsed times into sample and idle durations
//! - [`emit`] - Build the DevTools trace events
//! - [`compiler`] - Tie the above together for one run
//! - [`process`] - Locate the profiled process by command line
//!
//! # Example
//!
//! ```no_run
//! use sampletrace::compiler::{CompilerConfig, compile};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("stacks.txt").unwrap());
//! let output = BufWriter::new(File::create("events.json").unwrap());
//!
//! let events = compile(input, CompilerConfig::default()).unwrap();
//! devtools_trace::write_events(output, &events).unwrap();
//! ```

pub mod compiler;
pub mod emit;
pub mod frame;
pub mod process;
pub mod snapshot;
pub mod timeline;
pub mod tree;

// Re-export devtools_trace for convenience
pub use devtools_trace;
