//! Chrome DevTools trace event reader and writer.
//!
//! This library models the subset of the DevTools trace event format needed to
//! carry a sampled CPU profile: a tracing-started marker, thread metadata, a
//! `Profile` event, `ProfileChunk` events with incremental call-tree nodes,
//! and `FunctionCall` begin/end markers.
//!
//! Every event kind is a concrete record with a fixed field set, and
//! [`TraceEvent`] is the tagged union over them, discriminated by the `name`
//! field the same way DevTools does.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use devtools_trace::TraceFile;
//!
//! let file = File::open("events.json").unwrap();
//! let trace = TraceFile::parse(file).unwrap();
//!
//! println!("Events: {}", trace.events.len());
//! println!("Nodes: {}", trace.nodes().len());
//! println!("Samples: {}", trace.samples().count());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use thiserror::Error;

/// Errors that can occur while reading a trace file.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event {index} references unknown profile '{id}'")]
    UnknownProfile { index: usize, id: String },

    #[error(
        "event {index} has {samples} samples but {time_deltas} time deltas and {lines} lines"
    )]
    MisalignedChunk {
        index: usize,
        samples: usize,
        time_deltas: usize,
        lines: usize,
    },

    #[error("event {index} declares reserved node id 0")]
    ReservedNodeId { index: usize },

    #[error("event {index} declares node {node_id} more than once")]
    DuplicateNode { index: usize, node_id: u64 },

    #[error("node {node_id} references undeclared parent {parent_id}")]
    DanglingParent { node_id: u64, parent_id: u64 },

    #[error("event {index} samples undeclared node {node_id}")]
    DanglingSample { index: usize, node_id: u64 },

    #[error("event {0} ends a function call that was never started")]
    UnbalancedEnd(usize),

    #[error("{0} function call(s) never ended")]
    UnclosedCalls(usize),
}

/// Result type for trace parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur during trace writing.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for trace writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

// ============================================================================
// Shared types
// ============================================================================

/// Event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "I")]
    Instant,
    #[serde(rename = "M")]
    Metadata,
    #[serde(rename = "P")]
    Sample,
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

/// Source location of a profile node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default)]
    pub script_id: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line_number: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub column_number: i64,
}

/// A call-tree node. `parent` is 0 for the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNode {
    pub call_frame: CallFrame,
    pub id: u64,
    #[serde(default)]
    pub parent: u64,
}

// ============================================================================
// Event records
// ============================================================================

/// Frame descriptor announced by the tracing-started marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
    pub frame: String,
    pub url: String,
    pub name: String,
    pub process_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingStartedData {
    pub frame_tree_node_id: u64,
    pub persistent_ids: bool,
    pub frames: Vec<FrameInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingStartedArgs {
    pub data: TracingStartedData,
}

/// `TracingStartedInBrowser` instant event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingStartedEvent {
    pub pid: u64,
    pub tid: u64,
    pub ts: i64,
    pub ph: Phase,
    pub cat: String,
    /// Instant event scope.
    pub s: String,
    pub tts: i64,
    pub args: TracingStartedArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNameArgs {
    pub name: String,
}

/// `thread_name` metadata event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNameEvent {
    pub pid: u64,
    pub tid: u64,
    pub ts: i64,
    pub ph: Phase,
    pub cat: String,
    pub args: ThreadNameArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub start_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileArgs {
    pub data: ProfileData,
}

/// `Profile` event opening a sampled CPU profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEvent {
    pub pid: u64,
    pub tid: u64,
    pub ts: i64,
    pub ph: Phase,
    pub cat: String,
    pub id: String,
    pub tts: i64,
    pub args: ProfileArgs,
}

/// Call-tree delta and samples carried by one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuProfileDelta {
    /// Nodes first introduced in this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<ProfileNode>,
    /// Node id of each sample.
    #[serde(default)]
    pub samples: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChunkData {
    pub cpu_profile: CpuProfileDelta,
    /// Duration of each sample, aligned with `cpu_profile.samples`.
    #[serde(default)]
    pub time_deltas: Vec<i64>,
    /// Line of each sample, aligned with `cpu_profile.samples`.
    #[serde(default)]
    pub lines: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChunkArgs {
    pub data: ProfileChunkData,
}

/// `ProfileChunk` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileChunkEvent {
    pub pid: u64,
    pub tid: u64,
    pub ts: i64,
    pub ph: Phase,
    pub cat: String,
    pub id: String,
    pub tts: i64,
    pub args: ProfileChunkArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallData {
    pub frame: String,
    pub function_name: String,
    pub script_id: String,
    pub url: String,
    pub line_number: i64,
    pub column_number: i64,
}

/// Arguments of a function call marker. Only the begin marker carries data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FunctionCallData>,
}

/// `FunctionCall` begin (`B`) or end (`E`) marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallEvent {
    pub pid: u64,
    pub tid: u64,
    pub ts: i64,
    pub ph: Phase,
    pub cat: String,
    pub tts: i64,
    pub args: FunctionCallArgs,
}

/// A trace event, tagged by its `name` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum TraceEvent {
    #[serde(rename = "TracingStartedInBrowser")]
    TracingStarted(TracingStartedEvent),
    #[serde(rename = "thread_name")]
    ThreadName(ThreadNameEvent),
    Profile(ProfileEvent),
    ProfileChunk(ProfileChunkEvent),
    FunctionCall(FunctionCallEvent),
}

impl TraceEvent {
    /// The `name` this event is serialized with.
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::TracingStarted(_) => "TracingStartedInBrowser",
            TraceEvent::ThreadName(_) => "thread_name",
            TraceEvent::Profile(_) => "Profile",
            TraceEvent::ProfileChunk(_) => "ProfileChunk",
            TraceEvent::FunctionCall(_) => "FunctionCall",
        }
    }

    /// Event phase.
    pub fn phase(&self) -> Phase {
        match self {
            TraceEvent::TracingStarted(e) => e.ph,
            TraceEvent::ThreadName(e) => e.ph,
            TraceEvent::Profile(e) => e.ph,
            TraceEvent::ProfileChunk(e) => e.ph,
            TraceEvent::FunctionCall(e) => e.ph,
        }
    }

    /// Event timestamp.
    pub fn ts(&self) -> i64 {
        match self {
            TraceEvent::TracingStarted(e) => e.ts,
            TraceEvent::ThreadName(e) => e.ts,
            TraceEvent::Profile(e) => e.ts,
            TraceEvent::ProfileChunk(e) => e.ts,
            TraceEvent::FunctionCall(e) => e.ts,
        }
    }
}

// ============================================================================
// Main TraceFile type
// ============================================================================

/// A parsed and validated trace document.
#[derive(Debug, Clone)]
pub struct TraceFile {
    /// All events in document order.
    pub events: Vec<TraceEvent>,
    /// Every node declared by any chunk, in declaration order.
    nodes: Vec<ProfileNode>,
    /// Map from node id to index in `nodes`.
    node_index: HashMap<u64, usize>,
}

impl TraceFile {
    /// Parse a trace document (a JSON array of events) from any `Read`-able
    /// source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let events: Vec<TraceEvent> = serde_json::from_reader(BufReader::new(reader))?;
        Self::from_events(events)
    }

    /// Validate an in-memory event list.
    pub fn from_events(events: Vec<TraceEvent>) -> Result<Self> {
        let mut file = TraceFile {
            events,
            nodes: Vec::new(),
            node_index: HashMap::new(),
        };
        file.validate()?;
        Ok(file)
    }

    /// Check cross-event references and collect the node table.
    fn validate(&mut self) -> Result<()> {
        let mut profile_ids: Vec<&str> = Vec::new();
        let mut open_calls = 0usize;

        for (index, event) in self.events.iter().enumerate() {
            match event {
                TraceEvent::Profile(profile) => profile_ids.push(&profile.id),
                TraceEvent::ProfileChunk(chunk) => {
                    if !profile_ids.contains(&chunk.id.as_str()) {
                        return Err(ParseError::UnknownProfile {
                            index,
                            id: chunk.id.clone(),
                        });
                    }

                    let data = &chunk.args.data;
                    let samples = data.cpu_profile.samples.len();
                    if data.time_deltas.len() != samples || data.lines.len() != samples {
                        return Err(ParseError::MisalignedChunk {
                            index,
                            samples,
                            time_deltas: data.time_deltas.len(),
                            lines: data.lines.len(),
                        });
                    }

                    for node in &data.cpu_profile.nodes {
                        if node.id == 0 {
                            return Err(ParseError::ReservedNodeId { index });
                        }
                        if node.parent != 0 && !self.node_index.contains_key(&node.parent) {
                            return Err(ParseError::DanglingParent {
                                node_id: node.id,
                                parent_id: node.parent,
                            });
                        }
                        if self.node_index.contains_key(&node.id) {
                            return Err(ParseError::DuplicateNode {
                                index,
                                node_id: node.id,
                            });
                        }
                        self.node_index.insert(node.id, self.nodes.len());
                        self.nodes.push(node.clone());
                    }

                    for &node_id in &data.cpu_profile.samples {
                        if !self.node_index.contains_key(&node_id) {
                            return Err(ParseError::DanglingSample { index, node_id });
                        }
                    }
                }
                TraceEvent::FunctionCall(call) => match call.ph {
                    Phase::Begin => open_calls += 1,
                    Phase::End => {
                        if open_calls == 0 {
                            return Err(ParseError::UnbalancedEnd(index));
                        }
                        open_calls -= 1;
                    }
                    _ => {}
                },
                TraceEvent::TracingStarted(_) | TraceEvent::ThreadName(_) => {}
            }
        }

        if open_calls != 0 {
            return Err(ParseError::UnclosedCalls(open_calls));
        }

        Ok(())
    }

    /// All declared nodes in declaration order.
    pub fn nodes(&self) -> &[ProfileNode] {
        &self.nodes
    }

    /// Look up a node by id.
    pub fn node(&self, id: u64) -> Option<&ProfileNode> {
        self.node_index.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// All `ProfileChunk` events in document order.
    pub fn chunks(&self) -> impl Iterator<Item = &ProfileChunkEvent> {
        self.events.iter().filter_map(|event| match event {
            TraceEvent::ProfileChunk(chunk) => Some(chunk),
            _ => None,
        })
    }

    /// Sampled node ids across all chunks.
    pub fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.chunks()
            .flat_map(|chunk| chunk.args.data.cpu_profile.samples.iter().copied())
    }

    /// Sample durations across all chunks, aligned with [`TraceFile::samples`].
    pub fn time_deltas(&self) -> impl Iterator<Item = i64> + '_ {
        self.chunks()
            .flat_map(|chunk| chunk.args.data.time_deltas.iter().copied())
    }

    /// Walk from a node up to the root. Returns nodes in leaf-to-root order.
    pub fn stack_for_node(&self, id: u64) -> Vec<&ProfileNode> {
        let mut stack = Vec::new();
        let mut current = self.node(id);
        while let Some(node) = current {
            stack.push(node);
            current = if node.parent == 0 {
                None
            } else {
                self.node(node.parent)
            };
        }
        stack
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Writer that streams events into a JSON array.
///
/// # Example
///
/// ```no_run
/// use devtools_trace::{TraceEvent, TraceWriter};
/// use std::fs::File;
///
/// let file = File::create("events.json").unwrap();
/// let mut writer = TraceWriter::new(file);
///
/// # let event: TraceEvent = todo!();
/// writer.write_event(&event).unwrap();
/// writer.finish().unwrap();
/// ```
pub struct TraceWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> TraceWriter<W> {
    /// Create a new trace writer.
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Append one event to the array.
    pub fn write_event(&mut self, event: &TraceEvent) -> WriteResult<()> {
        let separator: &[u8] = if self.written == 0 { b"[" } else { b"," };
        self.writer.write_all(separator)?;
        serde_json::to_writer(&mut self.writer, event)?;
        self.written += 1;
        Ok(())
    }

    /// Number of events written so far.
    pub fn len(&self) -> usize {
        self.written
    }

    /// Whether no event has been written yet.
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Close the array and return the underlying writer.
    pub fn finish(mut self) -> WriteResult<W> {
        if self.written == 0 {
            self.writer.write_all(b"[")?;
        }
        self.writer.write_all(b"]\n")?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Write a complete event list as a JSON array.
pub fn write_events<W: Write>(writer: W, events: &[TraceEvent]) -> WriteResult<W> {
    let mut trace_writer = TraceWriter::new(writer);
    for event in events {
        trace_writer.write_event(event)?;
    }
    trace_writer.finish()
}
