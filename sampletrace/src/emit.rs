//! Construction of DevTools trace events from the call tree and timeline.
//!
//! Clock values are nanoseconds; every timestamp and time delta on the wire is
//! divided by the time unit with integer division.

use crate::timeline::TimelineChunk;
use crate::tree::TreeNode;
use devtools_trace::{
    CallFrame, CpuProfileDelta, FrameInfo, FunctionCallArgs, FunctionCallData, FunctionCallEvent,
    Phase, ProfileArgs, ProfileChunkArgs, ProfileChunkData, ProfileChunkEvent, ProfileData,
    ProfileEvent, ProfileNode, ThreadNameArgs, ThreadNameEvent, TraceEvent, TracingStartedArgs,
    TracingStartedData, TracingStartedEvent,
};

/// Nanoseconds per emitted time unit (microseconds).
pub const DEFAULT_TIME_UNIT: i64 = 1000;

pub const BROWSER_PID: u64 = 31337;
pub const PROFILE_PID: u64 = 1337;
pub const TID: u64 = 11504;
pub const FRAME_TOKEN: &str = "52287E0FF83D2BDA557C4C539D7A1E2A";
pub const FRAME_URL: &str = "http://java";
pub const PROFILE_ID: &str = "0x4";
pub const THREAD_NAME: &str = "CrBrowserMain";

pub const PROFILER_CATEGORY: &str = "disabled-by-default-v8.cpu_profiler";
pub const TIMELINE_CATEGORY: &str = "devtools.timeline";
pub const TRACING_CATEGORY: &str = "disabled-by-default-devtools.timeline";
pub const METADATA_CATEGORY: &str = "__metadata";

const SOURCE_SCRIPT_ID: u64 = 1;
const SOURCE_COLUMN: i64 = 1;

/// Source location of a tree node as DevTools expects it.
pub fn call_frame(node: &TreeNode) -> CallFrame {
    if node.is_root() {
        return CallFrame {
            function_name: node.call_site.function_name.clone(),
            url: String::new(),
            script_id: 0,
            line_number: 0,
            column_number: 0,
        };
    }

    CallFrame {
        function_name: node.call_site.function_name.clone(),
        url: format!("file://{}", node.call_site.source_path),
        script_id: SOURCE_SCRIPT_ID,
        line_number: i64::from(node.call_site.line_number),
        column_number: SOURCE_COLUMN,
    }
}

pub fn profile_node(node: &TreeNode) -> ProfileNode {
    ProfileNode {
        call_frame: call_frame(node),
        id: node.id,
        parent: node.parent,
    }
}

/// Builds events with timestamps scaled to the time unit.
#[derive(Debug, Clone, Copy)]
pub struct TraceEmitter {
    time_unit: i64,
}

impl Default for TraceEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_UNIT)
    }
}

impl TraceEmitter {
    /// A time unit below 1 is treated as 1.
    pub fn new(time_unit: i64) -> Self {
        Self {
            time_unit: time_unit.max(1),
        }
    }

    /// Convert a clock value to the emitted unit, discarding the remainder.
    pub fn scale(&self, clock: i64) -> i64 {
        clock / self.time_unit
    }

    pub fn tracing_started(&self, clock: i64) -> TraceEvent {
        TraceEvent::TracingStarted(TracingStartedEvent {
            pid: BROWSER_PID,
            tid: TID,
            ts: self.scale(clock),
            ph: Phase::Instant,
            cat: TRACING_CATEGORY.to_string(),
            s: "t".to_string(),
            tts: 0,
            args: TracingStartedArgs {
                data: TracingStartedData {
                    frame_tree_node_id: 1,
                    persistent_ids: true,
                    frames: vec![FrameInfo {
                        frame: FRAME_TOKEN.to_string(),
                        url: FRAME_URL.to_string(),
                        name: String::new(),
                        process_id: PROFILE_PID,
                    }],
                },
            },
        })
    }

    pub fn thread_name(&self) -> TraceEvent {
        TraceEvent::ThreadName(ThreadNameEvent {
            pid: BROWSER_PID,
            tid: TID,
            ts: 0,
            ph: Phase::Metadata,
            cat: METADATA_CATEGORY.to_string(),
            args: ThreadNameArgs {
                name: THREAD_NAME.to_string(),
            },
        })
    }

    pub fn profile(&self, clock: i64) -> TraceEvent {
        TraceEvent::Profile(ProfileEvent {
            pid: PROFILE_PID,
            tid: TID,
            ts: self.scale(clock),
            ph: Phase::Sample,
            cat: PROFILER_CATEGORY.to_string(),
            id: PROFILE_ID.to_string(),
            tts: self.scale(clock),
            args: ProfileArgs {
                data: ProfileData { start_time: 0 },
            },
        })
    }

    /// One chunk carrying `new_nodes` and the drained samples.
    pub fn profile_chunk(
        &self,
        new_nodes: &[TreeNode],
        samples: &TimelineChunk,
        clock: i64,
    ) -> TraceEvent {
        TraceEvent::ProfileChunk(ProfileChunkEvent {
            pid: PROFILE_PID,
            tid: TID,
            ts: self.scale(clock),
            ph: Phase::Sample,
            cat: PROFILER_CATEGORY.to_string(),
            id: PROFILE_ID.to_string(),
            tts: self.scale(clock),
            args: ProfileChunkArgs {
                data: ProfileChunkData {
                    cpu_profile: CpuProfileDelta {
                        nodes: new_nodes.iter().map(profile_node).collect(),
                        samples: samples.nodes.clone(),
                    },
                    time_deltas: samples
                        .durations
                        .iter()
                        .map(|&duration| self.scale(duration))
                        .collect(),
                    lines: vec![1; samples.len()],
                },
            },
        })
    }

    /// Begin marker describing `node`.
    pub fn function_call_begin(&self, node: &TreeNode, clock: i64) -> TraceEvent {
        let frame = call_frame(node);
        TraceEvent::FunctionCall(FunctionCallEvent {
            pid: PROFILE_PID,
            tid: TID,
            ts: self.scale(clock),
            ph: Phase::Begin,
            cat: TIMELINE_CATEGORY.to_string(),
            tts: self.scale(clock),
            args: FunctionCallArgs {
                data: Some(FunctionCallData {
                    frame: FRAME_TOKEN.to_string(),
                    function_name: frame.function_name,
                    script_id: frame.script_id.to_string(),
                    url: frame.url,
                    line_number: frame.line_number,
                    column_number: frame.column_number,
                }),
            },
        })
    }

    pub fn function_call_end(&self, clock: i64) -> TraceEvent {
        TraceEvent::FunctionCall(FunctionCallEvent {
            pid: PROFILE_PID,
            tid: TID,
            ts: self.scale(clock),
            ph: Phase::End,
            cat: TIMELINE_CATEGORY.to_string(),
            tts: self.scale(clock),
            args: FunctionCallArgs::default(),
        })
    }
}
