//! Thread-dump snapshot parsing.
//!
//! The input is a sequence of snapshots. Each snapshot lists thread sections
//! and ends with the time elapsed since the previous snapshot:
//!
//! ```text
//! "Client thread" #1 prio=5 os_prio=0 tid=0x00007f runnable
//!    java.lang.Thread.State: RUNNABLE
//! 	at com.example.Render.draw(Render.java:30)
//! 	at com.example.Main.main(Main.java:5)
//!
//! "Signal Dispatcher" #4 daemon prio=9
//! 	at java.lang.Object.wait(Native Method)
//! 2513400ns
//! ```
//!
//! Only stack elements of threads whose name matches the thread pattern are
//! collected; sections of other threads may come before or after it. If the
//! target thread appears twice, its last section wins. A snapshot where no
//! matching thread was seen resolves to the root node, so time spent outside
//! the target thread is still accounted for.

use crate::tree::{CallTree, NodeId};
use log::{debug, warn};
use regex::Regex;
use std::io::BufRead;
use thiserror::Error;

/// Prefix of a stack element line.
pub const STACK_ELEMENT_PREFIX: &str = "\tat ";

/// Suffix of the time delta line closing a snapshot.
pub const DELTA_SUFFIX: &str = "ns";

/// Single-element stack substituted for any stack touching an ignored frame.
pub const IGNORED_MARKER: &str = "ignored";

/// Errors that can occur while reading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid time delta at line {line}: '{text}'")]
    InvalidDelta { line: usize, text: String },
}

impl SnapshotError {
    /// Whether reading can continue with the next snapshot.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SnapshotError::InvalidDelta { .. })
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// One parsed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Time since the previous snapshot.
    pub delta: i64,
    /// Node of the full (possibly collapsed) stack.
    pub top: NodeId,
    /// Node of the outermost caller alone, when the stack is not empty.
    pub bottom: Option<NodeId>,
    /// Number of frames resolved.
    pub depth: usize,
    /// Whether the stack was collapsed onto the ignored marker.
    pub ignored: bool,
}

/// Line-by-line reader producing one [`Snapshot`] per call.
pub struct SnapshotReader<R: BufRead> {
    reader: R,
    thread_pattern: Regex,
    ignored: Vec<String>,
    line_num: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> SnapshotReader<R> {
    /// Create a reader collecting stacks of threads matching `thread_pattern`.
    ///
    /// Empty entries in `ignored` are dropped, since they would match every
    /// frame.
    pub fn new(reader: R, thread_pattern: Regex, ignored: Vec<String>) -> Self {
        Self {
            reader,
            thread_pattern,
            ignored: ignored.into_iter().filter(|s| !s.is_empty()).collect(),
            line_num: 0,
            buf: Vec::new(),
        }
    }

    /// Number of lines consumed so far.
    pub fn line_num(&self) -> usize {
        self.line_num
    }

    /// Read the next line without its line terminator. `None` at end of input.
    fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_num += 1;

        let mut line: &[u8] = &self.buf;
        if let Some(rest) = line.strip_suffix(b"\n") {
            line = rest;
        }
        if let Some(rest) = line.strip_suffix(b"\r") {
            line = rest;
        }
        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }

    /// Read the next snapshot and resolve its stack in `tree`.
    ///
    /// Returns `Ok(None)` once the input is exhausted; a trailing snapshot
    /// without a delta line is discarded. An invalid delta line yields
    /// [`SnapshotError::InvalidDelta`] and leaves `tree` untouched, after
    /// which reading may resume with the next snapshot.
    pub fn next_snapshot(&mut self, tree: &mut CallTree) -> Result<Option<Snapshot>> {
        let mut in_target = false;
        let mut stack: Vec<String> = Vec::with_capacity(8);

        let delta = loop {
            let Some(line) = self.read_line()? else {
                if !stack.is_empty() {
                    debug!(
                        "discarding {} frames of unterminated snapshot",
                        stack.len()
                    );
                }
                return Ok(None);
            };

            if line.len() < 2 {
                continue;
            }

            if let Some(header) = line.strip_prefix('"') {
                in_target = false;
                if let Some(end) = header.find('"').filter(|&end| end > 0) {
                    let name = &header[..end];
                    in_target = self.thread_pattern.is_match(name);
                    debug!("thread {:?} matches: {}", name, in_target);
                }
                // a later section of the target thread replaces the earlier one
                if in_target {
                    stack.clear();
                }
            } else if line.starts_with('\t') {
                if !in_target {
                    continue;
                }
                match line.strip_prefix(STACK_ELEMENT_PREFIX) {
                    Some(element) => {
                        debug!("element: {}", element);
                        stack.push(element.to_string());
                    }
                    None => warn!("unrecognized line {}: {}", self.line_num, line),
                }
            } else if let Some(number) = line.strip_suffix(DELTA_SUFFIX) {
                let delta = number
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .and_then(|value| i64::try_from(value).ok())
                    .ok_or_else(|| SnapshotError::InvalidDelta {
                        line: self.line_num,
                        text: line.clone(),
                    })?;
                break delta;
            }
        };

        let ignored = self.is_ignored(&stack);
        if ignored {
            stack = vec![IGNORED_MARKER.to_string()];
        }

        let top = tree.resolve(&stack);
        let bottom = stack
            .last()
            .map(|outermost| tree.resolve(std::slice::from_ref(outermost)));

        Ok(Some(Snapshot {
            delta,
            top,
            bottom,
            depth: stack.len(),
            ignored,
        }))
    }

    fn is_ignored(&self, stack: &[String]) -> bool {
        stack.iter().any(|element| {
            self.ignored
                .iter()
                .any(|pattern| element.contains(pattern.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DUMP: &str = "\
\"Client thread\" #1 prio=5 runnable
   java.lang.Thread.State: RUNNABLE
\tat com.example.Render.draw(Render.java:30)
\tat com.example.Main.main(Main.java:5)

\"Signal Dispatcher\" #4 daemon
\tat java.lang.Object.wait(Native Method)
2000000ns
\"Client thread\" #1 prio=5 runnable
\tat com.example.Render.draw(Render.java:30)
\tat com.example.Main.main(Main.java:5)
2600000ns
";

    fn reader(input: &str, ignored: &[&str]) -> SnapshotReader<Cursor<Vec<u8>>> {
        SnapshotReader::new(
            Cursor::new(input.as_bytes().to_vec()),
            Regex::new("^Client thread$").unwrap(),
            ignored.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn parse_two_snapshots() {
        let mut tree = CallTree::new();
        let mut snapshots = reader(DUMP, &[]);

        let first = snapshots.next_snapshot(&mut tree).unwrap().unwrap();
        assert_eq!(first.delta, 2_000_000);
        assert_eq!(first.depth, 2);
        assert!(!first.ignored);

        let second = snapshots.next_snapshot(&mut tree).unwrap().unwrap();
        assert_eq!(second.delta, 2_600_000);
        assert_eq!(second.top, first.top);

        assert!(snapshots.next_snapshot(&mut tree).unwrap().is_none());
        // root, main, draw
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn top_node_is_innermost_frame() {
        let mut tree = CallTree::new();
        let snapshot = reader(DUMP, &[]).next_snapshot(&mut tree).unwrap().unwrap();

        let top = tree.get(snapshot.top).unwrap();
        assert_eq!(top.call_site.function_name, "com.example.Render.draw");
        assert_eq!(top.call_site.line_number, 30);

        let bottom = tree.get(snapshot.bottom.unwrap()).unwrap();
        assert_eq!(bottom.call_site.function_name, "com.example.Main.main");
        assert_eq!(bottom.id, top.parent);
    }

    #[test]
    fn other_threads_resolve_to_root() {
        let input = "\
\"Render thread\" #7
\tat com.example.Other.run(Other.java:1)
1000ns
";
        let mut tree = CallTree::new();
        let snapshot = reader(input, &[]).next_snapshot(&mut tree).unwrap().unwrap();

        assert_eq!(snapshot.depth, 0);
        assert_eq!(snapshot.bottom, None);
        assert!(tree.get(snapshot.top).unwrap().is_root());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn repeated_target_section_replaces_stack() {
        let input = "\
\"Client thread\" #1
\tat Old.run(Old.java:1)
\"Client thread\" #1
\tat New.run(New.java:1)
1000ns
";
        let mut tree = CallTree::new();
        let snapshot = reader(input, &[]).next_snapshot(&mut tree).unwrap().unwrap();

        assert_eq!(snapshot.depth, 1);
        assert_eq!(
            tree.get(snapshot.top).unwrap().call_site.function_name,
            "New.run"
        );
    }

    #[test]
    fn thread_flag_resets_each_snapshot() {
        let input = "\
\"Client thread\" #1
\tat A.run(A.java:1)
2000000ns
\tat A.run(A.java:1)
2000000ns
";
        let mut tree = CallTree::new();
        let mut snapshots = reader(input, &[]);

        let first = snapshots.next_snapshot(&mut tree).unwrap().unwrap();
        let second = snapshots.next_snapshot(&mut tree).unwrap().unwrap();

        assert_eq!(first.depth, 1);
        assert_eq!(second.depth, 0);
        assert!(tree.get(second.top).unwrap().is_root());
    }

    #[test]
    fn ignored_stacks_collapse_to_one_node() {
        let input = "\
\"Client thread\" #1
\tat org.lwjgl.opengl.GL11.glFlush(GL11.java:10)
\tat com.example.Render.draw(Render.java:30)
\tat com.example.Main.main(Main.java:5)
1000ns
\"Client thread\" #1
\tat org.lwjgl.input.Mouse.poll(Mouse.java:3)
1000ns
";
        let mut tree = CallTree::new();
        let mut snapshots = reader(input, &["org.lwjgl"]);

        let deep = snapshots.next_snapshot(&mut tree).unwrap().unwrap();
        let shallow = snapshots.next_snapshot(&mut tree).unwrap().unwrap();

        assert!(deep.ignored);
        assert!(shallow.ignored);
        assert_eq!(deep.top, shallow.top);
        assert_eq!(deep.depth, 1);
        assert_eq!(
            tree.get(deep.top).unwrap().call_site.function_name,
            IGNORED_MARKER
        );
        // root and the marker only
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn empty_ignore_entry_matches_nothing() {
        let mut tree = CallTree::new();
        let snapshot = reader(DUMP, &[""]).next_snapshot(&mut tree).unwrap().unwrap();

        assert!(!snapshot.ignored);
        assert_eq!(snapshot.depth, 2);
    }

    #[test]
    fn unrecognized_stack_line_is_skipped() {
        let input = "\
\"Client thread\" #1
\tat A.run(A.java:1)
\t- locked <0x000000076ab62208> (a java.lang.Object)
\tat Main.main(Main.java:2)
1000ns
";
        let mut tree = CallTree::new();
        let snapshot = reader(input, &[]).next_snapshot(&mut tree).unwrap().unwrap();

        assert_eq!(snapshot.depth, 2);
    }

    #[test]
    fn invalid_delta_is_recoverable() {
        let input = "\
\"Client thread\" #1
\tat A.run(A.java:1)
1000ns
\"Client thread\" #1
\tat B.run(B.java:1)
abcns
\"Client thread\" #1
\tat A.run(A.java:1)
3000ns
";
        let mut tree = CallTree::new();
        let mut snapshots = reader(input, &[]);

        let first = snapshots.next_snapshot(&mut tree).unwrap().unwrap();
        let nodes_before = tree.len();

        let err = snapshots.next_snapshot(&mut tree).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            SnapshotError::InvalidDelta { line: 6, ref text } if text == "abcns"
        ));
        assert_eq!(tree.len(), nodes_before);

        let third = snapshots.next_snapshot(&mut tree).unwrap().unwrap();
        assert_eq!(third.delta, 3000);
        assert_eq!(third.top, first.top);
    }

    #[test]
    fn negative_delta_is_rejected() {
        let mut tree = CallTree::new();
        let result = reader("-5ns\n", &[]).next_snapshot(&mut tree);

        assert!(matches!(result, Err(SnapshotError::InvalidDelta { line: 1, .. })));
    }

    #[test]
    fn crlf_line_endings() {
        let input = "\"Client thread\" #1\r\n\tat A.run(A.java:1)\r\n1500ns\r\n";
        let mut tree = CallTree::new();
        let snapshot = reader(input, &[]).next_snapshot(&mut tree).unwrap().unwrap();

        assert_eq!(snapshot.delta, 1500);
        let top = tree.get(snapshot.top).unwrap();
        assert_eq!(top.call_site.line_number, 1);
    }

    #[test]
    fn unterminated_snapshot_is_end_of_stream() {
        let input = "\"Client thread\" #1\n\tat A.run(A.java:1)\n";
        let mut tree = CallTree::new();
        let mut snapshots = reader(input, &[]);

        assert!(snapshots.next_snapshot(&mut tree).unwrap().is_none());
        assert!(tree.is_empty());
        assert_eq!(snapshots.line_num(), 2);
    }

    #[test]
    fn delta_without_threads_resolves_to_root() {
        let mut tree = CallTree::new();
        let snapshot = reader("2500000ns\n", &[])
            .next_snapshot(&mut tree)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.delta, 2_500_000);
        assert_eq!(snapshot.top, 1);
    }
}
