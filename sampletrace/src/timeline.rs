//! Sample timeline with synthesized idle gaps.
//!
//! A thread dump only tells how much time passed since the previous snapshot.
//! Each snapshot is attributed at most one idle budget of that time; whatever
//! exceeds the budget (plus the gap threshold) becomes a separate sample of
//! the idle node, so long pauses show up as lag instead of inflating the
//! sampled stack.
//!
//! The timeline is owned by one compiler run and mutated through `&mut self`
//! only.

use crate::tree::{CallTree, NodeId};

/// Nominal duration attributed to one sample, in nanoseconds.
pub const DEFAULT_IDLE_BUDGET: i64 = 2_500_000;

/// Elapsed time above the budget that is still attributed to the sample.
pub const DEFAULT_GAP_THRESHOLD: i64 = 0;

/// Stack element of the synthetic idle node.
pub const IDLE_FRAME: &str = "lag(sampler_lag:1337)";

/// How one snapshot's elapsed time is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    /// Duration attributed to the sampled stack.
    pub sample: i64,
    /// Duration attributed to the idle node; no idle sample is emitted when 0.
    pub gap: i64,
}

/// Divide `elapsed` between the sample and an idle gap.
///
/// `sample + gap == elapsed` whenever `elapsed >= 0`; both parts are never
/// negative. Negative budgets and thresholds are treated as 0.
pub fn split_elapsed(elapsed: i64, budget: i64, threshold: i64) -> Split {
    let budget = budget.max(0);
    let threshold = threshold.max(0);
    let excess = elapsed - budget;
    if excess <= threshold {
        // shorter than expected: shrink the sample by the shortfall
        let gap = threshold.min(elapsed.max(0));
        Split {
            sample: (budget - (gap - excess)).max(0),
            gap,
        }
    } else {
        Split {
            sample: budget,
            gap: excess,
        }
    }
}

/// Drained timeline entries. `nodes` and `durations` have equal length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineChunk {
    pub nodes: Vec<NodeId>,
    pub durations: Vec<i64>,
}

impl TimelineChunk {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of all durations.
    pub fn total(&self) -> i64 {
        self.durations.iter().sum()
    }
}

/// Absolute clock plus the pending sample sequence.
#[derive(Debug)]
pub struct Timeline {
    budget: i64,
    threshold: i64,
    clock: i64,
    previous: i64,
    nodes: Vec<NodeId>,
    /// Starts with a zero placeholder that the first drain removes, so until
    /// then it holds one entry more than `nodes`.
    durations: Vec<i64>,
    seeded: bool,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_BUDGET, DEFAULT_GAP_THRESHOLD)
    }
}

impl Timeline {
    pub fn new(budget: i64, threshold: i64) -> Self {
        Self {
            budget: budget.max(0),
            threshold: threshold.max(0),
            clock: 0,
            previous: 0,
            nodes: Vec::new(),
            durations: vec![0],
            seeded: true,
        }
    }

    /// Current absolute clock.
    pub fn clock(&self) -> i64 {
        self.clock
    }

    /// Number of pending samples.
    pub fn pending(&self) -> usize {
        self.nodes.len()
    }

    /// Advance the clock by `delta` and append the snapshot's samples.
    ///
    /// The idle node is resolved in `tree` the first time a gap appears.
    /// Returns `None` and records nothing when the clock would overflow.
    pub fn record(&mut self, delta: i64, sample: NodeId, tree: &mut CallTree) -> Option<Split> {
        self.clock = self.clock.checked_add(delta)?;
        let split = split_elapsed(self.clock - self.previous, self.budget, self.threshold);

        if split.gap > 0 {
            let idle = tree.resolve(&[IDLE_FRAME]);
            self.nodes.push(idle);
            self.durations.push(split.gap);
        }
        self.nodes.push(sample);
        self.durations.push(split.sample);

        self.previous = self.clock;
        Some(split)
    }

    /// Take all pending samples.
    pub fn drain(&mut self) -> TimelineChunk {
        if self.seeded {
            self.durations.remove(0);
            self.seeded = false;
        }
        debug_assert_eq!(self.nodes.len(), self.durations.len());
        TimelineChunk {
            nodes: std::mem::take(&mut self.nodes),
            durations: std::mem::take(&mut self.durations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_interval_goes_to_sample() {
        let split = split_elapsed(2_000_000, DEFAULT_IDLE_BUDGET, 0);
        assert_eq!(
            split,
            Split {
                sample: 2_000_000,
                gap: 0
            }
        );
    }

    #[test]
    fn long_interval_splits_off_gap() {
        let split = split_elapsed(4_000_000, DEFAULT_IDLE_BUDGET, 0);
        assert_eq!(
            split,
            Split {
                sample: 2_500_000,
                gap: 1_500_000
            }
        );
    }

    #[test]
    fn exact_budget_has_no_gap() {
        let split = split_elapsed(DEFAULT_IDLE_BUDGET, DEFAULT_IDLE_BUDGET, 0);
        assert_eq!(split.sample, DEFAULT_IDLE_BUDGET);
        assert_eq!(split.gap, 0);
    }

    #[test]
    fn split_reconstructs_elapsed_time() {
        for threshold in [0, 1, 100_000] {
            for elapsed in (0..10_000_000).step_by(123_457) {
                let split = split_elapsed(elapsed, DEFAULT_IDLE_BUDGET, threshold);
                assert!(split.sample >= 0);
                assert!(split.gap >= 0);
                assert_eq!(split.sample + split.gap, elapsed);
            }
        }
    }

    #[test]
    fn negative_threshold_is_clamped() {
        let split = split_elapsed(1_000, DEFAULT_IDLE_BUDGET, -500);
        assert_eq!(split.gap, 0);
        assert_eq!(split.sample, 1_000);
    }

    #[test]
    fn negative_budget_is_clamped() {
        let split = split_elapsed(1_000, -5, 0);
        assert_eq!(
            split,
            Split {
                sample: 0,
                gap: 1_000
            }
        );

        let mut tree = CallTree::new();
        let node = tree.resolve(&["A.run(A.java:1)"]);
        let mut timeline = Timeline::new(-5, 0);
        timeline.record(1_000, node, &mut tree);
        let chunk = timeline.drain();
        assert!(chunk.durations.iter().all(|&duration| duration >= 0));
        assert_eq!(chunk.total(), 1_000);
    }

    #[test]
    fn clock_overflow_records_nothing() {
        let mut tree = CallTree::new();
        let node = tree.resolve(&["A.run(A.java:1)"]);
        let mut timeline = Timeline::default();

        let delta = 5_000_000_000_000_000_000;
        assert!(timeline.record(delta, node, &mut tree).is_some());
        assert_eq!(timeline.pending(), 2);

        assert_eq!(timeline.record(delta, node, &mut tree), None);
        assert_eq!(timeline.clock(), delta);
        assert_eq!(timeline.pending(), 2);

        // the clock keeps advancing after a rejected delta
        let split = timeline.record(1_000, node, &mut tree).unwrap();
        assert_eq!(split.sample + split.gap, 1_000);
        assert_eq!(timeline.clock(), delta + 1_000);
    }

    #[test]
    fn record_appends_gap_before_sample() {
        let mut tree = CallTree::new();
        let node = tree.resolve(&["A.run(A.java:1)"]);
        let mut timeline = Timeline::default();

        timeline.record(2_000_000, node, &mut tree);
        timeline.record(4_000_000, node, &mut tree);
        assert_eq!(timeline.clock(), 6_000_000);
        assert_eq!(timeline.pending(), 3);

        let idle = tree.resolve(&[IDLE_FRAME]);
        let chunk = timeline.drain();
        assert_eq!(chunk.nodes, vec![node, idle, node]);
        assert_eq!(chunk.durations, vec![2_000_000, 1_500_000, 2_500_000]);
        assert_eq!(chunk.total(), timeline.clock());
    }

    #[test]
    fn idle_node_is_created_lazily() {
        let mut tree = CallTree::new();
        let node = tree.resolve(&["A.run(A.java:1)"]);
        let mut timeline = Timeline::default();

        timeline.record(1_000_000, node, &mut tree);
        assert_eq!(tree.len(), 2);

        timeline.record(9_000_000, node, &mut tree);
        assert_eq!(tree.len(), 3);
        let idle = tree.get(3).unwrap();
        assert_eq!(idle.call_site.function_name, "lag");
        assert_eq!(idle.call_site.line_number, 1337);
    }

    #[test]
    fn drain_removes_placeholder_once() {
        let mut tree = CallTree::new();
        let node = tree.resolve::<&str>(&[]);
        let mut timeline = Timeline::default();

        let empty = timeline.drain();
        assert!(empty.is_empty());
        assert!(empty.durations.is_empty());

        timeline.record(1_000, node, &mut tree);
        let chunk = timeline.drain();
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.durations, vec![1_000]);

        timeline.record(2_000, node, &mut tree);
        let chunk = timeline.drain();
        assert_eq!(chunk.durations, vec![2_000]);
    }
}
