//! Recompute scheduling: incremental vs sliding-window.
//!
//! The controller decides *when* the evaluator runs relative to the stream
//! of incoming operations. Incremental mode recomputes after every edit;
//! sliding mode accumulates a bounded window of recent operations and
//! recomputes their net effect in one batch when the window closes.
//! Windowing affects scheduling only, never correctness: every operation
//! lands in the permanent log the moment it is submitted.

use std::time::{Duration, Instant};
use tracing::debug;

use cellflow_engine::engine::{CellId, CommitResult, Value};

use crate::collab::{MergeOutcome, Operation};
use crate::error::Result;
use crate::sheet::SheetEngine;

/// When a sliding window closes. Thresholds are configuration, not
/// constants; tune them to the burst profile of the update stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowConfig {
    /// Close after this many operations.
    pub max_ops: usize,
    /// Close when the oldest windowed operation reaches this age.
    pub max_age: Duration,
}

impl Default for WindowConfig {
    fn default() -> WindowConfig {
        WindowConfig {
            max_ops: 32,
            max_age: Duration::from_millis(250),
        }
    }
}

/// Per-sheet recompute scheduling policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimelineMode {
    /// Recompute the affected closure after every operation.
    Incremental,
    /// Accumulate operations and recompute on window close.
    Sliding(WindowConfig),
}

/// Observable controller phase. Each submission runs Idle -> Applying
/// (-> Recomputing) -> Idle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimelinePhase {
    Idle,
    Applying,
    Recomputing,
}

/// What one submission did.
#[derive(Debug)]
pub struct SubmitResult {
    pub outcome: MergeOutcome,
    /// Present when this submission triggered a recompute.
    pub commit: Option<CommitResult>,
}

/// Drives a [`SheetEngine`] from a stream of operations under one of the
/// two scheduling modes.
pub struct TimelineController {
    mode: TimelineMode,
    phase: TimelinePhase,
    /// Operations accumulated in the current window (sliding mode).
    pending: usize,
    window_opened: Option<Instant>,
}

impl TimelineController {
    pub fn new(mode: TimelineMode) -> TimelineController {
        TimelineController {
            mode,
            phase: TimelinePhase::Idle,
            pending: 0,
            window_opened: None,
        }
    }

    pub fn mode(&self) -> TimelineMode {
        self.mode
    }

    pub fn phase(&self) -> TimelinePhase {
        self.phase
    }

    /// Operations waiting in the current window.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Feed one operation through the engine under this controller's
    /// policy. The operation is merged immediately in both modes; only the
    /// recompute is deferred in sliding mode.
    pub fn submit<F>(
        &mut self,
        engine: &mut SheetEngine,
        op: Operation,
        now: Instant,
        compute: F,
    ) -> Result<SubmitResult>
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> std::result::Result<Value, String>,
    {
        self.phase = TimelinePhase::Applying;
        let outcome = match engine.apply(op) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.phase = TimelinePhase::Idle;
                return Err(e);
            }
        };

        let commit = match self.mode {
            TimelineMode::Incremental => {
                self.phase = TimelinePhase::Recomputing;
                Some(engine.recompute(compute))
            }
            TimelineMode::Sliding(config) => {
                self.pending += 1;
                if self.window_opened.is_none() {
                    self.window_opened = Some(now);
                }
                if self.window_is_full(config, now) {
                    self.phase = TimelinePhase::Recomputing;
                    Some(self.close_window(engine, compute))
                } else {
                    None
                }
            }
        };

        self.phase = TimelinePhase::Idle;
        Ok(SubmitResult { outcome, commit })
    }

    /// Advance time. In sliding mode, closes the window once the oldest
    /// pending operation has aged past the threshold.
    pub fn tick<F>(&mut self, engine: &mut SheetEngine, now: Instant, compute: F) -> Option<CommitResult>
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> std::result::Result<Value, String>,
    {
        let TimelineMode::Sliding(config) = self.mode else {
            return None;
        };
        if self.pending == 0 || !self.window_is_full(config, now) {
            return None;
        }
        self.phase = TimelinePhase::Recomputing;
        let result = self.close_window(engine, compute);
        self.phase = TimelinePhase::Idle;
        Some(result)
    }

    /// Force-close the current window regardless of thresholds.
    pub fn flush<F>(&mut self, engine: &mut SheetEngine, compute: F) -> Option<CommitResult>
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> std::result::Result<Value, String>,
    {
        if self.pending == 0 {
            return None;
        }
        self.phase = TimelinePhase::Recomputing;
        let result = self.close_window(engine, compute);
        self.phase = TimelinePhase::Idle;
        Some(result)
    }

    fn window_is_full(&self, config: WindowConfig, now: Instant) -> bool {
        if self.pending >= config.max_ops {
            return true;
        }
        match self.window_opened {
            Some(opened) => now.duration_since(opened) >= config.max_age,
            None => false,
        }
    }

    fn close_window<F>(&mut self, engine: &mut SheetEngine, compute: F) -> CommitResult
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> std::result::Result<Value, String>,
    {
        debug!(ops = self.pending, "sliding window closed, recomputing batch");
        self.pending = 0;
        self.window_opened = None;
        engine.recompute(compute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::ReplicaId;
    use cellflow_engine::engine::ComputedValue;

    fn id(name: &str) -> CellId {
        name.parse().unwrap()
    }

    fn plus_one(_: &CellId, _: &str, inputs: &[(CellId, Value)]) -> std::result::Result<Value, String> {
        let sum: i64 = inputs.iter().filter_map(|(_, v)| v.as_i64()).sum();
        Ok(Value::from(sum + 1))
    }

    #[test]
    fn test_incremental_mode_recomputes_every_edit() {
        let mut engine = SheetEngine::new(ReplicaId::new("r1"));
        let mut timeline = TimelineController::new(TimelineMode::Incremental);
        let now = Instant::now();

        let op = Operation::upsert(id("a"), "1", crate::collab::Stamp::new(1, ReplicaId::new("r1")));
        let result = timeline.submit(&mut engine, op, now, plus_one).unwrap();
        assert!(result.commit.is_some());
        assert_eq!(timeline.phase(), TimelinePhase::Idle);
        assert_eq!(
            engine.value_of(&id("a")),
            Some(&ComputedValue::Ready(Value::from(1)))
        );
    }

    #[test]
    fn test_sliding_mode_batches_until_size_threshold() {
        let mut engine = SheetEngine::new(ReplicaId::new("r1"));
        let config = WindowConfig {
            max_ops: 3,
            max_age: Duration::from_secs(3600),
        };
        let mut timeline = TimelineController::new(TimelineMode::Sliding(config));
        let now = Instant::now();

        let ops = [
            Operation::upsert(id("a"), "1", crate::collab::Stamp::new(1, ReplicaId::new("r1"))),
            Operation::upsert(id("b"), "=a + 1", crate::collab::Stamp::new(2, ReplicaId::new("r1"))),
            Operation::upsert(id("a"), "5", crate::collab::Stamp::new(3, ReplicaId::new("r1"))),
        ];

        let mut results = Vec::new();
        for op in ops {
            results.push(timeline.submit(&mut engine, op, now, plus_one).unwrap());
        }

        assert!(results[0].commit.is_none());
        assert!(results[1].commit.is_none());
        // Third submission closes the window; the batch sees the net effect.
        let commit = results[2].commit.as_ref().unwrap();
        assert_eq!(commit.touched[&id("a")].ready(), Some(&Value::from(5)));
        assert_eq!(commit.touched[&id("b")].ready(), Some(&Value::from(6)));
        assert_eq!(timeline.pending(), 0);
    }

    #[test]
    fn test_sliding_mode_closes_on_age() {
        let mut engine = SheetEngine::new(ReplicaId::new("r1"));
        let config = WindowConfig {
            max_ops: 100,
            max_age: Duration::from_millis(50),
        };
        let mut timeline = TimelineController::new(TimelineMode::Sliding(config));
        let start = Instant::now();

        let op = Operation::upsert(id("a"), "1", crate::collab::Stamp::new(1, ReplicaId::new("r1")));
        let result = timeline.submit(&mut engine, op, start, plus_one).unwrap();
        assert!(result.commit.is_none());

        // Not old enough yet.
        assert!(timeline
            .tick(&mut engine, start + Duration::from_millis(10), plus_one)
            .is_none());

        let commit = timeline
            .tick(&mut engine, start + Duration::from_millis(60), plus_one)
            .unwrap();
        assert_eq!(commit.touched[&id("a")].ready(), Some(&Value::from(1)));
    }

    #[test]
    fn test_flush_forces_window_close() {
        let mut engine = SheetEngine::new(ReplicaId::new("r1"));
        let mut timeline =
            TimelineController::new(TimelineMode::Sliding(WindowConfig::default()));
        let now = Instant::now();

        assert!(timeline.flush(&mut engine, plus_one).is_none());

        let op = Operation::upsert(id("a"), "1", crate::collab::Stamp::new(1, ReplicaId::new("r1")));
        timeline.submit(&mut engine, op, now, plus_one).unwrap();
        assert!(timeline.flush(&mut engine, plus_one).is_some());
        assert!(timeline.flush(&mut engine, plus_one).is_none());
    }

    #[test]
    fn test_windowed_operations_are_in_the_log_immediately() {
        let mut engine = SheetEngine::new(ReplicaId::new("r1"));
        let mut timeline =
            TimelineController::new(TimelineMode::Sliding(WindowConfig::default()));
        let now = Instant::now();

        let op = Operation::upsert(id("a"), "1", crate::collab::Stamp::new(1, ReplicaId::new("r1")));
        timeline.submit(&mut engine, op, now, plus_one).unwrap();
        assert_eq!(engine.op_log().len(), 1);
        assert!(engine.dirty_set().contains(&id("a")));
    }
}
