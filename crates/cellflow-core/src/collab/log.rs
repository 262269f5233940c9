//! Append-only operation log with deterministic merge.
//!
//! The log retains every operation it has ever accepted, including losers
//! of concurrent conflicts and tombstones, so a replica that catches up
//! late still converges to the identical winner per cell. Merge is
//! last-writer-wins per cell under the total order of [`Stamp`]s:
//! commutative, associative, and idempotent.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use cellflow_engine::engine::CellId;

use crate::error::{CellflowError, Result};

use super::op::{OpKind, Operation, ReplicaId, Stamp};

/// How an incoming operation affected the log.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// The operation is new and now governs its cell.
    Applied,
    /// The operation is new, but an operation with a higher stamp already
    /// governs the cell. Retained for late-arriving replicas; the
    /// materialized sheet is unchanged.
    Superseded { winner: Stamp },
    /// The operation was already in the log; nothing changed.
    Duplicate,
}

/// Pure reduction of the operation set: winning content per live cell,
/// plus the tombstoned identifiers (reserved but absent).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializedSheet {
    pub live: BTreeMap<CellId, String>,
    pub tombstones: BTreeSet<CellId>,
}

/// The canonical operation log for one sheet.
#[derive(Debug, Default)]
pub struct OpLog {
    /// Every accepted operation, in arrival order. Append-only.
    ops: Vec<Operation>,
    /// (cell, stamp) -> index into `ops`, for idempotence and causal
    /// corruption checks.
    index: HashMap<(CellId, Stamp), usize>,
    /// Winning operation index per cell.
    winners: BTreeMap<CellId, usize>,
    /// Lamport clock: highest counter observed.
    clock: u64,
}

impl OpLog {
    pub fn new() -> OpLog {
        OpLog::default()
    }

    /// Mint the stamp for a new local operation.
    pub fn next_stamp(&mut self, replica: &ReplicaId) -> Stamp {
        self.clock += 1;
        Stamp::new(self.clock, replica.clone())
    }

    /// Integrate one operation (local or remote) into the log.
    ///
    /// Re-delivery of an identical operation is a no-op (`Duplicate`). A
    /// different payload under an already-seen stamp means the channel has
    /// corrupted causal ordering; the log refuses it.
    pub fn apply(&mut self, op: Operation) -> Result<MergeOutcome> {
        let key = (op.cell.clone(), op.stamp.clone());
        if let Some(&seen) = self.index.get(&key) {
            if self.ops[seen].kind != op.kind {
                return Err(CellflowError::CausalityCorruption {
                    cell: op.cell,
                    stamp: op.stamp,
                });
            }
            return Ok(MergeOutcome::Duplicate);
        }

        self.clock = self.clock.max(op.stamp.counter);

        let outcome = match self.winners.get(&op.cell) {
            Some(&w) if self.ops[w].stamp > op.stamp => {
                debug!(cell = %op.cell, "concurrent edit lost to a higher stamp");
                MergeOutcome::Superseded {
                    winner: self.ops[w].stamp.clone(),
                }
            }
            _ => {
                self.winners.insert(op.cell.clone(), self.ops.len());
                MergeOutcome::Applied
            }
        };

        self.index.insert(key, self.ops.len());
        self.ops.push(op);
        Ok(outcome)
    }

    /// The operation currently governing a cell, if any.
    pub fn winner_of(&self, cell: &CellId) -> Option<&Operation> {
        self.winners.get(cell).map(|&i| &self.ops[i])
    }

    /// All accepted operations, in arrival order.
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Highest Lamport counter observed.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Materialize sheet content from the log: per cell the
    /// highest-stamped operation wins; a winning delete tombstones the
    /// cell. A pure function of the accepted operation set.
    pub fn materialize(&self) -> MaterializedSheet {
        let mut sheet = MaterializedSheet::default();
        for (cell, &i) in &self.winners {
            match &self.ops[i].kind {
                OpKind::Upsert { content } => {
                    sheet.live.insert(cell.clone(), content.clone());
                }
                OpKind::Delete => {
                    sheet.tombstones.insert(cell.clone());
                }
            }
        }
        sheet
    }
}
