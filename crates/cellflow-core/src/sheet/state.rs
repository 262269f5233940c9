//! Sheet engine state.
//!
//! A [`SheetEngine`] owns one collaboratively edited sheet: the operation
//! log, the cell store, the derived dependency graph, and the evaluator's
//! dirty set. All mutation goes through `&mut self` - the single-writer
//! critical section of the concurrency model - while readers hold
//! [`SnapshotHandle`]s and never block on an in-flight mutation or
//! recompute.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use cellflow_engine::engine::{
    Cell, CellContent, CellId, CellStore, ComputedValue, DepGraph, Edge, Evaluator, ValueCache,
};

use crate::collab::{OpLog, ReplicaId};

/// An immutable, revisioned view of committed sheet state. Consumers read
/// one snapshot, never a moving target mid-computation.
#[derive(Clone, Debug, Default)]
pub struct SheetSnapshot {
    pub revision: u64,
    /// Live (non-tombstoned) cells with their content and last value.
    pub cells: std::collections::BTreeMap<CellId, Cell>,
    /// Renderable dependency edges: both endpoints live.
    pub edges: Vec<Edge>,
    /// Cells whose stored value is out of date.
    pub dirty: BTreeSet<CellId>,
}

/// Cloneable read handle yielding the latest committed snapshot without
/// blocking on the engine's writer.
#[derive(Clone)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Arc<SheetSnapshot>>>,
}

impl SnapshotHandle {
    pub fn latest(&self) -> Arc<SheetSnapshot> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned lock still holds the last committed snapshot.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

/// One collaboratively edited sheet and its computation state.
pub struct SheetEngine {
    pub(crate) replica: ReplicaId,
    pub(crate) log: OpLog,
    pub(crate) store: CellStore,
    pub(crate) graph: DepGraph,
    pub(crate) evaluator: Evaluator,
    /// Identifiers whose winning operation is a delete. Reserved, absent
    /// from the materialized sheet.
    pub(crate) tombstones: BTreeSet<CellId>,
    pub(crate) revision: u64,
    snapshot: Arc<RwLock<Arc<SheetSnapshot>>>,
}

impl SheetEngine {
    pub fn new(replica: ReplicaId) -> SheetEngine {
        SheetEngine {
            replica,
            log: OpLog::new(),
            store: CellStore::new(),
            graph: DepGraph::new(),
            evaluator: Evaluator::new(),
            tombstones: BTreeSet::new(),
            revision: 0,
            snapshot: Arc::new(RwLock::new(Arc::new(SheetSnapshot::default()))),
        }
    }

    /// Monotonically increasing committed-state revision, for optimistic
    /// concurrency checks by consumers.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<SheetSnapshot> {
        self.watch().latest()
    }

    /// A cloneable read handle for other threads.
    pub fn watch(&self) -> SnapshotHandle {
        SnapshotHandle {
            inner: Arc::clone(&self.snapshot),
        }
    }

    /// The canonical operation log.
    pub fn op_log(&self) -> &OpLog {
        &self.log
    }

    /// The shared committed-value cache (updated only at batch commit).
    pub fn values(&self) -> &ValueCache {
        self.store.values()
    }

    pub fn content_of(&self, id: &CellId) -> Option<&CellContent> {
        self.store.get(id).map(|cell| &cell.content)
    }

    pub fn value_of(&self, id: &CellId) -> Option<&ComputedValue> {
        self.store.get(id).map(|cell| &cell.value)
    }

    /// Cells whose stored value is out of date.
    pub fn dirty_set(&self) -> &BTreeSet<CellId> {
        self.evaluator.dirty()
    }

    /// Edges for visualization: derived "target reads source" pairs where
    /// both cells are live and non-tombstoned.
    pub fn renderable_edges(&self) -> Vec<Edge> {
        self.graph.edges()
    }

    /// Every cell transitively reading `id`, parents before children.
    pub fn downstream_of(&self, id: &CellId) -> Vec<CellId> {
        self.graph.downstream_of(id).collect()
    }

    /// Live cells with no dependencies, in identifier order.
    pub fn roots(&self) -> Vec<CellId> {
        let mut roots = self.graph.roots(self.store.ids());
        roots.sort();
        roots
    }

    /// Publish the current state as a new immutable revision.
    pub(crate) fn publish(&mut self) {
        self.revision += 1;
        let snapshot = Arc::new(SheetSnapshot {
            revision: self.revision,
            cells: self
                .store
                .iter()
                .map(|(id, cell)| (id.clone(), cell.clone()))
                .collect(),
            edges: self.graph.edges(),
            dirty: self.evaluator.dirty().clone(),
        });
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}
