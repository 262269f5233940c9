//! cellflow-core - collaborative sheet document layer.
//!
//! Builds on [`cellflow_engine`] with an append-only operation log and
//! deterministic merge, a sheet engine that keeps graph and values
//! consistent across local and remote edits, and a timeline controller
//! deciding when recomputation runs.

pub mod collab;
pub mod error;
pub mod sheet;
pub mod timeline;

pub use collab::{MaterializedSheet, MergeOutcome, OpKind, OpLog, Operation, ReplicaId, Stamp};
pub use error::{CellflowError, Result};
pub use sheet::{SheetEngine, SheetSnapshot, SnapshotHandle};
pub use timeline::{SubmitResult, TimelineController, TimelineMode, TimelinePhase, WindowConfig};

pub use cellflow_engine::engine::{
    Cell, CellContent, CellId, CommitResult, ComputedValue, CycleError, DepGraph, Edge, EdgeDelta,
    Evaluator, Value, ValueCache, ValueError,
};
