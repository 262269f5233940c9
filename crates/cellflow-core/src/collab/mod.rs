//! Collaborative merge layer.
//!
//! Sheet state is a pure function of an append-only set of stamped
//! operations. Replicas exchange operations over any channel; applying the
//! same set in any order, any number of times, materializes the same sheet.

mod log;
mod op;

pub use log::{MaterializedSheet, MergeOutcome, OpLog};
pub use op::{OpKind, Operation, ReplicaId, Stamp};
