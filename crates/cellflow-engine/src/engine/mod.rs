//! Sheet computation engine API.
//!
//! This module provides the core computation engine for a sheet of
//! interdependent cells:
//!
//! - [`CellId`] - validated cell identifiers
//! - [`Cell`], [`CellContent`], [`CellStore`] - cell content and value storage
//! - [`extract_references`] - scan formula text for referenced cells
//! - [`DepGraph`] - derived dependency edges with cycle rejection
//! - [`Evaluator`] - dirty tracking and topological recomputation

mod cell;
mod cell_id;
mod cycle;
mod eval;
mod graph;
mod refs;

pub use cell::{Cell, CellContent, CellStore, ComputedValue, Value, ValueCache, ValueError};
pub use cell_id::CellId;
pub use eval::{CommitResult, Evaluator};
pub use graph::{CycleError, DepGraph, Edge, EdgeDelta};
pub use refs::extract_references;
