//! Error types for Cellflow core.

use thiserror::Error;

use cellflow_engine::engine::{CellId, CycleError};

use crate::collab::Stamp;

/// Errors surfaced by the document layer.
#[derive(Error, Debug)]
pub enum CellflowError {
    /// A local content change would create a circular dependency. The
    /// mutation was rejected; sheet state is unchanged.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Two distinct operations claim the same causal stamp for the same
    /// cell. The log's causal ordering is corrupt; refusing to merge
    /// rather than guess a winner.
    #[error("causal ordering corrupted: cell {cell} has conflicting operations stamped {stamp:?}")]
    CausalityCorruption { cell: CellId, stamp: Stamp },

    #[error("invalid cell identifier: {0}")]
    InvalidCellId(String),
}

pub type Result<T> = std::result::Result<T, CellflowError>;
