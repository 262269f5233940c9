//! Operations for collaborative sheet editing.
//!
//! Each replica produces upsert/delete operations stamped with a Lamport
//! timestamp. Operations are immutable once created and append-only in the
//! log; the merged sheet is derived from the operation set, never edited
//! in place. The serde encoding is the wire contract: identifier, content,
//! causal stamp, and operation kind survive any serialization round-trip.

use serde::{Deserialize, Serialize};

use cellflow_engine::engine::CellId;

/// Identifies the replica (editor/device) that authored an operation.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> ReplicaId {
        ReplicaId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lamport stamp: a logical counter plus the authoring replica.
///
/// Stamps are totally ordered (counter first, then replica id), so any two
/// concurrent operations on the same cell have a deterministic winner on
/// every replica. Field order matters for the derived `Ord`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Stamp {
    pub counter: u64,
    pub replica: ReplicaId,
}

impl Stamp {
    pub fn new(counter: u64, replica: ReplicaId) -> Stamp {
        Stamp { counter, replica }
    }
}

/// What an operation does to its target cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// Create the cell, or replace its content. The content is raw input
    /// text; parsing happens when the sheet materializes.
    Upsert { content: String },
    /// Tombstone the cell. The identifier stays reserved; a later upsert
    /// revives it only if its stamp dominates the tombstone.
    Delete,
}

/// An atomic, causally-stamped edit unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub cell: CellId,
    pub stamp: Stamp,
    pub kind: OpKind,
}

impl Operation {
    pub fn upsert(cell: CellId, content: impl Into<String>, stamp: Stamp) -> Operation {
        Operation {
            cell,
            stamp,
            kind: OpKind::Upsert {
                content: content.into(),
            },
        }
    }

    pub fn delete(cell: CellId, stamp: Stamp) -> Operation {
        Operation {
            cell,
            stamp,
            kind: OpKind::Delete,
        }
    }
}
