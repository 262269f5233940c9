//! Cell data structures for the sheet.
//!
//! This module provides the core data types for representing cells:
//! - [`CellContent`] - what was authored into a cell (empty, literal, or formula)
//! - [`ComputedValue`] - the last committed evaluation result, tagged
//! - [`Cell`] - content, derived inputs, and evaluation state
//! - [`CellStore`] - cell ownership plus the shared committed-value cache

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::cell_id::CellId;

/// Domain-agnostic cell value payload. The engine stores and forwards
/// values; it never interprets them.
pub type Value = serde_json::Value;

/// The content authored into a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellContent {
    Empty,
    Literal(Value),
    Formula(String),
}

impl CellContent {
    /// Parse user input into cell content.
    /// - Empty string or whitespace -> Empty
    /// - Starts with '=' -> Formula (without the '=')
    /// - Quoted string -> Literal text (without quotes)
    /// - Valid number -> Literal number
    /// - Otherwise -> Literal text
    pub fn from_input(input: &str) -> CellContent {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return CellContent::Empty;
        }

        if let Some(formula) = trimmed.strip_prefix('=') {
            return CellContent::Formula(formula.trim().to_string());
        }

        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            let text = &trimmed[1..trimmed.len() - 1];
            return CellContent::Literal(Value::String(text.to_string()));
        }

        if let Ok(n) = trimmed.parse::<i64>() {
            return CellContent::Literal(Value::from(n));
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return CellContent::Literal(Value::from(n));
        }

        CellContent::Literal(Value::String(trimmed.to_string()))
    }

    /// Get a display string for the content (for editing).
    pub fn to_input_string(&self) -> String {
        match self {
            CellContent::Empty => String::new(),
            CellContent::Literal(Value::String(s)) => s.clone(),
            CellContent::Literal(v) => v.to_string(),
            CellContent::Formula(f) => format!("={}", f),
        }
    }

    /// The formula text, if this content is a formula.
    pub fn formula(&self) -> Option<&str> {
        match self {
            CellContent::Formula(f) => Some(f),
            _ => None,
        }
    }
}

/// Why a cell's committed value is invalid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ValueError {
    /// The host compute function failed for this cell.
    Compute { message: String },
    /// An input cell failed or is unresolved.
    Upstream { source: CellId },
}

/// The last committed evaluation result for a cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ComputedValue {
    /// Not yet evaluated against the current content and edges.
    Stale,
    Ready(Value),
    Error(ValueError),
}

impl ComputedValue {
    pub fn ready(&self) -> Option<&Value> {
        match self {
            ComputedValue::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ComputedValue::Stale)
    }
}

/// A cell: authored content plus evaluation state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cell {
    pub content: CellContent,
    /// Cell ids this cell reads, derived from content. Mirrors the
    /// dependency graph; never authored directly.
    pub inputs: Vec<CellId>,
    /// Last committed result (not serialized; recomputed on load).
    #[serde(skip, default = "stale")]
    pub value: ComputedValue,
    /// Bumped every time a new result is committed for this cell.
    #[serde(skip)]
    pub revision: u64,
    #[serde(skip, default = "dirty")]
    pub dirty: bool,
}

fn stale() -> ComputedValue {
    ComputedValue::Stale
}

fn dirty() -> bool {
    true
}

impl Cell {
    /// Create a cell with derived inputs. New cells start stale and dirty.
    pub fn new(content: CellContent, inputs: Vec<CellId>) -> Cell {
        Cell {
            content,
            inputs,
            value: ComputedValue::Stale,
            revision: 0,
            dirty: true,
        }
    }
}

/// Thread-safe cache of committed `Ready` values, keyed by cell.
///
/// The evaluator writes this map only at batch commit, so a host compute
/// backend (or any other reader) never observes a half-written batch.
/// DashMap is internally Arc-based, clones are cheap.
pub type ValueCache = Arc<DashMap<CellId, Value>>;

/// Owns every cell in a sheet. Cells are referenced by id everywhere else;
/// nothing outside the store holds a cell by value.
#[derive(Default)]
pub struct CellStore {
    cells: HashMap<CellId, Cell>,
    values: ValueCache,
}

impl CellStore {
    pub fn new() -> CellStore {
        CellStore::default()
    }

    pub fn get(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn get_mut(&mut self, id: &CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id)
    }

    pub fn insert(&mut self, id: CellId, cell: Cell) -> Option<Cell> {
        self.values.remove(&id);
        self.cells.insert(id, cell)
    }

    pub fn remove(&mut self, id: &CellId) -> Option<Cell> {
        self.values.remove(id);
        self.cells.remove(id)
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.cells.contains_key(id)
    }

    /// Check for a cell by name, without constructing a `CellId`.
    pub fn contains_name(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    pub fn ids(&self) -> impl Iterator<Item = &CellId> {
        self.cells.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellId, &Cell)> {
        self.cells.iter()
    }

    /// The shared committed-value cache. Updated only at batch commit.
    pub fn values(&self) -> &ValueCache {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input_parses_kinds() {
        assert_eq!(CellContent::from_input("  "), CellContent::Empty);
        assert_eq!(
            CellContent::from_input("=a + 1"),
            CellContent::Formula("a + 1".to_string())
        );
        assert_eq!(
            CellContent::from_input("42"),
            CellContent::Literal(Value::from(42))
        );
        assert_eq!(
            CellContent::from_input("2.5"),
            CellContent::Literal(Value::from(2.5))
        );
        assert_eq!(
            CellContent::from_input("\"42\""),
            CellContent::Literal(Value::String("42".to_string()))
        );
        assert_eq!(
            CellContent::from_input("hello world"),
            CellContent::Literal(Value::String("hello world".to_string()))
        );
    }

    #[test]
    fn test_to_input_string_round_trips_formulas() {
        let content = CellContent::from_input("=a + b");
        assert_eq!(content.to_input_string(), "=a + b");
    }

    #[test]
    fn test_store_insert_clears_cached_value() {
        let mut store = CellStore::new();
        let id = CellId::parse("a").unwrap();
        store.insert(id.clone(), Cell::new(CellContent::from_input("1"), vec![]));
        store.values().insert(id.clone(), Value::from(1));

        store.insert(id.clone(), Cell::new(CellContent::from_input("2"), vec![]));
        assert!(store.values().get(&id).is_none());
    }
}
