//! Incremental evaluation of dirty cells.
//!
//! The evaluator owns the dirty set: cells whose stored value is out of
//! date relative to current content and edges. [`Evaluator::recompute`]
//! drains the set in topological order, calling a host-supplied compute
//! function for formula cells, and commits the whole batch at once. The
//! engine has no idea what "computing a cell" means (SQL, scripting, ...);
//! that capability is injected per call.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::cell::{CellContent, CellStore, ComputedValue, Value, ValueError};
use super::cell_id::CellId;
use super::graph::DepGraph;

/// Outcome of one recompute batch. The batch is committed atomically:
/// every value in `touched` became visible together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommitResult {
    /// Result committed this batch, keyed by cell.
    pub touched: BTreeMap<CellId, ComputedValue>,
    /// Cells that could not be scheduled because they sit on (or behind) a
    /// dependency cycle. They remain dirty and keep an upstream error value
    /// until a later mutation breaks the cycle.
    pub blocked: BTreeSet<CellId>,
}

/// Dirty tracking and topological recomputation.
#[derive(Debug, Default)]
pub struct Evaluator {
    dirty: BTreeSet<CellId>,
}

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator::default()
    }

    /// Mark cells and their full downstream closure dirty. Reachability,
    /// not topological order, so members of a merged cycle are included.
    pub fn mark_dirty<I>(&mut self, ids: I, graph: &DepGraph)
    where
        I: IntoIterator<Item = CellId>,
    {
        for id in ids {
            self.dirty.extend(graph.reachable_from(&id));
            self.dirty.insert(id);
        }
    }

    /// Cells whose stored value is out of date.
    pub fn dirty(&self) -> &BTreeSet<CellId> {
        &self.dirty
    }

    pub fn is_dirty(&self, id: &CellId) -> bool {
        self.dirty.contains(id)
    }

    /// Drop a cell from the dirty set (it no longer exists).
    pub fn forget(&mut self, id: &CellId) {
        self.dirty.remove(id);
    }

    /// Recompute the dirty set in topological order.
    ///
    /// For each cell: literals commit directly; formulas gather the latest
    /// committed values of their inputs (or propagate an upstream error if
    /// an input failed or is unresolved) and invoke `compute` with the cell
    /// id, the formula text, and the gathered `(input, value)` pairs in
    /// identifier order. A compute failure is contained: it becomes that
    /// cell's value and surfaces downstream as upstream errors, but never
    /// aborts the batch. Results are staged and committed together.
    pub fn recompute<F>(
        &mut self,
        store: &mut CellStore,
        graph: &DepGraph,
        mut compute: F,
    ) -> CommitResult
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> Result<Value, String>,
    {
        // Dirty ids whose cell no longer exists are dropped, not evaluated.
        let batch: BTreeSet<CellId> = self
            .dirty
            .iter()
            .filter(|id| store.contains(id))
            .cloned()
            .collect();

        let order = graph.topological_order(&batch);
        let mut staged: BTreeMap<CellId, ComputedValue> = BTreeMap::new();

        for id in &order {
            let Some(cell) = store.get(id) else { continue };
            let result = match &cell.content {
                CellContent::Empty => ComputedValue::Ready(Value::Null),
                CellContent::Literal(v) => ComputedValue::Ready(v.clone()),
                CellContent::Formula(formula) => {
                    match gather_inputs(&cell.inputs, store, &staged) {
                        Err(source) => ComputedValue::Error(ValueError::Upstream { source }),
                        Ok(inputs) => match compute(id, formula, &inputs) {
                            Ok(v) => ComputedValue::Ready(v),
                            Err(message) => {
                                ComputedValue::Error(ValueError::Compute { message })
                            }
                        },
                    }
                }
            };
            staged.insert(id.clone(), result);
        }

        // Whatever Kahn could not order sits on (or behind) a cycle. Those
        // cells stay dirty; their value records the unresolved input.
        let blocked: BTreeSet<CellId> = batch
            .iter()
            .filter(|id| !staged.contains_key(*id))
            .cloned()
            .collect();

        // Commit point: all staged results become visible together.
        for (id, value) in &staged {
            if let Some(cell) = store.get_mut(id) {
                cell.value = value.clone();
                cell.revision += 1;
                cell.dirty = false;
            }
            match value {
                ComputedValue::Ready(v) => {
                    store.values().insert(id.clone(), v.clone());
                }
                _ => {
                    store.values().remove(id);
                }
            }
        }
        for id in &blocked {
            let source = unresolved_input(id, store, &blocked);
            if let Some(cell) = store.get_mut(id) {
                cell.value = ComputedValue::Error(ValueError::Upstream { source });
                cell.revision += 1;
            }
            store.values().remove(id);
        }

        self.dirty = blocked.clone();

        debug!(
            touched = staged.len(),
            blocked = blocked.len(),
            "recompute batch committed"
        );
        let mut touched = staged;
        for id in &blocked {
            if let Some(cell) = store.get(id) {
                touched.insert(id.clone(), cell.value.clone());
            }
        }
        CommitResult { touched, blocked }
    }
}

/// Gather `(input, committed value)` pairs for a formula, preferring values
/// staged earlier in the same batch. Fails with the first input that is
/// errored or still unresolved. Inputs whose cell was deleted are skipped;
/// whether that is an error is the compute function's business.
fn gather_inputs(
    inputs: &[CellId],
    store: &CellStore,
    staged: &BTreeMap<CellId, ComputedValue>,
) -> Result<Vec<(CellId, Value)>, CellId> {
    let mut gathered = Vec::with_capacity(inputs.len());
    for input in inputs {
        let value = match staged.get(input) {
            Some(v) => v,
            None => match store.get(input) {
                Some(cell) => &cell.value,
                None => continue,
            },
        };
        match value {
            ComputedValue::Ready(v) => gathered.push((input.clone(), v.clone())),
            ComputedValue::Stale | ComputedValue::Error(_) => return Err(input.clone()),
        }
    }
    Ok(gathered)
}

/// Pick the input that keeps a blocked cell from evaluating: the first one
/// that is itself blocked, else the first errored/stale one, else (for a
/// self-referential cell) the cell itself.
fn unresolved_input(id: &CellId, store: &CellStore, blocked: &BTreeSet<CellId>) -> CellId {
    let inputs = store
        .get(id)
        .map(|cell| cell.inputs.as_slice())
        .unwrap_or_default();
    inputs
        .iter()
        .find(|input| blocked.contains(*input))
        .or_else(|| {
            inputs.iter().find(|input| {
                store
                    .get(input)
                    .is_none_or(|cell| !matches!(cell.value, ComputedValue::Ready(_)))
            })
        })
        .cloned()
        .unwrap_or_else(|| id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Cell;

    fn id(name: &str) -> CellId {
        CellId::parse(name).unwrap()
    }

    /// Sum all inputs and add 1 (stand-in for `x + 1` formulas).
    fn plus_one(_: &CellId, _: &str, inputs: &[(CellId, Value)]) -> Result<Value, String> {
        let sum: i64 = inputs.iter().filter_map(|(_, v)| v.as_i64()).sum();
        Ok(Value::from(sum + 1))
    }

    fn sheet(cells: &[(&str, &str, &[&str])]) -> (CellStore, DepGraph) {
        let mut store = CellStore::new();
        let mut graph = DepGraph::new();
        for (name, input, deps) in cells {
            let inputs: Vec<CellId> = deps.iter().map(|d| id(d)).collect();
            graph.replace_inputs(&id(name), &inputs);
            store.insert(id(name), Cell::new(CellContent::from_input(input), inputs));
        }
        (store, graph)
    }

    #[test]
    fn test_chain_recomputes_in_dependency_order() {
        let (mut store, graph) = sheet(&[
            ("a", "1", &[]),
            ("b", "=a + 1", &["a"]),
            ("c", "=b + 1", &["b"]),
        ]);
        let mut eval = Evaluator::new();
        eval.mark_dirty([id("a")], &graph);

        let result = eval.recompute(&mut store, &graph, plus_one);

        assert_eq!(result.touched.len(), 3);
        assert_eq!(store.get(&id("b")).unwrap().value.ready(), Some(&Value::from(2)));
        assert_eq!(store.get(&id("c")).unwrap().value.ready(), Some(&Value::from(3)));
        assert!(eval.dirty().is_empty());
    }

    #[test]
    fn test_edit_propagates_through_batch() {
        let (mut store, graph) = sheet(&[
            ("a", "5", &[]),
            ("b", "=a + 1", &["a"]),
            ("c", "=b + 1", &["b"]),
        ]);
        let mut eval = Evaluator::new();
        eval.mark_dirty([id("a")], &graph);
        let result = eval.recompute(&mut store, &graph, plus_one);

        assert_eq!(result.touched[&id("b")].ready(), Some(&Value::from(6)));
        assert_eq!(result.touched[&id("c")].ready(), Some(&Value::from(7)));
    }

    #[test]
    fn test_compute_failure_is_contained() {
        let (mut store, graph) = sheet(&[
            ("bad", "=boom()", &[]),
            ("child", "=bad + 1", &["bad"]),
            ("other", "7", &[]),
        ]);
        let mut eval = Evaluator::new();
        eval.mark_dirty([id("bad"), id("other")], &graph);

        let result = eval.recompute(&mut store, &graph, |cell, _, inputs| {
            if cell.as_str() == "bad" {
                Err("boom is not defined".to_string())
            } else {
                plus_one(cell, "", inputs)
            }
        });

        assert!(matches!(
            result.touched[&id("bad")],
            ComputedValue::Error(ValueError::Compute { .. })
        ));
        assert_eq!(
            result.touched[&id("child")],
            ComputedValue::Error(ValueError::Upstream { source: id("bad") })
        );
        // The unrelated cell still committed.
        assert_eq!(result.touched[&id("other")].ready(), Some(&Value::from(7)));
        assert!(eval.dirty().is_empty());
    }

    #[test]
    fn test_cycle_members_stay_dirty_and_block() {
        // b <-> c merged from a remote replica; a is independent.
        let (mut store, graph) = sheet(&[
            ("a", "1", &[]),
            ("b", "=c + 1", &["c"]),
            ("c", "=b + 1", &["b"]),
        ]);
        let mut eval = Evaluator::new();
        eval.mark_dirty([id("a"), id("b")], &graph);

        let result = eval.recompute(&mut store, &graph, plus_one);

        assert_eq!(result.touched[&id("a")].ready(), Some(&Value::from(1)));
        assert_eq!(
            result.blocked,
            [id("b"), id("c")].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(eval.is_dirty(&id("b")));
        assert!(eval.is_dirty(&id("c")));
        assert!(matches!(
            store.get(&id("b")).unwrap().value,
            ComputedValue::Error(ValueError::Upstream { .. })
        ));
    }

    #[test]
    fn test_deleted_cells_drop_out_of_the_dirty_set() {
        let (mut store, mut graph) = sheet(&[("a", "1", &[]), ("b", "=a + 1", &["a"])]);
        let mut eval = Evaluator::new();
        eval.mark_dirty([id("a")], &graph);

        graph.remove_cell(&id("a"));
        store.remove(&id("a"));
        if let Some(cell) = store.get_mut(&id("b")) {
            cell.inputs.clear();
        }

        let result = eval.recompute(&mut store, &graph, plus_one);
        assert!(!result.touched.contains_key(&id("a")));
        assert_eq!(result.touched[&id("b")].ready(), Some(&Value::from(1)));
        assert!(eval.dirty().is_empty());
    }

    #[test]
    fn test_commit_updates_value_cache_and_revisions() {
        let (mut store, graph) = sheet(&[("a", "1", &[]), ("b", "=a + 1", &["a"])]);
        let mut eval = Evaluator::new();
        eval.mark_dirty([id("a")], &graph);
        eval.recompute(&mut store, &graph, plus_one);

        assert_eq!(store.values().get(&id("b")).map(|v| v.clone()), Some(Value::from(2)));
        assert_eq!(store.get(&id("b")).unwrap().revision, 1);

        eval.mark_dirty([id("a")], &graph);
        eval.recompute(&mut store, &graph, plus_one);
        assert_eq!(store.get(&id("b")).unwrap().revision, 2);
    }
}
