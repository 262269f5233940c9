//! Sheet mutations and recomputation.
//!
//! Local edits are validated against the dependency graph and rejected
//! with a cycle error before they reach the operation log. Remote edits
//! always merge (every replica must converge on the same log); cells
//! caught in a remote-introduced cycle are left dirty and errored until a
//! later edit breaks the cycle.

use cellflow_engine::engine::{
    Cell, CellContent, CellId, CommitResult, Value, extract_references,
};

use crate::collab::{MergeOutcome, OpKind, Operation};
use crate::error::Result;

use super::state::SheetEngine;

impl SheetEngine {
    /// Author a local edit: parse `input`, validate the resulting edges,
    /// mint a stamp, and admit the operation to the log. Returns the
    /// operation so the host can broadcast it to other replicas.
    pub fn upsert_local(&mut self, id: &CellId, input: &str) -> Result<Operation> {
        let content = CellContent::from_input(input);

        // Simulate the full integration on a scratch graph: the edit's own
        // references, plus re-derived references of existing formulas when
        // this id is new (a dormant textual reference becomes an edge the
        // moment the cell exists). Any resulting cycle passes through the
        // edited cell, so one search from it suffices.
        let mut trial = self.graph.clone();
        let refs = match content.formula() {
            Some(formula) => {
                extract_references(formula, |t| t == id.as_str() || self.store.contains_name(t))
            }
            None => Vec::new(),
        };
        trial.replace_inputs(id, &refs);
        if !self.store.contains(id) {
            for (other, cell) in self.store.iter() {
                if let Some(formula) = cell.content.formula() {
                    let other_refs = extract_references(formula, |t| {
                        t == id.as_str() || self.store.contains_name(t)
                    });
                    if other_refs != cell.inputs {
                        trial.replace_inputs(other, &other_refs);
                    }
                }
            }
        }
        if let Some(cycle) = trial.find_cycle(id) {
            return Err(cellflow_engine::engine::CycleError { cycle }.into());
        }

        let stamp = self.log.next_stamp(&self.replica);
        let op = Operation::upsert(id.clone(), input, stamp);
        self.apply(op.clone())?;
        Ok(op)
    }

    /// Author a local delete. Never fails with a cycle: removing edges
    /// cannot create one.
    pub fn delete_local(&mut self, id: &CellId) -> Result<Operation> {
        let stamp = self.log.next_stamp(&self.replica);
        let op = Operation::delete(id.clone(), stamp);
        self.apply(op.clone())?;
        Ok(op)
    }

    /// Integrate one operation (local or remote) into the canonical log
    /// and, when it wins its cell, into the derived sheet state. Applying
    /// never recomputes; the timeline controller decides when that runs.
    pub fn apply(&mut self, op: Operation) -> Result<MergeOutcome> {
        let outcome = self.log.apply(op.clone())?;
        if outcome == MergeOutcome::Applied {
            match &op.kind {
                OpKind::Upsert { content } => self.integrate_upsert(&op.cell, content),
                OpKind::Delete => self.integrate_delete(&op.cell),
            }
            self.publish();
        }
        Ok(outcome)
    }

    /// Mark cells and their downstream closure as needing recomputation.
    pub fn mark_dirty<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = CellId>,
    {
        self.evaluator.mark_dirty(ids, &self.graph);
    }

    /// Mark every live cell dirty (whole-sheet cascade).
    pub fn mark_all_dirty(&mut self) {
        let all: Vec<CellId> = self.store.ids().cloned().collect();
        self.evaluator.mark_dirty(all, &self.graph);
    }

    /// Evaluate the dirty closure with the host's compute function and
    /// publish the committed batch as a new revision.
    pub fn recompute<F>(&mut self, compute: F) -> CommitResult
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> std::result::Result<Value, String>,
    {
        let result = self.evaluator.recompute(&mut self.store, &self.graph, compute);
        if !result.touched.is_empty() {
            self.publish();
        }
        result
    }

    /// Recompute only if the sheet is still at `expected_revision`.
    /// Returns None - publishing nothing and leaving the dirty set for the
    /// superseding mutation's own recompute - when a newer mutation has
    /// landed since the caller observed that revision.
    pub fn recompute_if_current<F>(
        &mut self,
        expected_revision: u64,
        compute: F,
    ) -> Option<CommitResult>
    where
        F: FnMut(&CellId, &str, &[(CellId, Value)]) -> std::result::Result<Value, String>,
    {
        if self.revision != expected_revision {
            return None;
        }
        Some(self.recompute(compute))
    }

    fn integrate_upsert(&mut self, id: &CellId, input: &str) {
        let was_live = self.store.contains(id);
        self.tombstones.remove(id);

        let content = CellContent::from_input(input);
        let refs = match content.formula() {
            Some(formula) => {
                extract_references(formula, |t| t == id.as_str() || self.store.contains_name(t))
            }
            None => Vec::new(),
        };
        self.graph.replace_inputs(id, &refs);
        self.store.insert(id.clone(), Cell::new(content, refs));
        self.evaluator.mark_dirty([id.clone()], &self.graph);

        if !was_live {
            // A new id can turn dormant textual references into edges.
            self.rescan();
        }
    }

    fn integrate_delete(&mut self, id: &CellId) {
        self.tombstones.insert(id.clone());
        if !self.store.contains(id) {
            return;
        }

        // Dirty the downstream closure while the edges still exist.
        let downstream = self.graph.reachable_from(id);
        self.evaluator.mark_dirty(downstream, &self.graph);
        self.graph.remove_cell(id);
        self.store.remove(id);
        self.evaluator.forget(id);

        // Dependents re-derive without this id; their references go dormant.
        self.rescan();
    }

    /// Re-derive every formula's references against the current live id
    /// set, patching edges and dirtying cells whose inputs changed.
    fn rescan(&mut self) {
        let mut changed: Vec<(CellId, Vec<CellId>)> = Vec::new();
        for (other, cell) in self.store.iter() {
            if let Some(formula) = cell.content.formula() {
                let refs = extract_references(formula, |t| self.store.contains_name(t));
                if refs != cell.inputs {
                    changed.push((other.clone(), refs));
                }
            }
        }
        for (other, refs) in changed {
            self.graph.replace_inputs(&other, &refs);
            if let Some(cell) = self.store.get_mut(&other) {
                cell.inputs = refs;
            }
            self.evaluator.mark_dirty([other], &self.graph);
        }
    }
}
