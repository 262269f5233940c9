//! Dependency graph over cell identifiers.
//!
//! Tracks derived "target reads source" edges. Content mutations are
//! validated before they commit: a change that would make a cycle reachable
//! from the edited cell is rejected and the graph is left untouched, so the
//! graph stays acyclic between operations and reads need no locking.
//!
//! A merge of remote operations cannot reject (every replica must converge
//! on the same log), so [`DepGraph::replace_inputs`] installs edges without
//! validation; cells caught in a cycle are simply never scheduled by the
//! evaluator.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use thiserror::Error;
use tracing::debug;

use super::cell::CellContent;
use super::cell_id::CellId;
use super::cycle::detect_cycle;
use super::refs::extract_references;

/// A derived "target reads source" edge.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Edge {
    pub source: CellId,
    pub target: CellId,
}

/// Edges added and removed by one mutation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeDelta {
    pub added: Vec<Edge>,
    pub removed: Vec<Edge>,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A content change would create a circular dependency. The mutation was
/// not applied; the prior edge set is unchanged.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("circular dependency: {}", cycle_display(.cycle))]
pub struct CycleError {
    /// The cells forming the cycle, each reading the next.
    pub cycle: Vec<CellId>,
}

fn cycle_display(cycle: &[CellId]) -> String {
    let mut names: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
    if let Some(first) = names.first().copied() {
        names.push(first);
    }
    names.join(" -> ")
}

/// The dependency graph: adjacency in both directions, keyed by cell id.
#[derive(Clone, Debug, Default)]
pub struct DepGraph {
    /// cell -> cells it reads
    dependencies: HashMap<CellId, BTreeSet<CellId>>,
    /// cell -> cells that read it
    dependents: HashMap<CellId, BTreeSet<CellId>>,
}

impl DepGraph {
    pub fn new() -> DepGraph {
        DepGraph::default()
    }

    /// Derive references from `content` and install them as the cell's
    /// inputs, rejecting the mutation if it would create a cycle reachable
    /// from `id`. Returns the edge delta on success.
    ///
    /// `is_cell` decides which tokens in formula text name cells.
    pub fn set_content<F>(
        &mut self,
        id: &CellId,
        content: &CellContent,
        is_cell: F,
    ) -> Result<EdgeDelta, CycleError>
    where
        F: Fn(&str) -> bool,
    {
        let inputs = match content.formula() {
            Some(formula) => extract_references(formula, is_cell),
            None => Vec::new(),
        };
        self.set_inputs(id, &inputs)
    }

    /// Install `inputs` as the cell's dependency set, rejecting cycles.
    pub fn set_inputs(&mut self, id: &CellId, inputs: &[CellId]) -> Result<EdgeDelta, CycleError> {
        let new: BTreeSet<CellId> = inputs.iter().cloned().collect();

        // Simulate the insertion, then restore on rejection.
        let old = self.dependencies.insert(id.clone(), new.clone());
        if let Some(cycle) = detect_cycle(id, &self.dependencies) {
            match old {
                Some(prev) => {
                    self.dependencies.insert(id.clone(), prev);
                }
                None => {
                    self.dependencies.remove(id);
                }
            }
            debug!(cell = %id, "content change rejected: would create a cycle");
            return Err(CycleError { cycle });
        }

        Ok(self.commit_inputs(id, old.unwrap_or_default(), new))
    }

    /// Install `inputs` without cycle validation. Used when integrating
    /// merged remote state, which must land even if it forms a cycle; the
    /// evaluator leaves cycle members unscheduled.
    pub fn replace_inputs(&mut self, id: &CellId, inputs: &[CellId]) -> EdgeDelta {
        let new: BTreeSet<CellId> = inputs.iter().cloned().collect();
        let old = self
            .dependencies
            .insert(id.clone(), new.clone())
            .unwrap_or_default();
        self.commit_inputs(id, old, new)
    }

    fn commit_inputs(&mut self, id: &CellId, old: BTreeSet<CellId>, new: BTreeSet<CellId>) -> EdgeDelta {
        let mut delta = EdgeDelta::default();

        for dep in old.difference(&new) {
            if let Some(children) = self.dependents.get_mut(dep) {
                children.remove(id);
                if children.is_empty() {
                    self.dependents.remove(dep);
                }
            }
            delta.removed.push(Edge {
                source: dep.clone(),
                target: id.clone(),
            });
        }

        for dep in new.difference(&old) {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(id.clone());
            delta.added.push(Edge {
                source: dep.clone(),
                target: id.clone(),
            });
        }

        delta
    }

    /// Remove every edge touching `id`. Never fails. Dependents keep their
    /// content; the dangling reference becomes an edge again if a cell with
    /// this id is re-created.
    pub fn remove_cell(&mut self, id: &CellId) -> EdgeDelta {
        let mut delta = EdgeDelta::default();

        if let Some(deps) = self.dependencies.remove(id) {
            for dep in deps {
                if let Some(children) = self.dependents.get_mut(&dep) {
                    children.remove(id);
                    if children.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
                delta.removed.push(Edge {
                    source: dep,
                    target: id.clone(),
                });
            }
        }

        if let Some(children) = self.dependents.remove(id) {
            for child in children {
                if let Some(deps) = self.dependencies.get_mut(&child) {
                    deps.remove(id);
                }
                delta.removed.push(Edge {
                    source: id.clone(),
                    target: child,
                });
            }
        }

        delta
    }

    /// Cells `id` reads, in identifier order.
    pub fn dependencies_of(&self, id: &CellId) -> impl Iterator<Item = &CellId> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// Cells that read `id`, in identifier order.
    pub fn dependents_of(&self, id: &CellId) -> impl Iterator<Item = &CellId> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Every cell that transitively reads `id`, as an unordered set. The
    /// start cell appears only if it reads itself through a cycle.
    pub fn reachable_from(&self, id: &CellId) -> BTreeSet<CellId> {
        let mut reachable = BTreeSet::new();
        let mut queue: Vec<&CellId> = self.dependents_of(id).collect();
        while let Some(next) = queue.pop() {
            if reachable.insert(next.clone()) {
                queue.extend(self.dependents_of(next));
            }
        }
        reachable
    }

    /// Every cell that transitively reads `id`, in a stable topological
    /// order (`id` itself excluded, cycle members omitted). Restartable:
    /// each call walks afresh.
    pub fn downstream_of(&self, id: &CellId) -> impl Iterator<Item = CellId> {
        let mut reachable = self.reachable_from(id);
        reachable.remove(id);
        self.topological_order(&reachable).into_iter()
    }

    /// Total order over `subset` consistent with all edges among its
    /// members (Kahn's algorithm over in-degrees restricted to the subset).
    /// Ties are broken by cell identifier ascending, for determinism.
    ///
    /// Cells on a cycle (and cells downstream of one within the subset)
    /// never reach in-degree zero and are omitted from the result.
    pub fn topological_order(&self, subset: &BTreeSet<CellId>) -> Vec<CellId> {
        let mut in_degree: HashMap<&CellId, usize> = HashMap::new();
        for id in subset {
            let degree = self
                .dependencies_of(id)
                .filter(|dep| subset.contains(*dep))
                .count();
            in_degree.insert(id, degree);
        }

        let mut ready: BinaryHeap<Reverse<&CellId>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(Reverse(current)) = ready.pop() {
            order.push(current.clone());
            for child in self.dependents_of(current) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(child));
                    }
                }
            }
        }

        order
    }

    /// Detect a cycle reachable from `start` along dependency edges.
    /// Used to validate a simulated integration before committing it.
    pub fn find_cycle(&self, start: &CellId) -> Option<Vec<CellId>> {
        detect_cycle(start, &self.dependencies)
    }

    /// Cells with no dependencies (sheet roots).
    pub fn roots<'a>(&'a self, ids: impl Iterator<Item = &'a CellId>) -> Vec<CellId> {
        ids.filter(|id| self.dependencies_of(id).next().is_none())
            .cloned()
            .collect()
    }

    /// All edges, sorted by (source, target).
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .dependencies
            .iter()
            .flat_map(|(target, deps)| {
                deps.iter().map(|source| Edge {
                    source: source.clone(),
                    target: target.clone(),
                })
            })
            .collect();
        edges.sort();
        edges
    }
}
