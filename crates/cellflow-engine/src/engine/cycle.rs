//! Circular dependency detection.
//!
//! When a cell's content changes we must verify the new edges don't create
//! a cycle (a reads b, b reads c, c reads a). This module runs depth-first
//! search from the edited cell before the mutation commits, so the graph is
//! acyclic between operations.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::cell_id::CellId;

/// Detect a cycle reachable from `start` in the dependency map.
/// Returns the cycle path (each cell reads the next, the last reads the
/// first) if one is found, None otherwise.
pub(crate) fn detect_cycle(
    start: &CellId,
    dependencies: &HashMap<CellId, BTreeSet<CellId>>,
) -> Option<Vec<CellId>> {
    let mut visiting = HashSet::new();
    let mut path = Vec::new();

    if detect_cycle_dfs(start, dependencies, &mut visiting, &mut path) {
        Some(trim_to_cycle(path))
    } else {
        None
    }
}

fn detect_cycle_dfs(
    current: &CellId,
    dependencies: &HashMap<CellId, BTreeSet<CellId>>,
    visiting: &mut HashSet<CellId>,
    path: &mut Vec<CellId>,
) -> bool {
    if visiting.contains(current) {
        path.push(current.clone());
        return true;
    }

    let Some(deps) = dependencies.get(current) else {
        return false;
    };

    visiting.insert(current.clone());
    path.push(current.clone());

    for dep in deps {
        if detect_cycle_dfs(dep, dependencies, visiting, path) {
            return true;
        }
    }

    path.pop();
    visiting.remove(current);
    false
}

/// The DFS path ends with a repeat of the cell that closed the cycle;
/// drop the prefix leading into it and the duplicate itself.
fn trim_to_cycle(mut path: Vec<CellId>) -> Vec<CellId> {
    if let Some(repeat) = path.last().cloned()
        && let Some(pos) = path.iter().position(|id| *id == repeat)
        && pos + 1 < path.len()
    {
        path.drain(..pos);
        path.pop();
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> CellId {
        CellId::parse(name).unwrap()
    }

    fn deps(pairs: &[(&str, &[&str])]) -> HashMap<CellId, BTreeSet<CellId>> {
        pairs
            .iter()
            .map(|(cell, reads)| (id(cell), reads.iter().map(|r| id(r)).collect()))
            .collect()
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let map = deps(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert!(detect_cycle(&id("c"), &map).is_none());
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let map = deps(&[("a", &["a"])]);
        assert_eq!(detect_cycle(&id("a"), &map), Some(vec![id("a")]));
    }

    #[test]
    fn test_cycle_path_is_trimmed_to_the_loop() {
        // d reads c, and a <-> b <- c form the loop entered from c.
        let map = deps(&[("a", &["b"]), ("b", &["a"]), ("c", &["b"]), ("d", &["c"])]);
        let cycle = detect_cycle(&id("d"), &map).unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&id("a")));
        assert!(cycle.contains(&id("b")));
    }
}
