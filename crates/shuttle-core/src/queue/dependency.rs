//! Dependency graph gating task readiness.
//!
//! Design:
//! - Forward edges: task -> dependencies it still waits for
//! - Reverse edges: task -> dependents waiting for it
//! - Invariant: both maps describe the same edge set and never contain a cycle
//!
//! Only unresolved edges live here. Once a dependency finishes its edges are
//! dropped; the declared dependency list stays on the task record.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::domain::TaskId;

/// Adding an edge would close a cycle.
///
/// `path` starts and ends at the same task, e.g. `[a, b, a]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", render_path(.path))]
pub struct CycleError {
    pub path: Vec<TaskId>,
}

fn render_path(path: &[TaskId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// task -> dependencies it waits for
    waiting_on: HashMap<TaskId, HashSet<TaskId>>,

    /// dependency -> tasks waiting for it
    dependents: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the edge "`from` must finish before `to`".
    ///
    /// Fails if `from` is already reachable from `to`; the graph is left
    /// unchanged in that case.
    pub fn add_edge(&mut self, from: TaskId, to: TaskId) -> Result<(), CycleError> {
        self.check_edge(from, to)?;
        self.insert_edge(from, to);
        debug_assert!(self.is_acyclic());
        Ok(())
    }

    /// Add every edge `dep -> to`, or none of them.
    pub fn add_edges(
        &mut self,
        deps: impl IntoIterator<Item = TaskId>,
        to: TaskId,
    ) -> Result<(), CycleError> {
        let deps: Vec<TaskId> = deps.into_iter().collect();
        for &dep in &deps {
            self.check_edge(dep, to)?;
        }
        for dep in deps {
            self.insert_edge(dep, to);
        }
        debug_assert!(self.is_acyclic());
        Ok(())
    }

    fn check_edge(&self, from: TaskId, to: TaskId) -> Result<(), CycleError> {
        if from == to {
            return Err(CycleError {
                path: vec![from, to],
            });
        }
        match self.path_between(to, from) {
            Some(mut path) => {
                // path is to -> ... -> from; the new edge closes it
                path.insert(0, from);
                Err(CycleError { path })
            }
            None => Ok(()),
        }
    }

    fn insert_edge(&mut self, from: TaskId, to: TaskId) {
        self.waiting_on.entry(to).or_default().insert(from);
        self.dependents.entry(from).or_default().insert(to);
    }

    /// Shortest path from `start` to `goal` following dependent edges.
    fn path_between(&self, start: TaskId, goal: TaskId) -> Option<Vec<TaskId>> {
        let mut prev: HashMap<TaskId, TaskId> = HashMap::new();
        let mut seen = HashSet::from([start]);
        let mut frontier = VecDeque::from([start]);

        while let Some(node) = frontier.pop_front() {
            if node == goal {
                return Some(follow_back(goal, &prev));
            }
            for &next in self.dependents.get(&node).into_iter().flatten() {
                if seen.insert(next) {
                    prev.insert(next, node);
                    frontier.push_back(next);
                }
            }
        }
        None
    }

    /// `task` finished: drop its outgoing edges and return the dependents
    /// that no longer wait for anything.
    pub fn on_finished(&mut self, task: TaskId) -> Vec<TaskId> {
        let Some(waiting) = self.dependents.remove(&task) else {
            return Vec::new();
        };
        let mut unblocked = Vec::new();
        for dependent in waiting {
            if let Entry::Occupied(mut e) = self.waiting_on.entry(dependent) {
                e.get_mut().remove(&task);
                if e.get().is_empty() {
                    e.remove_entry();
                    unblocked.push(dependent);
                }
            }
        }
        unblocked
    }

    /// Every transitive dependent of `task`, nearest first.
    pub fn dependents_closure(&self, task: TaskId) -> Vec<TaskId> {
        let mut seen = HashSet::from([task]);
        let mut frontier = VecDeque::from([task]);
        let mut out = Vec::new();

        while let Some(node) = frontier.pop_front() {
            for &next in self.dependents.get(&node).into_iter().flatten() {
                if seen.insert(next) {
                    out.push(next);
                    frontier.push_back(next);
                }
            }
        }
        out
    }

    pub fn is_blocked(&self, task: TaskId) -> bool {
        self.waiting_on.contains_key(&task)
    }

    /// Unresolved dependencies of `task`.
    pub fn waiting_on(&self, task: TaskId) -> Vec<TaskId> {
        self.waiting_on
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Detach `task` entirely, in both directions.
    pub fn remove(&mut self, task: TaskId) {
        if let Some(deps) = self.waiting_on.remove(&task) {
            for dep in deps {
                if let Entry::Occupied(mut e) = self.dependents.entry(dep) {
                    e.get_mut().remove(&task);
                    if e.get().is_empty() {
                        e.remove_entry();
                    }
                }
            }
        }
        if let Some(waiting) = self.dependents.remove(&task) {
            for dependent in waiting {
                if let Entry::Occupied(mut e) = self.waiting_on.entry(dependent) {
                    e.get_mut().remove(&task);
                    if e.get().is_empty() {
                        e.remove_entry();
                    }
                }
            }
        }
    }

    pub fn edge_count(&self) -> usize {
        self.waiting_on.values().map(HashSet::len).sum()
    }

    /// Kahn's algorithm over the live edges.
    fn is_acyclic(&self) -> bool {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        for (&task, deps) in &self.waiting_on {
            in_degree.insert(task, deps.len());
            for &dep in deps {
                in_degree.entry(dep).or_insert(0);
            }
        }

        let mut frontier: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&t, _)| t)
            .collect();
        let mut visited = 0;
        while let Some(node) = frontier.pop_front() {
            visited += 1;
            for next in self.dependents.get(&node).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        frontier.push_back(*next);
                    }
                }
            }
        }
        visited == in_degree.len()
    }
}

fn follow_back(goal: TaskId, prev: &HashMap<TaskId, TaskId>) -> Vec<TaskId> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(&p) = prev.get(&current) {
        path.push(p);
        current = p;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn id(n: u128) -> TaskId {
        TaskId::from_ulid(Ulid(n))
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(!graph.is_blocked(id(1)));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn add_edge_blocks_the_dependent() {
        let mut graph = DependencyGraph::new();
        let (a, b) = (id(1), id(2));

        graph.add_edge(a, b).unwrap(); // B waits for A

        assert!(graph.is_blocked(b));
        assert!(!graph.is_blocked(a));
        assert_eq!(graph.waiting_on(b), vec![a]);
        assert_eq!(graph.dependents_closure(a), vec![b]);
    }

    #[test]
    fn on_finished_unblocks_only_when_all_dependencies_done() {
        let mut graph = DependencyGraph::new();
        let (a, b, c) = (id(1), id(2), id(3));

        // C waits for both A and B
        graph.add_edge(a, c).unwrap();
        graph.add_edge(b, c).unwrap();

        assert!(graph.on_finished(a).is_empty());
        assert!(graph.is_blocked(c));
        assert_eq!(graph.on_finished(b), vec![c]);
        assert!(!graph.is_blocked(c));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let a = id(1);

        let err = graph.add_edge(a, a).unwrap_err();

        assert_eq!(err.path, vec![a, a]);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn closing_edge_is_rejected_with_path() {
        let mut graph = DependencyGraph::new();
        let (a, b, c) = (id(1), id(2), id(3));

        graph.add_edge(a, b).unwrap();
        graph.add_edge(b, c).unwrap();
        let err = graph.add_edge(c, a).unwrap_err();

        assert_eq!(err.path, vec![c, a, b, c]);
        assert_eq!(graph.edge_count(), 2);
        assert!(!graph.is_blocked(a));
        assert!(graph.is_acyclic());
    }

    #[test]
    fn cycle_error_renders_the_path() {
        let (a, b) = (id(1), id(2));
        let err = CycleError {
            path: vec![a, b, a],
        };

        assert_eq!(err.to_string(), format!("dependency cycle: {a} -> {b} -> {a}"));
    }

    #[test]
    fn add_edges_is_all_or_nothing() {
        let mut graph = DependencyGraph::new();
        let (a, b, c) = (id(1), id(2), id(3));
        graph.add_edge(c, a).unwrap(); // A waits for C

        // B first, then A: the A edge closes C -> A -> C
        let res = graph.add_edges([b, a], c);

        assert!(res.is_err());
        assert!(!graph.is_blocked(c));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let (a, b, c, d) = (id(1), id(2), id(3), id(4));

        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        graph.add_edge(a, b).unwrap();
        graph.add_edge(a, c).unwrap();
        graph.add_edge(b, d).unwrap();
        graph.add_edge(c, d).unwrap();
        graph.add_edge(a, d).unwrap(); // shortcut

        assert!(graph.is_acyclic());
    }

    #[test]
    fn closure_reaches_every_transitive_dependent() {
        let mut graph = DependencyGraph::new();
        let (a, b, c, d, e) = (id(1), id(2), id(3), id(4), id(5));
        graph.add_edge(a, b).unwrap();
        graph.add_edge(b, c).unwrap();
        graph.add_edge(a, d).unwrap();
        graph.add_edge(e, c).unwrap();

        let mut closure = graph.dependents_closure(a);
        closure.sort();

        let mut expected = vec![b, c, d];
        expected.sort();
        assert_eq!(closure, expected);
        assert!(graph.dependents_closure(c).is_empty());
    }

    #[test]
    fn remove_detaches_both_directions() {
        let mut graph = DependencyGraph::new();
        let (a, b, c) = (id(1), id(2), id(3));
        graph.add_edge(a, b).unwrap();
        graph.add_edge(b, c).unwrap();

        graph.remove(b);

        assert!(!graph.is_blocked(c));
        assert!(graph.dependents_closure(a).is_empty());
        assert_eq!(graph.edge_count(), 0);
    }
}
