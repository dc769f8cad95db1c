//! Dependency graph between tasks.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync
//!
//! Runnability is still decided from task statuses at selection time; the graph
//! exists for reverse lookups and cycle detection on restored snapshots.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks waiting for it
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` depends on `depends_on`.
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every edge touching `task` (used when a task is purged).
    pub fn remove_task(&mut self, task: TaskId) {
        for dep in self.dependencies_of(task) {
            self.remove_dependency(task, dep);
        }
        for waiter in self.dependents_of(task) {
            self.remove_dependency(waiter, task);
        }
    }

    pub fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    pub fn dependencies_of(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tasks that wait for `task`.
    pub fn dependents_of(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.reverse_edges.clear();
    }

    /// First cycle found, as a path that starts and ends on the same task,
    /// or `None` for a DAG.
    ///
    /// Three-color DFS over forward edges, O(V + E).
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut colors: HashMap<TaskId, Color> = HashMap::new();
        let mut path: Vec<TaskId> = Vec::new();

        let mut roots: Vec<TaskId> = self.edges.keys().copied().collect();
        roots.sort();
        for root in roots {
            if colors.contains_key(&root) {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(root, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: TaskId,
        colors: &mut HashMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        if let Some(deps) = self.edges.get(&node) {
            for &dep in deps {
                match colors.get(&dep) {
                    Some(Color::Gray) => {
                        let start = path.iter().position(|&t| t == dep).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                    None => {
                        if let Some(cycle) = self.dfs_cycle(dep, colors, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<TaskId> {
        (0..n).map(|_| TaskId::generate()).collect()
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(!graph.has_dependencies(TaskId::generate()));
    }

    #[test]
    fn add_dependency_creates_both_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids(2).try_into().unwrap();

        graph.add_dependency(b, a); // B depends on A

        assert!(graph.has_dependencies(b));
        assert!(!graph.has_dependencies(a));
        assert_eq!(graph.dependencies_of(b), vec![a]);
        assert_eq!(graph.dependents_of(a), vec![b]);
    }

    #[test]
    fn remove_task_drops_edges_in_both_directions() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids(3).try_into().unwrap();

        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.remove_task(b);

        assert!(!graph.has_dependencies(b));
        assert!(!graph.has_dependencies(c));
        assert!(graph.dependents_of(a).is_empty());
    }

    #[test]
    fn detect_simple_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b] = ids(2).try_into().unwrap();

        graph.add_dependency(a, b);
        graph.add_dependency(b, a);

        let cycle = graph.detect_cycle().expect("cycle");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn detect_self_dependency() {
        let mut graph = DependencyGraph::new();
        let a = TaskId::generate();

        graph.add_dependency(a, a);

        assert_eq!(graph.detect_cycle(), Some(vec![a, a]));
    }

    #[test]
    fn detect_longer_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d] = ids(4).try_into().unwrap();

        // B -> C -> D -> B, with A hanging off B
        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(d, c);
        graph.add_dependency(b, d);

        let cycle = graph.detect_cycle().expect("cycle");
        assert!(!cycle.contains(&a));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut graph = DependencyGraph::new();
        let [a, b, c] = ids(3).try_into().unwrap();

        graph.add_dependency(b, a);
        graph.add_dependency(c, b);
        graph.add_dependency(c, a);

        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn complex_dag_with_cross_edges() {
        let mut graph = DependencyGraph::new();
        let [a, b, c, d, e] = ids(5).try_into().unwrap();

        //     A
        //    / \
        //   B   C
        //   |\ /|
        //   | X |
        //   |/ \|
        //   D   E
        graph.add_dependency(b, a);
        graph.add_dependency(c, a);
        graph.add_dependency(d, b);
        graph.add_dependency(e, b);
        graph.add_dependency(d, c);
        graph.add_dependency(e, c);

        assert!(graph.detect_cycle().is_none());
    }
}
