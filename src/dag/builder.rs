//! Dependency graph construction from declared components.
//!
//! The builder validates names and dependency references, then rejects any
//! cycle with the explicit path that closes it. Nodes are indexed in
//! lexicographic name order so every derived ordering is deterministic.

use crate::errors::EngineError;
use crate::task::ComponentSpec;
use std::collections::{BTreeSet, HashMap};

/// Index into the sorted component list.
pub type NodeIndex = usize;

/// A directed acyclic graph of components.
#[derive(Debug, Clone)]
pub struct ComponentGraph {
    /// Components sorted by name.
    nodes: Vec<ComponentSpec>,
    index_map: HashMap<String, NodeIndex>,
    /// index -> components that depend on it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// index -> components it depends on
    reverse_edges: Vec<Vec<NodeIndex>>,
}

impl ComponentGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&ComponentSpec> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[ComponentSpec] {
        &self.nodes
    }

    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.index_map.get(name).copied()
    }

    pub fn name(&self, index: NodeIndex) -> &str {
        self.nodes.get(index).map_or("", |n| n.name.as_str())
    }

    /// Components that depend on `index` (forward edges).
    pub fn dependents(&self, index: NodeIndex) -> &[NodeIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Components `index` depends on (reverse edges).
    pub fn dependencies(&self, index: NodeIndex) -> &[NodeIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Every component that depends on `name`, directly or transitively,
    /// in name order.
    pub fn transitive_dependents(&self, name: &str) -> Vec<String> {
        let Some(start) = self.index_of(name) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for &dependent in self.dependents(idx) {
                if seen.insert(dependent) {
                    stack.push(dependent);
                }
            }
        }
        seen.into_iter().map(|i| self.name(i).to_string()).collect()
    }

    pub fn dependencies_satisfied(&self, index: NodeIndex, done: &BTreeSet<NodeIndex>) -> bool {
        self.dependencies(index).iter().all(|dep| done.contains(dep))
    }
}

/// Builder for [`ComponentGraph`].
pub struct GraphBuilder {
    components: Vec<ComponentSpec>,
}

impl GraphBuilder {
    pub fn new(components: Vec<ComponentSpec>) -> Self {
        Self { components }
    }

    /// Build the graph.
    ///
    /// Fails with `DuplicateComponent`, `UnknownDependency` or
    /// `CycleDetected`. Never attempts to break a cycle.
    pub fn build(self) -> Result<ComponentGraph, EngineError> {
        let mut nodes = self.components;
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut index_map = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index_map.insert(node.name.clone(), i).is_some() {
                return Err(EngineError::DuplicateComponent(node.name.clone()));
            }
        }

        let mut forward_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); nodes.len()];
        let mut reverse_edges: Vec<Vec<NodeIndex>> = vec![Vec::new(); nodes.len()];

        for (to_idx, node) in nodes.iter().enumerate() {
            let deps: BTreeSet<&String> = node.depends_on.iter().collect();
            for dep in deps {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| EngineError::UnknownDependency {
                            component: node.name.clone(),
                            dependency: dep.clone(),
                        })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }
        for edges in forward_edges.iter_mut().chain(reverse_edges.iter_mut()) {
            edges.sort_unstable();
        }

        let graph = ComponentGraph {
            nodes,
            index_map,
            forward_edges,
            reverse_edges,
        };

        if let Some(path) = Self::find_cycle(&graph) {
            return Err(EngineError::CycleDetected { path });
        }

        Ok(graph)
    }

    /// Depth-first search along `depends_on` edges, visiting nodes and their
    /// dependencies in name order. Returns the first cycle found as a closed
    /// path (`[A, B, A]`).
    fn find_cycle(graph: &ComponentGraph) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            graph: &ComponentGraph,
            node: NodeIndex,
            marks: &mut [Mark],
            stack: &mut Vec<NodeIndex>,
        ) -> Option<Vec<String>> {
            marks[node] = Mark::OnStack;
            stack.push(node);
            for &dep in graph.dependencies(node) {
                match marks[dep] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|&n| graph.name(n).to_string())
                            .collect();
                        path.push(graph.name(dep).to_string());
                        return Some(path);
                    }
                    Mark::Unvisited => {
                        if let Some(path) = visit(graph, dep, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; graph.len()];
        let mut stack = Vec::new();
        for node in 0..graph.len() {
            if marks[node] == Mark::Unvisited
                && let Some(path) = visit(graph, node, &mut marks, &mut stack)
            {
                return Some(path);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, deps: &[&str]) -> ComponentSpec {
        ComponentSpec::new(name, deps)
    }

    #[test]
    fn test_build_simple_graph() {
        let graph = GraphBuilder::new(vec![
            component("D", &["B", "C"]),
            component("A", &[]),
            component("B", &["A"]),
            component("C", &["A"]),
        ])
        .build()
        .unwrap();

        assert_eq!(graph.len(), 4);
        // Indexed in name order regardless of declaration order.
        assert_eq!(graph.name(0), "A");
        assert_eq!(graph.dependents(0), &[1, 2]);
        assert_eq!(graph.dependencies(3), &[1, 2]);
    }

    #[test]
    fn test_two_node_cycle_reports_path() {
        let err = GraphBuilder::new(vec![component("A", &["B"]), component("B", &["A"])])
            .build()
            .unwrap_err();
        match err {
            EngineError::CycleDetected { path } => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = GraphBuilder::new(vec![component("A", &["A"])])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CycleDetected { ref path } if path == &["A", "A"]
        ));
    }

    #[test]
    fn test_cycle_behind_a_dependency_reports_only_the_cycle() {
        // A -> B -> C -> D -> B
        let err = GraphBuilder::new(vec![
            component("A", &["B"]),
            component("B", &["C"]),
            component("C", &["D"]),
            component("D", &["B"]),
        ])
        .build()
        .unwrap_err();
        let EngineError::CycleDetected { path } = err else {
            panic!("expected cycle");
        };
        assert_eq!(path, vec!["B", "C", "D", "B"]);
    }

    #[test]
    fn test_reported_path_is_itself_a_cycle() {
        let specs = vec![
            component("api", &["auth"]),
            component("auth", &["store"]),
            component("store", &["api"]),
            component("ui", &["api"]),
        ];
        let deps: HashMap<String, Vec<String>> = specs
            .iter()
            .map(|c| (c.name.clone(), c.depends_on.clone()))
            .collect();
        let EngineError::CycleDetected { path } = GraphBuilder::new(specs).build().unwrap_err()
        else {
            panic!("expected cycle");
        };
        assert_eq!(path.first(), path.last());
        for pair in path.windows(2) {
            assert!(deps[&pair[0]].contains(&pair[1]));
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let err = GraphBuilder::new(vec![component("A", &["ghost"])])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownDependency { ref dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn test_duplicate_component() {
        let err = GraphBuilder::new(vec![component("A", &[]), component("A", &[])])
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateComponent(ref n) if n == "A"));
    }

    #[test]
    fn test_repeated_dependency_is_one_edge() {
        let graph = GraphBuilder::new(vec![component("A", &[]), component("B", &["A", "A"])])
            .build()
            .unwrap();
        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.dependents(0), &[1]);
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = GraphBuilder::new(vec![
            component("A", &[]),
            component("B", &["A"]),
            component("C", &["B"]),
            component("D", &[]),
        ])
        .build()
        .unwrap();
        assert_eq!(graph.transitive_dependents("A"), vec!["B", "C"]);
        assert!(graph.transitive_dependents("D").is_empty());
        assert!(graph.transitive_dependents("missing").is_empty());
    }

    #[test]
    fn test_empty_graph() {
        let graph = GraphBuilder::new(vec![]).build().unwrap();
        assert!(graph.is_empty());
    }
}
