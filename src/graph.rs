//! Dependency graph construction and topological ordering
//!
//! The merge order of packages is derived from a directed graph whose nodes
//! are package names plus a synthetic `root` node. An edge `a -> b` means
//! "a depends on b". Every package that is not referenced as a dependency of
//! another package gets an edge from `root`, so one topological walk from
//! `root` covers the whole forest.
//!
//! The sort is depth-first post-order: dependencies always precede their
//! dependents, and siblings keep their insertion order. Cycles are not
//! expected from manifest recursion; if one shows up anyway the sort logs it
//! and emits a partial order rather than failing the build.

use std::collections::{HashMap, HashSet};

use log::warn;

use crate::package::Package;

/// Name of the synthetic root node.
pub const DEPENDENCY_ROOT: &str = "root";

/// Directed dependency graph over package names.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Outgoing edges per node, in insertion order.
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph for a resolved package list.
    pub fn build(packages: &[Package]) -> Self {
        let mut graph = DependencyGraph::default();
        // Tracks which packages are referenced as a dependency of another;
        // the rest get attached to the synthetic root below.
        let mut referenced: HashMap<String, bool> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for pkg in packages {
            if !referenced.contains_key(&pkg.name) {
                referenced.insert(pkg.name.clone(), false);
                order.push(pkg.name.clone());
            }
            graph.edges.entry(pkg.name.clone()).or_default();
            for dep in &pkg.dependencies {
                graph.add_edge(&pkg.name, dep);
                if !referenced.contains_key(dep) {
                    order.push(dep.clone());
                }
                referenced.insert(dep.clone(), true);
            }
        }

        for name in order {
            if let Some(false) = referenced.get(&name) {
                graph.add_edge(DEPENDENCY_ROOT, &name);
            }
        }

        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        let targets = self.edges.entry(from.to_string()).or_default();
        if !targets.iter().any(|t| t == to) {
            targets.push(to.to_string());
        }
        self.edges.entry(to.to_string()).or_default();
    }

    /// Topologically sort the graph from the given node.
    ///
    /// Every package appears after all of its dependencies; ties between
    /// siblings are broken by insertion order. A cycle is logged and the
    /// offending edge skipped, yielding a partial order.
    pub fn top_sort(&self, from: &str) -> Vec<String> {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();
        self.visit(from, &mut visited, &mut visiting, &mut sorted);
        sorted
    }

    fn visit(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        sorted: &mut Vec<String>,
    ) {
        if visited.contains(node) {
            return;
        }
        if !visiting.insert(node.to_string()) {
            warn!("dependency cycle detected at {node}, continuing with partial order");
            return;
        }

        if let Some(targets) = self.edges.get(node) {
            for target in targets {
                self.visit(target, visited, visiting, sorted);
            }
        }

        visiting.remove(node);
        visited.insert(node.to_string());
        sorted.push(node.to_string());
    }
}
