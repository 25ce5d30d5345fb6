//! Topological scheduling
//!
//! Kahn's algorithm over the object graph. Among nodes that are ready at the
//! same time, the one inserted first wins, so the order is reproducible. A
//! cycle never fails the run: the insertion order is returned instead and the
//! unresolved nodes are reported.

use crate::dag::DependencyGraph;
use gitsnow_core::{Diagnostic, DiagnosticCode, ObjectName};
use std::collections::{BTreeSet, HashMap};

/// Deploy order for a graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOrder {
    /// Every node exactly once, dependencies first (insertion order on a cycle)
    pub order: Vec<ObjectName>,

    /// Nodes left unresolved by a cycle, in insertion order
    pub cycle: Option<Vec<ObjectName>>,
}

impl DeployOrder {
    pub fn has_cycle(&self) -> bool {
        self.cycle.is_some()
    }

    /// Position of `name` in the order
    pub fn index_of(&self, name: &ObjectName) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// Position lookup table for sorting by deploy order
    pub fn positions(&self) -> HashMap<&ObjectName, usize> {
        self.order.iter().enumerate().map(|(i, n)| (n, i)).collect()
    }

    /// Diagnostic describing the cycle, if there is one
    pub fn cycle_diagnostic(&self) -> Option<Diagnostic> {
        self.cycle.as_ref().map(|nodes| {
            let names: Vec<String> = nodes.iter().map(ToString::to_string).collect();
            Diagnostic::of(
                DiagnosticCode::GraphCycle,
                format!(
                    "Dependency cycle detected; objects are deployed in discovery order: {}",
                    names.join(", ")
                ),
            )
            .with_impact(names)
        })
    }
}

/// Schedule every node of `graph`
pub fn schedule(graph: &DependencyGraph) -> DeployOrder {
    schedule_nodes(graph.nodes(), graph.dependency_map())
}

/// Schedule `nodes` under `dependencies` (node -> nodes it depends on).
///
/// Dependencies missing from `nodes` are appended as nodes in the order they are
/// first seen; self-edges are ignored.
pub fn schedule_nodes(
    nodes: &[ObjectName],
    dependencies: &HashMap<ObjectName, BTreeSet<ObjectName>>,
) -> DeployOrder {
    let mut all: Vec<ObjectName> = Vec::with_capacity(nodes.len());
    let mut index: HashMap<ObjectName, usize> = HashMap::new();

    let mut intern = |name: &ObjectName, all: &mut Vec<ObjectName>| -> usize {
        *index.entry(name.clone()).or_insert_with(|| {
            all.push(name.clone());
            all.len() - 1
        })
    };

    for node in nodes {
        intern(node, &mut all);
    }

    let mut edges: Vec<(usize, usize)> = Vec::new();
    for node in nodes {
        let Some(deps) = dependencies.get(node) else {
            continue;
        };
        let target = intern(node, &mut all);
        for dep in deps {
            let source = intern(dep, &mut all);
            if source != target {
                edges.push((source, target));
            }
        }
    }

    let mut in_degree = vec![0usize; all.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); all.len()];
    for &(source, target) in &edges {
        in_degree[target] += 1;
        children[source].push(target);
    }

    // Kahn's algorithm; the ready set pops the earliest inserted node
    let mut ready: BTreeSet<usize> = (0..all.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(all.len());

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &child in &children[current] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() == all.len() {
        DeployOrder {
            order: order.into_iter().map(|i| all[i].clone()).collect(),
            cycle: None,
        }
    } else {
        let unresolved = (0..all.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| all[i].clone())
            .collect();
        DeployOrder {
            order: all,
            cycle: Some(unresolved),
        }
    }
}
