//! Dependency graph (DAG) construction and traversal
//!
//! Forward and reverse edges between schema objects, plus the file(s) that
//! define each object. Built once per run; everything downstream only reads it.

use gitsnow_core::ObjectName;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;

/// Dependency graph with forward and reverse edges
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// All nodes, in insertion order
    nodes: Vec<ObjectName>,

    /// Membership index for `nodes`
    known: HashSet<ObjectName>,

    /// Defining files per object (several for overloaded procedures/functions)
    paths: HashMap<ObjectName, Vec<PathBuf>>,

    /// Forward edges: object -> objects it depends on
    parents: HashMap<ObjectName, BTreeSet<ObjectName>>,

    /// Reverse edges: object -> objects that depend on it
    children: HashMap<ObjectName, BTreeSet<ObjectName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_node(&mut self, name: &ObjectName) {
        if self.known.insert(name.clone()) {
            self.nodes.push(name.clone());
        }
    }

    /// Record that `path` defines `name`
    pub fn add_definition(&mut self, name: ObjectName, path: PathBuf) {
        self.ensure_node(&name);
        let paths = self.paths.entry(name).or_default();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    /// Record that `target` depends on `source`; self-dependencies are ignored
    pub fn add_dependency(&mut self, target: ObjectName, source: ObjectName) {
        if target == source {
            return;
        }
        self.ensure_node(&target);
        self.ensure_node(&source);

        self.children
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
        self.parents.entry(target).or_default().insert(source);
    }

    /// All nodes in insertion order (defined objects first when built from files)
    pub fn nodes(&self) -> &[ObjectName] {
        &self.nodes
    }

    pub fn contains(&self, name: &ObjectName) -> bool {
        self.known.contains(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Files defining `name` (empty for objects only referenced)
    pub fn paths(&self, name: &ObjectName) -> &[PathBuf] {
        self.paths.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Immediate dependencies of a node
    pub fn parents(&self, name: &ObjectName) -> Vec<&ObjectName> {
        self.parents
            .get(name)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Immediate dependents of a node
    pub fn children(&self, name: &ObjectName) -> Vec<&ObjectName> {
        self.children
            .get(name)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Forward edge map, for scheduling
    pub fn dependency_map(&self) -> &HashMap<ObjectName, BTreeSet<ObjectName>> {
        &self.parents
    }

    /// All downstream nodes (transitive closure of dependents), nearest first
    pub fn downstream(&self, name: &ObjectName) -> Vec<ObjectName> {
        Self::walk(name, &self.children)
    }

    /// All upstream nodes (transitive closure of dependencies), nearest first
    pub fn upstream(&self, name: &ObjectName) -> Vec<ObjectName> {
        Self::walk(name, &self.parents)
    }

    fn walk(start: &ObjectName, edges: &HashMap<ObjectName, BTreeSet<ObjectName>>) -> Vec<ObjectName> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut result = Vec::new();

        visited.insert(start.clone());
        if let Some(next) = edges.get(start) {
            queue.extend(next.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            if let Some(next) = edges.get(&current) {
                for node in next {
                    if !visited.contains(node) {
                        queue.push_back(node.clone());
                    }
                }
            }
        }

        result
    }
}
