//! Lineage path discovery
//!
//! Column-level paths come from a depth-bounded search backwards through
//! lineage edges. Where column lineage runs out, paths are extended along
//! table dependencies. Both walks use an explicit work stack; a key already on
//! the current path abandons the branch.

use super::store::LineageStore;
use gitsnow_core::{ColumnKey, ObjectName};
use gitsnow_graph::DependencyGraph;
use serde::Serialize;
use std::fmt;

/// Every lineage path ending at `target`, each ordered from ultimate source to `target`.
///
/// A key with no recorded lineage edge ends a path, as does reaching
/// `max_depth` edges. When every branch is abandoned the result is `[[target]]`.
pub fn build_column_lineage_paths(
    store: &LineageStore,
    target: &ColumnKey,
    max_depth: usize,
) -> Vec<Vec<ColumnKey>> {
    let mut paths = Vec::new();

    // Each entry is a path from `target` backwards
    let mut stack: Vec<Vec<ColumnKey>> = vec![vec![target.clone()]];

    while let Some(path) = stack.pop() {
        let Some(current) = path.last() else {
            continue;
        };

        let sources = store.sources_of(current);
        if sources.is_empty() || path.len() > max_depth {
            let mut complete = path;
            complete.reverse();
            paths.push(complete);
            continue;
        }

        for source in sources.into_iter().rev() {
            if path.contains(&source) {
                continue;
            }
            let mut next = path.clone();
            next.push(source);
            stack.push(next);
        }
    }

    if paths.is_empty() {
        paths.push(vec![target.clone()]);
    }
    paths
}

/// One table on a trace path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TraceHop {
    pub table: ObjectName,

    /// Column followed through this table, when column lineage knows it
    pub column: Option<String>,
}

impl TraceHop {
    pub fn table(table: ObjectName) -> Self {
        Self { table, column: None }
    }
}

impl fmt::Display for TraceHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}", self.table, column),
            None => write!(f, "{}", self.table),
        }
    }
}

/// Why a trace path stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathEnd {
    /// The last table has no upstream dependencies
    Source,

    /// Every upstream dependency is already on the path
    DeadEnd,

    DepthLimit,
}

/// A table-level trace path, target first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TracePath {
    pub hops: Vec<TraceHop>,
    pub end: PathEnd,
}

impl TracePath {
    pub fn last(&self) -> Option<&TraceHop> {
        self.hops.last()
    }

    /// Hops joined source first, e.g. `S.C -> S.B -> S.A.ID`
    pub fn describe(&self) -> String {
        self.hops
            .iter()
            .rev()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Target-first hops of a source-to-target column path, one per table
fn hops_of(column_path: &[ColumnKey]) -> Vec<TraceHop> {
    let mut hops: Vec<TraceHop> = Vec::new();
    for key in column_path.iter().rev() {
        if hops.last().is_some_and(|hop| hop.table == key.table) {
            continue;
        }
        hops.push(TraceHop {
            table: key.table.clone(),
            column: Some(key.column.clone()),
        });
    }
    hops
}

/// Dependencies of `current` worth following, best first.
///
/// Dependencies with a known join to `current` rank above same-schema ones;
/// only the best tier is kept, then narrowed to tables known to carry one of
/// `filter_columns` when that narrows anything.
fn preferred_dependencies<'g>(
    graph: &'g DependencyGraph,
    store: &LineageStore,
    current: &ObjectName,
    visited: &[TraceHop],
    filter_columns: &[String],
) -> Vec<&'g ObjectName> {
    let candidates: Vec<&ObjectName> = graph
        .parents(current)
        .into_iter()
        .filter(|parent| !visited.iter().any(|hop| hop.table == **parent))
        .collect();

    let score = |candidate: &ObjectName| {
        let join = if store.has_join(current, candidate) { 2 } else { 0 };
        let schema = if candidate.schema() == current.schema() { 1 } else { 0 };
        join + schema
    };
    let Some(best) = candidates.iter().map(|c| score(c)).max() else {
        return Vec::new();
    };

    let tier: Vec<&ObjectName> = candidates.into_iter().filter(|c| score(c) == best).collect();
    let narrowed: Vec<&ObjectName> = tier
        .iter()
        .copied()
        .filter(|c| filter_columns.iter().any(|col| store.has_column(c, col)))
        .collect();

    if narrowed.is_empty() {
        tier
    } else {
        narrowed
    }
}

/// Extend column paths along table dependencies until each reaches a source,
/// a dead end or `max_depth` hops. Several preferred dependencies branch the path.
pub fn extend_paths(
    graph: &DependencyGraph,
    store: &LineageStore,
    column_paths: &[Vec<ColumnKey>],
    filter_columns: &[String],
    max_depth: usize,
) -> Vec<TracePath> {
    let mut finished = Vec::new();
    let mut stack: Vec<Vec<TraceHop>> = column_paths.iter().rev().map(|p| hops_of(p)).collect();

    while let Some(hops) = stack.pop() {
        let Some(current) = hops.last().map(|hop| hop.table.clone()) else {
            continue;
        };

        if graph.parents(&current).is_empty() {
            finished.push(TracePath { hops, end: PathEnd::Source });
            continue;
        }
        if hops.len() > max_depth {
            finished.push(TracePath { hops, end: PathEnd::DepthLimit });
            continue;
        }

        let next = preferred_dependencies(graph, store, &current, &hops, filter_columns);
        if next.is_empty() {
            finished.push(TracePath { hops, end: PathEnd::DeadEnd });
            continue;
        }

        for table in next.into_iter().rev() {
            let mut extended = hops.clone();
            extended.push(TraceHop::table(table.clone()));
            stack.push(extended);
        }
    }

    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsnow_core::{ColumnLineage, JoinEdge};
    use pretty_assertions::assert_eq;

    fn name(s: &str) -> ObjectName {
        ObjectName::parse(s).unwrap()
    }

    fn key(s: &str) -> ColumnKey {
        ColumnKey::parse(s).unwrap()
    }

    fn edge(source: &str, target: &str) -> ColumnLineage {
        ColumnLineage {
            source: key(source),
            target: key(target),
        }
    }

    #[test]
    fn column_without_lineage_is_its_own_path() {
        let store = LineageStore::new();
        let target = key("s.orders.status");

        assert_eq!(build_column_lineage_paths(&store, &target, 10), vec![vec![target]]);
    }

    #[test]
    fn branches_yield_source_to_target_paths() {
        let mut store = LineageStore::new();
        store.add_edge(edge("s.b.x", "s.a.x"));
        store.add_edge(edge("s.c.y", "s.a.x"));
        store.add_edge(edge("s.d.z", "s.b.x"));

        let paths = build_column_lineage_paths(&store, &key("s.a.x"), 10);
        assert_eq!(
            paths,
            vec![
                vec![key("s.d.z"), key("s.b.x"), key("s.a.x")],
                vec![key("s.c.y"), key("s.a.x")],
            ]
        );
    }

    #[test]
    fn cycles_abandon_the_branch() {
        let mut store = LineageStore::new();
        store.add_edge(edge("s.b.x", "s.a.x"));
        store.add_edge(edge("s.a.x", "s.b.x"));
        store.add_edge(edge("s.c.x", "s.a.x"));

        let paths = build_column_lineage_paths(&store, &key("s.a.x"), 10);
        assert_eq!(paths, vec![vec![key("s.c.x"), key("s.a.x")]]);
    }

    #[test]
    fn depth_bound_stops_the_search() {
        let mut store = LineageStore::new();
        for i in 0..20 {
            store.add_edge(edge(&format!("s.t{}.c", i + 1), &format!("s.t{}.c", i)));
        }

        let paths = build_column_lineage_paths(&store, &key("s.t0.c"), 3);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 4);
        assert_eq!(paths[0][0], key("s.t3.c"));
    }

    #[test]
    fn extension_prefers_joined_dependencies() {
        let mut graph = DependencyGraph::new();
        for obj in ["s.a", "s.b", "s.c", "other.d"] {
            graph.add_definition(name(obj), format!("{}.sql", obj).into());
        }
        graph.add_dependency(name("s.a"), name("s.b"));
        graph.add_dependency(name("s.a"), name("s.c"));
        graph.add_dependency(name("s.a"), name("other.d"));

        let mut store = LineageStore::new();
        store.add_join(JoinEdge::new(key("s.a.c_id"), key("s.c.id")));

        let column_paths = vec![vec![key("s.a.id")]];
        let paths = extend_paths(&graph, &store, &column_paths, &[], 10);

        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].describe(), "S.C -> S.A.ID");
        assert_eq!(paths[0].end, PathEnd::Source);
    }

    #[test]
    fn filter_columns_narrow_and_ties_branch() {
        let mut graph = DependencyGraph::new();
        for obj in ["s.a", "s.b", "s.c", "s.d"] {
            graph.add_definition(name(obj), format!("{}.sql", obj).into());
        }
        graph.add_dependency(name("s.a"), name("s.b"));
        graph.add_dependency(name("s.a"), name("s.c"));
        graph.add_dependency(name("s.a"), name("s.d"));

        let mut store = LineageStore::new();
        store.set_columns(name("s.b"), vec!["REGION".to_string()]);
        store.set_columns(name("s.d"), vec!["REGION".to_string()]);
        store.set_columns(name("s.c"), vec!["OTHER".to_string()]);

        let paths = extend_paths(&graph, &store, &[vec![key("s.a.id")]], &["REGION".to_string()], 10);
        let described: Vec<String> = paths.iter().map(TracePath::describe).collect();
        assert_eq!(described, vec!["S.B -> S.A.ID", "S.D -> S.A.ID"]);
    }

    #[test]
    fn visited_dependencies_end_in_a_dead_end() {
        let mut graph = DependencyGraph::new();
        graph.add_definition(name("s.a"), "a.sql".into());
        graph.add_definition(name("s.b"), "b.sql".into());
        graph.add_dependency(name("s.a"), name("s.b"));
        graph.add_dependency(name("s.b"), name("s.a"));

        let paths = extend_paths(&graph, &LineageStore::new(), &[vec![key("s.a.id")]], &[], 10);
        assert_eq!(paths[0].end, PathEnd::DeadEnd);
        assert_eq!(paths[0].describe(), "S.B -> S.A.ID");
    }
}
