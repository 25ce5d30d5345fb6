//! Column lineage, joins and known columns of the objects a trace can reach

use gitsnow_core::{ColumnKey, ColumnLineage, Diagnostic, DiagnosticCode, JoinEdge, Location, ObjectName};
use gitsnow_graph::DependencyGraph;
use gitsnow_sql::{extract_joins, LineageAdapter, StatementLineage};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Lineage facts collected for one trace
#[derive(Debug, Clone, Default)]
pub struct LineageStore {
    /// target column -> source columns
    edges: BTreeMap<ColumnKey, BTreeSet<ColumnKey>>,
    joins: Vec<JoinEdge>,
    columns: BTreeMap<ObjectName, Vec<String>>,
    wildcards: Vec<(ObjectName, ObjectName)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LineageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze the files of `target` and of everything upstream of it
    pub fn build(graph: &DependencyGraph, adapter: &dyn LineageAdapter, target: &ObjectName) -> Self {
        let mut store = Self::new();
        let mut tables = vec![target.clone()];
        tables.extend(graph.upstream(target));

        let mut seen: HashSet<PathBuf> = HashSet::new();
        for table in &tables {
            for path in graph.paths(table) {
                if !seen.insert(path.clone()) {
                    continue;
                }

                let sql = match std::fs::read_to_string(path) {
                    Ok(sql) => sql,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable file in trace");
                        store.diagnostics.push(
                            Diagnostic::of(DiagnosticCode::Warning, format!("Failed to read file: {}", e))
                                .with_object(table.to_string())
                                .with_location(Location::new(path.display().to_string())),
                        );
                        continue;
                    }
                };

                match adapter.analyze(&sql) {
                    Ok(lineage) => store.merge(lineage),
                    Err(e) => {
                        debug!(object = %table, reason = %e, "No column lineage; keeping joins only");
                        for join in extract_joins(&sql, table.schema()) {
                            store.add_join(join);
                        }
                    }
                }
            }
        }

        debug!(
            edges = store.edges.len(),
            joins = store.joins.len(),
            "Lineage store built"
        );
        store
    }

    fn merge(&mut self, lineage: StatementLineage) {
        for edge in lineage.column_lineage {
            self.add_edge(edge);
        }
        for join in lineage.joins {
            self.add_join(join);
        }
        for (table, columns) in lineage.columns {
            self.set_columns(table, columns);
        }
        for (target, source) in lineage.wildcards {
            self.add_wildcard(target, source);
        }
    }

    pub fn add_edge(&mut self, edge: ColumnLineage) {
        self.edges.entry(edge.target).or_default().insert(edge.source);
    }

    pub fn add_join(&mut self, join: JoinEdge) {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
    }

    pub fn set_columns(&mut self, table: ObjectName, columns: Vec<String>) {
        self.columns.insert(table, columns);
    }

    /// `target` selects `*` from `source`
    pub fn add_wildcard(&mut self, target: ObjectName, source: ObjectName) {
        if !self.wildcards.contains(&(target.clone(), source.clone())) {
            self.wildcards.push((target, source));
        }
    }

    /// Columns `column` is derived from; `SELECT *` passes a column through unchanged
    pub fn sources_of(&self, column: &ColumnKey) -> Vec<ColumnKey> {
        if let Some(sources) = self.edges.get(column) {
            if !sources.is_empty() {
                return sources.iter().cloned().collect();
            }
        }

        self.wildcards
            .iter()
            .filter(|(target, _)| *target == column.table)
            .map(|(_, source)| source.column(&column.column))
            .collect()
    }

    /// Linking columns as `(column of a, column of b)`
    pub fn join_between(&self, a: &ObjectName, b: &ObjectName) -> Option<(String, String)> {
        self.joins
            .iter()
            .find_map(|join| join.link(a, b))
            .map(|(ca, cb)| (ca.to_string(), cb.to_string()))
    }

    pub fn has_join(&self, a: &ObjectName, b: &ObjectName) -> bool {
        self.joins.iter().any(|join| join.connects(a, b))
    }

    /// Declared output columns of `table`
    pub fn columns(&self, table: &ObjectName) -> &[String] {
        self.columns.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether anything collected mentions `table.column`
    pub fn has_column(&self, table: &ObjectName, column: &str) -> bool {
        let key = table.column(column);
        self.columns(table).iter().any(|c| *c == key.column)
            || self.edges.contains_key(&key)
            || self.edges.values().any(|sources| sources.contains(&key))
            || self
                .joins
                .iter()
                .any(|join| join.left == key || join.right == key)
    }

    /// Whether any column information is known for `table`
    pub fn knows_columns_of(&self, table: &ObjectName) -> bool {
        !self.columns(table).is_empty()
            || self.edges.keys().any(|key| key.table == *table)
            || self.joins.iter().any(|j| j.left.table == *table || j.right.table == *table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsnow_sql::SqlLineageAdapter;

    fn name(s: &str) -> ObjectName {
        ObjectName::parse(s).unwrap()
    }

    #[test]
    fn wildcards_pass_columns_through() {
        let mut store = LineageStore::new();
        store.add_wildcard(name("s.v"), name("s.t"));

        assert_eq!(
            store.sources_of(&name("s.v").column("status")),
            vec![name("s.t").column("STATUS")]
        );
        assert!(store.sources_of(&name("s.t").column("status")).is_empty());
    }

    #[test]
    fn joins_resolve_in_either_direction() {
        let mut store = LineageStore::new();
        store.add_join(JoinEdge::new(
            name("s.orders").column("customer_id"),
            name("s.customers").column("id"),
        ));

        assert_eq!(
            store.join_between(&name("s.customers"), &name("s.orders")),
            Some(("ID".to_string(), "CUSTOMER_ID".to_string()))
        );
        assert!(store.has_column(&name("s.orders"), "customer_id"));
        assert!(!store.has_column(&name("s.orders"), "status"));
    }

    #[test]
    fn build_reads_upstream_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("scripts");
        let write = |rel: &str, sql: &str| {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, sql).unwrap();
            path
        };

        let base = write("s/tables/base.sql", "CREATE TABLE s.base (id INT, status VARCHAR);");
        let view = write(
            "s/views/summary.sql",
            "CREATE VIEW s.summary AS SELECT b.id AS order_id, b.status FROM s.base b;",
        );
        let other = write("s/views/other.sql", "CREATE VIEW s.other AS SELECT id AS x FROM s.summary;");

        let mut graph = DependencyGraph::new();
        graph.add_definition(name("s.base"), base);
        graph.add_definition(name("s.summary"), view);
        graph.add_definition(name("s.other"), other);
        graph.add_dependency(name("s.summary"), name("s.base"));
        graph.add_dependency(name("s.other"), name("s.summary"));

        let adapter = SqlLineageAdapter::default();
        let store = LineageStore::build(&graph, &adapter, &name("s.summary"));

        assert_eq!(
            store.sources_of(&name("s.summary").column("order_id")),
            vec![name("s.base").column("ID")]
        );
        assert!(store.columns(&name("s.other")).is_empty());
        assert!(store.diagnostics.is_empty());
    }
}
