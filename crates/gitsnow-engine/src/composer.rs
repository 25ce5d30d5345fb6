//! Deployment script composition
//!
//! Turns the ordered change set into the up, down and base scripts (plus the
//! staged-execution variant when a stage is configured). Output depends only
//! on the change order, the graph and the snapshot, so unchanged inputs give
//! byte-identical scripts.

use crate::semantic_diff::{kind_from_path, ChangeRecord};
use gitsnow_catalog::DatabaseSnapshot;
use gitsnow_core::{Diagnostic, DiagnosticCode, ObjectName, ScriptConfig};
use gitsnow_graph::{display_path, DependencyGraph, DeployOrder};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("No changes to compose")]
    NoChanges,

    #[error("File {path} is outside the scripts directory {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Generated script bodies
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSet {
    pub up: String,
    pub down: String,
    pub base: String,

    /// `EXECUTE IMMEDIATE FROM @stage/...` variant, when a stage is configured
    pub staged: Option<String>,

    /// Dependent materialized objects recreated by both up and down
    pub refreshed: Vec<ObjectName>,

    pub diagnostics: Vec<Diagnostic>,
}

impl ScriptSet {
    /// SHA-256 over up, down, base and staged (when present), hex encoded
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for script in [Some(&self.up), Some(&self.down), Some(&self.base), self.staged.as_ref()]
            .into_iter()
            .flatten()
        {
            hasher.update(script.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Materialized objects transitively downstream of `changed`, in deploy order.
///
/// Objects already in `changed` are left out; they are deployed from their files.
pub fn dependent_refresh_set(
    changed: &[ObjectName],
    graph: &DependencyGraph,
    order: &DeployOrder,
    snapshot: &DatabaseSnapshot,
) -> Vec<ObjectName> {
    let changed_set: HashSet<&ObjectName> = changed.iter().collect();
    let mut dependents: BTreeSet<ObjectName> = BTreeSet::new();

    for name in changed {
        for dependent in graph.downstream(name) {
            if changed_set.contains(&dependent) {
                continue;
            }
            let kind = snapshot.kind_of(&dependent).or_else(|| {
                graph
                    .paths(&dependent)
                    .first()
                    .and_then(|path| kind_from_path(path))
            });
            if kind.is_some_and(|k| k.is_materialized()) {
                dependents.insert(dependent);
            }
        }
    }

    let positions = order.positions();
    let mut dependents: Vec<ObjectName> = dependents.into_iter().collect();
    dependents.sort_by_key(|name| positions.get(name).copied().unwrap_or(usize::MAX));
    dependents
}

/// Composes scripts for one scripts directory
pub struct ScriptComposer<'a> {
    config: &'a ScriptConfig,
    root: &'a Path,
}

impl<'a> ScriptComposer<'a> {
    pub fn new(config: &'a ScriptConfig, root: &'a Path) -> Self {
        Self { config, root }
    }

    /// Compose all scripts for `changes` (in deploy order)
    pub fn compose(
        &self,
        changes: &[ChangeRecord],
        graph: &DependencyGraph,
        order: &DeployOrder,
        snapshot: &DatabaseSnapshot,
    ) -> Result<ScriptSet, ComposeError> {
        let mut diagnostics = Vec::new();

        let changes: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|record| {
                let skipped = self.config.is_object_skipped(&record.name.to_string());
                if skipped {
                    info!(object = %record.name, "Skipping object excluded by configuration");
                    diagnostics.push(
                        Diagnostic::of(
                            DiagnosticCode::Info,
                            format!("{} is excluded from deployment by configuration", record.name),
                        )
                        .with_object(record.name.to_string()),
                    );
                }
                !skipped
            })
            .collect();

        if changes.is_empty() {
            return Err(ComposeError::NoChanges);
        }

        let changed: Vec<ObjectName> = changes.iter().map(|r| r.name.clone()).collect();
        let refreshed = dependent_refresh_set(&changed, graph, order, snapshot);
        let refresh_block = self.refresh_block(&refreshed, snapshot, &mut diagnostics);
        debug!(changes = changes.len(), refreshed = refreshed.len(), "Composing scripts");

        let up = self.up_script(&changes, &refresh_block);
        let down = self.down_script(&changes, &refresh_block);
        let base = self.base_script(&changes);
        let staged = match &self.config.stage {
            Some(stage) => Some(self.staged_script(stage, &changes, &refresh_block)?),
            None => None,
        };

        Ok(ScriptSet {
            up,
            down,
            base,
            staged,
            refreshed,
            diagnostics,
        })
    }

    fn header(&self, kind: &str, description: &str) -> String {
        format!(
            "-- {} script generated by {}\n-- {}\n\n",
            kind, self.config.header_tool_name, description
        )
    }

    fn schema_guards(changes: &[&ChangeRecord]) -> String {
        let schemas: BTreeSet<&str> = changes.iter().map(|r| r.name.schema()).collect();
        if schemas.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        for schema in schemas {
            let _ = writeln!(out, "CREATE SCHEMA IF NOT EXISTS {};", schema);
        }
        out.push('\n');
        out
    }

    fn refresh_block(
        &self,
        refreshed: &[ObjectName],
        snapshot: &DatabaseSnapshot,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> String {
        if refreshed.is_empty() {
            return String::new();
        }

        let mut out = String::from("-- Refresh depending objects\n");
        for name in refreshed {
            let _ = writeln!(out, "-- Refreshing: {}", name);
            match snapshot.find(name, None) {
                Some(live) => {
                    let _ = write!(out, "{}\n\n", live.ddl.trim_end());
                }
                None => {
                    warn!(object = %name, "No DDL captured for depending object");
                    diagnostics.push(
                        Diagnostic::of(
                            DiagnosticCode::ScriptMissingDdl,
                            format!("No DDL captured for depending object {}", name),
                        )
                        .with_object(name.to_string()),
                    );
                    let _ = write!(out, "-- No DDL captured for {}\n\n", name);
                }
            }
        }
        out
    }

    fn up_script(&self, changes: &[&ChangeRecord], refresh_block: &str) -> String {
        let mut out = self.header("UP", "All changes in dependency order, scripts inlined");
        out.push_str(&Self::schema_guards(changes));

        // Overloads declared in one file share its text
        let mut written: HashSet<&Path> = HashSet::new();
        for record in changes {
            if !written.insert(record.path.as_path()) {
                continue;
            }
            let _ = write!(
                out,
                "-- Object: {}\n{}\n\n",
                display_path(self.root, &record.path),
                record.file_sql.trim_end()
            );
        }

        out.push_str(refresh_block);
        out
    }

    fn down_script(&self, changes: &[&ChangeRecord], refresh_block: &str) -> String {
        let mut out = self.header("DOWN", "Reverts changes in reverse dependency order");

        for record in changes.iter().rev() {
            let _ = writeln!(out, "-- Object: {}", display_path(self.root, &record.path));
            match &record.db_sql {
                Some(db_sql) => {
                    let _ = write!(out, "{}\n\n", db_sql.trim_end());
                }
                None => {
                    let keyword = record.kind.map(|k| k.keyword()).unwrap_or("TABLE");
                    let _ = write!(out, "DROP {} IF EXISTS {};\n\n", keyword, record.drop_target);
                }
            }
        }

        out.push_str(refresh_block);
        out
    }

    fn base_script(&self, changes: &[&ChangeRecord]) -> String {
        let mut out = self.header("BASE", "Current DDL of changed objects from the database");

        for record in changes {
            let _ = writeln!(out, "-- Object: {}", display_path(self.root, &record.path));
            match &record.db_sql {
                Some(db_sql) => {
                    let _ = write!(out, "{}\n\n", db_sql.trim_end());
                }
                None => out.push_str("-- Object does not exist in the database\n\n"),
            }
        }

        out
    }

    fn staged_script(
        &self,
        stage: &str,
        changes: &[&ChangeRecord],
        refresh_block: &str,
    ) -> Result<String, ComposeError> {
        let stage = stage.trim_end_matches('/');
        let mut out = self.header("STAGED", "All changes in dependency order, executed from the stage");
        out.push_str(&Self::schema_guards(changes));

        let mut written: HashSet<&Path> = HashSet::new();
        for record in changes {
            if !written.insert(record.path.as_path()) {
                continue;
            }
            let relative = record
                .path
                .strip_prefix(self.root)
                .map_err(|_| ComposeError::OutsideRoot {
                    path: record.path.clone(),
                    root: self.root.to_path_buf(),
                })?;
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let _ = writeln!(out, "EXECUTE IMMEDIATE FROM {}/{};", stage, relative.join("/"));
        }

        if !refresh_block.is_empty() {
            out.push('\n');
            out.push_str(refresh_block);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic_diff::{ChangeReason, Comparison};
    use gitsnow_catalog::LiveObject;
    use gitsnow_core::ObjectKind;
    use gitsnow_graph::schedule;
    use pretty_assertions::assert_eq;

    fn name(s: &str) -> ObjectName {
        ObjectName::parse(s).unwrap()
    }

    fn root() -> PathBuf {
        PathBuf::from("/repo/scripts")
    }

    fn record(obj: &str, kind: ObjectKind, dir: &str, file_sql: &str, db_sql: Option<&str>) -> ChangeRecord {
        let name = name(obj);
        let path = root()
            .join(name.schema().to_lowercase())
            .join(dir)
            .join(format!("{}.sql", name.name().to_lowercase()));
        ChangeRecord {
            drop_target: name.to_string(),
            name,
            kind: Some(kind),
            path,
            file_sql: file_sql.to_string(),
            db_sql: db_sql.map(str::to_string),
            reason: if db_sql.is_some() {
                ChangeReason::SqlMismatch
            } else {
                ChangeReason::NotInDb
            },
            comparison: db_sql.map(|_| Comparison::Structural),
        }
    }

    /// S.A <- S.B <- S.D (dynamic), S.A <- S.C (view)
    fn graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_definition(name("s.a"), root().join("s/tables/a.sql"));
        graph.add_definition(name("s.b"), root().join("s/views/b.sql"));
        graph.add_definition(name("s.c"), root().join("s/views/c.sql"));
        graph.add_definition(name("s.d"), root().join("s/dynamic_tables/d.sql"));
        graph.add_dependency(name("s.b"), name("s.a"));
        graph.add_dependency(name("s.c"), name("s.a"));
        graph.add_dependency(name("s.d"), name("s.b"));
        graph
    }

    fn snapshot() -> DatabaseSnapshot {
        let mut snapshot = DatabaseSnapshot::new("DB");
        snapshot.insert(LiveObject {
            name: name("s.d"),
            kind: ObjectKind::DynamicTable,
            signature: None,
            ddl: "CREATE OR REPLACE DYNAMIC TABLE S.D AS SELECT * FROM S.B;".to_string(),
        });
        snapshot
    }

    #[test]
    fn refresh_set_is_transitive_and_materialized_only() {
        let graph = graph();
        let order = schedule(&graph);

        let refreshed = dependent_refresh_set(&[name("s.a")], &graph, &order, &snapshot());
        assert_eq!(refreshed, vec![name("s.d")]);

        let refreshed = dependent_refresh_set(&[name("s.a"), name("s.d")], &graph, &order, &snapshot());
        assert!(refreshed.is_empty());
    }

    #[test]
    fn scripts_have_expected_layout() {
        let graph = graph();
        let order = schedule(&graph);
        let config = ScriptConfig::default();
        let root = root();
        let composer = ScriptComposer::new(&config, &root);

        let changes = vec![
            record("s.a", ObjectKind::Table, "tables", "CREATE TABLE s.a (id INT);\n", None),
            record(
                "s.b",
                ObjectKind::View,
                "views",
                "CREATE VIEW s.b AS SELECT id FROM s.a;",
                Some("CREATE VIEW S.B AS SELECT 1 AS ID;"),
            ),
        ];

        let scripts = composer.compose(&changes, &graph, &order, &snapshot()).unwrap();

        assert_eq!(
            scripts.up,
            "-- UP script generated by gitsnow\n\
             -- All changes in dependency order, scripts inlined\n\
             \n\
             CREATE SCHEMA IF NOT EXISTS S;\n\
             \n\
             -- Object: scripts/s/tables/a.sql\n\
             CREATE TABLE s.a (id INT);\n\
             \n\
             -- Object: scripts/s/views/b.sql\n\
             CREATE VIEW s.b AS SELECT id FROM s.a;\n\
             \n\
             -- Refresh depending objects\n\
             -- Refreshing: S.D\n\
             CREATE OR REPLACE DYNAMIC TABLE S.D AS SELECT * FROM S.B;\n\
             \n"
        );

        assert_eq!(
            scripts.down,
            "-- DOWN script generated by gitsnow\n\
             -- Reverts changes in reverse dependency order\n\
             \n\
             -- Object: scripts/s/views/b.sql\n\
             CREATE VIEW S.B AS SELECT 1 AS ID;\n\
             \n\
             -- Object: scripts/s/tables/a.sql\n\
             DROP TABLE IF EXISTS S.A;\n\
             \n\
             -- Refresh depending objects\n\
             -- Refreshing: S.D\n\
             CREATE OR REPLACE DYNAMIC TABLE S.D AS SELECT * FROM S.B;\n\
             \n"
        );

        assert_eq!(
            scripts.base,
            "-- BASE script generated by gitsnow\n\
             -- Current DDL of changed objects from the database\n\
             \n\
             -- Object: scripts/s/tables/a.sql\n\
             -- Object does not exist in the database\n\
             \n\
             -- Object: scripts/s/views/b.sql\n\
             CREATE VIEW S.B AS SELECT 1 AS ID;\n\
             \n"
        );

        assert_eq!(scripts.staged, None);
        assert_eq!(scripts.refreshed, vec![name("s.d")]);
    }

    #[test]
    fn missing_refresh_ddl_is_marked() {
        let graph = graph();
        let order = schedule(&graph);
        let config = ScriptConfig::default();
        let root = root();
        let composer = ScriptComposer::new(&config, &root);

        let changes = vec![record("s.b", ObjectKind::View, "views", "CREATE VIEW s.b AS SELECT 1;", None)];
        let scripts = composer
            .compose(&changes, &graph, &order, &DatabaseSnapshot::new("DB"))
            .unwrap();

        assert!(scripts.up.contains("-- Refreshing: S.D\n-- No DDL captured for S.D\n"));
        assert_eq!(scripts.diagnostics[0].code, DiagnosticCode::ScriptMissingDdl);
    }

    #[test]
    fn staged_variant_references_files() {
        let graph = graph();
        let order = schedule(&graph);
        let config = ScriptConfig {
            stage: Some("@deploy_stage/scripts/".to_string()),
            ..ScriptConfig::default()
        };
        let root = root();
        let composer = ScriptComposer::new(&config, &root);

        let changes = vec![record("s.c", ObjectKind::View, "views", "CREATE VIEW s.c AS SELECT 1;", None)];
        let scripts = composer.compose(&changes, &graph, &order, &snapshot()).unwrap();

        let staged = scripts.staged.unwrap();
        assert!(staged.starts_with("-- STAGED script generated by gitsnow\n"));
        assert!(staged.contains("EXECUTE IMMEDIATE FROM @deploy_stage/scripts/s/views/c.sql;\n"));
    }

    #[test]
    fn skipped_objects_leave_nothing_to_compose() {
        let graph = graph();
        let order = schedule(&graph);
        let config = ScriptConfig {
            skip_objects: vec!["S.*".to_string()],
            ..ScriptConfig::default()
        };
        let root = root();
        let composer = ScriptComposer::new(&config, &root);

        let changes = vec![record("s.c", ObjectKind::View, "views", "CREATE VIEW s.c AS SELECT 1;", None)];
        let result = composer.compose(&changes, &graph, &order, &snapshot());
        assert!(matches!(result, Err(ComposeError::NoChanges)));
    }

    #[test]
    fn checksum_is_stable() {
        let graph = graph();
        let order = schedule(&graph);
        let config = ScriptConfig::default();
        let root = root();
        let composer = ScriptComposer::new(&config, &root);
        let changes = vec![record("s.a", ObjectKind::Table, "tables", "CREATE TABLE s.a (id INT);", None)];

        let first = composer.compose(&changes, &graph, &order, &snapshot()).unwrap();
        let second = composer.compose(&changes, &graph, &order, &snapshot()).unwrap();
        assert_eq!(first.checksum(), second.checksum());
        assert_eq!(first.checksum().len(), 64);
    }

    #[test]
    fn checksum_covers_staged_script() {
        let graph = graph();
        let order = schedule(&graph);
        let root = root();
        let changes = vec![record("s.a", ObjectKind::Table, "tables", "CREATE TABLE s.a (id INT);", None)];

        let plain_config = ScriptConfig::default();
        let plain = ScriptComposer::new(&plain_config, &root)
            .compose(&changes, &graph, &order, &snapshot())
            .unwrap();

        let staged_config = ScriptConfig {
            stage: Some("@deploy_stage".to_string()),
            ..ScriptConfig::default()
        };
        let staged = ScriptComposer::new(&staged_config, &root)
            .compose(&changes, &graph, &order, &snapshot())
            .unwrap();

        assert_eq!(plain.up, staged.up);
        assert_eq!(plain.down, staged.down);
        assert_eq!(plain.base, staged.base);
        assert_ne!(plain.checksum(), staged.checksum());
    }
}
