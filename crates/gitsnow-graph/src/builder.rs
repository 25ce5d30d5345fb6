//! Dependency graph construction from a scripts directory
//!
//! Layout: `<root>/<schema>/<kind>/<object>[.<n>].sql`. Each file is handed to
//! the lineage adapter; when that fails, the object is named after its path and
//! its dependencies come from the identifier scanner, restricted to objects
//! that have a file of their own.

use crate::dag::DependencyGraph;
use gitsnow_core::{Diagnostic, DiagnosticCode, Location, ObjectName};
use gitsnow_sql::{find_candidate_names, LineageAdapter};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Fatal graph construction errors
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Scripts directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Scripts path is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Result of a graph build: the graph plus every soft failure met on the way
#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub graph: DependencyGraph,
    pub diagnostics: Vec<Diagnostic>,
}

/// Every `.sql` file under `root`, sorted by path
pub fn discover_sql_files(root: &Path) -> Result<Vec<PathBuf>, GraphError> {
    if !root.exists() {
        return Err(GraphError::RootNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(GraphError::NotADirectory(root.to_path_buf()));
    }

    Ok(WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
        })
        .map(|e| e.into_path())
        .collect())
}

/// Name implied by `<schema>/<kind>/<object>[.<n>].sql`
pub fn object_name_from_path(path: &Path) -> Option<ObjectName> {
    let file_name = path.file_name()?.to_str()?;
    let object = file_name.split('.').next().filter(|s| !s.is_empty())?;
    let schema = path.parent()?.parent()?.file_name()?.to_str()?;
    Some(ObjectName::new(schema, object))
}

/// Path shown in diagnostics: relative to the parent of the scripts root
pub fn display_path(root: &Path, path: &Path) -> String {
    let base = root.parent().unwrap_or(root);
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// What one file contributes to the graph
struct FileDefinition {
    path: PathBuf,
    targets: Vec<ObjectName>,
    sources: BTreeSet<ObjectName>,
}

/// Builds a [`DependencyGraph`] using a lineage adapter
pub struct GraphBuilder<'a> {
    adapter: &'a dyn LineageAdapter,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(adapter: &'a dyn LineageAdapter) -> Self {
        Self { adapter }
    }

    /// Build the graph for every SQL file under `root`
    pub fn build(&self, root: &Path) -> Result<GraphBuild, GraphError> {
        let files = discover_sql_files(root)?;

        let expected: BTreeSet<ObjectName> = files
            .iter()
            .filter_map(|path| object_name_from_path(path))
            .collect();

        let mut diagnostics = Vec::new();
        let mut definitions = Vec::with_capacity(files.len());

        for path in files {
            let sql = match std::fs::read_to_string(&path) {
                Ok(sql) => sql,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                    diagnostics.push(
                        Diagnostic::of(
                            DiagnosticCode::GraphUnreadableFile,
                            format!("Failed to read file: {}", e),
                        )
                        .with_location(Location::new(display_path(root, &path))),
                    );
                    continue;
                }
            };

            if let Some(definition) = self.analyze_file(root, path, &sql, &expected, &mut diagnostics) {
                definitions.push(definition);
            }
        }

        // Definitions first so defined objects keep discovery order
        let mut graph = DependencyGraph::new();
        for definition in &definitions {
            for target in &definition.targets {
                graph.add_definition(target.clone(), definition.path.clone());
            }
        }
        for definition in definitions {
            for target in &definition.targets {
                for source in &definition.sources {
                    graph.add_dependency(target.clone(), source.clone());
                }
            }
        }

        debug!(nodes = graph.len(), "Dependency graph built");
        Ok(GraphBuild { graph, diagnostics })
    }

    fn analyze_file(
        &self,
        root: &Path,
        path: PathBuf,
        sql: &str,
        expected: &BTreeSet<ObjectName>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<FileDefinition> {
        match self.adapter.analyze(sql) {
            Ok(lineage) => {
                let mut sources = lineage.sources;
                sources.retain(|s| !lineage.targets.contains(s));
                Some(FileDefinition {
                    path,
                    targets: lineage.targets,
                    sources,
                })
            }
            Err(error) => {
                let Some(target) = object_name_from_path(&path) else {
                    warn!(path = %path.display(), "Cannot infer an object name from the file path");
                    diagnostics.push(
                        Diagnostic::of(
                            DiagnosticCode::GraphUnreadableFile,
                            "Cannot infer an object name from the file path",
                        )
                        .with_location(Location::new(display_path(root, &path))),
                    );
                    return None;
                };

                warn!(object = %target, reason = %error, "Using basic parsing");
                diagnostics.push(
                    Diagnostic::of(
                        DiagnosticCode::GraphHeuristicParse,
                        format!("Using basic parsing for: {} ({})", target, error),
                    )
                    .with_object(target.to_string())
                    .with_location(Location::new(display_path(root, &path))),
                );

                let sources = find_candidate_names(sql, target.schema())
                    .into_iter()
                    .filter(|candidate| expected.contains(candidate) && *candidate != target)
                    .collect();

                Some(FileDefinition {
                    path,
                    targets: vec![target],
                    sources,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsnow_sql::SqlLineageAdapter;

    #[test]
    fn names_from_paths() {
        assert_eq!(
            object_name_from_path(Path::new("scripts/my_schema/procedures/load.2.sql")),
            Some(ObjectName::new("MY_SCHEMA", "LOAD"))
        );
        assert_eq!(object_name_from_path(Path::new("orphan.sql")), None);
    }

    #[test]
    fn display_paths_are_relative_to_the_scripts_parent() {
        assert_eq!(
            display_path(Path::new("/repo/scripts"), Path::new("/repo/scripts/s/views/v.sql")),
            "scripts/s/views/v.sql"
        );
    }

    #[test]
    fn missing_root_is_fatal() {
        let adapter = SqlLineageAdapter::default();
        let result = GraphBuilder::new(&adapter).build(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(GraphError::RootNotFound(_))));
    }
}
