//! Deployment planning pipeline
//!
//! Graph build, scheduling, snapshot capture, diff and composition, in that
//! order. Only resource failures are errors: a missing scripts directory or an
//! unreachable database.

use crate::composer::{ComposeError, ScriptComposer, ScriptSet};
use crate::semantic_diff::{DiffOutcome, SemanticDiff};
use gitsnow_catalog::{capture_snapshot, CatalogConnector, DatabaseSnapshot, SnapshotError};
use gitsnow_core::{Config, Diagnostic, ObjectName, Report};
use gitsnow_graph::{
    dependency_ordered_objects, schedule, DependencyGraph, DeployOrder, GraphBuild, GraphBuilder, GraphError,
};
use gitsnow_sql::{SqlFormatter, SqlLineageAdapter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

/// Everything one `folder-to-script` run works out
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub graph: DependencyGraph,
    pub order: DeployOrder,
    pub snapshot: DatabaseSnapshot,
    pub diff: DiffOutcome,

    /// `None` when nothing is left to deploy
    pub scripts: Option<ScriptSet>,

    /// Every diagnostic of the run, in pipeline order
    pub diagnostics: Vec<Diagnostic>,
}

impl DeploymentPlan {
    /// Objects defined by the scripts directory
    pub fn folder_objects(&self) -> usize {
        self.graph
            .nodes()
            .iter()
            .filter(|name| !self.graph.paths(name).is_empty())
            .count()
    }

    pub fn has_changes(&self) -> bool {
        self.scripts.is_some()
    }

    pub fn report(&self) -> Report {
        let mut report = Report::from_diagnostics(self.diagnostics.clone());
        report.summary.objects_scanned = self.folder_objects();
        report.summary.changes_detected = self.diff.changes.len();
        report
    }
}

/// `(object, file)` pairs in deploy order, one per defining file
pub fn ordered_files(graph: &DependencyGraph, order: &DeployOrder) -> Vec<(ObjectName, PathBuf)> {
    dependency_ordered_objects(graph, order)
        .into_iter()
        .flat_map(|object| {
            let name = object.name;
            object.paths.into_iter().map(move |path| (name.clone(), path))
        })
        .collect()
}

fn build_graph(root: &Path, config: &Config) -> Result<GraphBuild, GraphError> {
    let adapter = SqlLineageAdapter::new(&config.dialect);
    GraphBuilder::new(&adapter).build(root)
}

/// Plan a deployment of the scripts under `root` against `database`
pub async fn plan_deployment(
    connector: &dyn CatalogConnector,
    root: &Path,
    database: &str,
    config: &Config,
) -> Result<DeploymentPlan, DeployError> {
    let GraphBuild { graph, mut diagnostics } = build_graph(root, config)?;
    let order = schedule(&graph);
    if let Some(cycle) = order.cycle_diagnostic() {
        warn!("{}", cycle.message);
        diagnostics.push(cycle);
    }

    let capture = capture_snapshot(connector, database, None, &config.catalog, &config.dialect).await?;
    diagnostics.extend(capture.diagnostics);
    let snapshot = capture.snapshot;
    info!(objects = snapshot.len(), database, "Snapshot captured");

    let formatter = SqlFormatter::new(&config.dialect, &config.format);
    let files = ordered_files(&graph, &order);
    let diff = SemanticDiff::new(&formatter).diff(&files, &snapshot, root);
    diagnostics.extend(diff.diagnostics.iter().cloned());
    info!(
        changes = diff.changes.len(),
        in_sync = diff.in_sync.len(),
        "Diff complete"
    );

    let scripts = if diff.has_changes() {
        match ScriptComposer::new(&config.scripts, root).compose(&diff.changes, &graph, &order, &snapshot) {
            Ok(scripts) => {
                diagnostics.extend(scripts.diagnostics.iter().cloned());
                Some(scripts)
            }
            Err(ComposeError::NoChanges) => None,
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    Ok(DeploymentPlan {
        graph,
        order,
        snapshot,
        diff,
        scripts,
        diagnostics,
    })
}
