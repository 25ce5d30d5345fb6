//! Chained CTE plans for tracing a column under a filter
//!
//! The traced table is filtered by the supplied predicates; every upstream
//! table is then scoped by the rows of the step below it. Branching paths
//! form a tree of CTEs, and the final select reads the deepest leaf.

use super::paths::{build_column_lineage_paths, extend_paths, PathEnd, TraceHop, TracePath};
use super::store::LineageStore;
use gitsnow_core::{normalize_identifier, Diagnostic, DiagnosticCode, ObjectName};
use gitsnow_graph::DependencyGraph;
use gitsnow_sql::LineageAdapter;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("Table {0} is not defined in the scripts directory")]
    UnknownTable(ObjectName),

    #[error("Invalid filter '{0}', expected COLUMN=VALUE")]
    InvalidFilter(String),
}

/// `COLUMN = literal`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterPredicate {
    pub column: String,

    /// SQL literal: numbers stay bare, everything else is single-quoted
    pub value: String,
}

impl FilterPredicate {
    /// Parse `COLUMN=VALUE`
    pub fn parse(s: &str) -> Result<Self, TraceError> {
        let Some((column, value)) = s.split_once('=') else {
            return Err(TraceError::InvalidFilter(s.to_string()));
        };
        let (column, value) = (column.trim(), value.trim());
        if column.is_empty() || value.is_empty() {
            return Err(TraceError::InvalidFilter(s.to_string()));
        }

        let is_quoted = value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'');
        let value = if is_quoted || value.parse::<f64>().is_ok() {
            value.to_string()
        } else {
            format!("'{}'", value.replace('\'', "''"))
        };

        Ok(Self {
            column: normalize_identifier(column),
            value,
        })
    }
}

impl fmt::Display for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.value)
    }
}

fn conjunction(filters: &[FilterPredicate]) -> String {
    filters
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// What to trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRequest {
    pub table: ObjectName,
    pub column: String,
    pub filters: Vec<FilterPredicate>,
    pub max_depth: usize,
}

impl TraceRequest {
    pub fn new(table: ObjectName, column: impl AsRef<str>) -> Self {
        Self {
            table,
            column: normalize_identifier(column.as_ref()),
            filters: Vec::new(),
            max_depth: 10,
        }
    }

    pub fn with_filter(mut self, filter: FilterPredicate) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// How a step is scoped by the step below it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepLink {
    /// The traced table, filtered by the supplied predicates
    Root { filters: Vec<FilterPredicate> },

    /// Known equality join
    Join {
        upstream_column: String,
        downstream_column: String,
    },

    /// Column lineage from this table into the step below, used when the
    /// table carries none of the filter columns
    Lineage {
        upstream_column: String,
        downstream_column: String,
    },

    /// No join, but the table carries a filter column
    DirectFilter { filters: Vec<FilterPredicate> },

    Unlinked,
}

/// One CTE of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    /// CTE name, `step_<n>_<table>`
    pub name: String,
    pub table: ObjectName,

    /// Step this one is scoped by
    pub parent: Option<usize>,
    pub link: StepLink,
    pub depth: usize,

    /// Set on leaves
    pub end: Option<PathEnd>,
}

impl TraceStep {
    fn query(&self, steps: &[TraceStep]) -> String {
        let parent = self.parent.and_then(|i| steps.get(i));
        match (&self.link, parent) {
            (StepLink::Root { filters }, _) | (StepLink::DirectFilter { filters }, _)
                if !filters.is_empty() =>
            {
                format!("SELECT * FROM {} WHERE {}", self.table, conjunction(filters))
            }
            (
                StepLink::Join {
                    upstream_column,
                    downstream_column,
                }
                | StepLink::Lineage {
                    upstream_column,
                    downstream_column,
                },
                Some(parent),
            ) => format!(
                "SELECT * FROM {} WHERE {} IN (SELECT {} FROM {})",
                self.table, upstream_column, downstream_column, parent.name
            ),
            _ => format!("SELECT * FROM {}", self.table),
        }
    }

    fn comment(&self, number: usize, steps: &[TraceStep]) -> String {
        let parent = self.parent.and_then(|i| steps.get(i));

        match (&self.link, parent) {
            (StepLink::Root { filters }, _) if filters.is_empty() => {
                format!("-- Step {}: {}", number, self.table)
            }
            (StepLink::Root { filters }, _) => {
                format!("-- Step {}: {} filtered by {}", number, self.table, conjunction(filters))
            }
            (
                StepLink::Join {
                    upstream_column,
                    downstream_column,
                },
                Some(parent),
            ) => format!(
                "-- Step {}: {} joined to {} on {}.{} = {}.{}",
                number, self.table, parent.name, self.table, upstream_column, parent.table, downstream_column
            ),
            (
                StepLink::Lineage {
                    upstream_column,
                    downstream_column,
                },
                Some(parent),
            ) => format!(
                "-- Step {}: {}.{} feeds {}.{}",
                number, self.table, upstream_column, parent.table, downstream_column
            ),
            (StepLink::DirectFilter { filters }, _) => format!(
                "-- Step {}: {} filtered directly by {}",
                number,
                self.table,
                conjunction(filters)
            ),
            (_, parent) => format!(
                "-- WARNING: no join or lineage link between {} and {}; {} is unfiltered",
                parent.map(|p| p.table.to_string()).unwrap_or_default(),
                self.table,
                self.name
            ),
        }
    }
}

/// Ordered query plan for one trace
#[derive(Debug, Clone, Serialize)]
pub struct TracePlan {
    pub target: String,
    pub paths: Vec<TracePath>,

    /// Steps in pre-order
    pub steps: Vec<TraceStep>,

    /// CTE the final select reads
    pub final_step: String,

    /// Other leaves worth inspecting by hand
    pub other_leaves: Vec<String>,

    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,

    lines: Vec<String>,
}

impl TracePlan {
    /// Plan lines: comments and queries, in order
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Path tree node before numbering
struct Node {
    hop: TraceHop,
    children: Vec<usize>,
    end: Option<PathEnd>,
}

/// Merge target-first paths into a tree keyed by table (node 0 is the target)
fn merge_paths(target: &ObjectName, paths: &[TracePath]) -> Vec<Node> {
    let mut nodes = vec![Node {
        hop: TraceHop::table(target.clone()),
        children: Vec::new(),
        end: None,
    }];

    for path in paths {
        let mut current = 0;
        for (i, hop) in path.hops.iter().enumerate() {
            if i == 0 {
                if nodes[0].hop.column.is_none() {
                    nodes[0].hop.column = hop.column.clone();
                }
                continue;
            }

            let existing = nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| nodes[child].hop.table == hop.table);
            current = match existing {
                Some(child) => child,
                None => {
                    nodes.push(Node {
                        hop: hop.clone(),
                        children: Vec::new(),
                        end: None,
                    });
                    let child = nodes.len() - 1;
                    nodes[current].children.push(child);
                    child
                }
            };
        }
        if nodes[current].children.is_empty() && nodes[current].end.is_none() {
            nodes[current].end = Some(path.end);
        }
    }

    nodes
}

/// Link for one hop: known join, then the filter columns the upstream table
/// carries, then the column lineage pair; otherwise unlinked
fn resolve_link(
    store: &LineageStore,
    downstream: &TraceHop,
    upstream: &TraceHop,
    filters: &[FilterPredicate],
) -> StepLink {
    if let Some((downstream_column, upstream_column)) = store.join_between(&downstream.table, &upstream.table) {
        return StepLink::Join {
            upstream_column,
            downstream_column,
        };
    }

    let direct: Vec<FilterPredicate> = filters
        .iter()
        .filter(|f| store.has_column(&upstream.table, &f.column))
        .cloned()
        .collect();
    if !direct.is_empty() {
        return StepLink::DirectFilter { filters: direct };
    }

    match (&downstream.column, &upstream.column) {
        (Some(downstream_column), Some(upstream_column)) => StepLink::Lineage {
            upstream_column: upstream_column.clone(),
            downstream_column: downstream_column.clone(),
        },
        _ => StepLink::Unlinked,
    }
}

/// Plan a trace over an already collected lineage store
pub fn plan_trace(graph: &DependencyGraph, store: &LineageStore, request: &TraceRequest) -> TracePlan {
    let target_key = request.table.column(&request.column);
    let column_paths = build_column_lineage_paths(store, &target_key, request.max_depth);
    let filter_columns: Vec<String> = request.filters.iter().map(|f| f.column.clone()).collect();
    let paths = extend_paths(graph, store, &column_paths, &filter_columns, request.max_depth);
    debug!(column_paths = column_paths.len(), paths = paths.len(), "Trace paths found");

    let nodes = merge_paths(&request.table, &paths);
    let mut diagnostics = Vec::new();

    // Pre-order numbering; `step_nodes[i]` is the tree node of step `i`
    let mut steps: Vec<TraceStep> = Vec::with_capacity(nodes.len());
    let mut step_nodes: Vec<usize> = Vec::with_capacity(nodes.len());
    let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(0, None, 0)];
    while let Some((node_index, parent_step, depth)) = stack.pop() {
        let node = &nodes[node_index];
        let link = match parent_step {
            None => StepLink::Root {
                filters: request.filters.clone(),
            },
            Some(parent) => {
                let downstream = &nodes[step_nodes[parent]].hop;
                resolve_link(store, downstream, &node.hop, &request.filters)
            }
        };

        let step_index = steps.len();
        steps.push(TraceStep {
            name: format!("step_{}_{}", step_index + 1, node.hop.table.name().to_lowercase()),
            table: node.hop.table.clone(),
            parent: parent_step,
            link,
            depth,
            end: if node.children.is_empty() { node.end } else { None },
        });
        step_nodes.push(node_index);

        for &child in node.children.iter().rev() {
            stack.push((child, Some(step_index), depth + 1));
        }
    }

    let mut lines = vec![format!("-- Lineage trace for {}", target_key)];
    if !request.filters.is_empty() {
        lines.push(format!("-- Filters: {}", conjunction(&request.filters)));
    }
    for path in &paths {
        lines.push(format!("-- Path: {}", path.describe()));
    }

    for step in &steps {
        if step.link == StepLink::Unlinked {
            let message = format!(
                "No join or lineage link found for {}; {} is left unfiltered",
                step.table, step.name
            );
            warn!("{}", message);
            diagnostics.push(
                Diagnostic::of(DiagnosticCode::TraceUnlinkedHop, message).with_object(step.table.to_string()),
            );
        }

        let explanation = match step.end {
            Some(PathEnd::DeadEnd) => format!(
                "-- Dead end at {}: every upstream object is already on this path",
                step.table
            ),
            Some(PathEnd::DepthLimit) => format!(
                "-- Depth limit of {} reached at {}",
                request.max_depth, step.table
            ),
            Some(PathEnd::Source) | None => continue,
        };
        info!("{}", explanation.trim_start_matches("-- "));
        diagnostics.push(
            Diagnostic::of(DiagnosticCode::TraceDeadEnd, explanation.trim_start_matches("-- "))
                .with_object(step.table.to_string()),
        );
        lines.push(explanation);
    }

    lines.push("WITH".to_string());
    for (i, step) in steps.iter().enumerate() {
        let separator = if i + 1 < steps.len() { "," } else { "" };
        lines.push(step.comment(i + 1, &steps));
        lines.push(format!("{} AS ({}){}", step.name, step.query(&steps), separator));
    }

    let leaves: Vec<&TraceStep> = steps
        .iter()
        .enumerate()
        .filter(|(i, _)| !steps.iter().any(|s| s.parent == Some(*i)))
        .map(|(_, step)| step)
        .collect();
    let mut deepest: Option<&TraceStep> = None;
    for leaf in &leaves {
        if deepest.map_or(true, |d| leaf.depth > d.depth) {
            deepest = Some(*leaf);
        }
    }
    let final_step = deepest.map(|s| s.name.clone()).unwrap_or_default();
    lines.push(format!("SELECT * FROM {};", final_step));

    let other_leaves: Vec<String> = leaves
        .iter()
        .map(|leaf| leaf.name.clone())
        .filter(|name| *name != final_step)
        .collect();
    if !other_leaves.is_empty() {
        lines.push(format!("-- Other leaves to inspect: {}", other_leaves.join(", ")));
    }

    TracePlan {
        target: target_key.to_string(),
        paths,
        steps,
        final_step,
        other_leaves,
        diagnostics,
        lines,
    }
}

/// Traces columns of objects defined in one scripts directory
pub struct TraceBuilder<'a> {
    graph: &'a DependencyGraph,
    adapter: &'a dyn LineageAdapter,
}

impl<'a> TraceBuilder<'a> {
    pub fn new(graph: &'a DependencyGraph, adapter: &'a dyn LineageAdapter) -> Self {
        Self { graph, adapter }
    }

    pub fn trace(&self, request: &TraceRequest) -> Result<TracePlan, TraceError> {
        if !self.graph.contains(&request.table) {
            return Err(TraceError::UnknownTable(request.table.clone()));
        }

        let store = LineageStore::build(self.graph, self.adapter, &request.table);
        let mut plan = plan_trace(self.graph, &store, request);

        let mut diagnostics = store.diagnostics;
        diagnostics.append(&mut plan.diagnostics);
        plan.diagnostics = diagnostics;
        Ok(plan)
    }
}
