//! gitsnow engine
//!
//! - Semantic diff of repository definitions against a live snapshot
//! - Deployment script composition (up, down, base, staged)
//! - Snapshot export to the scripts directory layout
//! - Column lineage tracing with chained CTE plans

pub mod composer;
pub mod deploy;
pub mod export;
pub mod semantic_diff;
pub mod trace;

pub use composer::{dependent_refresh_set, ComposeError, ScriptComposer, ScriptSet};
pub use deploy::{ordered_files, plan_deployment, DeployError, DeploymentPlan};
pub use export::{export_path, export_snapshot, Export, ExportError, ExportedFile};
pub use semantic_diff::{kind_from_path, ChangeReason, ChangeRecord, Comparison, DiffOutcome, SemanticDiff, Verdict};
pub use trace::{
    build_column_lineage_paths, plan_trace, FilterPredicate, LineageStore, TraceBuilder, TraceError, TracePlan,
    TraceRequest,
};
