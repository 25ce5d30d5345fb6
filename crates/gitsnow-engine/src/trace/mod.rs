//! Lineage trace builder
//!
//! Read-only: a trace only describes queries for an operator to run.

pub mod paths;
pub mod plan;
pub mod store;

pub use paths::{build_column_lineage_paths, extend_paths, PathEnd, TraceHop, TracePath};
pub use plan::{plan_trace, FilterPredicate, StepLink, TraceBuilder, TraceError, TracePlan, TraceRequest, TraceStep};
pub use store::LineageStore;
