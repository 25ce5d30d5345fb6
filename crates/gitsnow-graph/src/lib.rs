//! Object dependency graph for gitsnow
//!
//! Builds the graph of schema objects defined under a scripts directory,
//! schedules it into a deploy order and renders the dependency listing.

pub mod builder;
pub mod dag;
pub mod listing;
pub mod scheduler;

pub use builder::{discover_sql_files, display_path, object_name_from_path, GraphBuild, GraphBuilder, GraphError};
pub use dag::DependencyGraph;
pub use listing::{dependency_ordered_objects, DependencyListing, OrderedObject};
pub use scheduler::{schedule, schedule_nodes, DeployOrder};
