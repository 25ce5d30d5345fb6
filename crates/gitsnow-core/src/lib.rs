//! gitsnow core
//!
//! Core domain model shared by every gitsnow crate: normalized object and column
//! names, object kinds, stable diagnostic codes, the run report and configuration.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod diagnostic;
pub mod object;
pub mod report;

pub use config::{CatalogConfig, Config, ConfigError, ConnectionConfig, DialectConfig, FormatConfig, ScriptConfig, TraceConfig};
pub use diagnostic::{Diagnostic, DiagnosticCode, Location, Severity};
pub use object::{normalize_identifier, ColumnKey, ColumnLineage, JoinEdge, ObjectKind, ObjectName};
pub use report::{Report, ReportSummary, ReportVersion};
