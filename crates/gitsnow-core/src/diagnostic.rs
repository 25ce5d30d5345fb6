//! Diagnostic codes and soft-failure reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Graph construction (1xxx)
    /// The lineage adapter could not resolve a target; the identifier scanner was used instead
    GraphHeuristicParse,

    /// The dependency graph contains a cycle; deploy order is not guaranteed
    GraphCycle,

    /// A SQL file could not be read
    GraphUnreadableFile,

    // Semantic diff (2xxx)
    /// Structural parsing failed; formatted text was compared instead
    DiffFormattedFallback,

    /// Formatting failed; raw text was compared instead
    DiffRawFallback,

    /// File does not declare a supported creatable object
    DiffNotCreatable,

    /// File could not be read while diffing
    DiffUnreadableFile,

    // Catalog (3xxx)
    /// A schema could not be enumerated and was skipped
    CatalogSchemaSkipped,

    /// A live object's DDL could not be fetched and was skipped
    CatalogObjectSkipped,

    /// A dynamic table's column types could not be described
    CatalogColumnsUndescribed,

    // Script composition (4xxx)
    /// A dependent object has no captured DDL
    ScriptMissingDdl,

    // Lineage trace (5xxx)
    /// A lineage trace reached a table with no upstream link
    TraceDeadEnd,

    /// Two adjacent tables in a trace have no known linking column
    TraceUnlinkedHop,

    // General (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GraphHeuristicParse => "GRAPH_HEURISTIC_PARSE",
            Self::GraphCycle => "GRAPH_CYCLE",
            Self::GraphUnreadableFile => "GRAPH_UNREADABLE_FILE",
            Self::DiffFormattedFallback => "DIFF_FORMATTED_FALLBACK",
            Self::DiffRawFallback => "DIFF_RAW_FALLBACK",
            Self::DiffNotCreatable => "DIFF_NOT_CREATABLE",
            Self::DiffUnreadableFile => "DIFF_UNREADABLE_FILE",
            Self::CatalogSchemaSkipped => "CATALOG_SCHEMA_SKIPPED",
            Self::CatalogObjectSkipped => "CATALOG_OBJECT_SKIPPED",
            Self::CatalogColumnsUndescribed => "CATALOG_COLUMNS_UNDESCRIBED",
            Self::ScriptMissingDdl => "SCRIPT_MISSING_DDL",
            Self::TraceDeadEnd => "TRACE_DEAD_END",
            Self::TraceUnlinkedHop => "TRACE_UNLINKED_HOP",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }

    /// Default severity for the code
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::DiffNotCreatable | Self::TraceDeadEnd | Self::Info => Severity::Info,
            Self::GraphHeuristicParse
            | Self::GraphCycle
            | Self::GraphUnreadableFile
            | Self::DiffFormattedFallback
            | Self::DiffRawFallback
            | Self::DiffUnreadableFile
            | Self::CatalogSchemaSkipped
            | Self::CatalogObjectSkipped
            | Self::CatalogColumnsUndescribed
            | Self::ScriptMissingDdl
            | Self::TraceUnlinkedHop
            | Self::Warning => Severity::Warn,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - degraded result, run continues
    Warn,

    /// Error - the affected object could not be processed
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to the scripts root
    pub file: String,

    /// Optional line number (1-indexed)
    pub line: Option<usize>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
        }
    }

    /// Create a location with file and line number
    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Object the diagnostic is about, if any
    pub object: Option<String>,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Objects impacted by this issue
    pub impact: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            object: None,
            location: None,
            impact: Vec::new(),
        }
    }

    /// Create a diagnostic with the code's default severity
    pub fn of(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, code.default_severity(), message)
    }

    /// Set the object name
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set impacted objects
    pub fn with_impact(mut self, impact: Vec<String>) -> Self {
        self.impact = impact;
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " ({})", loc.file)?;
        }
        Ok(())
    }
}
