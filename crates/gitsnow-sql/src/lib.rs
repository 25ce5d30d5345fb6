//! SQL collaborators for gitsnow
//!
//! This crate handles:
//! - Parsing and tokenizing SQL with datafusion-sqlparser-rs
//! - Canonical formatting and structural linearization for semantic diffs
//! - Recognizing the object declared by a CREATE statement
//! - Table- and column-level lineage extraction
//! - A permissive identifier scanner used when lineage extraction fails

pub mod declaration;
pub mod format;
pub mod joins;
pub mod lineage;
pub mod parser;
pub mod scanner;

pub use declaration::{scan_declarations, Declaration, DeclarationError};
pub use format::{FormatError, NodeKind, SqlFormatter, StructureError, StructureNode};
pub use joins::extract_joins;
pub use lineage::{LineageAdapter, LineageError, SqlLineageAdapter, StatementLineage};
pub use parser::{ParseError, SqlParser};
pub use scanner::find_candidate_names;
