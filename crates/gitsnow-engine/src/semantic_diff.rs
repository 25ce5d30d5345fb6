//! Semantic diff of repository definitions against a live snapshot
//!
//! Each file is compared to the DDL captured for the object it declares.
//! Comparison is structural: both sides are formatted, re-tokenized and compared
//! as sequences of `(kind, text)` leaves, so case, spacing and comments never
//! count as a change. When that fails the formatted strings are compared, and
//! when formatting fails too the raw text is. Every fallback is reported.

use gitsnow_catalog::DatabaseSnapshot;
use gitsnow_core::{Diagnostic, DiagnosticCode, Location, ObjectKind, ObjectName};
use gitsnow_graph::display_path;
use gitsnow_sql::{scan_declarations, Declaration, SqlFormatter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Why an object is (or is not) part of the change set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeReason {
    /// No live object with this name (or overload signature)
    NotInDb,

    /// Live DDL differs structurally from the file
    SqlMismatch,

    InSync,

    /// The file declares nothing deployable
    NotCreatable,
}

impl ChangeReason {
    /// Whether the object must be deployed
    pub fn is_change(&self) -> bool {
        match self {
            Self::NotInDb | Self::SqlMismatch => true,
            Self::InSync | Self::NotCreatable => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInDb => "NOT_IN_DB",
            Self::SqlMismatch => "SQL_MISMATCH",
            Self::InSync => "IN_SYNC",
            Self::NotCreatable => "NOT_CREATABLE",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison tier that produced a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Linearized structure of both sides
    Structural,

    /// Formatted text of both sides
    Formatted,

    /// Trimmed raw text of both sides
    RawText,
}

/// Outcome of comparing one file definition with one live DDL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub equal: bool,
    pub comparison: Comparison,

    /// Why a higher tier could not be used
    pub fallback_reason: Option<String>,
}

/// Classification of one declared object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub name: ObjectName,

    /// Declared kind (`None` only for [`ChangeReason::NotCreatable`])
    pub kind: Option<ObjectKind>,

    pub path: PathBuf,
    pub file_sql: String,
    pub db_sql: Option<String>,
    pub reason: ChangeReason,

    /// Tier used when both sides existed
    pub comparison: Option<Comparison>,

    /// Name used by a generic `DROP`, overload signature included
    pub drop_target: String,
}

impl ChangeRecord {
    /// One-line explanation, e.g. `table 'my_schema.orders' does not exist in DB`
    pub fn describe(&self) -> String {
        match self.reason {
            ChangeReason::NotInDb => format!(
                "{} '{}' does not exist in DB",
                self.kind.map(|k| k.keyword()).unwrap_or("object").to_lowercase(),
                self.drop_target.to_lowercase()
            ),
            ChangeReason::SqlMismatch => "SQL mismatch".to_string(),
            ChangeReason::InSync => "In sync".to_string(),
            ChangeReason::NotCreatable => "Not a creatable object".to_string(),
        }
    }
}

/// Result of diffing a whole deploy order
#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    /// Objects to deploy, in deploy order
    pub changes: Vec<ChangeRecord>,

    /// Objects whose live DDL matches their file
    pub in_sync: Vec<ObjectName>,

    /// Files that declare nothing deployable
    pub not_creatable: Vec<PathBuf>,

    pub diagnostics: Vec<Diagnostic>,
}

impl DiffOutcome {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Kind implied by the `<schema>/<kind>/<object>.sql` layout
pub fn kind_from_path(path: &Path) -> Option<ObjectKind> {
    let directory = path.parent()?.file_name()?.to_str()?;
    ObjectKind::ALL
        .into_iter()
        .find(|kind| kind.directory().eq_ignore_ascii_case(directory))
}

/// Semantic diff engine
pub struct SemanticDiff<'a> {
    formatter: &'a SqlFormatter,
}

impl<'a> SemanticDiff<'a> {
    pub fn new(formatter: &'a SqlFormatter) -> Self {
        Self { formatter }
    }

    /// Compare a file definition with live DDL, falling back tier by tier
    pub fn compare(&self, file_sql: &str, db_sql: &str) -> Verdict {
        let (file_structure, db_structure) = (
            self.formatter.structure(file_sql),
            self.formatter.structure(db_sql),
        );
        let structure_error = match (file_structure, db_structure) {
            (Ok(a), Ok(b)) => {
                return Verdict {
                    equal: a == b,
                    comparison: Comparison::Structural,
                    fallback_reason: None,
                }
            }
            (a, b) => a.err().or(b.err()).map(|e| e.to_string()),
        };

        let format_error = match (self.formatter.format(file_sql), self.formatter.format(db_sql)) {
            (Ok(a), Ok(b)) => {
                return Verdict {
                    equal: a.trim() == b.trim(),
                    comparison: Comparison::Formatted,
                    fallback_reason: structure_error,
                }
            }
            (a, b) => a.err().or(b.err()).map(|e| e.to_string()),
        };

        Verdict {
            equal: file_sql.trim() == db_sql.trim(),
            comparison: Comparison::RawText,
            fallback_reason: format_error,
        }
    }

    /// Diff every `(object, file)` pair, keeping their order
    pub fn diff(&self, files: &[(ObjectName, PathBuf)], snapshot: &DatabaseSnapshot, root: &Path) -> DiffOutcome {
        let mut outcome = DiffOutcome::default();

        for (name, path) in files {
            let location = Location::new(display_path(root, path));
            let sql = match std::fs::read_to_string(path) {
                Ok(sql) => sql,
                Err(e) => {
                    warn!("Could not process {}: {}", location.file, e);
                    outcome.diagnostics.push(
                        Diagnostic::of(
                            DiagnosticCode::DiffUnreadableFile,
                            format!("Could not process {}: {}", location.file, e),
                        )
                        .with_object(name.to_string())
                        .with_location(location),
                    );
                    continue;
                }
            };

            for record in self.classify(name, path, &sql, snapshot, &location, &mut outcome.diagnostics) {
                debug!(object = %record.name, reason = %record.reason, "Classified");
                match record.reason {
                    ChangeReason::NotInDb | ChangeReason::SqlMismatch => outcome.changes.push(record),
                    ChangeReason::InSync => outcome.in_sync.push(record.name),
                    ChangeReason::NotCreatable => outcome.not_creatable.push(record.path),
                }
            }
        }

        outcome
    }

    /// Classify the declarations of one file for `name`
    pub fn classify(
        &self,
        name: &ObjectName,
        path: &Path,
        sql: &str,
        snapshot: &DatabaseSnapshot,
        location: &Location,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<ChangeRecord> {
        let declarations = match scan_declarations(self.formatter.parser(), sql) {
            Ok(declarations) => declarations,
            Err(e) => {
                // The text cannot be tokenized; fall back to the directory layout for the kind
                debug!("Cannot scan {}: {}", location.file, e);
                return vec![self.classify_opaque(name, path, sql, snapshot, location, diagnostics)];
            }
        };

        let matching: Vec<&Declaration> = declarations
            .iter()
            .filter(|d| d.name(Some(name.schema())).as_ref() == Some(name))
            .collect();
        let chosen = if matching.is_empty() {
            declarations.first().into_iter().collect()
        } else {
            matching
        };

        if chosen.is_empty() {
            diagnostics.push(not_creatable(name, location));
            return vec![self.record(name, None, path, sql, None, ChangeReason::NotCreatable, None, name.to_string())];
        }

        chosen
            .into_iter()
            .map(|declaration| {
                let live = snapshot.find(name, declaration.signature.as_deref());
                let drop_target = declaration.drop_target(name);
                self.against_live(
                    name,
                    declaration.kind,
                    path,
                    sql,
                    live.map(|l| l.ddl.as_str()),
                    drop_target,
                    location,
                    diagnostics,
                )
            })
            .collect()
    }

    fn classify_opaque(
        &self,
        name: &ObjectName,
        path: &Path,
        sql: &str,
        snapshot: &DatabaseSnapshot,
        location: &Location,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ChangeRecord {
        match kind_from_path(path) {
            Some(kind) => {
                let live = snapshot.find(name, None).map(|l| l.ddl.as_str());
                self.against_live(name, kind, path, sql, live, name.to_string(), location, diagnostics)
            }
            None => {
                diagnostics.push(not_creatable(name, location));
                self.record(name, None, path, sql, None, ChangeReason::NotCreatable, None, name.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn against_live(
        &self,
        name: &ObjectName,
        kind: ObjectKind,
        path: &Path,
        sql: &str,
        live: Option<&str>,
        drop_target: String,
        location: &Location,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> ChangeRecord {
        let Some(db_sql) = live else {
            return self.record(name, Some(kind), path, sql, None, ChangeReason::NotInDb, None, drop_target);
        };

        let verdict = self.compare(sql, db_sql);
        if let Some(diagnostic) = fallback_diagnostic(name, &verdict, location) {
            diagnostics.push(diagnostic);
        }

        let reason = if verdict.equal {
            ChangeReason::InSync
        } else {
            ChangeReason::SqlMismatch
        };
        self.record(
            name,
            Some(kind),
            path,
            sql,
            Some(db_sql.to_string()),
            reason,
            Some(verdict.comparison),
            drop_target,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        name: &ObjectName,
        kind: Option<ObjectKind>,
        path: &Path,
        sql: &str,
        db_sql: Option<String>,
        reason: ChangeReason,
        comparison: Option<Comparison>,
        drop_target: String,
    ) -> ChangeRecord {
        ChangeRecord {
            name: name.clone(),
            kind,
            path: path.to_path_buf(),
            file_sql: sql.to_string(),
            db_sql,
            reason,
            comparison,
            drop_target,
        }
    }
}

fn not_creatable(name: &ObjectName, location: &Location) -> Diagnostic {
    Diagnostic::of(
        DiagnosticCode::DiffNotCreatable,
        format!("{} does not declare a supported CREATE statement", location.file),
    )
    .with_object(name.to_string())
    .with_location(location.clone())
}

fn fallback_diagnostic(name: &ObjectName, verdict: &Verdict, location: &Location) -> Option<Diagnostic> {
    let reason = verdict.fallback_reason.as_deref().unwrap_or("unknown error");
    let (code, message) = match verdict.comparison {
        Comparison::Structural => return None,
        Comparison::Formatted => (
            DiagnosticCode::DiffFormattedFallback,
            format!(
                "SQL parsing failed for {} ({}), falling back to formatted string comparison",
                name, reason
            ),
        ),
        Comparison::RawText => (
            DiagnosticCode::DiffRawFallback,
            format!(
                "SQL formatting failed for {} ({}), falling back to simple string comparison",
                name, reason
            ),
        ),
    };

    warn!("{}", message);
    Some(
        Diagnostic::of(code, message)
            .with_object(name.to_string())
            .with_location(location.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitsnow_catalog::LiveObject;
    use gitsnow_core::{DialectConfig, FormatConfig};

    fn formatter() -> SqlFormatter {
        SqlFormatter::new(&DialectConfig::Snowflake, &FormatConfig::default())
    }

    fn snapshot_with(name: &str, kind: ObjectKind, ddl: &str) -> DatabaseSnapshot {
        let mut snapshot = DatabaseSnapshot::new("DB");
        snapshot.insert(LiveObject {
            name: ObjectName::parse(name).unwrap(),
            kind,
            signature: None,
            ddl: ddl.to_string(),
        });
        snapshot
    }

    fn classify_one(sql: &str, path: &str, snapshot: &DatabaseSnapshot) -> (ChangeRecord, Vec<Diagnostic>) {
        let formatter = formatter();
        let diff = SemanticDiff::new(&formatter);
        let path = PathBuf::from(path);
        let name = gitsnow_graph::object_name_from_path(&path).unwrap();
        let mut diagnostics = Vec::new();
        let mut records = diff.classify(&name, &path, sql, snapshot, &Location::new("x.sql"), &mut diagnostics);
        assert_eq!(records.len(), 1);
        (records.remove(0), diagnostics)
    }

    #[test]
    fn comments_case_and_spacing_are_not_changes() {
        let formatter = formatter();
        let diff = SemanticDiff::new(&formatter);

        let verdict = diff.compare(
            "-- orders view\ncreate view s.v as\n    select id\n    from s.t;",
            "CREATE VIEW S.V AS SELECT ID FROM S.T /* live */;",
        );
        assert!(verdict.equal);
        assert_eq!(verdict.comparison, Comparison::Structural);
    }

    #[test]
    fn reformatted_copy_is_in_sync_with_itself() {
        let formatter = formatter();
        let diff = SemanticDiff::new(&formatter);
        let sql = "create or replace view s.v as select a, b from s.t where a > 1;";
        let formatted = formatter.format(sql).unwrap();

        assert!(diff.compare(sql, &formatted).equal);
    }

    #[test]
    fn reordered_columns_are_a_mismatch() {
        let formatter = formatter();
        let diff = SemanticDiff::new(&formatter);
        let verdict = diff.compare(
            "CREATE TABLE S.T (ID INT, NAME VARCHAR);",
            "CREATE TABLE S.T (NAME VARCHAR, ID INT);",
        );
        assert!(!verdict.equal);
        assert_eq!(verdict.comparison, Comparison::Structural);
    }

    #[test]
    fn unbalanced_statement_falls_back_to_formatted_text() {
        let formatter = formatter();
        let diff = SemanticDiff::new(&formatter);
        let verdict = diff.compare("CREATE VIEW S.V AS SELECT (1", "create view s.v as select (1");

        assert!(verdict.equal);
        assert_eq!(verdict.comparison, Comparison::Formatted);
        assert!(verdict.fallback_reason.is_some());
    }

    #[test]
    fn identical_untokenizable_text_is_not_a_false_positive() {
        let formatter = formatter();
        let diff = SemanticDiff::new(&formatter);
        let sql = "CREATE VIEW S.V AS SELECT 'unterminated";

        let verdict = diff.compare(sql, &format!("  {}\n", sql));
        assert!(verdict.equal);
        assert_eq!(verdict.comparison, Comparison::RawText);

        let verdict = diff.compare(sql, "CREATE VIEW S.V AS SELECT 'other");
        assert!(!verdict.equal);
        assert_eq!(verdict.comparison, Comparison::RawText);
    }

    #[test]
    fn missing_live_object_is_not_in_db() {
        let snapshot = DatabaseSnapshot::new("DB");
        let (record, diagnostics) = classify_one(
            "CREATE TABLE my_schema.orders (ID INT);",
            "scripts/my_schema/tables/orders.sql",
            &snapshot,
        );

        assert_eq!(record.reason, ChangeReason::NotInDb);
        assert_eq!(record.db_sql, None);
        assert_eq!(record.describe(), "table 'my_schema.orders' does not exist in DB");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn create_or_replace_table_matches_create_or_alter_file() {
        let snapshot = snapshot_with(
            "MY_SCHEMA.CUSTOMER_ORDERS",
            ObjectKind::Table,
            r#"CREATE OR REPLACE TABLE "MY_SCHEMA"."CUSTOMER_ORDERS" (ORDER_ID NUMBER);"#,
        );
        let (record, _) = classify_one(
            "create or alter table my_schema.customer_orders (order_id number);",
            "scripts/my_schema/tables/customer_orders.sql",
            &snapshot,
        );
        assert_eq!(record.reason, ChangeReason::InSync);
        assert_eq!(record.comparison, Some(Comparison::Structural));
    }

    #[test]
    fn non_creatable_file_is_excluded() {
        let snapshot = DatabaseSnapshot::new("DB");
        let (record, diagnostics) = classify_one(
            "GRANT SELECT ON TABLE my_schema.orders TO ROLE analyst;",
            "scripts/my_schema/tables/orders.sql",
            &snapshot,
        );
        assert_eq!(record.reason, ChangeReason::NotCreatable);
        assert!(!record.reason.is_change());
        assert_eq!(diagnostics[0].code, DiagnosticCode::DiffNotCreatable);
    }

    #[test]
    fn untokenizable_file_uses_directory_kind() {
        let snapshot = snapshot_with(
            "MY_SCHEMA.V",
            ObjectKind::View,
            "CREATE VIEW MY_SCHEMA.V AS SELECT 1;",
        );
        let (record, diagnostics) = classify_one(
            "CREATE VIEW MY_SCHEMA.V AS SELECT 'oops",
            "scripts/my_schema/views/v.sql",
            &snapshot,
        );

        assert_eq!(record.kind, Some(ObjectKind::View));
        assert_eq!(record.reason, ChangeReason::SqlMismatch);
        assert_eq!(record.comparison, Some(Comparison::RawText));
        assert_eq!(diagnostics[0].code, DiagnosticCode::DiffRawFallback);
    }

    #[test]
    fn single_part_declarations_take_the_directory_schema() {
        let snapshot = snapshot_with("MY_SCHEMA.ORDERS", ObjectKind::Table, "CREATE TABLE MY_SCHEMA.ORDERS (ID INT);");
        let (record, _) = classify_one(
            "CREATE TABLE orders (ID INT);",
            "scripts/my_schema/tables/orders.sql",
            &snapshot,
        );
        assert_eq!(record.name.to_string(), "MY_SCHEMA.ORDERS");
        assert_eq!(record.reason, ChangeReason::SqlMismatch);
    }

    #[test]
    fn kinds_from_layout() {
        assert_eq!(
            kind_from_path(Path::new("s/dynamic_tables/d.sql")),
            Some(ObjectKind::DynamicTable)
        );
        assert_eq!(kind_from_path(Path::new("s/misc/d.sql")), None);
    }
}
