//! Point-in-time capture of a live database
//!
//! The snapshot is taken once, before any diffing, and is read-only for the
//! rest of the run. Only two failures abort a capture: the connection test and
//! the schema listing. A schema that cannot be listed or an object whose DDL
//! cannot be fetched is skipped with a diagnostic. Dynamic tables whose column
//! list cannot be described keep their bare DDL and also get a diagnostic.

use crate::adapter::{CatalogConnector, CatalogEntry, FetchError};
use crate::ddl::{
    expand_dynamic_table_columns, fixup_ddl, has_dynamic_table_columns, is_failed_ddl, signature_key,
};
use gitsnow_core::{CatalogConfig, Diagnostic, DiagnosticCode, DialectConfig, ObjectKind, ObjectName};
use gitsnow_sql::{scan_declarations, SqlParser};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// One live object (one overload for procedures and functions)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveObject {
    pub name: ObjectName,
    pub kind: ObjectKind,

    /// Argument types read back from the DDL, for overloadable kinds
    pub signature: Option<String>,

    /// DDL with the database qualifier removed from its header
    pub ddl: String,
}

impl LiveObject {
    /// Whether this overload has the given argument types
    pub fn matches_signature(&self, signature: &str) -> bool {
        self.signature
            .as_deref()
            .is_some_and(|own| signature_key(own) == signature_key(signature))
    }
}

/// Live objects keyed by normalized name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    database: String,
    objects: BTreeMap<ObjectName, Vec<LiveObject>>,
}

impl DatabaseSnapshot {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            objects: BTreeMap::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Add an object; overloads of one name accumulate
    pub fn insert(&mut self, object: LiveObject) {
        self.objects.entry(object.name.clone()).or_default().push(object);
    }

    /// Every overload captured for `name`
    pub fn get(&self, name: &ObjectName) -> &[LiveObject] {
        self.objects.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &ObjectName) -> bool {
        self.objects.contains_key(name)
    }

    /// Find the live counterpart of a definition.
    ///
    /// Without a signature the first overload is returned. With one, only an
    /// overload with the same argument types matches, except that a lone
    /// overload whose signature could not be read back is accepted.
    pub fn find(&self, name: &ObjectName, signature: Option<&str>) -> Option<&LiveObject> {
        let overloads = self.get(name);
        match signature {
            None => overloads.first(),
            Some(signature) => overloads
                .iter()
                .find(|o| o.matches_signature(signature))
                .or_else(|| match overloads {
                    [only] if only.signature.is_none() => Some(only),
                    _ => None,
                }),
        }
    }

    /// Kind of the first overload captured for `name`
    pub fn kind_of(&self, name: &ObjectName) -> Option<ObjectKind> {
        self.get(name).first().map(|o| o.kind)
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All live objects, ordered by name then capture order
    pub fn iter(&self) -> impl Iterator<Item = &LiveObject> {
        self.objects.values().flatten()
    }

    /// Schemas holding at least one captured object
    pub fn schemas(&self) -> BTreeSet<&str> {
        self.objects.keys().map(ObjectName::schema).collect()
    }
}

/// Result of a capture: the snapshot plus every object-scoped failure
#[derive(Debug, Clone, Default)]
pub struct SnapshotCapture {
    pub snapshot: DatabaseSnapshot,
    pub diagnostics: Vec<Diagnostic>,
}

/// Fatal capture failures
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Cannot connect to {connector}: {source}")]
    Connection {
        connector: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("Cannot list schemas of database '{database}': {source}")]
    ListSchemas {
        database: String,
        #[source]
        source: FetchError,
    },

    #[error("Database '{0}' is ignored by configuration")]
    DatabaseIgnored(String),
}

/// Enumerate `database` (all schemas, or only `schemas`) and capture every object's DDL
pub async fn capture_snapshot(
    connector: &dyn CatalogConnector,
    database: &str,
    schemas: Option<&[String]>,
    config: &CatalogConfig,
    dialect: &DialectConfig,
) -> Result<SnapshotCapture, SnapshotError> {
    if config.is_database_ignored(database) {
        return Err(SnapshotError::DatabaseIgnored(database.to_string()));
    }

    connector
        .test_connection()
        .await
        .map_err(|source| SnapshotError::Connection {
            connector: connector.name(),
            source,
        })?;

    let schema_names = match schemas {
        Some(list) => list.to_vec(),
        None => connector
            .list_schemas(database)
            .await
            .map_err(|source| SnapshotError::ListSchemas {
                database: database.to_string(),
                source,
            })?,
    };

    let mut diagnostics = Vec::new();
    let mut fetched = Vec::new();

    for schema in schema_names {
        if config.is_schema_ignored(&schema) {
            debug!("Skipping ignored schema {}", schema);
            continue;
        }

        let entries = match connector.list_objects(database, &schema).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("[Warning] Failed to list objects in schema {}: {}", schema, e);
                diagnostics.push(
                    Diagnostic::of(
                        DiagnosticCode::CatalogSchemaSkipped,
                        format!("Skipping schema {}: {}", schema, e),
                    )
                    .with_object(schema.clone()),
                );
                continue;
            }
        };

        let results = connector.fetch_ddls(database, &entries).await;
        for (entry, result) in entries.into_iter().zip(results) {
            match result {
                Ok(ddl) if !is_failed_ddl(&ddl) => {
                    let mut ddl = fixup_ddl(&ddl, database, &entry.schema);
                    if entry.kind == ObjectKind::DynamicTable && has_dynamic_table_columns(&ddl) {
                        ddl = describe_dynamic_table(connector, database, &entry, ddl, &mut diagnostics).await;
                    }
                    fetched.push((entry, ddl));
                }
                Ok(_) => skip_object(&mut diagnostics, &entry, "the database returned no DDL"),
                Err(e) => skip_object(&mut diagnostics, &entry, &e.to_string()),
            }
        }
    }

    let snapshot = assemble(database, fetched, dialect);
    info!(
        "Captured {} objects from database {} via {}",
        snapshot.len(),
        database,
        connector.name()
    );

    Ok(SnapshotCapture {
        snapshot,
        diagnostics,
    })
}

/// Type the bare column list of a dynamic table from `DESCRIBE TABLE`
async fn describe_dynamic_table(
    connector: &dyn CatalogConnector,
    database: &str,
    entry: &CatalogEntry,
    ddl: String,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    match connector.describe_columns(database, entry).await {
        Ok(columns) => expand_dynamic_table_columns(&ddl, &columns),
        Err(e) => {
            warn!("[Warning] Cannot describe columns of {}: {}", entry, e);
            diagnostics.push(
                Diagnostic::of(
                    DiagnosticCode::CatalogColumnsUndescribed,
                    format!("Keeping untyped column list of {} {}: {}", entry.kind, entry, e),
                )
                .with_object(entry.object_name().to_string()),
            );
            ddl
        }
    }
}

fn skip_object(diagnostics: &mut Vec<Diagnostic>, entry: &CatalogEntry, reason: &str) {
    warn!("[Warning] Skipping {} {}: {}", entry.kind, entry, reason);
    diagnostics.push(
        Diagnostic::of(
            DiagnosticCode::CatalogObjectSkipped,
            format!("Skipping {} {}: {}", entry.kind, entry, reason),
        )
        .with_object(entry.object_name().to_string()),
    );
}

/// Build the snapshot, reading overload signatures back from the DDL itself
fn assemble(database: &str, fetched: Vec<(CatalogEntry, String)>, dialect: &DialectConfig) -> DatabaseSnapshot {
    let parser = SqlParser::from_dialect(dialect);
    let mut snapshot = DatabaseSnapshot::new(database);

    for (entry, ddl) in fetched {
        let signature = if entry.kind.has_signature() {
            scan_declarations(&parser, &ddl)
                .ok()
                .and_then(|decls| decls.into_iter().find_map(|d| d.signature))
                .or_else(|| entry.arguments.clone())
        } else {
            None
        };

        snapshot.insert(LiveObject {
            name: entry.object_name(),
            kind: entry.kind,
            signature,
            ddl,
        });
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(name: &str, kind: ObjectKind, signature: Option<&str>) -> LiveObject {
        LiveObject {
            name: ObjectName::parse(name).unwrap(),
            kind,
            signature: signature.map(str::to_string),
            ddl: format!("CREATE {} {};", kind, name),
        }
    }

    #[test]
    fn overloads_accumulate() {
        let mut snapshot = DatabaseSnapshot::new("DB");
        snapshot.insert(live("S.P", ObjectKind::Procedure, Some("(VARCHAR)")));
        snapshot.insert(live("S.P", ObjectKind::Procedure, Some("(VARCHAR, NUMBER(38,0))")));
        snapshot.insert(live("S.T", ObjectKind::Table, None));

        let name = ObjectName::parse("s.p").unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&name).len(), 2);
        assert_eq!(snapshot.iter().count(), 3);
        assert_eq!(snapshot.kind_of(&name), Some(ObjectKind::Procedure));
        assert_eq!(snapshot.schemas().into_iter().collect::<Vec<_>>(), vec!["S"]);
    }

    #[test]
    fn find_matches_signature_by_canonical_types() {
        let mut snapshot = DatabaseSnapshot::new("DB");
        snapshot.insert(live("S.P", ObjectKind::Procedure, Some("(VARCHAR)")));
        snapshot.insert(live("S.P", ObjectKind::Procedure, Some("(VARCHAR, NUMBER(38,0))")));

        let name = ObjectName::new("S", "P");
        let found = snapshot.find(&name, Some("(STRING, INT)")).unwrap();
        assert_eq!(found.signature.as_deref(), Some("(VARCHAR, NUMBER(38,0))"));

        assert!(snapshot.find(&name, Some("(DATE)")).is_none());
        assert!(snapshot.find(&name, None).is_some());
        assert!(snapshot.find(&ObjectName::new("S", "Q"), None).is_none());
    }

    #[test]
    fn lone_unreadable_overload_still_matches() {
        let mut snapshot = DatabaseSnapshot::new("DB");
        snapshot.insert(live("S.F", ObjectKind::Function, None));

        assert!(snapshot.find(&ObjectName::new("S", "F"), Some("(VARCHAR)")).is_some());
    }

    #[test]
    fn assemble_reads_signature_from_ddl() {
        let entry = CatalogEntry::new("S", "P", ObjectKind::Procedure).with_arguments("(VARCHAR)");
        let ddl = "CREATE OR REPLACE PROCEDURE S.P(P_DATE VARCHAR) RETURNS VARCHAR LANGUAGE SQL AS 'select 1';";
        let snapshot = assemble("DB", vec![(entry, ddl.to_string())], &DialectConfig::Snowflake);

        let object = &snapshot.get(&ObjectName::new("S", "P"))[0];
        assert_eq!(object.signature.as_deref(), Some("(VARCHAR)"));
    }
}
