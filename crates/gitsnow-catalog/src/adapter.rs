//! Catalog connector trait for enumerating live objects and their DDL

use gitsnow_core::{ObjectKind, ObjectName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One object reported by a catalog listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Schema name as reported by the database
    pub schema: String,

    /// Object name as reported by the database
    pub name: String,

    pub kind: ObjectKind,

    /// Argument types of a procedure/function overload, e.g. `(VARCHAR, NUMBER)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl CatalogEntry {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            kind,
            arguments: None,
        }
    }

    /// Attach the argument types of an overload
    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    /// Normalized `SCHEMA.NAME`
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new(&self.schema, &self.name)
    }

    /// Quoted three-part identifier accepted by `GET_DDL`, arguments included
    pub fn ddl_identifier(&self, database: &str) -> String {
        format!(
            "\"{}\".\"{}\".\"{}\"{}",
            database,
            self.schema,
            self.name,
            self.arguments.as_deref().unwrap_or("")
        )
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.schema, self.name, self.arguments.as_deref().unwrap_or(""))
    }
}

/// One column of a live table, as `DESCRIBE TABLE` reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,

    /// Declared type, e.g. `NUMBER(38,0)` or `VARCHAR(16777216)`
    pub data_type: String,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Errors that can occur when talking to the catalog
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl FetchError {
    /// Classify a raw driver error message
    pub fn classify(context: &str, message: String) -> Self {
        if message.contains("does not exist") || message.contains("not found") {
            FetchError::ObjectNotFound(format!("{}: {}", context, message))
        } else if message.contains("Insufficient privileges") || message.contains("Permission") {
            FetchError::PermissionDenied(format!("{}: {}", context, message))
        } else {
            FetchError::QueryError(message)
        }
    }
}

/// Trait for connectors that can enumerate a live database
#[async_trait::async_trait]
pub trait CatalogConnector: Send + Sync {
    /// Get the connector name (e.g., "Snowflake", "Mock")
    fn name(&self) -> &'static str;

    /// Test the connection to the warehouse
    ///
    /// Failure here aborts a run; everything after it is object-scoped.
    async fn test_connection(&self) -> Result<(), FetchError>;

    /// List the schemas of a database
    async fn list_schemas(&self, database: &str) -> Result<Vec<String>, FetchError>;

    /// List the supported objects of one schema, one entry per overload
    async fn list_objects(&self, database: &str, schema: &str) -> Result<Vec<CatalogEntry>, FetchError>;

    /// Fetch the DDL of one object as the database reports it
    async fn fetch_ddl(&self, database: &str, entry: &CatalogEntry) -> Result<String, FetchError>;

    /// Describe the columns of a table-like object, in declaration order
    async fn describe_columns(
        &self,
        database: &str,
        entry: &CatalogEntry,
    ) -> Result<Vec<ColumnDescription>, FetchError>;

    /// Fetch the DDL of several objects, one result per entry in input order.
    ///
    /// Connectors that can batch (e.g. one `UNION ALL` of `GET_DDL` calls) override this.
    async fn fetch_ddls(
        &self,
        database: &str,
        entries: &[CatalogEntry],
    ) -> Vec<Result<String, FetchError>> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            results.push(self.fetch_ddl(database, entry).await);
        }
        results
    }
}
