//! Snowflake catalog connector
//!
//! Enumerates objects through `INFORMATION_SCHEMA` (tables, views, dynamic
//! tables, procedures, functions) and `SHOW ... IN SCHEMA` (streams, tasks),
//! and reads DDL with `GET_DDL(..., TRUE)`. Dynamic table columns are typed
//! from `DESCRIBE TABLE`. It requires:
//! - USAGE on the database and its schemas
//! - ownership or a role allowed to call `GET_DDL` on each object
//!
//! ## Authentication Methods
//!
//! 1. Password authentication (username/password)
//! 2. Key-pair authentication (private key PEM)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let connector = SnowflakeConnector::new("xy12345.us-east-1", "deployer", "password")
//!     .with_warehouse("COMPUTE_WH")
//!     .with_role("SYSADMIN")
//!     .build()?;
//! ```

use crate::adapter::{CatalogConnector, CatalogEntry, ColumnDescription, FetchError};
use gitsnow_core::ObjectKind;
use std::collections::HashMap;

#[cfg(feature = "snowflake")]
use crate::ddl::argument_types;

#[cfg(feature = "snowflake")]
use snowflake_api::SnowflakeApi;

#[cfg(feature = "snowflake")]
use arrow_array::cast::AsArray;

#[cfg(feature = "snowflake")]
use arrow_array::Array;

#[cfg(feature = "snowflake")]
use tracing::warn;

/// Snowflake authentication credentials
#[derive(Clone)]
pub enum SnowflakeCredentials {
    /// Password-based authentication
    Password(String),
    /// Key-pair authentication (PEM format private key)
    PrivateKey(String),
}

/// Builder for SnowflakeConnector
///
/// Only `account` is read back when the `snowflake` feature is off.
#[cfg_attr(not(feature = "snowflake"), allow(dead_code))]
pub struct SnowflakeConnectorBuilder {
    account: String,
    username: String,
    credentials: SnowflakeCredentials,
    warehouse: Option<String>,
    role: Option<String>,
    database: Option<String>,
}

impl SnowflakeConnectorBuilder {
    /// Create new builder with password authentication
    pub fn with_password(
        account: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            username: username.into(),
            credentials: SnowflakeCredentials::Password(password.into()),
            warehouse: None,
            role: None,
            database: None,
        }
    }

    /// Create new builder with key-pair authentication
    pub fn with_key_pair(
        account: impl Into<String>,
        username: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            username: username.into(),
            credentials: SnowflakeCredentials::PrivateKey(private_key_pem.into()),
            warehouse: None,
            role: None,
            database: None,
        }
    }

    /// Create a builder from `[connection]` settings.
    ///
    /// Missing keys fall back to `SNOWFLAKE_<KEY>` environment variables.
    /// Recognized keys: `account`, `user`, `password`, `private_key_path`,
    /// `warehouse`, `role`, `database`.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, FetchError> {
        let setting = |key: &str| {
            settings
                .get(key)
                .cloned()
                .or_else(|| std::env::var(format!("SNOWFLAKE_{}", key.to_uppercase())).ok())
                .filter(|v| !v.is_empty())
        };

        let account = setting("account")
            .ok_or_else(|| FetchError::ConfigError("Snowflake requires 'account'".to_string()))?;
        let username = setting("user")
            .or_else(|| setting("username"))
            .ok_or_else(|| FetchError::ConfigError("Snowflake requires 'user'".to_string()))?;

        let mut builder = if let Some(password) = setting("password") {
            Self::with_password(account, username, password)
        } else if let Some(path) = setting("private_key_path") {
            let pem = std::fs::read_to_string(&path).map_err(|e| {
                FetchError::ConfigError(format!("Cannot read private key {}: {}", path, e))
            })?;
            Self::with_key_pair(account, username, pem)
        } else {
            return Err(FetchError::ConfigError(
                "Snowflake requires 'password' or 'private_key_path'".to_string(),
            ));
        };

        if let Some(warehouse) = setting("warehouse") {
            builder = builder.with_warehouse(warehouse);
        }
        if let Some(role) = setting("role") {
            builder = builder.with_role(role);
        }
        if let Some(database) = setting("database") {
            builder = builder.with_database(database);
        }

        Ok(builder)
    }

    /// Set the warehouse to use
    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    /// Set the role to use
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the default database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Build the connector
    #[cfg(feature = "snowflake")]
    pub fn build(self) -> Result<SnowflakeConnector, FetchError> {
        let api = match &self.credentials {
            SnowflakeCredentials::Password(password) => SnowflakeApi::with_password_auth(
                &self.account,
                self.warehouse.as_deref(),
                self.database.as_deref(),
                None, // schema
                &self.username,
                self.role.as_deref(),
                password,
            )
            .map_err(|e| {
                FetchError::AuthenticationError(format!(
                    "Failed to authenticate with Snowflake: {}",
                    e
                ))
            })?,
            SnowflakeCredentials::PrivateKey(private_key_pem) => SnowflakeApi::with_certificate_auth(
                &self.account,
                self.warehouse.as_deref(),
                self.database.as_deref(),
                None, // schema
                &self.username,
                self.role.as_deref(),
                private_key_pem,
            )
            .map_err(|e| {
                FetchError::AuthenticationError(format!(
                    "Failed to authenticate with key-pair: {}",
                    e
                ))
            })?,
        };

        Ok(SnowflakeConnector {
            api,
            account: self.account,
        })
    }

    /// Build without snowflake feature
    #[cfg(not(feature = "snowflake"))]
    pub fn build(self) -> Result<SnowflakeConnector, FetchError> {
        Err(FetchError::ConfigError(
            "Snowflake support not compiled. Rebuild with: cargo build --features snowflake".to_string(),
        ))
    }
}

/// Snowflake catalog connector
pub struct SnowflakeConnector {
    #[cfg(feature = "snowflake")]
    api: SnowflakeApi,

    account: String,
}

impl SnowflakeConnector {
    /// Create a new Snowflake connector with password authentication (returns builder)
    pub fn new(
        account: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> SnowflakeConnectorBuilder {
        SnowflakeConnectorBuilder::with_password(account, username, password)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Object type accepted by `GET_DDL` for a kind
    pub fn get_ddl_type(kind: ObjectKind) -> &'static str {
        match kind {
            ObjectKind::Table | ObjectKind::DynamicTable => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Procedure => "PROCEDURE",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Stream => "STREAM",
            ObjectKind::Task => "TASK",
        }
    }

    /// Kind of an `INFORMATION_SCHEMA.TABLES` row
    pub fn table_kind(table_type: &str, is_dynamic: Option<&str>) -> ObjectKind {
        if is_dynamic.is_some_and(|v| v.eq_ignore_ascii_case("YES")) {
            return ObjectKind::DynamicTable;
        }
        match table_type.to_uppercase().as_str() {
            "VIEW" | "MATERIALIZED VIEW" => ObjectKind::View,
            _ => ObjectKind::Table,
        }
    }

    /// `SELECT` fetching the DDL of every entry in one round trip
    pub fn ddl_batch_query(database: &str, entries: &[CatalogEntry]) -> String {
        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                format!(
                    "SELECT '{}' AS IDX, GET_DDL('{}', '{}', TRUE) AS DDL",
                    i,
                    Self::get_ddl_type(entry.kind),
                    quote_literal(&entry.ddl_identifier(database))
                )
            })
            .collect::<Vec<_>>()
            .join("\nUNION ALL\n")
    }
}

/// Escape single quotes for use inside a SQL string literal
fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(feature = "snowflake")]
impl SnowflakeConnector {
    /// Run a query and read the named text columns of every row
    async fn query_rows(
        &self,
        query: &str,
        columns: &[&str],
        context: &str,
    ) -> Result<Vec<Vec<Option<String>>>, FetchError> {
        use snowflake_api::QueryResult;

        let result = self
            .api
            .exec(query)
            .await
            .map_err(|e| FetchError::classify(context, e.to_string()))?;

        match result {
            QueryResult::Arrow(batches) => {
                let mut rows = Vec::new();
                for batch in batches {
                    let schema = batch.schema();
                    let mut arrays = Vec::with_capacity(columns.len());
                    for column in columns {
                        let idx = schema.index_of(column).map_err(|_| {
                            FetchError::InvalidResponse(format!("Missing {} column", column))
                        })?;
                        let array = batch.column(idx).as_string_opt::<i32>().ok_or_else(|| {
                            FetchError::InvalidResponse(format!("Column {} is not text", column))
                        })?;
                        arrays.push(array);
                    }

                    for row in 0..batch.num_rows() {
                        rows.push(
                            arrays
                                .iter()
                                .map(|a| (!a.is_null(row)).then(|| a.value(row).to_string()))
                                .collect(),
                        );
                    }
                }
                Ok(rows)
            }
            QueryResult::Empty => Ok(Vec::new()),
            QueryResult::Json(_) => Err(FetchError::InvalidResponse(format!(
                "Unexpected JSON result for {}",
                context
            ))),
        }
    }

    /// Names from a `SHOW <objects> IN SCHEMA`, read back through `RESULT_SCAN`
    async fn show_names(&self, database: &str, schema: &str, objects: &str) -> Result<Vec<String>, FetchError> {
        let context = format!("SHOW {} IN {}.{}", objects, database, schema);
        self.api
            .exec(&format!("SHOW {} IN SCHEMA \"{}\".\"{}\"", objects, database, schema))
            .await
            .map_err(|e| FetchError::classify(&context, e.to_string()))?;

        let rows = self
            .query_rows(
                r#"SELECT "name" AS NAME FROM TABLE(RESULT_SCAN(LAST_QUERY_ID())) ORDER BY 1"#,
                &["NAME"],
                &context,
            )
            .await?;

        Ok(rows.into_iter().filter_map(|mut r| r.remove(0)).collect())
    }

    async fn list_routines(
        &self,
        database: &str,
        schema: &str,
        kind: ObjectKind,
    ) -> Result<Vec<CatalogEntry>, FetchError> {
        let (view, name_column) = match kind {
            ObjectKind::Procedure => ("PROCEDURES", "PROCEDURE"),
            _ => ("FUNCTIONS", "FUNCTION"),
        };
        let query = format!(
            "SELECT {col}_NAME AS NAME, ARGUMENT_SIGNATURE FROM \"{db}\".INFORMATION_SCHEMA.{view} \
             WHERE {col}_SCHEMA = '{schema}' ORDER BY {col}_NAME",
            col = name_column,
            db = database,
            view = view,
            schema = quote_literal(schema),
        );

        let rows = self
            .query_rows(&query, &["NAME", "ARGUMENT_SIGNATURE"], &format!("{}.{}", database, schema))
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name = row.first().cloned().flatten()?;
                let signature = row.get(1).cloned().flatten().unwrap_or_else(|| "()".to_string());
                Some(CatalogEntry::new(schema, name, kind).with_arguments(argument_types(&signature)))
            })
            .collect())
    }
}

#[cfg(feature = "snowflake")]
#[async_trait::async_trait]
impl CatalogConnector for SnowflakeConnector {
    fn name(&self) -> &'static str {
        "Snowflake"
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.api.exec("SELECT 1").await.map_err(|e| {
            FetchError::NetworkError(format!("Connection test failed: {}", e))
        })?;
        Ok(())
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<String>, FetchError> {
        let query = format!(
            "SELECT SCHEMA_NAME FROM \"{}\".INFORMATION_SCHEMA.SCHEMATA ORDER BY SCHEMA_NAME",
            database
        );
        let rows = self.query_rows(&query, &["SCHEMA_NAME"], database).await?;
        Ok(rows.into_iter().filter_map(|mut r| r.remove(0)).collect())
    }

    async fn list_objects(&self, database: &str, schema: &str) -> Result<Vec<CatalogEntry>, FetchError> {
        let context = format!("{}.{}", database, schema);
        let query = format!(
            "SELECT TABLE_NAME, TABLE_TYPE, IS_DYNAMIC FROM \"{}\".INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' ORDER BY TABLE_NAME",
            database,
            quote_literal(schema)
        );

        let mut entries: Vec<CatalogEntry> = self
            .query_rows(&query, &["TABLE_NAME", "TABLE_TYPE", "IS_DYNAMIC"], &context)
            .await?
            .into_iter()
            .filter_map(|row| {
                let name = row.first().cloned().flatten()?;
                let table_type = row.get(1).cloned().flatten().unwrap_or_default();
                let is_dynamic = row.get(2).cloned().flatten();
                Some(CatalogEntry::new(
                    schema,
                    name,
                    Self::table_kind(&table_type, is_dynamic.as_deref()),
                ))
            })
            .collect();

        for kind in [ObjectKind::Procedure, ObjectKind::Function] {
            match self.list_routines(database, schema, kind).await {
                Ok(routines) => entries.extend(routines),
                Err(e) => warn!("[Warning] Failed to list {} in {}: {}", kind, context, e),
            }
        }

        for (kind, objects) in [(ObjectKind::Stream, "STREAMS"), (ObjectKind::Task, "TASKS")] {
            match self.show_names(database, schema, objects).await {
                Ok(names) => entries.extend(names.into_iter().map(|n| CatalogEntry::new(schema, n, kind))),
                Err(e) => warn!("[Warning] Failed to execute SHOW {} in {}: {}", objects, context, e),
            }
        }

        Ok(entries)
    }

    async fn fetch_ddl(&self, database: &str, entry: &CatalogEntry) -> Result<String, FetchError> {
        let query = format!(
            "SELECT GET_DDL('{}', '{}', TRUE) AS DDL",
            Self::get_ddl_type(entry.kind),
            quote_literal(&entry.ddl_identifier(database))
        );

        self.query_rows(&query, &["DDL"], &entry.ddl_identifier(database))
            .await?
            .into_iter()
            .find_map(|mut r| r.remove(0))
            .ok_or_else(|| FetchError::ObjectNotFound(entry.ddl_identifier(database)))
    }

    async fn describe_columns(
        &self,
        database: &str,
        entry: &CatalogEntry,
    ) -> Result<Vec<ColumnDescription>, FetchError> {
        let table = format!("\"{}\".\"{}\".\"{}\"", database, entry.schema, entry.name);
        let context = format!("DESCRIBE TABLE {}", table);
        self.api
            .exec(&context)
            .await
            .map_err(|e| FetchError::classify(&context, e.to_string()))?;

        let rows = self
            .query_rows(
                r#"SELECT "name" AS NAME, "type" AS DATA_TYPE, "null?" AS NULLABLE, "comment" AS COMMENT
                   FROM TABLE(RESULT_SCAN(LAST_QUERY_ID())) WHERE "kind" = 'COLUMN'"#,
                &["NAME", "DATA_TYPE", "NULLABLE", "COMMENT"],
                &context,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let name = row.first().cloned().flatten()?;
                let data_type = row.get(1).cloned().flatten()?;
                let mut column = ColumnDescription::new(name, data_type);
                column.nullable = row.get(2).cloned().flatten().as_deref() != Some("N");
                column.comment = row.get(3).cloned().flatten().filter(|c| !c.is_empty());
                Some(column)
            })
            .collect())
    }

    /// One `UNION ALL` round trip; falls back to per-object calls if the batch fails
    async fn fetch_ddls(
        &self,
        database: &str,
        entries: &[CatalogEntry],
    ) -> Vec<Result<String, FetchError>> {
        if entries.is_empty() {
            return Vec::new();
        }

        let query = Self::ddl_batch_query(database, entries);
        match self.query_rows(&query, &["IDX", "DDL"], database).await {
            Ok(rows) => {
                let mut by_index: HashMap<usize, String> = rows
                    .into_iter()
                    .filter_map(|row| {
                        let idx = row.first().cloned().flatten()?.parse().ok()?;
                        Some((idx, row.get(1).cloned().flatten()?))
                    })
                    .collect();

                (0..entries.len())
                    .map(|i| {
                        by_index
                            .remove(&i)
                            .ok_or_else(|| FetchError::ObjectNotFound(entries[i].ddl_identifier(database)))
                    })
                    .collect()
            }
            Err(e) => {
                warn!("Batched GET_DDL failed ({}), fetching objects one by one", e);
                let mut results = Vec::with_capacity(entries.len());
                for entry in entries {
                    results.push(self.fetch_ddl(database, entry).await);
                }
                results
            }
        }
    }
}

#[cfg(not(feature = "snowflake"))]
#[async_trait::async_trait]
impl CatalogConnector for SnowflakeConnector {
    fn name(&self) -> &'static str {
        "Snowflake"
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        Err(not_compiled())
    }

    async fn list_schemas(&self, _database: &str) -> Result<Vec<String>, FetchError> {
        Err(not_compiled())
    }

    async fn list_objects(&self, _database: &str, _schema: &str) -> Result<Vec<CatalogEntry>, FetchError> {
        Err(not_compiled())
    }

    async fn fetch_ddl(&self, _database: &str, _entry: &CatalogEntry) -> Result<String, FetchError> {
        Err(not_compiled())
    }

    async fn describe_columns(
        &self,
        _database: &str,
        _entry: &CatalogEntry,
    ) -> Result<Vec<ColumnDescription>, FetchError> {
        Err(not_compiled())
    }
}

#[cfg(not(feature = "snowflake"))]
fn not_compiled() -> FetchError {
    FetchError::ConfigError("Snowflake feature not enabled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_ddl_types() {
        assert_eq!(SnowflakeConnector::get_ddl_type(ObjectKind::DynamicTable), "TABLE");
        assert_eq!(SnowflakeConnector::get_ddl_type(ObjectKind::Procedure), "PROCEDURE");
    }

    #[test]
    fn test_table_kinds() {
        assert_eq!(SnowflakeConnector::table_kind("BASE TABLE", Some("YES")), ObjectKind::DynamicTable);
        assert_eq!(SnowflakeConnector::table_kind("BASE TABLE", Some("NO")), ObjectKind::Table);
        assert_eq!(SnowflakeConnector::table_kind("MATERIALIZED VIEW", None), ObjectKind::View);
    }

    #[test]
    fn test_ddl_batch_query() {
        let entries = vec![
            CatalogEntry::new("S", "T", ObjectKind::Table),
            CatalogEntry::new("S", "P", ObjectKind::Procedure).with_arguments("(VARCHAR)"),
        ];
        let query = SnowflakeConnector::ddl_batch_query("DB", &entries);

        assert_eq!(
            query,
            "SELECT '0' AS IDX, GET_DDL('TABLE', '\"DB\".\"S\".\"T\"', TRUE) AS DDL\n\
             UNION ALL\n\
             SELECT '1' AS IDX, GET_DDL('PROCEDURE', '\"DB\".\"S\".\"P\"(VARCHAR)', TRUE) AS DDL"
        );
    }

    #[test]
    fn test_builder_from_settings() {
        let mut settings = HashMap::new();
        settings.insert("account".to_string(), "xy12345".to_string());
        settings.insert("user".to_string(), "deployer".to_string());
        settings.insert("password".to_string(), "secret".to_string());
        settings.insert("role".to_string(), "SYSADMIN".to_string());

        let builder = SnowflakeConnectorBuilder::from_settings(&settings).unwrap();
        assert_eq!(builder.account(), "xy12345");
        assert_eq!(builder.role.as_deref(), Some("SYSADMIN"));
    }

    #[test]
    fn test_builder_requires_credentials() {
        let mut settings = HashMap::new();
        settings.insert("account".to_string(), "xy12345".to_string());
        settings.insert("user".to_string(), "deployer".to_string());
        settings.insert("private_key_path".to_string(), "/nonexistent/key.p8".to_string());

        let result = SnowflakeConnectorBuilder::from_settings(&settings);
        assert!(matches!(result, Err(FetchError::ConfigError(_))));
    }

    #[cfg(not(feature = "snowflake"))]
    #[test]
    fn test_build_without_feature() {
        let result = SnowflakeConnector::new("xy12345", "user", "pass").build();
        assert!(matches!(result, Err(FetchError::ConfigError(_))));
    }
}
