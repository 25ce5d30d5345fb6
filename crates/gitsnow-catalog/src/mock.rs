//! Mock catalog connector for testing
//!
//! This connector serves predefined objects and DDL without connecting to any
//! warehouse. It's useful for:
//! - Unit testing diffing and script composition
//! - Running the CLI with `--test` (see [`MockConnector::demo`])
//! - Simulating per-schema and per-object failures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gitsnow_catalog::{CatalogConnector, CatalogEntry, MockConnector};
//! use gitsnow_core::ObjectKind;
//!
//! let connector = MockConnector::new();
//! connector
//!     .add_object(
//!         CatalogEntry::new("SALES", "ORDERS", ObjectKind::Table),
//!         "CREATE TABLE SALES.ORDERS (ID INT);",
//!     )
//!     .await;
//!
//! let entries = connector.list_objects("DB", "SALES").await?;
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Simulate connection failure
//! let connector = MockConnector::new().with_connection_failure();
//! assert!(connector.test_connection().await.is_err());
//!
//! // Simulate network latency
//! let connector = MockConnector::new().with_latency(100); // 100ms delay
//! ```

use crate::adapter::{CatalogConnector, CatalogEntry, ColumnDescription, FetchError};
use gitsnow_core::ObjectKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An object served by the mock, with its DDL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockObject {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub ddl: String,

    /// Columns reported by `describe_columns`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnDescription>,
}

impl MockObject {
    pub fn new(entry: CatalogEntry, ddl: impl Into<String>) -> Self {
        Self {
            entry,
            ddl: ddl.into(),
            columns: Vec::new(),
        }
    }
}

fn entry_key(entry: &CatalogEntry) -> String {
    entry.to_string().to_uppercase()
}

fn same_object(a: &CatalogEntry, b: &CatalogEntry) -> bool {
    a.schema.eq_ignore_ascii_case(&b.schema)
        && a.name.eq_ignore_ascii_case(&b.name)
        && a.arguments == b.arguments
}

/// Mock catalog connector for testing
///
/// Objects are stored in memory in insertion order, which is also the order
/// `list_objects` reports them in.
pub struct MockConnector {
    /// Served objects, in insertion order
    objects: Arc<RwLock<Vec<MockObject>>>,

    /// Errors returned when listing specific schemas
    schema_errors: Arc<RwLock<HashMap<String, FetchError>>>,

    /// Errors returned when fetching DDL of specific objects
    object_errors: Arc<RwLock<HashMap<String, FetchError>>>,

    /// Errors returned when describing columns of specific objects
    describe_errors: Arc<RwLock<HashMap<String, FetchError>>>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    /// Name to return from name() method
    connector_name: &'static str,
}

impl MockConnector {
    /// Create a new mock connector with no objects
    pub fn new() -> Self {
        Self::from_objects(Vec::new())
    }

    /// Create a mock connector serving `objects`
    pub fn from_objects(objects: Vec<MockObject>) -> Self {
        Self {
            objects: Arc::new(RwLock::new(objects)),
            schema_errors: Arc::new(RwLock::new(HashMap::new())),
            object_errors: Arc::new(RwLock::new(HashMap::new())),
            describe_errors: Arc::new(RwLock::new(HashMap::new())),
            fail_connection: false,
            latency_ms: 0,
            connector_name: "Mock",
        }
    }

    /// Load objects from a JSON array of `{schema, name, kind, arguments?, ddl}`
    pub fn from_json(json: &str) -> Result<Self, FetchError> {
        let objects: Vec<MockObject> = serde_json::from_str(json)
            .map_err(|e| FetchError::InvalidResponse(format!("Invalid mock catalog: {}", e)))?;
        Ok(Self::from_objects(objects))
    }

    /// The demo database used by `--test` runs (database `MOCK_DB`, schema `MY_SCHEMA`)
    pub fn demo() -> Self {
        MockConnectorBuilder::new()
            .with_object(
                "MY_SCHEMA",
                "BASE_CUSTOMERS",
                ObjectKind::Table,
                r#"CREATE OR REPLACE TABLE "MOCK_DB"."MY_SCHEMA"."BASE_CUSTOMERS" (ID INT, NAME VARCHAR);"#,
            )
            .with_object(
                "MY_SCHEMA",
                "BASE_ORDERS",
                ObjectKind::Table,
                r#"CREATE TABLE "MOCK_DB"."MY_SCHEMA"."BASE_ORDERS" (ORDER_ID INT, CUSTOMER_ID INT, AMOUNT DECIMAL, EXTRA_COL INT);"#,
            )
            .with_object(
                "MY_SCHEMA",
                "RESERVED_KEYWORD_TEST",
                ObjectKind::Table,
                r#"CREATE TABLE "MOCK_DB"."MY_SCHEMA"."RESERVED_KEYWORD_TEST" ("ORDER" INT);"#,
            )
            .with_object(
                "MY_SCHEMA",
                "ENRICHED_ORDERS",
                ObjectKind::View,
                r#"create or replace view "MOCK_DB"."MY_SCHEMA"."ENRICHED_ORDERS" as select o.*, c.name from "MOCK_DB"."MY_SCHEMA"."BASE_ORDERS" as o join "MOCK_DB"."MY_SCHEMA"."BASE_CUSTOMERS" as c on o.customer_id = c.id;"#,
            )
            .with_object(
                "MY_SCHEMA",
                "AGG_CUSTOMER_ORDERS",
                ObjectKind::View,
                r#"CREATE VIEW "MOCK_DB"."MY_SCHEMA"."AGG_CUSTOMER_ORDERS" AS SELECT CUSTOMER_ID, COUNT(*) FROM "MOCK_DB"."MY_SCHEMA"."ENRICHED_ORDERS" GROUP BY 1;"#,
            )
            .with_object(
                "MY_SCHEMA",
                "FUNCTION_TEST_VIEW",
                ObjectKind::View,
                r#"CREATE VIEW "MOCK_DB"."MY_SCHEMA"."FUNCTION_TEST_VIEW" AS SELECT SUM(AMOUNT) FROM "MOCK_DB"."MY_SCHEMA"."BASE_ORDERS";"#,
            )
            .with_object(
                "MY_SCHEMA",
                "DYNAMIC_TABLE_TEST",
                ObjectKind::DynamicTable,
                r#"CREATE OR replace transient dynamic table "MOCK_DB"."MY_SCHEMA"."DYNAMIC_TABLE_TEST" LAG = '1 MINUTE' WAREHOUSE = 'MY_WH' AS SELECT * FROM "MOCK_DB"."MY_SCHEMA"."BASE_ORDERS";"#,
            )
            .build()
    }

    /// Add an object served by `list_objects` and `fetch_ddl`
    pub async fn add_object(&self, entry: CatalogEntry, ddl: impl Into<String>) {
        self.objects.write().await.push(MockObject::new(entry, ddl));
    }

    /// Set the columns `describe_columns` reports for every object named `schema.name`
    pub async fn set_columns(&self, schema: &str, name: &str, columns: Vec<ColumnDescription>) {
        set_columns(&mut self.objects.write().await, schema, name, columns);
    }

    /// Configure an error to be returned when listing a schema
    pub async fn add_error_for_schema(&self, schema: &str, error: FetchError) {
        self.schema_errors
            .write()
            .await
            .insert(schema.to_uppercase(), error);
    }

    /// Configure an error to be returned when fetching one object's DDL
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// connector.add_error_for_object(
    ///     &CatalogEntry::new("SALES", "RESTRICTED", ObjectKind::Table),
    ///     FetchError::PermissionDenied("Access denied".to_string()),
    /// ).await;
    /// ```
    pub async fn add_error_for_object(&self, entry: &CatalogEntry, error: FetchError) {
        self.object_errors
            .write()
            .await
            .insert(entry_key(entry), error);
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom connector name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.connector_name = name;
        self
    }

    /// Get the number of objects served
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Remove all objects and configured errors
    pub async fn clear(&self) {
        self.objects.write().await.clear();
        self.schema_errors.write().await.clear();
        self.object_errors.write().await.clear();
        self.describe_errors.write().await.clear();
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockConnector {
    fn clone(&self) -> Self {
        Self {
            objects: Arc::clone(&self.objects),
            schema_errors: Arc::clone(&self.schema_errors),
            object_errors: Arc::clone(&self.object_errors),
            describe_errors: Arc::clone(&self.describe_errors),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            connector_name: self.connector_name,
        }
    }
}

#[async_trait::async_trait]
impl CatalogConnector for MockConnector {
    fn name(&self) -> &'static str {
        self.connector_name
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.simulate_latency().await;

        if self.fail_connection {
            return Err(FetchError::NetworkError(
                "Mock connection failure (simulated)".to_string(),
            ));
        }

        Ok(())
    }

    async fn list_schemas(&self, _database: &str) -> Result<Vec<String>, FetchError> {
        self.simulate_latency().await;

        let objects = self.objects.read().await;
        let errors = self.schema_errors.read().await;
        let schemas: BTreeSet<String> = objects
            .iter()
            .map(|o| o.entry.schema.to_uppercase())
            .chain(errors.keys().cloned())
            .collect();

        Ok(schemas.into_iter().collect())
    }

    async fn list_objects(&self, _database: &str, schema: &str) -> Result<Vec<CatalogEntry>, FetchError> {
        self.simulate_latency().await;

        if let Some(error) = self.schema_errors.read().await.get(&schema.to_uppercase()) {
            return Err(error.clone());
        }

        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|o| o.entry.schema.eq_ignore_ascii_case(schema))
            .map(|o| o.entry.clone())
            .collect())
    }

    async fn fetch_ddl(&self, database: &str, entry: &CatalogEntry) -> Result<String, FetchError> {
        self.simulate_latency().await;

        if let Some(error) = self.object_errors.read().await.get(&entry_key(entry)) {
            return Err(error.clone());
        }

        self.objects
            .read()
            .await
            .iter()
            .find(|o| same_object(&o.entry, entry))
            .map(|o| o.ddl.clone())
            .ok_or_else(|| FetchError::ObjectNotFound(entry.ddl_identifier(database)))
    }

    async fn describe_columns(
        &self,
        database: &str,
        entry: &CatalogEntry,
    ) -> Result<Vec<ColumnDescription>, FetchError> {
        self.simulate_latency().await;

        if let Some(error) = self.describe_errors.read().await.get(&entry_key(entry)) {
            return Err(error.clone());
        }

        self.objects
            .read()
            .await
            .iter()
            .find(|o| same_object(&o.entry, entry))
            .map(|o| o.columns.clone())
            .ok_or_else(|| FetchError::ObjectNotFound(entry.ddl_identifier(database)))
    }
}

fn set_columns(objects: &mut [MockObject], schema: &str, name: &str, columns: Vec<ColumnDescription>) {
    for object in objects.iter_mut().filter(|o| {
        o.entry.schema.eq_ignore_ascii_case(schema) && o.entry.name.eq_ignore_ascii_case(name)
    }) {
        object.columns = columns.clone();
    }
}

/// Builder for creating mock connectors with predefined objects
///
/// # Example
///
/// ```rust,ignore
/// let connector = MockConnectorBuilder::new()
///     .with_object("SALES", "ORDERS", ObjectKind::Table, "CREATE TABLE SALES.ORDERS (ID INT);")
///     .with_latency(50)
///     .build();
/// ```
pub struct MockConnectorBuilder {
    objects: Vec<MockObject>,
    schema_errors: HashMap<String, FetchError>,
    object_errors: HashMap<String, FetchError>,
    describe_errors: HashMap<String, FetchError>,
    fail_connection: bool,
    latency_ms: u64,
    name: &'static str,
}

impl MockConnectorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            schema_errors: HashMap::new(),
            object_errors: HashMap::new(),
            describe_errors: HashMap::new(),
            fail_connection: false,
            latency_ms: 0,
            name: "Mock",
        }
    }

    /// Add an object
    pub fn with_object(mut self, schema: &str, name: &str, kind: ObjectKind, ddl: &str) -> Self {
        self.objects.push(MockObject::new(CatalogEntry::new(schema, name, kind), ddl));
        self
    }

    /// Columns reported when describing `schema.name`; add the object first
    pub fn with_columns(mut self, schema: &str, name: &str, columns: Vec<ColumnDescription>) -> Self {
        set_columns(&mut self.objects, schema, name, columns);
        self
    }

    /// Add one overload of a procedure or function
    pub fn with_overload(
        mut self,
        schema: &str,
        name: &str,
        kind: ObjectKind,
        arguments: &str,
        ddl: &str,
    ) -> Self {
        self.objects.push(MockObject::new(
            CatalogEntry::new(schema, name, kind).with_arguments(arguments),
            ddl,
        ));
        self
    }

    /// Fail listing of a schema
    pub fn with_schema_error(mut self, schema: &str, error: FetchError) -> Self {
        self.schema_errors.insert(schema.to_uppercase(), error);
        self
    }

    /// Fail DDL retrieval of one object
    pub fn with_object_error(mut self, entry: &CatalogEntry, error: FetchError) -> Self {
        self.object_errors.insert(entry_key(entry), error);
        self
    }

    /// Fail column description of one object
    pub fn with_describe_error(mut self, entry: &CatalogEntry, error: FetchError) -> Self {
        self.describe_errors.insert(entry_key(entry), error);
        self
    }

    /// Enable connection failure simulation
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Set simulated latency
    pub fn with_latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    /// Set connector name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Build the mock connector
    pub fn build(self) -> MockConnector {
        MockConnector {
            objects: Arc::new(RwLock::new(self.objects)),
            schema_errors: Arc::new(RwLock::new(self.schema_errors)),
            object_errors: Arc::new(RwLock::new(self.object_errors)),
            describe_errors: Arc::new(RwLock::new(self.describe_errors)),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            connector_name: self.name,
        }
    }
}

impl Default for MockConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
