//! Integration tests for catalog connectors and snapshot capture
//!
//! Tests requiring actual warehouse credentials are marked with `#[ignore]`
//! and can be run with `cargo test -- --ignored`.
//!
//! ```bash
//! # Run all non-ignored tests (no credentials required)
//! cargo test -p gitsnow-catalog --test integration_tests
//!
//! # Run Snowflake integration tests
//! SNOWFLAKE_ACCOUNT=xy12345 \
//! SNOWFLAKE_USER=user \
//! SNOWFLAKE_PASSWORD=pass \
//! SNOWFLAKE_DATABASE=MY_DB \
//! cargo test -p gitsnow-catalog --features snowflake --test integration_tests -- --ignored
//! ```

use gitsnow_catalog::{
    capture_snapshot, CatalogConnector, CatalogEntry, ColumnDescription, FetchError, MockConnector,
    MockConnectorBuilder, SnapshotError,
};
use gitsnow_core::{CatalogConfig, DiagnosticCode, DialectConfig, ObjectKind, ObjectName};
use pretty_assertions::assert_eq;

fn has_snowflake_credentials() -> bool {
    std::env::var("SNOWFLAKE_ACCOUNT").is_ok()
}

#[tokio::test]
async fn test_demo_snapshot_strips_database_qualifier() {
    let connector = MockConnector::demo();
    let capture = capture_snapshot(
        &connector,
        "MOCK_DB",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await
    .unwrap();

    assert!(capture.diagnostics.is_empty());
    assert_eq!(capture.snapshot.len(), 7);

    let customers = capture
        .snapshot
        .find(&ObjectName::new("MY_SCHEMA", "BASE_CUSTOMERS"), None)
        .unwrap();
    assert_eq!(
        customers.ddl,
        r#"CREATE OR REPLACE TABLE "MY_SCHEMA"."BASE_CUSTOMERS" (ID INT, NAME VARCHAR);"#
    );

    let dynamic = ObjectName::new("my_schema", "dynamic_table_test");
    assert_eq!(capture.snapshot.kind_of(&dynamic), Some(ObjectKind::DynamicTable));
}

#[tokio::test]
async fn test_connection_failure_is_fatal() {
    let connector = MockConnector::demo().with_connection_failure();
    let result = capture_snapshot(
        &connector,
        "MOCK_DB",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await;

    assert!(matches!(result, Err(SnapshotError::Connection { connector: "Mock", .. })));
}

#[tokio::test]
async fn test_ignored_database_is_rejected() {
    let connector = MockConnector::demo();
    let result = capture_snapshot(
        &connector,
        "snowflake",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await;

    assert!(matches!(result, Err(SnapshotError::DatabaseIgnored(_))));
}

#[tokio::test]
async fn test_object_failures_are_skipped_with_diagnostics() {
    let restricted = CatalogEntry::new("SALES", "PAYROLL", ObjectKind::Table);
    let connector = MockConnectorBuilder::new()
        .with_object("SALES", "ORDERS", ObjectKind::Table, "CREATE TABLE DB.SALES.ORDERS (ID INT);")
        .with_object("SALES", "PAYROLL", ObjectKind::Table, "CREATE TABLE DB.SALES.PAYROLL (ID INT);")
        .with_object("SALES", "BROKEN", ObjectKind::View, "-- Failed to get DDL for view BROKEN")
        .with_object("PUBLIC", "IGNORED", ObjectKind::Table, "CREATE TABLE DB.PUBLIC.IGNORED (ID INT);")
        .with_object_error(
            &restricted,
            FetchError::PermissionDenied("Access denied to PAYROLL".to_string()),
        )
        .with_schema_error("LOCKED", FetchError::PermissionDenied("no usage".to_string()))
        .build();

    let capture = capture_snapshot(
        &connector,
        "DB",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await
    .unwrap();

    let names: Vec<String> = capture.snapshot.iter().map(|o| o.name.to_string()).collect();
    assert_eq!(names, vec!["SALES.ORDERS"]);
    assert_eq!(
        capture.snapshot.iter().next().unwrap().ddl,
        "CREATE TABLE SALES.ORDERS (ID INT);"
    );

    let codes: Vec<DiagnosticCode> = capture.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(
        codes,
        vec![
            DiagnosticCode::CatalogSchemaSkipped,
            DiagnosticCode::CatalogObjectSkipped,
            DiagnosticCode::CatalogObjectSkipped,
        ]
    );
    assert_eq!(capture.diagnostics[0].object.as_deref(), Some("LOCKED"));
}

#[tokio::test]
async fn test_explicit_schema_list() {
    let connector = MockConnectorBuilder::new()
        .with_object("A", "T", ObjectKind::Table, "CREATE TABLE A.T (ID INT);")
        .with_object("B", "T", ObjectKind::Table, "CREATE TABLE B.T (ID INT);")
        .build();

    let capture = capture_snapshot(
        &connector,
        "DB",
        Some(&["B".to_string()]),
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await
    .unwrap();

    assert_eq!(capture.snapshot.schemas().into_iter().collect::<Vec<_>>(), vec!["B"]);
}

#[tokio::test]
async fn test_overloads_are_captured_per_signature() {
    let connector = MockConnectorBuilder::new()
        .with_overload(
            "OPS",
            "REFRESH",
            ObjectKind::Procedure,
            "(VARCHAR)",
            r#"CREATE OR REPLACE PROCEDURE "DB"."OPS"."REFRESH"("P_DAY" VARCHAR) RETURNS VARCHAR LANGUAGE SQL AS 'select 1';"#,
        )
        .with_overload(
            "OPS",
            "REFRESH",
            ObjectKind::Procedure,
            "(VARCHAR, NUMBER)",
            r#"CREATE OR REPLACE PROCEDURE "DB"."OPS"."REFRESH"("P_DAY" VARCHAR, "P_LIMIT" NUMBER(38,0)) RETURNS VARCHAR LANGUAGE SQL AS 'select 2';"#,
        )
        .build();

    let capture = capture_snapshot(
        &connector,
        "DB",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await
    .unwrap();

    let name = ObjectName::new("OPS", "REFRESH");
    assert_eq!(capture.snapshot.get(&name).len(), 2);

    let two_args = capture.snapshot.find(&name, Some("(STRING, INT)")).unwrap();
    assert!(two_args.ddl.ends_with("'select 2';"));
    assert!(two_args.ddl.starts_with(r#"CREATE OR REPLACE PROCEDURE "OPS"."REFRESH""#));

    assert!(capture.snapshot.find(&name, Some("(DATE)")).is_none());
}

const DYNAMIC_DDL: &str = "create or replace dynamic table \"DB\".\"MART\".\"DAILY\"(\n\tDAY,\n\tTOTAL\n) target_lag = '1 hour' refresh_mode = AUTO initialize = ON_CREATE warehouse = WH\n as select day, sum(amount) as total from mart.orders group by 1;";

#[tokio::test]
async fn test_dynamic_table_columns_are_typed() {
    let connector = MockConnectorBuilder::new()
        .with_object("MART", "DAILY", ObjectKind::DynamicTable, DYNAMIC_DDL)
        .with_columns(
            "MART",
            "DAILY",
            vec![
                ColumnDescription::new("DAY", "DATE").not_null(),
                ColumnDescription::new("TOTAL", "NUMBER(38,0)").with_comment("sum of amounts"),
            ],
        )
        .build();

    let capture = capture_snapshot(
        &connector,
        "DB",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await
    .unwrap();

    assert!(capture.diagnostics.is_empty());
    let daily = capture.snapshot.find(&ObjectName::new("MART", "DAILY"), None).unwrap();
    assert_eq!(
        daily.ddl,
        "create or replace dynamic table \"MART\".\"DAILY\"(\n    DAY DATE NOT NULL,\n    TOTAL INTEGER COMMENT 'sum of amounts'\n) target_lag = '1 hour' refresh_mode = AUTO initialize = ON_CREATE warehouse = WH\n as select day, sum(amount) as total from mart.orders group by 1;"
    );
}

#[tokio::test]
async fn test_undescribed_dynamic_table_keeps_its_ddl() {
    let entry = CatalogEntry::new("MART", "DAILY", ObjectKind::DynamicTable);
    let connector = MockConnectorBuilder::new()
        .with_object("MART", "DAILY", ObjectKind::DynamicTable, DYNAMIC_DDL)
        .with_describe_error(&entry, FetchError::PermissionDenied("no describe".to_string()))
        .build();

    let capture = capture_snapshot(
        &connector,
        "DB",
        None,
        &CatalogConfig::default(),
        &DialectConfig::Snowflake,
    )
    .await
    .unwrap();

    let daily = capture.snapshot.find(&ObjectName::new("MART", "DAILY"), None).unwrap();
    assert!(daily.ddl.contains("(\n\tDAY,\n\tTOTAL\n)"));

    let codes: Vec<DiagnosticCode> = capture.diagnostics.iter().map(|d| d.code).collect();
    assert_eq!(codes, vec![DiagnosticCode::CatalogColumnsUndescribed]);
    assert_eq!(capture.diagnostics[0].object.as_deref(), Some("MART.DAILY"));
}

#[tokio::test]
async fn test_mock_latency_simulation() {
    let connector = MockConnector::new().with_latency(50);

    let start = std::time::Instant::now();
    let _ = connector.list_schemas("DB").await;
    assert!(start.elapsed().as_millis() >= 50);
}

#[tokio::test]
async fn test_default_fetch_ddls_preserves_order() {
    let connector = MockConnector::demo();
    let entries = vec![
        CatalogEntry::new("MY_SCHEMA", "BASE_ORDERS", ObjectKind::Table),
        CatalogEntry::new("MY_SCHEMA", "MISSING", ObjectKind::Table),
        CatalogEntry::new("MY_SCHEMA", "BASE_CUSTOMERS", ObjectKind::Table),
    ];

    let results = connector.fetch_ddls("MOCK_DB", &entries).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().unwrap().contains("BASE_ORDERS"));
    assert!(results[1].is_err());
    assert!(results[2].as_ref().unwrap().contains("BASE_CUSTOMERS"));
}

// =============================================================================
// Snowflake Integration Tests (require credentials)
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_snowflake_snapshot() {
    if !has_snowflake_credentials() {
        eprintln!("Skipping Snowflake test: no credentials available");
        return;
    }

    #[cfg(feature = "snowflake")]
    {
        use gitsnow_catalog::SnowflakeConnectorBuilder;

        let connector = SnowflakeConnectorBuilder::from_settings(&Default::default())
            .and_then(|b| b.build())
            .expect("Failed to create Snowflake connector");
        let database = std::env::var("SNOWFLAKE_DATABASE").expect("SNOWFLAKE_DATABASE must be set");

        let capture = capture_snapshot(
            &connector,
            &database,
            None,
            &CatalogConfig::default(),
            &DialectConfig::Snowflake,
        )
        .await
        .expect("Snapshot capture failed");

        println!("Captured {} objects from {}", capture.snapshot.len(), database);
    }

    #[cfg(not(feature = "snowflake"))]
    {
        eprintln!("Snowflake feature not enabled. Rebuild with --features snowflake");
    }
}
