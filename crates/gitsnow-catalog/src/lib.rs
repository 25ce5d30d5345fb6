//! Live catalog access for gitsnow
//!
//! This crate enumerates a live database through a [`CatalogConnector`] and
//! captures a read-only [`DatabaseSnapshot`] of every object's DDL.
//!
//! ## Features
//!
//! Enable warehouse support via Cargo features:
//! - `snowflake` - Snowflake support
//!
//! Without it, [`MockConnector`] is the only working connector.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gitsnow_catalog::{capture_snapshot, MockConnector};
//!
//! let connector = MockConnector::demo();
//! let capture = capture_snapshot(&connector, "MOCK_DB", None, &config.catalog, &config.dialect).await?;
//! println!("{} live objects", capture.snapshot.len());
//! ```

pub mod adapter;
pub mod ddl;
pub mod mock;
pub mod snapshot;
pub mod snowflake;

pub use adapter::{CatalogConnector, CatalogEntry, ColumnDescription, FetchError};
pub use ddl::{expand_dynamic_table_columns, fixup_ddl, has_dynamic_table_columns, is_failed_ddl, signature_key};
pub use mock::{MockConnector, MockConnectorBuilder, MockObject};
pub use snapshot::{capture_snapshot, DatabaseSnapshot, LiveObject, SnapshotCapture, SnapshotError};
pub use snowflake::{SnowflakeConnector, SnowflakeConnectorBuilder, SnowflakeCredentials};
