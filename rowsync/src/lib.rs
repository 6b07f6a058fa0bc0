//! # rowsync
//!
//! Schema-synchronizing relational persistence for flat records.
//!
//! rowsync stores periodically reported records (metric samples, profiler
//! snapshots, anything that flattens to name/value pairs) in a relational
//! table that is derived from the record's shape. It creates the table,
//! writes each record as a single insert-or-update, reads rows back into
//! records, and purges data older than a retention horizon one day at a
//! time.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Table layout derived from a declared record shape, no runtime reflection
//! - One upsert statement per write; null fields never overwrite stored values
//! - Byte-stable MySQL statement text, plus an embedded SQLite backend
//! - Day-granular retention by hash partition or by time range
//! - One lazily opened connection per manager, dropped on write failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rowsync::{ConnectionManager, FieldType, RecordShape, TableDao, TableSpec};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = TableSpec::new(
//!     "cpuAndMemoryProfiler",
//!     RecordShape::new([
//!         ("epochMillis", FieldType::BigInt),
//!         ("host", FieldType::String),
//!         ("processCpuLoad", FieldType::Double),
//!     ]),
//! )
//! .with_primary_keys(["epochMillis", "host"])
//! .with_timestamp_columns(["epochMillis"]);
//!
//! let dao = TableDao::new(ConnectionManager::new(None, "sqlite:./metrics.db")?, spec);
//! dao.create_table(false)?;
//! dao.insert_or_update(r#"{"epochMillis": 1535651091000, "host": "h1", "processCpuLoad": 0.5}"#)?;
//! println!("{} rows", dao.total_count()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`TableDao`]: Per-table façade for creating, writing, reading, and purging
//! - [`TableReporter`]: Configuration-driven entry point for producers
//! - [`ConnectionManager`]: Shared, lazily opened store connection
//! - [`TableSpec`]: Declared layout of a table
//!
//! ## Modules
//!
//! - [`types`]: Field-to-column type mapping
//! - [`record`]: Records, record shapes, input normalization
//! - [`connection`]: Driver and connection abstraction, connection manager
//! - [`dialect`]: SQL text synthesis
//! - [`schema`]: Table layout synthesis, DDL, and discovery
//! - [`writer`]: Insert-or-update writer
//! - [`materialize`]: Result rows back into records
//! - [`retention`]: Retention policy and delete planning
//! - [`dao`]: Table-level façade
//! - [`config`]: Store configuration
//! - [`reporter`]: Reporting entry point
//! - [`timestamp`]: Timestamp coercion
//! - [`error`]: Error types

pub mod config;
pub mod connection;
pub mod dao;
pub mod dialect;
pub mod error;
pub mod materialize;
pub mod record;
pub mod reporter;
pub mod retention;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod timestamp;
pub mod types;
pub mod value;
pub mod writer;

#[cfg(test)]
mod testing;

// Re-export primary API types at crate root for convenience.
pub use config::StoreConfig;
pub use connection::{Connection, ConnectionManager, Driver, DriverRegistry, Param, ResultSet};
pub use dao::TableDao;
pub use dialect::Dialect;
pub use error::{ErrorKind, Result, RowsyncError};
pub use record::{Entity, Record, RecordInput, RecordShape};
pub use reporter::TableReporter;
pub use retention::RetentionPolicy;
pub use schema::{TableSchema, TableSpec};
pub use value::{FieldType, SqlValue, Value};
pub use writer::UpsertWriter;
