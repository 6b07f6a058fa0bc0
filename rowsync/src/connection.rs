//! Store connections: driver traits, the driver registry, and the
//! connection manager.
//!
//! # Design
//!
//! A [`Driver`] opens [`Connection`]s for the connection strings it accepts.
//! The [`ConnectionManager`] owns at most one open connection, creates it on
//! first use, and replaces it transparently once it is closed or has been
//! invalidated after a failed write. Clones of a manager share the same
//! connection; the connection itself is guarded by an internal lock.
//!
//! ```rust,no_run
//! use rowsync::connection::ConnectionManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(None, "sqlite:/tmp/metrics.db")?;
//! let dialect = manager.with_connection(|conn| conn.dialect())?;
//! manager.close();
//! # let _ = dialect;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::dialect::Dialect;
use crate::error::{ConfigError, ConnectionError, DriverError, Result};
use crate::value::{SqlValue, Value};

/// A statement bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Bound as an opaque scalar.
    Value(Value),
    /// Bound as a store timestamp.
    Timestamp(DateTime<Utc>),
    /// Bound through a large-object handle.
    LargeText(String),
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Name and declared type of a result or table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name as reported by the store.
    pub name: String,
    /// Declared type name, empty if unknown.
    pub type_name: String,
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Result columns, in select order.
    pub columns: Vec<ColumnMeta>,
    /// Row values, one entry per column.
    pub rows: Vec<Vec<SqlValue>>,
}

/// Location of a table in store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Catalog (database) name, if the store reports one.
    pub catalog: Option<String>,
    /// Schema name, if the store reports one.
    pub schema: Option<String>,
    /// Table name as stored.
    pub name: String,
}

/// A secondary index reported by store metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// An open store connection.
///
/// All calls are synchronous and block until the store answers.
pub trait Connection: Send {
    /// SQL dialect spoken by this store.
    fn dialect(&self) -> Dialect;

    /// Returns `true` once the connection can no longer be used.
    fn is_closed(&self) -> bool;

    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the statement fails.
    fn execute(&mut self, sql: &str, params: &[Param]) -> std::result::Result<u64, DriverError>;

    /// Executes a query and returns all rows.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the statement fails.
    fn query(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> std::result::Result<ResultSet, DriverError>;

    /// Lists catalogs (databases) visible to the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if metadata cannot be read.
    fn catalogs(&mut self) -> std::result::Result<Vec<String>, DriverError>;

    /// Lists schemas within a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if metadata cannot be read.
    fn schemas(&mut self, catalog: &str) -> std::result::Result<Vec<String>, DriverError>;

    /// Lists tables. `None` for both arguments means the connection's
    /// default catalog.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if metadata cannot be read.
    fn tables(
        &mut self,
        catalog: Option<&str>,
        schema: Option<&str>,
    ) -> std::result::Result<Vec<TableRef>, DriverError>;

    /// Lists the columns of a table in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if metadata cannot be read.
    fn columns(&mut self, table: &TableRef) -> std::result::Result<Vec<ColumnMeta>, DriverError>;

    /// Lists the primary-key columns of a table in key order.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if metadata cannot be read.
    fn primary_keys(&mut self, table: &TableRef) -> std::result::Result<Vec<String>, DriverError>;

    /// Lists the secondary indexes of a table.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if metadata cannot be read.
    fn indexes(&mut self, _table: &TableRef) -> std::result::Result<Vec<IndexInfo>, DriverError> {
        Ok(Vec::new())
    }

    /// Closes the connection. Closing twice is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the store reports a failure on close.
    fn close(&mut self) -> std::result::Result<(), DriverError>;
}

/// Opens connections for one kind of store.
pub trait Driver: Send + Sync {
    /// Registry name of the driver.
    fn name(&self) -> &str;

    /// Returns `true` if this driver understands the connection string.
    fn accepts(&self, connection_string: &str) -> bool;

    /// Opens a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] if the store cannot be reached.
    fn connect(
        &self,
        connection_string: &str,
    ) -> std::result::Result<Box<dyn Connection>, DriverError>;
}

/// Named set of available drivers.
///
/// [`DriverRegistry::default`] contains the built-in SQLite driver when the
/// `sqlite` feature is enabled.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Creates a registry with no drivers.
    pub fn empty() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Adds a driver. A driver with the same name is replaced.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers
            .retain(|existing| !existing.name().eq_ignore_ascii_case(driver.name()));
        self.drivers.push(driver);
    }

    /// Looks up a driver by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|driver| driver.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Finds the first driver accepting a connection string.
    pub fn find_for(&self, connection_string: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|driver| driver.accepts(connection_string))
            .cloned()
    }

    /// Names of registered drivers.
    pub fn names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.name().to_string()).collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteDriver));
        registry
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

struct Shared {
    driver: Option<String>,
    connection_string: String,
    registry: DriverRegistry,
    connection: Mutex<Option<Box<dyn Connection>>>,
}

/// Lazily created, shared store connection.
///
/// Cloning is cheap; clones refer to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a manager using the default driver registry.
    ///
    /// No connection is opened until first use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingConnectionString`] if the connection
    /// string is empty.
    pub fn new(driver: Option<&str>, connection_string: &str) -> Result<Self> {
        Self::with_registry(driver, connection_string, DriverRegistry::default())
    }

    /// Creates a manager resolving drivers from `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingConnectionString`] if the connection
    /// string is empty.
    pub fn with_registry(
        driver: Option<&str>,
        connection_string: &str,
        registry: DriverRegistry,
    ) -> Result<Self> {
        if connection_string.trim().is_empty() {
            return Err(ConfigError::MissingConnectionString.into());
        }
        Ok(Self {
            shared: Arc::new(Shared {
                driver: driver
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
                connection_string: connection_string.to_string(),
                registry,
                connection: Mutex::new(None),
            }),
        })
    }

    /// The configured connection string.
    pub fn connection_string(&self) -> &str {
        &self.shared.connection_string
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Connection>>> {
        self.shared
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_driver(&self) -> Result<Arc<dyn Driver>> {
        let connection_string = &self.shared.connection_string;
        let driver = match &self.shared.driver {
            Some(name) => self
                .shared
                .registry
                .get(name)
                .ok_or_else(|| ConnectionError::UnknownDriver {
                    driver: name.clone(),
                })?,
            None => self
                .shared
                .registry
                .find_for(connection_string)
                .ok_or_else(|| ConfigError::InvalidConnectionString {
                    connection_string: connection_string.clone(),
                    reason: format!(
                        "no registered driver accepts it (registered: {})",
                        self.shared.registry.names().join(", ")
                    ),
                })?,
        };
        if !driver.accepts(connection_string) {
            return Err(ConfigError::InvalidConnectionString {
                connection_string: connection_string.clone(),
                reason: format!("not accepted by driver '{}'", driver.name()),
            }
            .into());
        }
        Ok(driver)
    }

    /// Runs `f` with the shared connection, opening it first if there is no
    /// open connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the driver is unknown or the connection
    /// cannot be opened, and [`ConfigError`] if the connection string is
    /// rejected.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut dyn Connection) -> T) -> Result<T> {
        let mut guard = self.lock();
        if guard.as_ref().is_none_or(|conn| conn.is_closed()) {
            let driver = self.resolve_driver()?;
            tracing::debug!(driver = driver.name(), "opening store connection");
            let conn = driver.connect(&self.shared.connection_string).map_err(|source| {
                ConnectionError::Open {
                    connection_string: self.shared.connection_string.clone(),
                    source,
                }
            })?;
            *guard = Some(conn);
        }
        match guard.as_mut() {
            Some(conn) => Ok(f(conn.as_mut())),
            None => Err(ConnectionError::Open {
                connection_string: self.shared.connection_string.clone(),
                source: DriverError::Closed,
            }
            .into()),
        }
    }

    /// Returns `true` if a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.lock().as_ref().is_some_and(|conn| !conn.is_closed())
    }

    /// Closes and drops the shared connection. The next call to
    /// [`ConnectionManager::with_connection`] reconnects. Idempotent.
    pub fn close(&self) {
        if let Some(mut conn) = self.lock().take()
            && let Err(e) = conn.close()
        {
            tracing::warn!("failed to close store connection: {e}");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("driver", &self.shared.driver)
            .field("connection_string", &self.shared.connection_string)
            .field("connected", &self.is_connected())
            .finish()
    }
}
