//! Store configuration.
//!
//! Every setting is optional and has a documented default, except the
//! connection string which is required before a connection can be made.
//! Configuration can be built three ways: in code, from a JSON file, or from
//! an agent-style argument map (`key -> [values]`).
//!
//! ```json
//! {
//!   "connection_string": "sqlite:/var/lib/rowsync/metrics.db",
//!   "table_name": "cpuAndMemoryProfiler",
//!   "table_partition": false,
//!   "data_retention": 604800,
//!   "data_cleanup_interval": 3600
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::error::{ConfigError, Result};
use crate::retention::RetentionPolicy;

/// Argument key for the driver name.
pub const ARG_DRIVER: &str = "driverClass";
/// Argument key for the connection string.
pub const ARG_CONNECTION_STRING: &str = "connectionString";
/// Argument key for the table name.
pub const ARG_TABLE_NAME: &str = "tableName";
/// Argument key for the partitioning flag.
pub const ARG_TABLE_PARTITION: &str = "tablePartition";
/// Argument key for the retention horizon, in seconds.
pub const ARG_DATA_RETENTION: &str = "dataRetention";
/// Argument key for the cleanup interval, in seconds.
pub const ARG_DATA_CLEANUP_INTERVAL: &str = "dataCleanupInterval";

/// Default table name.
pub const DEFAULT_TABLE_NAME: &str = "records";
/// Default retention horizon: 7 days.
pub const DEFAULT_DATA_RETENTION_SECS: u64 = 7 * 24 * 3600;
/// Default cleanup interval: 1 hour.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
/// Longest accepted retention horizon: 36,500 days.
pub const MAX_DATA_RETENTION_SECS: u64 = 36_500 * 24 * 3600;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Registered driver name. `None` picks the driver from the connection
    /// string.
    pub driver: Option<String>,
    /// Store connection string.
    pub connection_string: Option<String>,
    /// Table name.
    pub table_name: String,
    /// Whether tables are hash-partitioned by day and purged by partition.
    pub table_partition: bool,
    /// Retention horizon in seconds. Only whole days count.
    pub data_retention: u64,
    /// Minimum seconds between cleanup cycles.
    pub data_cleanup_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: None,
            connection_string: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            table_partition: true,
            data_retention: DEFAULT_DATA_RETENTION_SECS,
            data_cleanup_interval: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

fn single_value<'a>(args: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    args.get(key)?
        .iter()
        .rev()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

fn parse_bool(key: &str, value: &str) -> std::result::Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_secs(key: &str, value: &str) -> std::result::Result<u64, ConfigError> {
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: format!("expected a number of seconds: {e}"),
    })
}

fn check_retention(key: &str, secs: u64) -> std::result::Result<u64, ConfigError> {
    if secs > MAX_DATA_RETENTION_SECS {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: secs.to_string(),
            reason: format!("retention must not exceed {MAX_DATA_RETENTION_SECS} seconds"),
        });
    }
    Ok(secs)
}

impl StoreConfig {
    /// Creates a default configuration with a connection string.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Self::default()
        }
    }

    /// Builds a configuration from an argument map on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed values.
    pub fn from_args(args: &HashMap<String, Vec<String>>) -> std::result::Result<Self, ConfigError> {
        let mut config = Self::default();
        config.update_from_args(args)?;
        Ok(config)
    }

    /// Applies the non-empty entries of an argument map. When a key has
    /// several values the last non-empty one wins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed values. Nothing
    /// is changed in that case.
    pub fn update_from_args(
        &mut self,
        args: &HashMap<String, Vec<String>>,
    ) -> std::result::Result<(), ConfigError> {
        let mut next = self.clone();
        if let Some(value) = single_value(args, ARG_DRIVER) {
            next.driver = Some(value.to_string());
            tracing::info!("Got argument value for {ARG_DRIVER}: {value}");
        }
        if let Some(value) = single_value(args, ARG_CONNECTION_STRING) {
            next.connection_string = Some(value.to_string());
            tracing::info!("Got argument value for {ARG_CONNECTION_STRING}: {value}");
        }
        if let Some(value) = single_value(args, ARG_TABLE_NAME) {
            next.table_name = value.to_string();
            tracing::info!("Got argument value for {ARG_TABLE_NAME}: {value}");
        }
        if let Some(value) = single_value(args, ARG_TABLE_PARTITION) {
            next.table_partition = parse_bool(ARG_TABLE_PARTITION, value)?;
            tracing::info!("Got argument value for {ARG_TABLE_PARTITION}: {value}");
        }
        if let Some(value) = single_value(args, ARG_DATA_RETENTION) {
            next.data_retention =
                check_retention(ARG_DATA_RETENTION, parse_secs(ARG_DATA_RETENTION, value)?)?;
            tracing::info!("Got argument value for {ARG_DATA_RETENTION}: {value}");
        }
        if let Some(value) = single_value(args, ARG_DATA_CLEANUP_INTERVAL) {
            next.data_cleanup_interval = parse_secs(ARG_DATA_CLEANUP_INTERVAL, value)?;
            tracing::info!("Got argument value for {ARG_DATA_CLEANUP_INTERVAL}: {value}");
        }
        *self = next;
        Ok(())
    }

    /// Loads a configuration from a JSON file. Missing keys take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] or [`ConfigError::FileParse`].
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::FileParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Checks that the configuration can be used to connect.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the connection string or table name is
    /// missing, or the retention exceeds [`MAX_DATA_RETENTION_SECS`].
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self
            .connection_string
            .as_deref()
            .is_none_or(|s| s.trim().is_empty())
        {
            return Err(ConfigError::MissingConnectionString);
        }
        if self.table_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "table_name".to_string(),
                value: self.table_name.clone(),
                reason: "table name must not be empty".to_string(),
            });
        }
        check_retention("data_retention", self.data_retention)?;
        Ok(())
    }

    /// Creates a connection manager for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn connection_manager(&self) -> Result<ConnectionManager> {
        self.validate()?;
        ConnectionManager::new(
            self.driver.as_deref(),
            self.connection_string.as_deref().unwrap_or_default(),
        )
    }

    /// The retention policy described by this configuration.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention: Duration::from_secs(self.data_retention),
            cleanup_interval: Duration::from_secs(self.data_cleanup_interval),
            use_partition: self.table_partition,
        }
    }
}
