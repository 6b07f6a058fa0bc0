//! Table-level access: writes, reads, and retention for one table.
//!
//! A [`TableDao`] composes the schema synchronizer, the upsert writer, the
//! result materializer, and the retention planner behind one handle. Writes
//! and cleanup cycles on the same DAO run one at a time under a DAO-scoped
//! lock. Reads go straight to the shared connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use rowsync::connection::ConnectionManager;
//! use rowsync::dao::TableDao;
//! use rowsync::record::RecordShape;
//! use rowsync::schema::TableSpec;
//! use rowsync::value::{FieldType, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = TableSpec::new(
//!     "users",
//!     RecordShape::new([("id", FieldType::BigInt), ("name", FieldType::String)]),
//! )
//! .with_primary_keys(["id"]);
//!
//! let manager = ConnectionManager::new(None, "sqlite:/tmp/users.db")?;
//! let dao = TableDao::new(manager, spec);
//! dao.create_table(false)?;
//! dao.insert_or_update(r#"{"id": 1, "name": "a"}"#)?;
//! let row = dao.get_by_primary_key(1i64)?;
//! assert_eq!(row.and_then(|r| r.get("name").cloned()), Some(Value::from("a")));
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::connection::{ConnectionManager, Param, ResultSet};
use crate::dialect::Dialect;
use crate::error::{ConfigError, DriverError, QueryError, Result};
use crate::materialize::{materialize, materialize_untyped, scalar_i64};
use crate::record::{Entity, Record, RecordInput};
use crate::retention::{DeleteTarget, RetentionPolicy, RetentionState, plan_deletes};
use crate::schema::{self, TableSchema, TableSpec};
use crate::timestamp;
use crate::value::Value;
use crate::writer::UpsertWriter;

/// Maximum rows returned by [`TableDao::query_columns`] when the caller
/// passes zero.
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

#[derive(Debug)]
struct DaoState {
    writer: UpsertWriter,
    retention: RetentionState,
}

/// Persistence handle for one table.
#[derive(Debug)]
pub struct TableDao {
    spec: TableSpec,
    manager: ConnectionManager,
    policy: RetentionPolicy,
    state: Mutex<DaoState>,
}

impl TableDao {
    /// Creates a DAO with the default retention policy. Nothing is sent to
    /// the store until the first operation.
    pub fn new(manager: ConnectionManager, spec: TableSpec) -> Self {
        let writer = UpsertWriter::from_spec(manager.clone(), &spec);
        Self {
            spec,
            manager,
            policy: RetentionPolicy::default(),
            state: Mutex::new(DaoState {
                writer,
                retention: RetentionState::default(),
            }),
        }
    }

    /// Replaces the retention policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fields the writer must never write.
    #[must_use]
    pub fn with_ignore_columns<S: Into<String>>(self, columns: impl IntoIterator<Item = S>) -> Self {
        let Self {
            spec,
            manager,
            policy,
            state,
        } = self;
        let mut state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        state.writer = UpsertWriter::from_spec(manager.clone(), &spec).with_ignore_columns(columns);
        Self {
            spec,
            manager,
            policy,
            state: Mutex::new(state),
        }
    }

    /// The table declaration.
    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// The table name.
    pub fn table(&self) -> &str {
        &self.spec.table
    }

    /// The retention policy.
    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// The shared connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    fn lock(&self) -> MutexGuard<'_, DaoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dialect(&self) -> Result<Dialect> {
        self.manager.with_connection(|conn| conn.dialect())
    }

    fn execute(&self, sql: &str, params: &[Param]) -> Result<u64> {
        tracing::debug!("Running sql: {sql}");
        let affected = self
            .manager
            .with_connection(|conn| conn.execute(sql, params))?
            .map_err(|source| QueryError::Execute {
                sql: sql.to_string(),
                source,
            })?;
        tracing::debug!("Finished sql: {sql}");
        Ok(affected)
    }

    fn query(&self, sql: &str, params: &[Param]) -> Result<ResultSet> {
        tracing::debug!("Running sql: {sql}");
        let result = self
            .manager
            .with_connection(|conn| conn.query(sql, params))?
            .map_err(|source| QueryError::Execute {
                sql: sql.to_string(),
                source,
            })?;
        tracing::debug!("Finished sql: {sql}");
        Ok(result)
    }

    /// Creates the table if it does not exist and caches its layout.
    ///
    /// This always issues DDL, so call it once per process, not per write.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout is invalid or the statement fails.
    pub fn create_table(&self, use_partition: bool) -> Result<TableSchema> {
        let schema = self
            .manager
            .with_connection(|conn| schema::create_table(conn, &self.spec, use_partition))??;
        self.lock().writer.set_schema(schema.clone());
        Ok(schema)
    }

    /// Reads the table layout from store metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be read.
    pub fn discover(&self) -> Result<Option<TableSchema>> {
        let table = self.table();
        Ok(self
            .manager
            .with_connection(|conn| schema::discover(conn, table))??)
    }

    /// Drops the cached layout; the next write reads it again.
    pub fn reinitialize(&self) {
        self.lock().writer.reinitialize();
    }

    /// Inserts a record, or updates the row with the same primary key.
    ///
    /// Null fields are not written, so they never erase stored values.
    /// Entities are written by passing `entity.to_record()`.
    ///
    /// # Errors
    ///
    /// See [`UpsertWriter::write`].
    pub fn insert_or_update<'a>(&self, input: impl Into<RecordInput<'a>>) -> Result<u64> {
        self.lock().writer.write(input)
    }

    /// Writes a record, then runs a cleanup cycle if one is due at `now`.
    ///
    /// Both steps run under the DAO lock.
    ///
    /// # Errors
    ///
    /// Returns the write error, or the cleanup error if the write succeeded
    /// and the cleanup failed. Both are logged.
    pub fn write_and_maintain<'a>(
        &self,
        input: impl Into<RecordInput<'a>>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.lock();
        let affected = state.writer.write(input).inspect_err(|e| {
            tracing::warn!(table = self.table(), "failed to write record: {e}");
        })?;
        self.cleanup_locked(&mut state, now).inspect_err(|e| {
            tracing::warn!(table = self.table(), "failed to clean up expired data: {e}");
        })?;
        Ok(affected)
    }

    /// Deletes the expired day if the cleanup interval has elapsed.
    ///
    /// Returns the number of deleted rows, or `None` if no cleanup was due.
    /// The last-cleanup time only advances when the delete succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the expiry day is out of range or the delete fails.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<Option<u64>> {
        let mut state = self.lock();
        self.cleanup_locked(&mut state, now)
    }

    fn cleanup_locked(&self, state: &mut DaoState, now: DateTime<Utc>) -> Result<Option<u64>> {
        if !state.retention.is_due(now, self.policy.cleanup_interval) {
            return Ok(None);
        }
        let day = self.policy.expiry_day(now)?;
        let deleted = self.delete_by_date_range(day, day, self.policy.use_partition)?;
        state.retention.mark_cleaned(now);
        tracing::info!(
            table = self.table(),
            "Deleted expired data of {} containing {deleted} rows",
            timestamp::format_iso_without_millis(day)
        );
        Ok(Some(deleted))
    }

    /// When the last cleanup cycle completed.
    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.lock().retention.last_cleanup()
    }

    /// Deletes all rows of one day partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has no partition key, the store has no
    /// partitions, or the statement fails.
    pub fn delete_by_partition(&self, day: u32) -> Result<u64> {
        let key = self
            .spec
            .partition_key
            .as_deref()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "partition_key".to_string(),
                value: String::new(),
                reason: format!("table '{}' is not partitioned", self.table()),
            })?;
        let dialect = self.dialect()?;
        let sql = dialect.delete_partition(self.table(), key, day).ok_or_else(|| {
            QueryError::Execute {
                sql: format!("DELETE FROM {} PARTITION(p{day})", self.table()),
                source: DriverError::Unsupported(format!("{dialect} has no partitions")),
            }
        })?;
        tracing::info!("Running sql to delete data: {sql}");
        self.execute(&sql, &[])
    }

    /// Deletes every day from `start` through `end`, both inclusive.
    ///
    /// Partitioned tables are cleared one partition per day; otherwise a
    /// single ranged delete on the retention column is issued.
    ///
    /// # Errors
    ///
    /// Returns an error if no delete can be planned or a statement fails.
    pub fn delete_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        use_partition: bool,
    ) -> Result<u64> {
        let target = DeleteTarget {
            table: self.table(),
            partition_key: self.spec.partition_key.as_deref(),
            retention_column: self.spec.retention_column(),
        };
        let plans = plan_deletes(self.dialect()?, target, start, end, use_partition)?;
        let mut total = 0;
        for plan in plans {
            tracing::info!("Running sql to delete data: {}", plan.sql());
            let deleted = self.execute(plan.sql(), &plan.params())?;
            tracing::info!("Deleted {deleted} rows with: {}", plan.sql());
            total += deleted;
        }
        Ok(total)
    }

    fn key_param(&self, key: &str, value: &Value) -> Result<Param> {
        if self.spec.is_timestamp(key) {
            Ok(Param::Timestamp(timestamp::to_date_time(key, value)?))
        } else {
            Ok(Param::Value(value.clone()))
        }
    }

    /// Reads the row whose single primary key equals `value`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::KeyArity`] if the table does not have exactly
    /// one primary key, or an error if the query fails.
    pub fn get_by_primary_key(&self, value: impl Into<Value>) -> Result<Option<Record>> {
        if self.spec.primary_keys.len() != 1 {
            return Err(QueryError::KeyArity {
                declared: self.spec.primary_keys.len(),
                provided: 1,
            }
            .into());
        }
        self.get_by_primary_keys(&[value.into()])
    }

    /// Reads the row matching the leading primary-key columns.
    ///
    /// Values pair up with the declared keys in order; timestamp keys are
    /// coerced like written values.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::KeyArity`] if no values or more values than
    /// keys are given, or an error if the query fails.
    pub fn get_by_primary_keys(&self, values: &[Value]) -> Result<Option<Record>> {
        let declared = self.spec.primary_keys.len();
        if values.is_empty() || values.len() > declared {
            return Err(QueryError::KeyArity {
                declared,
                provided: values.len(),
            }
            .into());
        }
        let keys = &self.spec.primary_keys[..values.len()];
        let params = keys
            .iter()
            .zip(values)
            .map(|(key, value)| self.key_param(key, value))
            .collect::<Result<Vec<_>>>()?;

        let sql = self.dialect()?.select_by_keys(self.table(), keys);
        let result = self.query(&sql, &params)?;
        Ok(materialize(result, &self.spec.fields)?.into_iter().next())
    }

    /// Reads a row by primary key into an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the row does not convert.
    pub fn get_entity<E: Entity>(&self, keys: &[Value]) -> Result<Option<E>> {
        match self.get_by_primary_keys(keys)? {
            Some(record) => Ok(Some(E::from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Reads up to `max_rows` rows of the given columns. An empty column
    /// list selects all columns; zero rows means [`DEFAULT_QUERY_LIMIT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_columns(&self, max_rows: usize, columns: &[&str]) -> Result<Vec<Record>> {
        let columns: &[&str] = if columns.is_empty() { &["*"] } else { columns };
        let limit = if max_rows == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            max_rows
        };
        let sql = self.dialect()?.select_columns(self.table(), columns, limit);
        Ok(materialize_untyped(self.query(&sql, &[])?))
    }

    /// Counts the rows of the table.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::EmptyResult`] if the store returns no count, or
    /// an error if the query fails.
    pub fn total_count(&self) -> Result<u64> {
        let sql = self.dialect()?.count(self.table());
        let result = self.query(&sql, &[])?;
        let count = scalar_i64(&result).ok_or(QueryError::EmptyResult { sql })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Executes an arbitrary statement and returns the affected row count.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Execute`] if the statement fails.
    pub fn execute_update(&self, sql: &str) -> Result<u64> {
        self.execute(sql, &[])
    }

    /// Executes an arbitrary query and returns its rows untyped.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Execute`] if the statement fails.
    pub fn execute_query(&self, sql: &str) -> Result<Vec<Record>> {
        Ok(materialize_untyped(self.query(sql, &[])?))
    }

    /// Closes the shared connection. The DAO reconnects on next use.
    pub fn close(&self) {
        self.manager.close();
    }
}
