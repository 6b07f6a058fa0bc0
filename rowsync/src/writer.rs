//! Insert-or-update writer for one table.
//!
//! Every write is a single statement. Null fields are dropped before the
//! statement is built, so a null can withhold a value but never erase one
//! that is already stored. Every remaining field is bound twice, once for
//! the insert values and once for the update clause.
//!
//! On the first write the table's layout is read from store metadata and
//! cached for the writer's lifetime. The cached layout decides which fields
//! bind as timestamps or large text (in addition to the declared flags) and,
//! for stores that need it, the conflict target of the upsert.
//!
//! When a statement fails the shared connection is closed so the next write
//! reconnects. There is no retry at this layer.

use crate::connection::{Connection, ConnectionManager, Param};
use crate::error::{RecordError, Result, RowsyncError, WriteError};
use crate::record::{Record, RecordInput, normalize};
use crate::schema::{self, TableSchema, TableSpec};
use crate::timestamp;
use crate::value::Value;

fn contains_ci(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Writes records into one table.
#[derive(Debug)]
pub struct UpsertWriter {
    manager: ConnectionManager,
    table: String,
    ignore_columns: Vec<String>,
    timestamp_columns: Vec<String>,
    text_columns: Vec<String>,
    schema: Option<TableSchema>,
}

impl UpsertWriter {
    /// Creates a writer with no column flags.
    pub fn new(manager: ConnectionManager, table: impl Into<String>) -> Self {
        Self {
            manager,
            table: table.into(),
            ignore_columns: Vec::new(),
            timestamp_columns: Vec::new(),
            text_columns: Vec::new(),
            schema: None,
        }
    }

    /// Creates a writer using the column flags of a table spec.
    pub fn from_spec(manager: ConnectionManager, spec: &TableSpec) -> Self {
        Self::new(manager, spec.table.clone())
            .with_timestamp_columns(spec.timestamp_columns.iter().cloned())
            .with_text_columns(spec.text_columns.iter().cloned())
    }

    /// Fields that are never written.
    #[must_use]
    pub fn with_ignore_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ignore_columns = columns.into_iter().map(Into::into).collect();
        for column in &self.ignore_columns {
            tracing::info!("Will ignore column: {column}");
        }
        self
    }

    /// Fields bound as timestamps.
    #[must_use]
    pub fn with_timestamp_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.timestamp_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Fields bound as large text.
    #[must_use]
    pub fn with_text_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.text_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// The target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The shared connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// The cached table layout, if it has been loaded.
    pub fn cached_schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    /// Replaces the cached layout, e.g. after creating the table.
    pub fn set_schema(&mut self, schema: TableSchema) {
        self.schema = Some(schema);
    }

    /// Drops the cached layout so the next write reads it again.
    pub fn reinitialize(&mut self) {
        self.schema = None;
    }

    /// Reads the table layout from store metadata unless already cached.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection can be obtained or metadata cannot
    /// be read.
    pub fn initialize(&mut self) -> Result<Option<&TableSchema>> {
        if self.schema.is_none() {
            let manager = self.manager.clone();
            let table = self.table.clone();
            self.schema = manager.with_connection(|conn| schema::discover(conn, &table))??;
        }
        Ok(self.schema.as_ref())
    }

    /// Normalizes and filters a record into the fields that will be written.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the input is malformed, or
    /// [`RecordError::Empty`] if no field is left.
    pub fn prepare<'a>(&self, input: impl Into<RecordInput<'a>>) -> Result<Record> {
        let mut record = normalize(input.into())?;
        record.retain_non_null();
        let record: Record = record
            .into_iter()
            .filter(|(name, _)| !contains_ci(&self.ignore_columns, name))
            .collect();
        if record.is_empty() {
            return Err(RecordError::Empty.into());
        }
        Ok(record)
    }

    /// Writes one record and returns the number of affected rows as
    /// reported by the store.
    ///
    /// # Errors
    ///
    /// - [`RecordError`] if the input is malformed or has no non-null field
    /// - [`WriteError`] if the statement fails; the connection is closed
    /// - a connection or metadata error if the table cannot be reached
    pub fn write<'a>(&mut self, input: impl Into<RecordInput<'a>>) -> Result<u64> {
        let record = self.prepare(input)?;
        let manager = self.manager.clone();
        let outcome = manager.with_connection(|conn| self.write_record(conn, &record))?;
        if let Err(RowsyncError::Write(e)) = &outcome {
            tracing::warn!("closing connection after failed write: {e}");
            manager.close();
        }
        outcome
    }

    fn write_record(&mut self, conn: &mut dyn Connection, record: &Record) -> Result<u64> {
        if self.schema.is_none() {
            self.schema = schema::discover(conn, &self.table)?;
        }
        let primary_keys = self
            .schema
            .as_ref()
            .map(|schema| schema.primary_keys.clone())
            .unwrap_or_default();

        let fields: Vec<&str> = record.iter().map(|(name, _)| name).collect();
        let upsert = conn.dialect().upsert(&self.table, &fields, &primary_keys);

        let mut params = Vec::with_capacity(record.len() * 2);
        for (name, value) in record.iter() {
            params.push(self.bind(name, value)?);
        }
        if upsert.binds_twice {
            params.extend_from_within(..);
        }

        tracing::debug!("Running sql: {}", upsert.sql);
        let affected = conn.execute(&upsert.sql, &params).map_err(|source| WriteError {
            table: self.table.clone(),
            sql: upsert.sql.clone(),
            source,
        })?;
        tracing::debug!("Finished sql: {}", upsert.sql);
        Ok(affected)
    }

    fn is_timestamp(&self, field: &str) -> bool {
        contains_ci(&self.timestamp_columns, field)
            || self.schema.as_ref().is_some_and(|s| s.is_datetime(field))
    }

    fn is_text(&self, field: &str) -> bool {
        contains_ci(&self.text_columns, field)
            || self.schema.as_ref().is_some_and(|s| s.is_large_text(field))
    }

    fn bind(&self, field: &str, value: &Value) -> Result<Param> {
        if self.is_timestamp(field) {
            return Ok(Param::Timestamp(timestamp::to_date_time(field, value)?));
        }
        if self.is_text(field) {
            let text = match value {
                Value::Text(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Param::LargeText(text));
        }
        Ok(Param::Value(value.clone()))
    }

    /// Closes the shared connection.
    pub fn close(&self) {
        self.manager.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ColumnMeta, TableRef};
    use crate::dialect::Dialect;
    use crate::error::ErrorKind;
    use crate::testing::{recording_manager, script};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_mysql_statement_and_double_binding() {
        let (manager, shared) = recording_manager(Dialect::MySql);
        let mut writer = UpsertWriter::new(manager, "metrics").with_timestamp_columns(["epochMillis"]);

        writer
            .write(r#"{"epochMillis": 1535651091, "name": "a", "tag": null}"#)
            .unwrap();

        let script = script(&shared);
        let (sql, params) = &script.executed[0];
        assert_eq!(
            sql,
            "INSERT INTO metrics (epochMillis, name) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE epochMillis=?, name=?"
        );
        let ts = Utc.with_ymd_and_hms(2018, 8, 30, 17, 44, 51).unwrap();
        assert_eq!(
            params,
            &vec![
                Param::Timestamp(ts),
                Param::Value(Value::from("a")),
                Param::Timestamp(ts),
                Param::Value(Value::from("a")),
            ]
        );
    }

    #[test]
    fn test_all_null_record_is_rejected_without_connecting() {
        let (manager, shared) = recording_manager(Dialect::MySql);
        let mut writer = UpsertWriter::new(manager, "metrics");
        let err = writer.write(r#"{"a": null, "b": null}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyRecord);
        assert_eq!(script(&shared).opened, 0);
    }

    #[test]
    fn test_ignored_columns_are_dropped() {
        let (manager, shared) = recording_manager(Dialect::MySql);
        let mut writer = UpsertWriter::new(manager, "t").with_ignore_columns(["SECRET"]);
        writer.write(r#"{"id": 1, "secret": "x"}"#).unwrap();
        assert_eq!(
            script(&shared).executed[0].0,
            "INSERT INTO t (id) VALUES (?) ON DUPLICATE KEY UPDATE id=?"
        );

        let err = writer.write(r#"{"secret": "x"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyRecord);
    }

    #[test]
    fn test_failed_write_closes_connection() {
        let (manager, shared) = recording_manager(Dialect::MySql);
        let mut writer = UpsertWriter::new(manager.clone(), "t");
        script(&shared).fail_execute = 1;

        let err = writer.write(r#"{"id": 1}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Write);
        assert!(err.to_string().contains("INSERT INTO t (id)"));
        assert!(!manager.is_connected());
        assert_eq!(script(&shared).closed, 1);

        writer.write(r#"{"id": 1}"#).unwrap();
        assert_eq!(script(&shared).opened, 2);
    }

    #[test]
    fn test_discovered_layout_drives_binding() {
        let (manager, shared) = recording_manager(Dialect::Sqlite);
        {
            let mut script = script(&shared);
            script.tables = vec![TableRef {
                catalog: None,
                schema: None,
                name: "Traces".to_string(),
            }];
            script.columns = vec![
                ColumnMeta {
                    name: "id".to_string(),
                    type_name: "BIGINT".to_string(),
                },
                ColumnMeta {
                    name: "ts".to_string(),
                    type_name: "DATETIME".to_string(),
                },
                ColumnMeta {
                    name: "stack".to_string(),
                    type_name: "TEXT".to_string(),
                },
            ];
            script.primary_keys = vec!["id".to_string()];
        }

        let mut writer = UpsertWriter::new(manager, "traces");
        writer
            .write(r#"{"id": 7, "ts": "2020-10-27T21:23:22Z", "stack": "main"}"#)
            .unwrap();
        assert!(writer.cached_schema().is_some());

        let script = script(&shared);
        let (sql, params) = &script.executed[0];
        assert_eq!(
            sql,
            "INSERT INTO traces (id, ts, stack) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET id=?, ts=?, stack=?"
        );
        assert!(matches!(params[1], Param::Timestamp(_)));
        assert_eq!(params[2], Param::LargeText("main".to_string()));
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn test_bad_timestamp_is_a_record_error() {
        let (manager, shared) = recording_manager(Dialect::MySql);
        let mut writer = UpsertWriter::new(manager, "t").with_timestamp_columns(["ts"]);
        let err = writer.write(r#"{"ts": true}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRecord);
        assert!(script(&shared).executed.is_empty());
    }
}
