//! Reporting entry point for record producers.
//!
//! A producer hands one flat record per reporting tick to a
//! [`TableReporter`]. The reporter creates its [`TableDao`] on first use,
//! creates the table if asked to, writes the record, and runs a retention
//! cycle when one is due. Failures are logged and returned so the caller can
//! isolate a failing backend; nothing is retried here.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::dao::TableDao;
use crate::error::Result;
use crate::record::RecordInput;
use crate::schema::TableSpec;

/// Writes reported records into one table.
#[derive(Debug)]
pub struct TableReporter {
    config: StoreConfig,
    spec: TableSpec,
    create_table: bool,
    dao: Mutex<Option<TableDao>>,
}

impl TableReporter {
    /// Creates a reporter. The table name comes from `config`, the layout
    /// from `spec`. Nothing is sent to the store until the first report.
    pub fn new(config: StoreConfig, mut spec: TableSpec) -> Self {
        spec.table.clone_from(&config.table_name);
        Self {
            config,
            spec,
            create_table: true,
            dao: Mutex::new(None),
        }
    }

    /// Whether the table is created when the DAO is first opened. Defaults
    /// to `true`.
    #[must_use]
    pub fn with_create_table(mut self, create_table: bool) -> Self {
        self.create_table = create_table;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Option<TableDao>> {
        self.dao.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<TableDao> {
        let dao = TableDao::new(self.config.connection_manager()?, self.spec.clone())
            .with_policy(self.config.retention_policy());
        if self.create_table {
            dao.create_table(self.config.table_partition)?;
        }
        tracing::info!(table = dao.table(), "opened table");
        Ok(dao)
    }

    /// Reports a record at the current time.
    ///
    /// # Errors
    ///
    /// See [`TableReporter::report_at`].
    pub fn report<'a>(&self, input: impl Into<RecordInput<'a>>) -> Result<u64> {
        self.report_at(input, Utc::now())
    }

    /// Reports a record, using `now` for the retention check.
    ///
    /// # Errors
    ///
    /// Returns an error if the DAO cannot be opened, the write fails, or the
    /// retention cycle fails. The error is logged before it is returned.
    pub fn report_at<'a>(&self, input: impl Into<RecordInput<'a>>, now: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.lock();
        if guard.is_none() {
            let dao = self.open().inspect_err(|e| {
                tracing::warn!(table = self.spec.table.as_str(), "failed to open table: {e}");
            })?;
            *guard = Some(dao);
        }
        match guard.as_ref() {
            Some(dao) => dao.write_and_maintain(input, now),
            None => Ok(0),
        }
    }

    /// Runs `f` with the open DAO, if any.
    pub fn with_dao<T>(&self, f: impl FnOnce(&TableDao) -> T) -> Option<T> {
        self.lock().as_ref().map(f)
    }

    /// Closes the DAO and its connection. The next report reopens it.
    pub fn close(&self) {
        if let Some(dao) = self.lock().take() {
            dao.close();
        }
    }
}
