//! In-memory recording driver for unit tests.

use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{
    ColumnMeta, Connection, ConnectionManager, Driver, DriverRegistry, Param, ResultSet, TableRef,
};
use crate::dialect::Dialect;
use crate::error::DriverError;

/// Everything a recording connection saw, plus canned answers.
#[derive(Debug, Default)]
pub(crate) struct Script {
    pub executed: Vec<(String, Vec<Param>)>,
    pub queried: Vec<(String, Vec<Param>)>,
    pub fail_execute: usize,
    pub affected: u64,
    pub result: ResultSet,
    pub tables: Vec<TableRef>,
    pub columns: Vec<ColumnMeta>,
    pub primary_keys: Vec<String>,
    pub opened: usize,
    pub closed: usize,
}

pub(crate) type Shared = Arc<Mutex<Script>>;

fn lock(script: &Shared) -> std::sync::MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RecordingConnection {
    dialect: Dialect,
    closed: bool,
    script: Shared,
}

impl Connection for RecordingConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64, DriverError> {
        let mut script = lock(&self.script);
        script.executed.push((sql.to_string(), params.to_vec()));
        if script.fail_execute > 0 {
            script.fail_execute -= 1;
            return Err(DriverError::Other("connection reset".to_string()));
        }
        Ok(script.affected)
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet, DriverError> {
        let mut script = lock(&self.script);
        script.queried.push((sql.to_string(), params.to_vec()));
        Ok(script.result.clone())
    }

    fn catalogs(&mut self) -> Result<Vec<String>, DriverError> {
        Ok(Vec::new())
    }

    fn schemas(&mut self, _catalog: &str) -> Result<Vec<String>, DriverError> {
        Ok(Vec::new())
    }

    fn tables(
        &mut self,
        _catalog: Option<&str>,
        _schema: Option<&str>,
    ) -> Result<Vec<TableRef>, DriverError> {
        Ok(lock(&self.script).tables.clone())
    }

    fn columns(&mut self, _table: &TableRef) -> Result<Vec<ColumnMeta>, DriverError> {
        Ok(lock(&self.script).columns.clone())
    }

    fn primary_keys(&mut self, _table: &TableRef) -> Result<Vec<String>, DriverError> {
        Ok(lock(&self.script).primary_keys.clone())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        lock(&self.script).closed += 1;
        Ok(())
    }
}

struct RecordingDriver {
    dialect: Dialect,
    script: Shared,
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn accepts(&self, connection_string: &str) -> bool {
        connection_string.starts_with("recording:")
    }

    fn connect(&self, _connection_string: &str) -> Result<Box<dyn Connection>, DriverError> {
        lock(&self.script).opened += 1;
        Ok(Box::new(RecordingConnection {
            dialect: self.dialect,
            closed: false,
            script: Arc::clone(&self.script),
        }))
    }
}

/// A manager whose connections record every statement into the returned
/// script.
pub(crate) fn recording_manager(dialect: Dialect) -> (ConnectionManager, Shared) {
    let script = Shared::default();
    let mut registry = DriverRegistry::empty();
    registry.register(Arc::new(RecordingDriver {
        dialect,
        script: Arc::clone(&script),
    }));
    let manager = ConnectionManager::with_registry(None, "recording:test", registry)
        .unwrap_or_else(|e| panic!("recording manager: {e}"));
    (manager, script)
}

/// Locks a script for inspection.
pub(crate) fn script(shared: &Shared) -> std::sync::MutexGuard<'_, Script> {
    lock(shared)
}
