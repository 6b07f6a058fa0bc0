//! Built-in SQLite driver.
//!
//! Accepted connection strings:
//!
//! - `sqlite::memory:` for a private in-memory database
//! - `sqlite:/path/to/file.db`, `sqlite://path/to/file.db`
//! - the same forms prefixed with `jdbc:`
//!
//! `DATETIME` values are stored as UTC text in
//! [`STORE_FORMAT`](crate::timestamp::STORE_FORMAT), which sorts in time
//! order so ranged deletes compare correctly.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Value as SqliteValue, ValueRef};

use crate::connection::{ColumnMeta, Connection, Driver, IndexInfo, Param, ResultSet, TableRef};
use crate::dialect::Dialect;
use crate::error::DriverError;
use crate::timestamp::{self, STORE_FORMAT};
use crate::types::ColumnType;
use crate::value::{SqlValue, Value};

const PREFIXES: [&str; 2] = ["jdbc:sqlite:", "sqlite:"];
const MEMORY: &str = ":memory:";
const MAIN_CATALOG: &str = "main";

/// Driver for embedded SQLite databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

fn database_path(connection_string: &str) -> Option<&str> {
    let rest = PREFIXES
        .iter()
        .find_map(|prefix| connection_string.trim().strip_prefix(prefix))?;
    let path = rest.strip_prefix("//").unwrap_or(rest);
    (!path.is_empty()).then_some(path)
}

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn accepts(&self, connection_string: &str) -> bool {
        database_path(connection_string).is_some()
    }

    fn connect(&self, connection_string: &str) -> Result<Box<dyn Connection>, DriverError> {
        let path = database_path(connection_string).ok_or_else(|| {
            DriverError::Other(format!("not a sqlite connection string: {connection_string}"))
        })?;
        let conn = if path == MEMORY {
            rusqlite::Connection::open_in_memory()?
        } else {
            rusqlite::Connection::open(path)?
        };
        tracing::debug!(path, "opened sqlite database");
        Ok(Box::new(SqliteConnection { conn: Some(conn) }))
    }
}

/// An open SQLite database.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn conn(&self) -> Result<&rusqlite::Connection, DriverError> {
        self.conn.as_ref().ok_or(DriverError::Closed)
    }

    fn strings(&self, sql: &str, args: &[&str]) -> Result<Vec<String>, DriverError> {
        let mut stmt = self.conn()?.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn catalog_of(table: &TableRef) -> &str {
    table.catalog.as_deref().unwrap_or(MAIN_CATALOG)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_value(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Int(v) => SqliteValue::Integer(i64::from(*v)),
        Value::BigInt(v) => SqliteValue::Integer(*v),
        Value::Float(v) => SqliteValue::Real(f64::from(*v)),
        Value::Double(v) => SqliteValue::Real(*v),
        Value::Bool(v) => SqliteValue::Integer(i64::from(*v)),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Timestamp(ts) => SqliteValue::Text(ts.format(STORE_FORMAT).to_string()),
        Value::Bytes(bytes) => SqliteValue::Blob(bytes.clone()),
    }
}

fn bind(param: &Param) -> SqliteValue {
    match param {
        Param::Value(value) => bind_value(value),
        Param::Timestamp(ts) => SqliteValue::Text(ts.format(STORE_FORMAT).to_string()),
        Param::LargeText(text) => SqliteValue::Text(text.clone()),
    }
}

fn parse_stored(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, STORE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| timestamp::parse_iso_date_time(text))
}

/// Converts a raw cell into a typed value using the declared column type.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn read_cell(cell: ValueRef<'_>, column_type: &ColumnType) -> SqlValue {
    match cell {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => match column_type {
            ColumnType::TinyInt => i8::try_from(i).map_or(SqlValue::BigInt(i), SqlValue::TinyInt),
            ColumnType::Int => i32::try_from(i).map_or(SqlValue::BigInt(i), SqlValue::Int),
            ColumnType::Float => SqlValue::Float(i as f32),
            ColumnType::Double => SqlValue::Double(i as f64),
            ColumnType::Datetime => DateTime::from_timestamp_millis(timestamp::millis_smart(i))
                .map_or(SqlValue::BigInt(i), SqlValue::Timestamp),
            _ => SqlValue::BigInt(i),
        },
        ValueRef::Real(f) => match column_type {
            ColumnType::Float => SqlValue::Float(f as f32),
            _ => SqlValue::Double(f),
        },
        ValueRef::Text(bytes) => match column_type {
            ColumnType::Text => SqlValue::LargeText(bytes.to_vec()),
            ColumnType::Datetime => {
                let text = String::from_utf8_lossy(bytes);
                parse_stored(&text).map_or_else(
                    || SqlValue::Text(text.into_owned()),
                    SqlValue::Timestamp,
                )
            }
            _ => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        },
        ValueRef::Blob(bytes) => SqlValue::Bytes(bytes.to_vec()),
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64, DriverError> {
        let values: Vec<SqliteValue> = params.iter().map(bind).collect();
        let affected = self
            .conn()?
            .execute(sql, rusqlite::params_from_iter(values))?;
        Ok(u64::try_from(affected).unwrap_or(u64::MAX))
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<ResultSet, DriverError> {
        let values: Vec<SqliteValue> = params.iter().map(bind).collect();
        let mut stmt = self.conn()?.prepare(sql)?;
        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|column| ColumnMeta {
                name: column.name().to_string(),
                type_name: column.decl_type().unwrap_or_default().to_string(),
            })
            .collect();
        let types: Vec<ColumnType> = columns
            .iter()
            .map(|column| ColumnType::from_sql_name(&column.type_name))
            .collect();

        let mut rows = stmt.query(rusqlite::params_from_iter(values))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(types.len());
            for (index, column_type) in types.iter().enumerate() {
                cells.push(read_cell(row.get_ref(index)?, column_type));
            }
            result.push(cells);
        }
        Ok(ResultSet {
            columns,
            rows: result,
        })
    }

    fn catalogs(&mut self) -> Result<Vec<String>, DriverError> {
        self.strings("SELECT name FROM pragma_database_list ORDER BY seq", &[])
    }

    fn schemas(&mut self, catalog: &str) -> Result<Vec<String>, DriverError> {
        // SQLite has no schema level below the attached database.
        Ok(vec![catalog.to_string()])
    }

    fn tables(
        &mut self,
        catalog: Option<&str>,
        _schema: Option<&str>,
    ) -> Result<Vec<TableRef>, DriverError> {
        let catalog = catalog.unwrap_or(MAIN_CATALOG);
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote_ident(catalog)
        );
        Ok(self
            .strings(&sql, &[])?
            .into_iter()
            .map(|name| TableRef {
                catalog: Some(catalog.to_string()),
                schema: None,
                name,
            })
            .collect())
    }

    fn columns(&mut self, table: &TableRef) -> Result<Vec<ColumnMeta>, DriverError> {
        let mut stmt = self
            .conn()?
            .prepare("SELECT name, type FROM pragma_table_info(?1, ?2) ORDER BY cid")?;
        let rows = stmt.query_map([table.name.as_str(), catalog_of(table)], |row| {
            Ok(ColumnMeta {
                name: row.get(0)?,
                type_name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn primary_keys(&mut self, table: &TableRef) -> Result<Vec<String>, DriverError> {
        self.strings(
            "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk",
            &[table.name.as_str(), catalog_of(table)],
        )
    }

    fn indexes(&mut self, table: &TableRef) -> Result<Vec<IndexInfo>, DriverError> {
        let catalog = catalog_of(table);
        let listed: Vec<(String, bool)> = {
            let mut stmt = self.conn()?.prepare(
                "SELECT name, \"unique\" FROM pragma_index_list(?1, ?2) WHERE origin = 'c'",
            )?;
            let rows = stmt.query_map([table.name.as_str(), catalog], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let mut indexes = Vec::with_capacity(listed.len());
        for (name, unique) in listed {
            let columns = self.strings(
                "SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno",
                &[name.as_str(), catalog],
            )?;
            indexes.push(IndexInfo {
                name,
                columns,
                unique,
            });
        }
        Ok(indexes)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| DriverError::Sqlite(e)),
            None => Ok(()),
        }
    }
}
