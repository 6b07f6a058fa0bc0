//! SQL text synthesis.
//!
//! [`Dialect::MySql`] produces the wire format shared with existing
//! deployments and must stay byte-for-byte stable:
//!
//! ```text
//! CREATE TABLE IF NOT EXISTS t (a BIGINT, b VARCHAR(150), PRIMARY KEY(a), INDEX index_b (b)) PARTITION BY HASH(k) PARTITIONS 32
//! INSERT INTO t (a, b) VALUES (?, ?) ON DUPLICATE KEY UPDATE a=?, b=?
//! DELETE FROM t PARTITION(p5) WHERE k = 5
//! DELETE FROM t WHERE ts >= ? AND ts < ?
//! ```
//!
//! [`Dialect::Sqlite`] is the embedded store: same column types, indexes as
//! separate statements with table-prefixed names (SQLite index names share
//! one namespace per database), upserts through `ON CONFLICT`, and no
//! partitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::TableSchema;

/// Number of hash partitions in partitioned tables.
pub const PARTITION_COUNT: u32 = 32;

/// SQL dialect of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// MySQL and compatible stores.
    MySql,
    /// Embedded SQLite.
    Sqlite,
}

/// An insert-or-update statement and how to bind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSql {
    /// Statement text.
    pub sql: String,
    /// Whether every field is bound a second time for the update clause.
    pub binds_twice: bool,
}

impl Dialect {
    /// Whether tables can be hash-partitioned and partitions addressed in
    /// `DELETE`.
    pub fn supports_partitions(self) -> bool {
        matches!(self, Self::MySql)
    }

    /// Index-name prefix needed so that index names are unique per store.
    pub fn default_index_prefix(self, table: &str) -> String {
        match self {
            Self::MySql => String::new(),
            Self::Sqlite => format!("{table}_"),
        }
    }

    /// Statements creating `schema` if it does not exist.
    ///
    /// The partition clause is only emitted when the dialect supports
    /// partitions and the schema has a partition key.
    pub fn create_table(self, schema: &TableSchema, index_prefix: &str) -> Vec<String> {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (", schema.table);
        let columns: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.column_type))
            .collect();
        sql.push_str(&columns.join(", "));

        if !schema.primary_keys.is_empty() {
            sql.push_str(", PRIMARY KEY(");
            sql.push_str(&schema.primary_keys.join(", "));
            sql.push(')');
        }

        match self {
            Self::MySql => {
                for index in &schema.index_columns {
                    sql.push_str(&format!(", INDEX {index_prefix}index_{index} ({index})"));
                }
                sql.push(')');
                if let Some(key) = schema.partition_key.as_deref().filter(|k| !k.is_empty()) {
                    sql.push_str(&format!(
                        " PARTITION BY HASH({key}) PARTITIONS {PARTITION_COUNT}"
                    ));
                }
                vec![sql]
            }
            Self::Sqlite => {
                sql.push(')');
                let mut statements = vec![sql];
                statements.extend(schema.index_columns.iter().map(|index| {
                    format!(
                        "CREATE INDEX IF NOT EXISTS {index_prefix}index_{index} ON {} ({index})",
                        schema.table
                    )
                }));
                statements
            }
        }
    }

    /// Insert-or-update statement for `fields`, conflicting on
    /// `primary_keys`.
    pub fn upsert(self, table: &str, fields: &[&str], primary_keys: &[String]) -> UpsertSql {
        let placeholders = vec!["?"; fields.len()].join(", ");
        let updates = fields
            .iter()
            .map(|field| format!("{field}=?"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            fields.join(", ")
        );
        match self {
            Self::MySql => UpsertSql {
                sql: format!("{insert} ON DUPLICATE KEY UPDATE {updates}"),
                binds_twice: true,
            },
            Self::Sqlite if primary_keys.is_empty() => UpsertSql {
                sql: insert,
                binds_twice: false,
            },
            Self::Sqlite => UpsertSql {
                sql: format!(
                    "{insert} ON CONFLICT({}) DO UPDATE SET {updates}",
                    primary_keys.join(", ")
                ),
                binds_twice: true,
            },
        }
    }

    /// Deletes every row of one day partition. `None` if the dialect has no
    /// partitions.
    pub fn delete_partition(self, table: &str, partition_key: &str, day: u32) -> Option<String> {
        self.supports_partitions().then(|| {
            format!("DELETE FROM {table} PARTITION(p{day}) WHERE {partition_key} = {day}")
        })
    }

    /// Deletes rows whose `column` lies in a half-open range bound as two
    /// timestamp parameters.
    pub fn delete_range(self, table: &str, column: &str) -> String {
        format!("DELETE FROM {table} WHERE {column} >= ? AND {column} < ?")
    }

    /// Selects one row by equality on `keys`, each bound as a parameter.
    pub fn select_by_keys(self, table: &str, keys: &[String]) -> String {
        let predicate = keys
            .iter()
            .map(|key| format!("{key}=?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!("SELECT * FROM {table} WHERE {predicate} LIMIT 1")
    }

    /// Selects `columns` from up to `limit` rows.
    pub fn select_columns(self, table: &str, columns: &[&str], limit: usize) -> String {
        format!("SELECT {} FROM {table} LIMIT {limit}", columns.join(", "))
    }

    /// Counts all rows.
    pub fn count(self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {table}")
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql => f.write_str("mysql"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}
