//! Table specification, schema synthesis, and schema discovery.
//!
//! A [`TableSpec`] is what the caller declares about a table: its record
//! shape, primary keys, indexed fields, and per-field flags. From it
//! [`TableSpec::build_schema`] derives a [`TableSchema`], the ordered column
//! layout used for `CREATE TABLE`. When a table already exists,
//! [`discover`] reads the same layout back from store metadata.
//!
//! # Column order
//!
//! 1. Primary-key fields, in the order the caller declared them
//! 2. Index fields that are not primary keys, in record-shape order
//! 3. All remaining fields, in record-shape order
//!
//! # Example
//!
//! ```rust
//! use rowsync::record::RecordShape;
//! use rowsync::schema::TableSpec;
//! use rowsync::value::FieldType;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = TableSpec::new(
//!     "metrics",
//!     RecordShape::new([
//!         ("name", FieldType::String),
//!         ("epochMillis", FieldType::BigInt),
//!         ("load", FieldType::Double),
//!     ]),
//! )
//! .with_primary_keys(["epochMillis", "name"])
//! .with_timestamp_columns(["epochMillis"]);
//!
//! let schema = spec.build_schema(false)?;
//! assert_eq!(schema.columns[0].name, "epochMillis");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

use crate::connection::{Connection, TableRef};
use crate::error::{DriverError, SchemaError};
use crate::record::{FieldSpec, RecordShape};
use crate::types::{ColumnRole, ColumnType, map_column_type};

/// Caller declaration of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub table: String,
    /// Record shape; one column per field.
    pub fields: RecordShape,
    /// Primary-key field names, in key order.
    #[serde(default)]
    pub primary_keys: Vec<String>,
    /// Fields with a secondary index.
    #[serde(default)]
    pub index_columns: Vec<String>,
    /// Fields stored as `DATETIME` regardless of their declared type.
    #[serde(default)]
    pub timestamp_columns: Vec<String>,
    /// String fields stored as `TEXT`.
    #[serde(default)]
    pub text_columns: Vec<String>,
    /// Hash-partition expression, e.g. `DAYOFMONTH(epochMillis)`.
    #[serde(default)]
    pub partition_key: Option<String>,
    /// Timestamp column used for ranged retention deletes. Defaults to the
    /// first timestamp column.
    #[serde(default)]
    pub retention_column: Option<String>,
    /// Prefix for index names. Defaults to what the store's dialect needs.
    #[serde(default)]
    pub index_name_prefix: Option<String>,
}

fn contains_ci(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

impl TableSpec {
    /// Creates a spec with no keys, indexes, or flags.
    pub fn new(table: impl Into<String>, fields: RecordShape) -> Self {
        Self {
            table: table.into(),
            fields,
            primary_keys: Vec::new(),
            index_columns: Vec::new(),
            timestamp_columns: Vec::new(),
            text_columns: Vec::new(),
            partition_key: None,
            retention_column: None,
            index_name_prefix: None,
        }
    }

    /// Sets the primary-key fields.
    #[must_use]
    pub fn with_primary_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the indexed fields.
    #[must_use]
    pub fn with_index_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.index_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the timestamp-flagged fields.
    #[must_use]
    pub fn with_timestamp_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.timestamp_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the large-text fields.
    #[must_use]
    pub fn with_text_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.text_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the partition-key expression.
    #[must_use]
    pub fn with_partition_key(mut self, expression: impl Into<String>) -> Self {
        self.partition_key = Some(expression.into());
        self
    }

    /// Sets the retention column.
    #[must_use]
    pub fn with_retention_column(mut self, column: impl Into<String>) -> Self {
        self.retention_column = Some(column.into());
        self
    }

    /// Returns `true` if the field is timestamp-flagged.
    pub fn is_timestamp(&self, field: &str) -> bool {
        contains_ci(&self.timestamp_columns, field)
    }

    /// Returns `true` if the field is text-flagged.
    pub fn is_text(&self, field: &str) -> bool {
        contains_ci(&self.text_columns, field)
    }

    /// The column used for ranged retention deletes.
    pub fn retention_column(&self) -> Option<&str> {
        self.retention_column
            .as_deref()
            .or_else(|| self.timestamp_columns.first().map(String::as_str))
    }

    /// Derives the column layout of the table.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::EmptyShape`] if the shape has no fields
    /// - [`SchemaError::PrimaryKeyMismatch`] or [`SchemaError::IndexMismatch`]
    ///   if a declared key or index name does not match exactly one field
    /// - [`SchemaError::UnsupportedType`] if a field type has no column
    ///   mapping
    pub fn build_schema(&self, use_partition: bool) -> Result<TableSchema, SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::EmptyShape {
                table: self.table.clone(),
            });
        }

        let mut key_fields: Vec<&FieldSpec> = Vec::new();
        let mut index_fields: Vec<&FieldSpec> = Vec::new();
        let mut other_fields: Vec<&FieldSpec> = Vec::new();

        for field in self.fields.fields() {
            let is_key = contains_ci(&self.primary_keys, &field.name);
            let is_index = contains_ci(&self.index_columns, &field.name);
            if is_key {
                key_fields.push(field);
            }
            if is_index {
                index_fields.push(field);
            }
            if !is_key && !is_index {
                other_fields.push(field);
            }
        }

        if key_fields.len() != self.primary_keys.len() {
            return Err(SchemaError::PrimaryKeyMismatch {
                found: key_fields.len(),
                declared: self.primary_keys.len(),
            });
        }
        if index_fields.len() != self.index_columns.len() {
            return Err(SchemaError::IndexMismatch {
                found: index_fields.len(),
                declared: self.index_columns.len(),
            });
        }

        // Re-order key fields into the declared key order.
        let mut ordered_keys = Vec::with_capacity(key_fields.len());
        for key in &self.primary_keys {
            let Some(field) = key_fields.iter().find(|f| f.name.eq_ignore_ascii_case(key)) else {
                return Err(SchemaError::PrimaryKeyMismatch {
                    found: ordered_keys.len(),
                    declared: self.primary_keys.len(),
                });
            };
            ordered_keys.push(*field);
        }

        let mut columns = Vec::with_capacity(self.fields.len());
        for field in &ordered_keys {
            columns.push(self.describe(field, ColumnRole::PrimaryKey)?);
        }
        for field in &index_fields {
            if !contains_ci(&self.primary_keys, &field.name) {
                columns.push(self.describe(field, ColumnRole::Index)?);
            }
        }
        for field in &other_fields {
            columns.push(self.describe(field, ColumnRole::Plain)?);
        }

        Ok(TableSchema {
            table: self.table.clone(),
            columns,
            primary_keys: ordered_keys.iter().map(|f| f.name.clone()).collect(),
            index_columns: index_fields.iter().map(|f| f.name.clone()).collect(),
            partition_key: if use_partition {
                self.partition_key.clone().filter(|k| !k.is_empty())
            } else {
                None
            },
        })
    }

    fn describe(&self, field: &FieldSpec, role: ColumnRole) -> Result<ColumnDescriptor, SchemaError> {
        let column_type = map_column_type(
            &field.name,
            field.field_type,
            role,
            self.is_timestamp(&field.name),
            self.is_text(&field.name),
        )?;
        Ok(ColumnDescriptor {
            name: field.name.clone(),
            column_type,
            role,
        })
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Column type; for strings this carries the width.
    pub column_type: ColumnType,
    /// Role in the table.
    pub role: ColumnRole,
}

/// Column layout of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name as stored.
    pub table: String,
    /// Columns: primary keys, then index columns, then the rest.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary-key columns in key order.
    pub primary_keys: Vec<String>,
    /// Indexed columns. May overlap with the primary keys.
    pub index_columns: Vec<String>,
    /// Hash-partition expression.
    pub partition_key: Option<String>,
}

impl TableSchema {
    /// Looks up a column by name, ignoring case.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Returns `true` if the named column is `DATETIME`.
    pub fn is_datetime(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.column_type.is_datetime())
    }

    /// Returns `true` if the named column is `TEXT`.
    pub fn is_large_text(&self, name: &str) -> bool {
        self.column(name).is_some_and(|c| c.column_type.is_large_text())
    }
}

/// Creates the table described by `spec` if it does not exist.
///
/// Partitioning is applied only when requested and supported by the store.
///
/// # Errors
///
/// Returns [`SchemaError`] if the layout cannot be derived or a statement
/// fails.
pub fn create_table(
    conn: &mut dyn Connection,
    spec: &TableSpec,
    use_partition: bool,
) -> Result<TableSchema, SchemaError> {
    let dialect = conn.dialect();
    let schema = spec.build_schema(use_partition && dialect.supports_partitions())?;
    let prefix = spec
        .index_name_prefix
        .clone()
        .unwrap_or_else(|| dialect.default_index_prefix(&spec.table));

    for sql in dialect.create_table(&schema, &prefix) {
        tracing::info!("Running sql: {sql}");
        conn.execute(&sql, &[]).map_err(|source| SchemaError::Ddl {
            table: spec.table.clone(),
            sql: sql.clone(),
            source,
        })?;
        tracing::info!("Finished sql: {sql}");
    }
    Ok(schema)
}

/// Finds `table` in store metadata and reads its layout.
///
/// The default catalog is searched first for a case-insensitive name match.
/// Failing that, every catalog and schema is searched and the first match
/// wins. When the same name exists in several catalogs, which one is
/// returned depends on the order the store lists them in.
///
/// Returns `Ok(None)` if no table matches.
///
/// # Errors
///
/// Returns [`SchemaError::Metadata`] if metadata cannot be read.
pub fn discover(conn: &mut dyn Connection, table: &str) -> Result<Option<TableSchema>, SchemaError> {
    let metadata_error = |source: DriverError| SchemaError::Metadata {
        table: table.to_string(),
        source,
    };

    let found = find_in(conn.tables(None, None).map_err(metadata_error)?, table);
    let found = match found {
        Some(found) => Some(found),
        None => search_catalogs(conn, table).map_err(metadata_error)?,
    };

    match found {
        Some(table_ref) => load_schema(conn, &table_ref).map(Some).map_err(metadata_error),
        None => {
            tracing::debug!(table, "table not found in store metadata");
            Ok(None)
        }
    }
}

fn find_in(tables: Vec<TableRef>, table: &str) -> Option<TableRef> {
    tables
        .into_iter()
        .find(|candidate| candidate.name.eq_ignore_ascii_case(table))
}

fn search_catalogs(
    conn: &mut dyn Connection,
    table: &str,
) -> Result<Option<TableRef>, DriverError> {
    for catalog in conn.catalogs()? {
        tracing::debug!(catalog = catalog.as_str(), "checking catalog");
        for schema in conn.schemas(&catalog)? {
            let tables = conn.tables(Some(&catalog), Some(&schema))?;
            if let Some(found) = find_in(tables, table) {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

fn load_schema(conn: &mut dyn Connection, table: &TableRef) -> Result<TableSchema, DriverError> {
    let primary_keys = conn.primary_keys(table)?;
    let index_columns: Vec<String> = conn
        .indexes(table)?
        .into_iter()
        .filter(|index| index.columns.len() == 1)
        .flat_map(|index| index.columns)
        .collect();

    let columns = conn
        .columns(table)?
        .into_iter()
        .map(|meta| {
            let role = if contains_ci(&primary_keys, &meta.name) {
                ColumnRole::PrimaryKey
            } else if contains_ci(&index_columns, &meta.name) {
                ColumnRole::Index
            } else {
                ColumnRole::Plain
            };
            tracing::debug!("Found column: {}, {}", meta.name, meta.type_name);
            ColumnDescriptor {
                column_type: ColumnType::from_sql_name(&meta.type_name),
                name: meta.name,
                role,
            }
        })
        .collect();

    Ok(TableSchema {
        table: table.name.clone(),
        columns,
        primary_keys,
        index_columns,
        partition_key: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ColumnMeta, Param, ResultSet};
    use crate::dialect::Dialect;
    use crate::value::FieldType;

    fn metric_spec() -> TableSpec {
        TableSpec::new(
            "cpuAndMemoryProfiler",
            RecordShape::new([
                ("epochMillis", FieldType::BigInt),
                ("name", FieldType::String),
                ("host", FieldType::String),
                ("tag", FieldType::String),
                ("processCpuLoad", FieldType::Double),
                ("heapMemoryMax", FieldType::BigInt),
            ]),
        )
        .with_primary_keys(["host", "epochMillis"])
        .with_index_columns(["epochMillis", "tag"])
        .with_timestamp_columns(["epochMillis"])
        .with_partition_key("DAYOFMONTH(epochMillis)")
    }

    #[test]
    fn test_column_order() {
        let schema = metric_spec().build_schema(true).unwrap();
        let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["host", "epochMillis", "tag", "name", "processCpuLoad", "heapMemoryMax"]
        );
        assert_eq!(schema.primary_keys, vec!["host", "epochMillis"]);
        assert_eq!(schema.index_columns, vec!["epochMillis", "tag"]);
        assert_eq!(schema.columns[2].role, ColumnRole::Index);
        assert_eq!(schema.columns[3].column_type, ColumnType::Varchar(250));
    }

    #[test]
    fn test_mysql_create_table_text() {
        let schema = metric_spec().build_schema(true).unwrap();
        let statements = Dialect::MySql.create_table(&schema, "");
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE IF NOT EXISTS cpuAndMemoryProfiler (host VARCHAR(150), \
                 epochMillis DATETIME, tag VARCHAR(150), name VARCHAR(250), \
                 processCpuLoad DOUBLE, heapMemoryMax BIGINT, PRIMARY KEY(host, epochMillis), \
                 INDEX index_epochMillis (epochMillis), INDEX index_tag (tag)) \
                 PARTITION BY HASH(DAYOFMONTH(epochMillis)) PARTITIONS 32"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_partition_clause_omitted_when_disabled() {
        let schema = metric_spec().build_schema(false).unwrap();
        let statements = Dialect::MySql.create_table(&schema, "");
        assert!(!statements[0].contains("PARTITION"));
    }

    #[test]
    fn test_sqlite_create_table_statements() {
        let schema = metric_spec().build_schema(false).unwrap();
        let statements = Dialect::Sqlite.create_table(&schema, "cpuAndMemoryProfiler_");
        assert_eq!(statements.len(), 3);
        assert!(statements[0].ends_with("PRIMARY KEY(host, epochMillis))"));
        assert_eq!(
            statements[2],
            "CREATE INDEX IF NOT EXISTS cpuAndMemoryProfiler_index_tag ON cpuAndMemoryProfiler (tag)"
        );
    }

    #[test]
    fn test_key_typo_is_rejected() {
        let spec = TableSpec::new(
            "t",
            RecordShape::new([("id", FieldType::BigInt), ("name", FieldType::String)]),
        )
        .with_primary_keys(["id", "nmae"]);
        let err = spec.build_schema(false).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::PrimaryKeyMismatch {
                found: 1,
                declared: 2
            }
        ));
    }

    #[test]
    fn test_index_typo_is_rejected() {
        let spec = TableSpec::new("t", RecordShape::new([("id", FieldType::BigInt)]))
            .with_index_columns(["ids"]);
        assert!(matches!(
            spec.build_schema(false),
            Err(SchemaError::IndexMismatch { .. })
        ));
    }

    #[test]
    fn test_unsupported_field_type() {
        let spec = TableSpec::new(
            "t",
            RecordShape::new([("id", FieldType::BigInt), ("blob", FieldType::Binary)]),
        );
        assert!(matches!(
            spec.build_schema(false),
            Err(SchemaError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_retention_column_default() {
        let spec = metric_spec();
        assert_eq!(spec.retention_column(), Some("epochMillis"));
        let spec = spec.with_retention_column("ts");
        assert_eq!(spec.retention_column(), Some("ts"));
    }

    /// Metadata for a store whose default catalog is empty and whose tables
    /// live in named catalogs, listed in a fixed order.
    struct Catalogs {
        entries: Vec<CatalogTable>,
        default_lookups: usize,
    }

    struct CatalogTable {
        catalog: &'static str,
        schema: &'static str,
        name: &'static str,
        columns: Vec<ColumnMeta>,
        primary_keys: Vec<String>,
    }

    impl CatalogTable {
        fn new(
            catalog: &'static str,
            schema: &'static str,
            name: &'static str,
            columns: &[(&str, &str)],
            primary_keys: &[&str],
        ) -> Self {
            Self {
                catalog,
                schema,
                name,
                columns: columns
                    .iter()
                    .map(|(name, type_name)| ColumnMeta {
                        name: (*name).to_string(),
                        type_name: (*type_name).to_string(),
                    })
                    .collect(),
                primary_keys: primary_keys.iter().map(|k| (*k).to_string()).collect(),
            }
        }

        fn table_ref(&self) -> TableRef {
            TableRef {
                catalog: Some(self.catalog.to_string()),
                schema: Some(self.schema.to_string()),
                name: self.name.to_string(),
            }
        }
    }

    impl Catalogs {
        fn entry(&self, table: &TableRef) -> Option<&CatalogTable> {
            self.entries.iter().find(|e| e.table_ref() == *table)
        }
    }

    impl Connection for Catalogs {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn execute(&mut self, _: &str, _: &[Param]) -> Result<u64, DriverError> {
            Ok(0)
        }

        fn query(&mut self, _: &str, _: &[Param]) -> Result<ResultSet, DriverError> {
            Ok(ResultSet::default())
        }

        fn catalogs(&mut self) -> Result<Vec<String>, DriverError> {
            let mut names: Vec<String> = Vec::new();
            for entry in &self.entries {
                if !names.iter().any(|n| n == entry.catalog) {
                    names.push(entry.catalog.to_string());
                }
            }
            Ok(names)
        }

        fn schemas(&mut self, catalog: &str) -> Result<Vec<String>, DriverError> {
            Ok(self
                .entries
                .iter()
                .filter(|e| e.catalog == catalog)
                .map(|e| e.schema.to_string())
                .collect())
        }

        fn tables(
            &mut self,
            catalog: Option<&str>,
            schema: Option<&str>,
        ) -> Result<Vec<TableRef>, DriverError> {
            let (Some(catalog), Some(schema)) = (catalog, schema) else {
                self.default_lookups += 1;
                return Ok(Vec::new());
            };
            Ok(self
                .entries
                .iter()
                .filter(|e| e.catalog == catalog && e.schema == schema)
                .map(CatalogTable::table_ref)
                .collect())
        }

        fn columns(&mut self, table: &TableRef) -> Result<Vec<ColumnMeta>, DriverError> {
            Ok(self.entry(table).map(|e| e.columns.clone()).unwrap_or_default())
        }

        fn primary_keys(&mut self, table: &TableRef) -> Result<Vec<String>, DriverError> {
            Ok(self.entry(table).map(|e| e.primary_keys.clone()).unwrap_or_default())
        }

        fn close(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[test]
    fn test_discover_falls_back_to_first_catalog_match() {
        let mut conn = Catalogs {
            entries: vec![
                CatalogTable::new("scratch", "main", "other", &[("x", "INT")], &[]),
                CatalogTable::new(
                    "archive",
                    "public",
                    "Metrics",
                    &[("id", "BIGINT"), ("ts", "DATETIME")],
                    &["id"],
                ),
                CatalogTable::new("live", "public", "metrics", &[("host", "VARCHAR(150)")], &["host"]),
            ],
            default_lookups: 0,
        };

        let schema = discover(&mut conn, "metrics").unwrap().unwrap();
        assert_eq!(conn.default_lookups, 1);
        assert_eq!(schema.table, "Metrics");
        assert_eq!(schema.primary_keys, vec!["id"]);
        let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "ts"]);
        assert_eq!(schema.columns[0].role, ColumnRole::PrimaryKey);
        assert!(schema.is_datetime("ts"));

        assert!(discover(&mut conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_spec_from_json() {
        let json = r#"{
            "table": "t",
            "fields": [{"name": "id", "type": "big_int"}, {"name": "msg", "type": "string"}],
            "primary_keys": ["id"],
            "text_columns": ["msg"]
        }"#;
        let spec: TableSpec = serde_json::from_str(json).unwrap();
        let schema = spec.build_schema(true).unwrap();
        assert_eq!(schema.columns[1].column_type, ColumnType::Text);
        assert_eq!(schema.partition_key, None);
    }
}
