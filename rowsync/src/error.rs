//! Error types for the rowsync persistence engine.

use thiserror::Error;

/// The main error type for all rowsync operations.
///
/// Each variant wraps the error enum of one area of the engine. Use
/// [`RowsyncError::kind`] when only the category of the failure matters.
#[derive(Error, Debug)]
pub enum RowsyncError {
    /// Invalid configuration (driver, connection string, table spec).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A store connection could not be obtained.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Table schema synthesis or discovery failed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The input could not be normalized into a writable record.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// A write statement failed to execute.
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// A read statement failed or its result could not be materialized.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Flat classification of a [`RowsyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad driver, connection string, or table specification.
    Configuration,
    /// Declared key/index field counts disagree with the record shape.
    SchemaMismatch,
    /// A field has no column type mapping.
    UnsupportedType,
    /// The record has no non-null fields.
    EmptyRecord,
    /// Input could not be parsed into a flat record.
    InvalidRecord,
    /// Statement execution failed and the connection was invalidated.
    Write,
    /// A connection could not be obtained.
    Connection,
    /// A read or metadata statement failed.
    Query,
    /// A CREATE TABLE or CREATE INDEX statement failed.
    Ddl,
}

impl RowsyncError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Schema(SchemaError::PrimaryKeyMismatch { .. })
            | Self::Schema(SchemaError::IndexMismatch { .. }) => ErrorKind::SchemaMismatch,
            Self::Schema(SchemaError::UnsupportedType { .. }) => ErrorKind::UnsupportedType,
            Self::Schema(SchemaError::EmptyShape { .. }) => ErrorKind::Configuration,
            Self::Schema(SchemaError::Ddl { .. }) => ErrorKind::Ddl,
            Self::Schema(SchemaError::Metadata { .. }) => ErrorKind::Query,
            Self::Record(RecordError::Empty) => ErrorKind::EmptyRecord,
            Self::Record(_) => ErrorKind::InvalidRecord,
            Self::Write(_) => ErrorKind::Write,
            Self::Query(_) => ErrorKind::Query,
        }
    }
}

/// Errors raised while validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No connection string was configured.
    #[error("connection string is not configured")]
    MissingConnectionString,

    /// The connection string is not understood by the selected driver.
    #[error("invalid connection string '{connection_string}': {reason}")]
    InvalidConnectionString {
        /// The offending connection string.
        connection_string: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration value could not be parsed.
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The raw value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Ranged retention needs a timestamp column and none was declared.
    #[error("table '{table}' has no timestamp column for retention deletes")]
    MissingRetentionColumn {
        /// The table name.
        table: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    FileRead {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON.
    #[error("failed to parse config file '{path}': {source}")]
    FileParse {
        /// The file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while obtaining a store connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// No driver is registered under the requested name.
    #[error("no driver registered as '{driver}'")]
    UnknownDriver {
        /// The requested driver name.
        driver: String,
    },

    /// The driver failed to open a connection.
    #[error("failed to open connection to '{connection_string}': {source}")]
    Open {
        /// The connection string used.
        connection_string: String,
        /// The driver error.
        #[source]
        source: DriverError,
    },
}

/// Errors raised while synthesizing or discovering a table schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The number of primary-key names found in the record shape differs
    /// from the number declared.
    #[error("invalid primary keys: {found} in record shape, but {declared} declared")]
    PrimaryKeyMismatch {
        /// Primary-key names matched against the record shape.
        found: usize,
        /// Primary-key names declared by the caller.
        declared: usize,
    },

    /// The number of index names found in the record shape differs from the
    /// number declared.
    #[error("invalid index fields: {found} in record shape, but {declared} declared")]
    IndexMismatch {
        /// Index names matched against the record shape.
        found: usize,
        /// Index names declared by the caller.
        declared: usize,
    },

    /// A field type has no column type mapping.
    #[error("unsupported field type for column '{field}': {field_type}")]
    UnsupportedType {
        /// The field name.
        field: String,
        /// The field type name.
        field_type: String,
    },

    /// The table spec declares no fields.
    #[error("table '{table}' declares no fields")]
    EmptyShape {
        /// The table name.
        table: String,
    },

    /// The CREATE TABLE statement failed.
    #[error("failed to create table '{table}' with [{sql}]: {source}")]
    Ddl {
        /// The table name.
        table: String,
        /// The statement text.
        sql: String,
        /// The driver error.
        #[source]
        source: DriverError,
    },

    /// Reading store metadata failed.
    #[error("failed to read metadata for table '{table}': {source}")]
    Metadata {
        /// The table name.
        table: String,
        /// The driver error.
        #[source]
        source: DriverError,
    },
}

/// Errors raised while normalizing input into a record.
#[derive(Error, Debug)]
pub enum RecordError {
    /// All fields of the record are null (or ignored).
    #[error("empty record or record with all values being null")]
    Empty,

    /// The input is not valid UTF-8.
    #[error("record bytes are not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The input text is not a JSON object.
    #[error("failed to parse record: {source}")]
    Parse {
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The input parsed, but is not a JSON object.
    #[error("record must be a JSON object, got {found}")]
    NotAnObject {
        /// Description of what was found.
        found: String,
    },

    /// A field holds a value that is not a flat scalar.
    #[error("field '{field}' holds a non-scalar value: {found}")]
    NonScalar {
        /// The field name.
        field: String,
        /// Description of the value.
        found: String,
    },

    /// A value cannot be used as a timestamp.
    #[error("cannot get timestamp from value {value} for field '{field}'")]
    InvalidTimestamp {
        /// The field name.
        field: String,
        /// The offending value, rendered.
        value: String,
    },

    /// A value does not have the type declared for its field.
    #[error("field '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        /// The field name.
        field: String,
        /// The declared type.
        expected: String,
        /// The received value, described.
        found: String,
    },
}

/// Error raised when an insert-or-update statement fails.
///
/// The shared connection has already been closed when this is returned; the
/// next call reconnects.
#[derive(Error, Debug)]
#[error("failed to run sql [{sql}] on table '{table}': {source}")]
pub struct WriteError {
    /// The table written to.
    pub table: String,
    /// The statement text.
    pub sql: String,
    /// The underlying cause.
    #[source]
    pub source: DriverError,
}

/// Errors raised on the read path.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The statement failed to execute.
    #[error("failed to execute sql [{sql}]: {source}")]
    Execute {
        /// The statement text.
        sql: String,
        /// The driver error.
        #[source]
        source: DriverError,
    },

    /// The number of key values does not match the declared primary key.
    #[error("invalid primary key value: {declared} primary keys declared, {provided} values provided")]
    KeyArity {
        /// Declared primary-key column count.
        declared: usize,
        /// Number of values provided.
        provided: usize,
    },

    /// A column value could not be coerced into its target field.
    #[error("cannot write column value {value} to field '{field}' of type {field_type}")]
    Coercion {
        /// The target field.
        field: String,
        /// The target field type.
        field_type: String,
        /// The column value, rendered.
        value: String,
    },

    /// The statement returned no rows where one was required.
    #[error("empty result from sql [{sql}]")]
    EmptyResult {
        /// The statement text.
        sql: String,
    },
}

/// Error reported by a store driver.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The connection was closed.
    #[error("connection is closed")]
    Closed,

    /// The statement uses a feature the store does not support.
    #[error("unsupported by this store: {0}")]
    Unsupported(String),

    /// Error from the embedded SQLite engine.
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Any other driver failure.
    #[error("{0}")]
    Other(String),
}

/// Type alias for `Result<T, RowsyncError>`.
pub type Result<T> = std::result::Result<T, RowsyncError>;
