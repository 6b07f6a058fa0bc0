//! Integration tests for the write and read paths against SQLite.
//!
//! Every test works on a fresh database file in a temporary directory.

#![cfg(feature = "sqlite")]

use rowsync::{ConnectionManager, ErrorKind, FieldType, RecordShape, TableDao, TableSpec, Value};
use tempfile::{TempDir, tempdir};

fn manager(dir: &TempDir) -> ConnectionManager {
    let path = dir.path().join("rowsync.db");
    ConnectionManager::new(None, &format!("sqlite:{}", path.display())).unwrap()
}

fn users() -> TableSpec {
    TableSpec::new(
        "users",
        RecordShape::new([("id", FieldType::BigInt), ("name", FieldType::String)]),
    )
    .with_primary_keys(["id"])
}

fn profiler() -> TableSpec {
    TableSpec::new(
        "cpuAndMemoryProfiler",
        RecordShape::new([
            ("epochMillis", FieldType::BigInt),
            ("host", FieldType::String),
            ("processCpuLoad", FieldType::Double),
            ("heapMemoryTotalUsed", FieldType::BigInt),
            ("stacktrace", FieldType::String),
        ]),
    )
    .with_primary_keys(["epochMillis", "host"])
    .with_index_columns(["host"])
    .with_timestamp_columns(["epochMillis"])
    .with_text_columns(["stacktrace"])
}

#[test]
fn test_upsert_same_key_keeps_one_row() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();

    dao.insert_or_update(r#"{"id": 1, "name": "a"}"#).unwrap();
    dao.insert_or_update(r#"{"id": 1, "name": "b"}"#).unwrap();

    assert_eq!(dao.total_count().unwrap(), 1);
    let row = dao.get_by_primary_key(1i64).unwrap().unwrap();
    assert_eq!(row.get("id"), Some(&Value::BigInt(1)));
    assert_eq!(row.get("name"), Some(&Value::from("b")));
}

#[test]
fn test_distinct_keys_add_rows() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();

    for id in 1..=3 {
        dao.insert_or_update(format!(r#"{{"id": {id}, "name": "user{id}"}}"#).as_str())
            .unwrap();
    }
    assert_eq!(dao.total_count().unwrap(), 3);
    assert!(dao.get_by_primary_key(4i64).unwrap().is_none());
}

#[test]
fn test_null_fields_do_not_erase() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();

    dao.insert_or_update(r#"{"id": 7, "name": "kept"}"#).unwrap();
    dao.insert_or_update(r#"{"id": 7, "name": null}"#).unwrap();

    let row = dao.get_by_primary_key(7i64).unwrap().unwrap();
    assert_eq!(row.get("name"), Some(&Value::from("kept")));
}

#[test]
fn test_all_null_record_is_rejected() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();

    let err = dao
        .insert_or_update(r#"{"id": null, "name": null}"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyRecord);
    assert_eq!(dao.total_count().unwrap(), 0);
}

#[test]
fn test_seconds_and_millis_address_the_same_row() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), profiler());
    dao.create_table(false).unwrap();

    dao.insert_or_update(
        r#"{"epochMillis": 1535651091, "host": "h1", "processCpuLoad": 0.25}"#,
    )
    .unwrap();
    dao.insert_or_update(
        r#"{"epochMillis": 1535651091000, "host": "h1", "heapMemoryTotalUsed": 4096}"#,
    )
    .unwrap();
    assert_eq!(dao.total_count().unwrap(), 1);

    let row = dao
        .get_by_primary_keys(&[Value::BigInt(1_535_651_091_000), Value::from("h1")])
        .unwrap()
        .unwrap();
    assert_eq!(row.get("epochMillis"), Some(&Value::BigInt(1_535_651_091_000)));
    assert_eq!(row.get("processCpuLoad"), Some(&Value::Double(0.25)));
    assert_eq!(row.get("heapMemoryTotalUsed"), Some(&Value::BigInt(4096)));
    assert_eq!(row.get("stacktrace"), Some(&Value::Null));
}

#[test]
fn test_large_text_round_trip() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), profiler());
    dao.create_table(false).unwrap();

    let stack = "at main\n".repeat(200);
    let record = rowsync::Record::new()
        .with("epochMillis", 1_535_651_091_000i64)
        .with("host", "h1")
        .with("stacktrace", stack.as_str());
    dao.insert_or_update(record).unwrap();

    let row = dao
        .get_by_primary_keys(&[Value::BigInt(1_535_651_091_000)])
        .unwrap()
        .unwrap();
    assert_eq!(row.get("stacktrace"), Some(&Value::Text(stack)));
}

#[test]
fn test_query_columns_and_raw_queries() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();
    for id in 1..=5 {
        dao.insert_or_update(format!(r#"{{"id": {id}, "name": "n{id}"}}"#).as_str())
            .unwrap();
    }

    let rows = dao.query_columns(2, &["name"]).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(dao.query_columns(0, &[]).unwrap().len(), 5);

    assert_eq!(dao.execute_update("DELETE FROM users WHERE id > 3").unwrap(), 2);
    let rows = dao.execute_query("SELECT MAX(id) AS top FROM users").unwrap();
    assert_eq!(rows[0].get("top"), Some(&Value::BigInt(3)));
}

#[test]
fn test_create_table_is_idempotent_and_indexed() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), profiler());
    let created = dao.create_table(true).unwrap();
    assert_eq!(created.partition_key, None);
    dao.create_table(true).unwrap();

    let discovered = dao.discover().unwrap().unwrap();
    assert_eq!(discovered.primary_keys, vec!["epochMillis", "host"]);
    assert_eq!(discovered.index_columns, vec!["host"]);
    assert!(discovered.is_datetime("epochMillis"));
    assert!(discovered.is_large_text("stacktrace"));
}

#[test]
fn test_discovered_layout_drives_binding() {
    let dir = tempdir().unwrap();
    let manager = manager(&dir);
    let spec = TableSpec::new(
        "legacy",
        RecordShape::new([
            ("host", FieldType::String),
            ("ts", FieldType::BigInt),
            ("stack", FieldType::String),
        ]),
    )
    .with_primary_keys(["host", "ts"]);
    let dao = TableDao::new(manager, spec);
    dao.execute_update(
        "CREATE TABLE legacy (host VARCHAR(150), ts DATETIME, stack TEXT, PRIMARY KEY(host, ts))",
    )
    .unwrap();

    // No timestamp or text flags are declared; the stored layout supplies them.
    dao.insert_or_update(r#"{"host": "h1", "ts": 1535651091000, "stack": "at main"}"#)
        .unwrap();
    dao.insert_or_update(r#"{"host": "h1", "ts": 1535651091, "stack": "at run"}"#)
        .unwrap();

    let rows = dao
        .execute_query("SELECT typeof(ts) AS kind, stack FROM legacy")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("kind"), Some(&Value::from("text")));
    assert_eq!(rows[0].get("stack"), Some(&Value::from("at run")));

    let row = dao.get_by_primary_keys(&[Value::from("h1")]).unwrap().unwrap();
    assert_eq!(row.get("ts"), Some(&Value::BigInt(1_535_651_091_000)));
}

#[test]
fn test_connection_reopens_after_close() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();
    dao.insert_or_update(r#"{"id": 1, "name": "a"}"#).unwrap();

    dao.close();
    assert!(!dao.manager().is_connected());
    dao.insert_or_update(r#"{"id": 2, "name": "b"}"#).unwrap();
    assert_eq!(dao.total_count().unwrap(), 2);
}

#[test]
fn test_bad_input_is_invalid_record() {
    let dir = tempdir().unwrap();
    let dao = TableDao::new(manager(&dir), users());
    dao.create_table(false).unwrap();

    for input in ["[1, 2]", "{broken", r#"{"id": 1, "tags": ["a"]}"#] {
        let err = dao.insert_or_update(input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRecord, "{input}");
    }
}

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: Option<String>,
}

impl rowsync::Entity for User {
    fn shape() -> RecordShape {
        RecordShape::new([("id", FieldType::BigInt), ("name", FieldType::String)])
    }

    fn to_record(&self) -> rowsync::Record {
        rowsync::Record::new()
            .with("id", self.id)
            .with("name", self.name.clone())
    }

    fn from_record(record: &rowsync::Record) -> Result<Self, rowsync::error::RecordError> {
        Ok(Self {
            id: record.get_as("id")?.unwrap_or_default(),
            name: record.get_as("name")?,
        })
    }
}

#[test]
fn test_entity_round_trip() {
    use rowsync::Entity;

    let dir = tempdir().unwrap();
    let spec = TableSpec::new("users", User::shape()).with_primary_keys(["id"]);
    let dao = TableDao::new(manager(&dir), spec);
    dao.create_table(false).unwrap();

    let user = User {
        id: 42,
        name: Some("ada".to_string()),
    };
    dao.insert_or_update(user.to_record()).unwrap();

    let read: Option<User> = dao.get_entity(&[Value::BigInt(42)]).unwrap();
    assert_eq!(read, Some(user));
    assert_eq!(dao.get_entity::<User>(&[Value::BigInt(1)]).unwrap(), None);
}
