//! Integration tests for retention cleanup and the reporter against SQLite.

#![cfg(feature = "sqlite")]

use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rowsync::{
    ConnectionManager, FieldType, Record, RecordShape, RetentionPolicy, StoreConfig, TableDao,
    TableReporter, TableSpec, Value,
};
use tempfile::{TempDir, tempdir};

const DAY_SECS: u64 = 86_400;

fn connection_string(dir: &TempDir) -> String {
    format!("sqlite:{}", dir.path().join("retention.db").display())
}

fn samples() -> TableSpec {
    TableSpec::new(
        "samples",
        RecordShape::new([
            ("epochMillis", FieldType::BigInt),
            ("host", FieldType::String),
            ("value", FieldType::Double),
        ]),
    )
    .with_primary_keys(["epochMillis", "host"])
    .with_timestamp_columns(["epochMillis"])
    .with_partition_key("DAYOFMONTH(epochMillis)")
}

fn sample(at: DateTime<Utc>, host: &str) -> Record {
    Record::new()
        .with("epochMillis", at.timestamp_millis())
        .with("host", host)
        .with("value", 1.0f64)
}

fn dao(dir: &TempDir, retention_days: u64) -> TableDao {
    let manager = ConnectionManager::new(None, &connection_string(dir)).unwrap();
    let dao = TableDao::new(manager, samples()).with_policy(RetentionPolicy {
        retention: Duration::from_secs(retention_days * DAY_SECS),
        cleanup_interval: Duration::from_secs(3600),
        use_partition: true,
    });
    dao.create_table(true).unwrap();
    dao
}

#[test]
fn test_cleanup_removes_only_the_expired_day() {
    let dir = tempdir().unwrap();
    let dao = dao(&dir, 2);
    let now = Utc.with_ymd_and_hms(2018, 9, 1, 13, 0, 0).unwrap();

    dao.insert_or_update(sample(now - TimeDelta::days(2), "old")).unwrap();
    dao.insert_or_update(sample(now - TimeDelta::days(1), "recent")).unwrap();
    dao.insert_or_update(sample(now, "today")).unwrap();
    assert_eq!(dao.total_count().unwrap(), 3);

    // SQLite has no partitions, so the partitioned policy falls back to a
    // ranged delete on the retention column.
    assert_eq!(dao.cleanup_expired(now).unwrap(), Some(1));
    assert_eq!(dao.last_cleanup(), Some(now));
    assert_eq!(dao.total_count().unwrap(), 2);

    let hosts: Vec<Value> = dao
        .execute_query("SELECT host FROM samples ORDER BY epochMillis")
        .unwrap()
        .into_iter()
        .filter_map(|row| row.get("host").cloned())
        .collect();
    assert_eq!(hosts, vec![Value::from("recent"), Value::from("today")]);
}

#[test]
fn test_cleanup_waits_for_interval() {
    let dir = tempdir().unwrap();
    let dao = dao(&dir, 1);
    let now = Utc.with_ymd_and_hms(2018, 9, 1, 13, 0, 0).unwrap();

    assert_eq!(dao.cleanup_expired(now).unwrap(), Some(0));
    dao.insert_or_update(sample(now - TimeDelta::days(1), "old")).unwrap();

    assert_eq!(dao.cleanup_expired(now + TimeDelta::minutes(30)).unwrap(), None);
    assert_eq!(dao.total_count().unwrap(), 1);

    assert_eq!(dao.cleanup_expired(now + TimeDelta::hours(1)).unwrap(), Some(1));
    assert_eq!(dao.total_count().unwrap(), 0);
}

#[test]
fn test_delete_by_date_range_spans_whole_days() {
    let dir = tempdir().unwrap();
    let dao = dao(&dir, 7);
    let base = Utc.with_ymd_and_hms(2018, 8, 28, 0, 0, 0).unwrap();
    for day in 0..5 {
        dao.insert_or_update(sample(base + TimeDelta::days(day) + TimeDelta::hours(23), "h"))
            .unwrap();
    }

    let start = base + TimeDelta::days(1) + TimeDelta::hours(12);
    let end = base + TimeDelta::days(3);
    assert_eq!(dao.delete_by_date_range(start, end, false).unwrap(), 3);
    assert_eq!(dao.total_count().unwrap(), 2);
}

#[test]
fn test_delete_by_partition_is_unsupported() {
    let dir = tempdir().unwrap();
    let dao = dao(&dir, 7);
    let err = dao.delete_by_partition(5).unwrap_err();
    assert_eq!(err.kind(), rowsync::ErrorKind::Query);
}

#[test]
fn test_reporter_writes_and_maintains() {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::new(connection_string(&dir));
    config.table_name = "samples".to_string();
    config.data_retention = 2 * DAY_SECS;
    let reporter = TableReporter::new(config, samples());

    let now = Utc.with_ymd_and_hms(2018, 9, 1, 13, 0, 0).unwrap();
    let old = sample(now - TimeDelta::days(2), "old");
    reporter.report_at(old, now - TimeDelta::days(2)).unwrap();
    reporter.report_at(sample(now, "today"), now).unwrap();

    let remaining = reporter.with_dao(|dao| dao.total_count().unwrap()).unwrap();
    assert_eq!(remaining, 1);
    assert_eq!(reporter.with_dao(TableDao::last_cleanup).flatten(), Some(now));
    reporter.close();
}

#[test]
fn test_unrepresentable_retention_fails_the_cycle() {
    let dir = tempdir().unwrap();
    let manager = ConnectionManager::new(None, &connection_string(&dir)).unwrap();
    let dao = TableDao::new(manager, samples()).with_policy(RetentionPolicy {
        retention: Duration::from_secs(100_000_000_000_000),
        cleanup_interval: Duration::from_secs(3600),
        use_partition: false,
    });
    dao.create_table(false).unwrap();

    let now = Utc.with_ymd_and_hms(2018, 9, 1, 13, 0, 0).unwrap();
    let err = dao.write_and_maintain(sample(now, "h1"), now).unwrap_err();
    assert_eq!(err.kind(), rowsync::ErrorKind::Configuration);
    // The write itself went through; only the cleanup cycle failed.
    assert_eq!(dao.total_count().unwrap(), 1);
    assert_eq!(dao.last_cleanup(), None);
}
