//! Retention policy and expired-data delete planning.
//!
//! Cleanup runs after a successful write once the cleanup interval has
//! elapsed. Each cycle removes exactly one calendar day, the day that is
//! `retention_days` before today (UTC). Days older than that are not
//! revisited, so cycles must run at least daily to keep up.
//!
//! A day is deleted by addressing its hash partition when the table is
//! partitioned and the store supports it, and by a half-open range on the
//! retention column otherwise.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::connection::Param;
use crate::dialect::Dialect;
use crate::error::ConfigError;
use crate::timestamp::{add_days, day_of_month, truncate_to_day};

const SECS_PER_DAY: u64 = 86_400;

/// How long rows are kept and how often expired rows are purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum age of a row. Only whole days count.
    pub retention: Duration,
    /// Minimum time between two cleanup cycles.
    pub cleanup_interval: Duration,
    /// Delete by partition where possible.
    pub use_partition: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * SECS_PER_DAY),
            cleanup_interval: Duration::from_secs(3600),
            use_partition: true,
        }
    }
}

impl RetentionPolicy {
    /// Retention horizon in whole days.
    pub fn retention_days(&self) -> i64 {
        i64::try_from(self.retention.as_secs() / SECS_PER_DAY).unwrap_or(i64::MAX)
    }

    /// The single day purged by a cycle running at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the retention reaches past
    /// the earliest representable date.
    pub fn expiry_day(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigError> {
        expiry_day(now, self.retention_days())
    }
}

/// Midnight UTC of the day `retention_days` before `now`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if that day is not representable.
pub fn expiry_day(now: DateTime<Utc>, retention_days: i64) -> Result<DateTime<Utc>, ConfigError> {
    shift_days(truncate_to_day(now), retention_days.saturating_neg(), "data_retention")
}

fn shift_days(day: DateTime<Utc>, days: i64, key: &str) -> Result<DateTime<Utc>, ConfigError> {
    add_days(day, days).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: days.to_string(),
        reason: format!(
            "{days} days from {} is outside the supported date range",
            day.date_naive()
        ),
    })
}

/// When the last cleanup cycle completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionState {
    last_cleanup: Option<DateTime<Utc>>,
}

impl RetentionState {
    /// Time of the last completed cleanup, if any.
    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.last_cleanup
    }

    /// Whether a cleanup is due at `now`. Always due before the first one.
    pub fn is_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let Some(last) = self.last_cleanup else {
            return true;
        };
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(last) >= interval
    }

    /// Records a completed cleanup.
    pub fn mark_cleaned(&mut self, now: DateTime<Utc>) {
        self.last_cleanup = Some(now);
    }
}

/// One delete statement with its bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletePlan {
    /// Delete one day partition.
    Partition {
        /// Partition number, the UTC day of month.
        day: u32,
        /// Statement text.
        sql: String,
    },
    /// Delete a half-open time range.
    Range {
        /// Inclusive start.
        start: DateTime<Utc>,
        /// Exclusive end.
        end: DateTime<Utc>,
        /// Statement text.
        sql: String,
    },
}

impl DeletePlan {
    /// Statement text.
    pub fn sql(&self) -> &str {
        match self {
            Self::Partition { sql, .. } | Self::Range { sql, .. } => sql,
        }
    }

    /// Bind parameters.
    pub fn params(&self) -> Vec<Param> {
        match self {
            Self::Partition { .. } => Vec::new(),
            Self::Range { start, end, .. } => vec![Param::Timestamp(*start), Param::Timestamp(*end)],
        }
    }
}

/// Where a table's rows can be deleted by day.
#[derive(Debug, Clone, Copy)]
pub struct DeleteTarget<'a> {
    /// Table name.
    pub table: &'a str,
    /// Partition-key expression, if the table is partitioned.
    pub partition_key: Option<&'a str>,
    /// Timestamp column for ranged deletes.
    pub retention_column: Option<&'a str>,
}

/// Plans deletes for every day from `start` through `end`, both inclusive.
///
/// With partitions this is one statement per day; otherwise a single ranged
/// statement from `start`'s midnight to the midnight after `end`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingRetentionColumn`] if a ranged delete is
/// needed and the table has no retention column, and
/// [`ConfigError::InvalidValue`] if the range ends at the last
/// representable day.
pub fn plan_deletes(
    dialect: Dialect,
    target: DeleteTarget<'_>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    use_partition: bool,
) -> Result<Vec<DeletePlan>, ConfigError> {
    let start = truncate_to_day(start);
    let end = truncate_to_day(end);

    if use_partition && let Some(key) = target.partition_key.filter(|k| !k.is_empty()) {
        let mut plans = Vec::new();
        let mut day = start;
        while day <= end {
            let number = day_of_month(day);
            if let Some(sql) = dialect.delete_partition(target.table, key, number) {
                plans.push(DeletePlan::Partition { day: number, sql });
            }
            day = shift_days(day, 1, "end")?;
        }
        if !plans.is_empty() || start > end {
            return Ok(plans);
        }
    }

    let column = target
        .retention_column
        .ok_or_else(|| ConfigError::MissingRetentionColumn {
            table: target.table.to_string(),
        })?;
    Ok(vec![DeletePlan::Range {
        start,
        end: shift_days(end, 1, "end")?,
        sql: dialect.delete_range(target.table, column),
    }])
}
