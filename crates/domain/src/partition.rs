use bastion_core::{AppError, AppResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Parent table of the partitioned audit log.
pub const AUDIT_LOG_TABLE: &str = "audit_records";

/// Month-aligned, half-open `[range_start, range_end)` slice of the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditPartition {
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
}

fn month_start(year: i32, month: u32) -> AppResult<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|value| value.and_utc())
        .ok_or_else(|| {
            AppError::Validation(format!(
                "month {year}-{month:02} is outside the supported calendar range"
            ))
        })
}

fn following_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

impl AuditPartition {
    /// Returns the partition for the calendar month containing `timestamp`.
    pub fn for_timestamp(timestamp: DateTime<Utc>) -> AppResult<Self> {
        Self::for_month(timestamp.year(), timestamp.month())
    }

    /// Returns the partition for one calendar month.
    pub fn for_month(year: i32, month: u32) -> AppResult<Self> {
        let (next_year, next_month) = following_month(year, month);
        Ok(Self {
            range_start: month_start(year, month)?,
            range_end: month_start(next_year, next_month)?,
        })
    }

    /// Rehydrates a partition from stored bounds, requiring exact month alignment.
    pub fn from_bounds(range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> AppResult<Self> {
        let expected = Self::for_timestamp(range_start)?;
        if expected.range_start != range_start || expected.range_end != range_end {
            return Err(AppError::Validation(format!(
                "partition bounds [{range_start}, {range_end}) are not one calendar month"
            )));
        }

        Ok(expected)
    }

    /// Parses a storage name produced by [`AuditPartition::table_name`].
    pub fn from_table_name(table_name: &str) -> AppResult<Self> {
        let invalid = || {
            AppError::Validation(format!(
                "'{table_name}' is not an audit partition table name"
            ))
        };
        let suffix = table_name
            .strip_prefix(AUDIT_LOG_TABLE)
            .and_then(|rest| rest.strip_prefix("_y"))
            .ok_or_else(invalid)?;
        let (year, month) = suffix.split_once('m').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }

        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::for_month(year, month)
    }

    /// Returns the partition immediately after this one.
    pub fn next(&self) -> AppResult<Self> {
        Self::for_timestamp(self.range_end)
    }

    /// Returns the inclusive start of the range.
    #[must_use]
    pub fn range_start(&self) -> DateTime<Utc> {
        self.range_start
    }

    /// Returns the exclusive end of the range.
    #[must_use]
    pub fn range_end(&self) -> DateTime<Utc> {
        self.range_end
    }

    /// Returns whether `timestamp` falls inside the partition.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.range_start <= timestamp && timestamp < self.range_end
    }

    /// Returns whether two partitions share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.range_start < other.range_end && other.range_start < self.range_end
    }

    /// Returns whether the partition intersects the inclusive query range.
    #[must_use]
    pub fn intersects(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.range_start <= to && from < self.range_end
    }

    /// Returns the storage name, e.g. `audit_records_y2025m06`.
    #[must_use]
    pub fn table_name(&self) -> String {
        format!(
            "{AUDIT_LOG_TABLE}_y{:04}m{:02}",
            self.range_start.year(),
            self.range_start.month()
        )
    }
}
