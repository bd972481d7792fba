//! Core types for TideKV

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Timestamp in seconds since Unix epoch (UTC)
pub type Timestamp = i64;

/// Seconds in one day bucket
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Key range for iteration and counting
///
/// Bounds follow `[start, end)` in both directions; `reverse` only flips
/// the order entries are produced in. A missing bound is unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSpec {
    /// Inclusive lower bound
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound
    pub end: Option<Vec<u8>>,
    /// Produce entries from the highest key down
    pub reverse: bool,
    /// Maximum number of entries produced
    pub limit: Option<usize>,
}

impl RangeSpec {
    /// The whole key space
    pub fn all() -> Self {
        Self::default()
    }

    /// Keys at or after `start`
    pub fn from(start: impl AsRef<[u8]>) -> Self {
        Self {
            start: Some(start.as_ref().to_vec()),
            ..Self::default()
        }
    }

    /// Keys strictly before `end`
    pub fn to(end: impl AsRef<[u8]>) -> Self {
        Self {
            end: Some(end.as_ref().to_vec()),
            ..Self::default()
        }
    }

    /// Keys in `[start, end)`
    pub fn between(start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Self {
        Self {
            start: Some(start.as_ref().to_vec()),
            end: Some(end.as_ref().to_vec()),
            ..Self::default()
        }
    }

    /// Keys beginning with `prefix`
    pub fn prefix(prefix: impl AsRef<[u8]>) -> Self {
        let start = prefix.as_ref().to_vec();
        let end = prefix_successor(&start);
        Self {
            start: Some(start),
            end,
            ..Self::default()
        }
    }

    /// Produce entries in descending key order
    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Stop after `limit` entries
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when neither bound narrows the key space (`limit` aside)
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Check the bounds are well ordered
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            if start > end {
                return Err(format!(
                    "start bound {:?} sorts after end bound {:?}",
                    String::from_utf8_lossy(start),
                    String::from_utf8_lossy(end)
                ));
            }
        }
        Ok(())
    }
}

/// Smallest key greater than every key with the given prefix
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Inclusive span of seconds covered by one UTC day bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    /// First second of the day
    pub start: Timestamp,
    /// Last second of the day
    pub end: Timestamp,
}

impl DayRange {
    /// Bucket containing `timestamp`
    ///
    /// `None` for the partial days at either end of the `i64` range.
    pub fn containing(timestamp: Timestamp) -> Option<Self> {
        let start = timestamp
            .div_euclid(SECONDS_PER_DAY)
            .checked_mul(SECONDS_PER_DAY)?;
        let end = start.checked_add(SECONDS_PER_DAY - 1)?;
        Some(Self { start, end })
    }

    /// Days since the epoch
    pub fn day_index(&self) -> i64 {
        self.start.div_euclid(SECONDS_PER_DAY)
    }

    /// Check if a timestamp falls inside the bucket
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Statistics for one open partition
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub name: String,
    pub page_size: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
    /// Reader slots in use across the environment
    pub readers: u32,
    /// Size of the environment's reader-slot table
    pub max_readers: u32,
}

/// Environment-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStats {
    pub path: PathBuf,
    pub map_size: usize,
    pub last_page_number: usize,
    pub last_txn_id: usize,
    pub readers: u32,
    pub max_readers: u32,
    pub disk_size_bytes: u64,
    pub open_partitions: usize,
    pub total_partitions: usize,
    /// Stale reader slots freed since the registry opened
    pub reclaimed_reader_slots: u64,
}
