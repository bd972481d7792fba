//! Day-bucketed partitions with retention pruning
//!
//! Every timestamp maps to the partition `<prefix>_<YYYYMMDD>` of its UTC
//! calendar day. With retention enabled, only the last `max_days_retention`
//! days (today included) are reachable, and older buckets are dropped by
//! prune passes that run at construction and after every bucket creation.

use crate::storage::{PartitionHandle, PartitionOptions, PartitionRegistry};
use crate::types::{DayRange, Timestamp, SECONDS_PER_DAY};
use crate::{Result, TideError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Day-bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Bucket names are `<partition_prefix>_<YYYYMMDD>`
    pub partition_prefix: String,
    /// Options every bucket is created and opened with
    pub partition_options: PartitionOptions,
    /// Days of buckets to keep, today included (`None` disables retention)
    pub max_days_retention: Option<i64>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            partition_prefix: "bucket".to_string(),
            partition_options: PartitionOptions::default(),
            max_days_retention: None,
        }
    }
}

/// Outcome of one prune pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub dropped: Vec<String>,
    pub failed: Vec<String>,
}

type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Maps timestamps to day-bucket partitions
///
/// Clones share the bucket cache and the prune guard.
#[derive(Clone)]
pub struct TimeBucketAllocator {
    inner: Arc<AllocatorInner>,
}

struct AllocatorInner {
    registry: Arc<PartitionRegistry>,
    prefix: String,
    options: PartitionOptions,
    retention: Option<u32>,
    pattern: Regex,
    cache: RwLock<HashMap<String, PartitionHandle>>,
    pruning: AtomicBool,
    clock: Clock,
}

/// Clears the single-flight flag when a pass ends, even on panic
struct PruneGuard<'a>(&'a AtomicBool);

impl Drop for PruneGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TimeBucketAllocator {
    /// Create an allocator using the system clock
    pub fn new(registry: Arc<PartitionRegistry>, config: BucketConfig) -> Result<Self> {
        Self::with_clock(registry, config, || Utc::now().timestamp())
    }

    /// Create an allocator reading "now" from `clock` (epoch seconds)
    pub fn with_clock<C>(registry: Arc<PartitionRegistry>, config: BucketConfig, clock: C) -> Result<Self>
    where
        C: Fn() -> Timestamp + Send + Sync + 'static,
    {
        let retention = match config.max_days_retention {
            None => None,
            Some(days) => match u32::try_from(days) {
                Ok(days) if days > 0 => Some(days),
                _ => return Err(TideError::InvalidRetention { value: days }),
            },
        };

        let pattern = Regex::new(&format!(
            r"^{}_(\d{{8}})$",
            regex::escape(&config.partition_prefix)
        ))
        .map_err(|e| TideError::InvalidName {
            op: "new",
            name: config.partition_prefix.clone(),
            reason: e.to_string(),
        })?;

        let allocator = Self {
            inner: Arc::new(AllocatorInner {
                registry,
                prefix: config.partition_prefix,
                options: config.partition_options,
                retention,
                pattern,
                cache: RwLock::new(HashMap::new()),
                pruning: AtomicBool::new(false),
                clock: Arc::new(clock),
            }),
        };

        if let Some(report) = allocator.prune_old_partitions() {
            debug!(
                "Startup prune for prefix {}: {} dropped, {} failed",
                allocator.inner.prefix,
                report.dropped.len(),
                report.failed.len()
            );
        }

        Ok(allocator)
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Retention window in days, if enabled
    pub fn retention_days(&self) -> Option<u32> {
        self.inner.retention
    }

    pub fn registry(&self) -> &Arc<PartitionRegistry> {
        &self.inner.registry
    }

    /// UTC day containing `timestamp`
    pub fn day_range(&self, timestamp: Timestamp) -> Result<DayRange> {
        DayRange::containing(timestamp).ok_or(TideError::InvalidTimestamp { timestamp })
    }

    /// Bucket partition name for `timestamp`
    pub fn partition_name(&self, timestamp: Timestamp) -> Result<String> {
        let day = format_day(self.day_range(timestamp)?.start)
            .ok_or(TideError::InvalidTimestamp { timestamp })?;
        Ok(format!("{}_{}", self.inner.prefix, day))
    }

    fn today(&self) -> Result<DayRange> {
        self.day_range((self.inner.clock)())
    }

    fn check_retention(&self, op: &'static str, timestamp: Timestamp, name: &str) -> Result<()> {
        let max_days = match self.inner.retention {
            Some(max_days) => max_days,
            None => return Ok(()),
        };

        let today = self.today()?.day_index();
        let day = self.day_range(timestamp)?.day_index();
        if day > today {
            return Err(TideError::FutureTimestamp {
                op,
                name: name.to_string(),
                timestamp,
            });
        }
        if today - day >= i64::from(max_days) {
            return Err(TideError::OutOfRetention {
                op,
                name: name.to_string(),
                timestamp,
                max_days,
            });
        }
        Ok(())
    }

    /// Get the bucket partition for `timestamp`
    ///
    /// Returns `None` if the bucket does not exist and `create` is false.
    /// Creating a bucket schedules a prune pass in the background.
    pub fn get_partition(&self, timestamp: Timestamp, create: bool) -> Result<Option<PartitionHandle>> {
        const OP: &str = "get_partition";
        let name = self.partition_name(timestamp)?;
        self.check_retention(OP, timestamp, &name)?;

        if let Some(handle) = self.inner.cache.read().get(&name) {
            // Closed elsewhere counts as a miss
            if handle.is_open() {
                return Ok(Some(handle.clone()));
            }
        }

        let registry = &self.inner.registry;
        let options = &self.inner.options;
        let handle = match registry.open_partition(&name, options.clone()) {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => {
                if !create {
                    return Ok(None);
                }
                match registry.create_partition(&name, options.clone()) {
                    Ok(handle) => {
                        self.schedule_prune();
                        handle
                    }
                    Err(TideError::AlreadyExists { .. }) => {
                        registry.open_partition(&name, options.clone())?
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        self.inner.cache.write().insert(name, handle.clone());
        Ok(Some(handle))
    }

    /// Run a prune pass in the background, or inline outside a runtime
    fn schedule_prune(&self) {
        if self.inner.retention.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let allocator = self.clone();
                let task = runtime.spawn_blocking(move || allocator.prune_old_partitions());
                runtime.spawn(async move {
                    if let Err(e) = task.await {
                        error!("Prune task failed: {}", e);
                    }
                });
            }
            Err(_) => {
                self.prune_old_partitions();
            }
        }
    }

    /// Drop every bucket older than the retention window
    ///
    /// Returns `None` when retention is disabled or another pass is
    /// already running. Individual drop failures are logged and reported,
    /// never returned.
    pub fn prune_old_partitions(&self) -> Option<PruneReport> {
        let max_days = self.inner.retention?;

        if self
            .inner
            .pruning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Prune already running for prefix {}", self.inner.prefix);
            return None;
        }
        let _guard = PruneGuard(&self.inner.pruning);

        Some(self.prune_pass(max_days))
    }

    fn prune_pass(&self, max_days: u32) -> PruneReport {
        let mut report = PruneReport::default();

        let today = match self.today() {
            Ok(today) => today,
            Err(e) => {
                warn!("Skipping prune for prefix {}: {}", self.inner.prefix, e);
                return report;
            }
        };
        let window = (i64::from(max_days) - 1) * SECONDS_PER_DAY;
        let cutoff = match today.start.checked_sub(window).and_then(format_day) {
            Some(cutoff) => cutoff,
            None => {
                warn!("Prune cutoff before {} is outside the calendar range", today.start);
                return report;
            }
        };

        let names = match self.inner.registry.list_partitions() {
            Ok(names) => names,
            Err(e) => {
                warn!("Failed to list partitions for pruning: {}", e);
                return report;
            }
        };

        let mut expired: Vec<String> = names
            .into_iter()
            .filter(|name| {
                self.inner
                    .pattern
                    .captures(name)
                    .and_then(|caps| caps.get(1))
                    .map_or(false, |day| day.as_str() < cutoff.as_str())
            })
            .collect();
        expired.sort();

        for name in expired {
            self.inner.cache.write().remove(&name);
            match self.inner.registry.drop_partition(&name, true) {
                Ok(()) => report.dropped.push(name),
                Err(e) => {
                    warn!("Failed to prune partition {}: {}", name, e);
                    report.failed.push(name);
                }
            }
        }

        if !report.dropped.is_empty() {
            info!(
                "Pruned {} partitions older than {} for prefix {}",
                report.dropped.len(),
                cutoff,
                self.inner.prefix
            );
        }

        report
    }
}

impl fmt::Debug for TimeBucketAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeBucketAllocator")
            .field("prefix", &self.inner.prefix)
            .field("retention", &self.inner.retention)
            .field("cached", &self.inner.cache.read().len())
            .finish()
    }
}

/// `YYYYMMDD` of the UTC day starting at `day_start`
fn format_day(day_start: Timestamp) -> Option<String> {
    DateTime::<Utc>::from_timestamp(day_start, 0).map(|day| day.format("%Y%m%d").to_string())
}
