//! TideKV Core - Partitioned Key-Value Storage over LMDB
//!
//! A multi-tenant storage layer on top of one memory-mapped LMDB
//! environment:
//! - Named partitions with explicit create/open/close/drop lifecycle
//! - Typed values (JSON or bincode, optional LZ4) with lazy range scans
//! - Day-bucketed partitions with retention pruning
//! - Background reclamation of stale reader slots
//!
//! # Architecture
//!
//! - **PartitionRegistry**: Owns the environment, the open-partition map
//!   and the reserved system partition holding the partition catalog
//! - **PartitionHandle**: Typed CRUD, iteration and transactions on one
//!   partition
//! - **TimeBucketAllocator**: Maps timestamps to `<prefix>_<YYYYMMDD>`
//!   partitions and drops buckets outside the retention window
//! - **ReaderLockReclaimer**: Periodic stale reader-slot cleanup
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidekv_core::{BucketConfig, PartitionOptions, PartitionRegistry, RegistryConfig, TimeBucketAllocator};
//!
//! # fn main() -> tidekv_core::Result<()> {
//! let registry = Arc::new(PartitionRegistry::open(RegistryConfig::new("./data"))?);
//! let users = registry.open_or_create_partition("users", PartitionOptions::default())?;
//! users.put_sync("u:1", &"Ada")?;
//!
//! let events = TimeBucketAllocator::new(
//!     registry.clone(),
//!     BucketConfig {
//!         partition_prefix: "events".into(),
//!         max_days_retention: Some(30),
//!         ..Default::default()
//!     },
//! )?;
//! if let Some(today) = events.get_partition(chrono::Utc::now().timestamp(), true)? {
//!     today.put_sync("e:1", &"login")?;
//! }
//! registry.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod reclaim;
pub mod storage;
pub mod timebucket;

mod error;
mod types;

pub use codec::{Compression, ValueCodec, ValueEncoding};
pub use error::{Result, TideError};
pub use reclaim::{ReaderLockReclaimer, ReclaimConfig};
pub use storage::{
    Entries, Keys, PartitionHandle, PartitionOptions, PartitionRegistry, PartitionTxn,
    RegistryConfig, WriteTxn, SYSTEM_PARTITION,
};
pub use timebucket::{BucketConfig, PruneReport, TimeBucketAllocator};
pub use types::*;

/// TideKV version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Memory map size (256MB)
    pub const MAP_SIZE: usize = 256 * 1024 * 1024;

    /// Maximum named sub-databases, system partition included
    pub const MAX_DBS: u32 = 128;

    /// Reader-slot table size
    pub const MAX_READERS: u32 = 126;

    /// Interval between stale reader-slot passes (1 minute)
    pub const RECLAIM_INTERVAL_MS: u64 = 60_000;

    /// Entries fetched per read transaction while iterating
    pub const PREFETCH_BATCH: usize = 256;

    /// Time shutdown waits for outstanding environment references
    pub const CLOSE_TIMEOUT_MS: u64 = 5_000;

    /// Longest accepted partition name in bytes
    pub const MAX_PARTITION_NAME_LEN: usize = 255;
}
