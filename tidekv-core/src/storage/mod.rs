//! Partition storage - registry, handles and transactions over one LMDB environment

mod catalog;
mod iter;
mod partition;
mod registry;
mod txn;

pub use iter::{Entries, Keys};
pub use partition::PartitionHandle;
pub use registry::{PartitionRegistry, SYSTEM_PARTITION};
pub use txn::{PartitionTxn, WriteTxn};

use crate::codec::{Compression, ValueCodec, ValueEncoding};
use crate::reclaim::ReclaimConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Environment directory
    pub path: PathBuf,
    /// Memory map size in bytes (upper bound on the data file)
    pub map_size: usize,
    /// Maximum number of named sub-databases, system partition included
    pub max_dbs: u32,
    /// Size of the reader-slot table
    pub max_readers: u32,
    /// Skip fsync on commit (commits stay ordered, not durable)
    pub no_sync: bool,
    /// How long shutdown waits for outstanding environment references
    pub close_timeout_ms: u64,
    /// Stale reader-slot reclamation
    pub reclaim: ReclaimConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            map_size: crate::config::MAP_SIZE,
            max_dbs: crate::config::MAX_DBS,
            max_readers: crate::config::MAX_READERS,
            no_sync: false,
            close_timeout_ms: crate::config::CLOSE_TIMEOUT_MS,
            reclaim: ReclaimConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Default configuration for an environment at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Options a partition is created or opened with
///
/// `encoding` and `compression` are fixed when the partition is created;
/// later opens use the persisted values. `read_only` and `prefetch_batch`
/// apply to the opened handle only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    pub encoding: ValueEncoding,
    pub compression: Compression,
    /// Reject puts, deletes and transactions
    pub read_only: bool,
    /// Entries fetched per read transaction while iterating
    pub prefetch_batch: usize,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            encoding: ValueEncoding::default(),
            compression: Compression::default(),
            read_only: false,
            prefetch_batch: crate::config::PREFETCH_BATCH,
        }
    }
}

impl PartitionOptions {
    /// Read-only copy of these options
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_encoding(mut self, encoding: ValueEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub(crate) fn codec(&self) -> ValueCodec {
        ValueCodec::new(self.encoding, self.compression)
    }
}
