//! Partition handle - typed access to one open sub-database

use super::catalog::RawDatabase;
use super::iter::{self, Entries, Keys, RangeIter};
use super::txn::{PartitionTxn, WriteTxn};
use super::PartitionOptions;
use crate::codec::ValueCodec;
use crate::types::{PartitionStats, RangeSpec};
use crate::{Result, TideError};
use heed::Env;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Handle to one open partition
///
/// Clones share state: closing the partition through the registry closes
/// every clone, and any later call fails with `PartitionClosed`.
#[derive(Clone)]
pub struct PartitionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    db: RawDatabase,
    codec: ValueCodec,
    options: PartitionOptions,
    // Dropped on close so the environment can shut down
    env: RwLock<Option<Env>>,
}

impl PartitionHandle {
    pub(crate) fn new(name: &str, db: RawDatabase, env: Env, options: PartitionOptions) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: name.to_string(),
                db,
                codec: options.codec(),
                options,
                env: RwLock::new(Some(env)),
            }),
        }
    }

    /// Get partition name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Options the handle was opened with, codec as persisted
    pub fn options(&self) -> &PartitionOptions {
        &self.inner.options
    }

    pub fn codec(&self) -> ValueCodec {
        self.inner.codec
    }

    pub fn is_open(&self) -> bool {
        self.inner.env.read().is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.options.read_only
    }

    pub(crate) fn database(&self) -> RawDatabase {
        self.inner.db
    }

    pub(crate) fn env(&self, op: &'static str) -> Result<Env> {
        self.inner
            .env
            .read()
            .clone()
            .ok_or_else(|| self.closed_error(op))
    }

    pub(crate) fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(self.closed_error(op))
        }
    }

    pub(crate) fn ensure_writable(&self, op: &'static str) -> Result<()> {
        if self.inner.options.read_only {
            return Err(TideError::ReadOnlyViolation {
                op,
                name: self.inner.name.clone(),
            });
        }
        Ok(())
    }

    /// Release the environment reference held by every clone
    pub(crate) fn close(&self) -> Result<()> {
        match self.inner.env.write().take() {
            Some(_) => Ok(()),
            None => Err(self.closed_error("close")),
        }
    }

    fn closed_error(&self, op: &'static str) -> TideError {
        TideError::PartitionClosed {
            op,
            name: self.inner.name.clone(),
        }
    }

    /// Check if a key exists
    pub fn has(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let env = self.env("has")?;
        let rtxn = env.read_txn()?;
        let found = self.inner.db.get(&rtxn, key.as_ref())?.is_some();
        Ok(found)
    }

    /// Get the value stored under a key
    pub fn get<V: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>> {
        let env = self.env("get")?;
        let rtxn = env.read_txn()?;
        let found = self.inner.db.get(&rtxn, key.as_ref())?;
        let value = found.map(|bytes| self.inner.codec.decode(bytes)).transpose()?;
        Ok(value)
    }

    /// Get several values from one snapshot, in key order of the input
    pub fn get_many<K, V>(&self, keys: &[K]) -> Result<Vec<Option<V>>>
    where
        K: AsRef<[u8]>,
        V: DeserializeOwned,
    {
        let env = self.env("get_many")?;
        let rtxn = env.read_txn()?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let found = self.inner.db.get(&rtxn, key.as_ref())?;
            values.push(found.map(|bytes| self.inner.codec.decode(bytes)).transpose()?);
        }
        Ok(values)
    }

    /// Write a value in its own write transaction, blocking until commit
    pub fn put_sync<V: Serialize + ?Sized>(&self, key: impl AsRef<[u8]>, value: &V) -> Result<()> {
        self.ensure_writable("put")?;
        let bytes = self.inner.codec.encode(value)?;
        self.write_encoded(key.as_ref(), &bytes)
    }

    /// Write a value; resolves once the write transaction has committed
    pub async fn put<V: Serialize + ?Sized>(&self, key: impl AsRef<[u8]>, value: &V) -> Result<()> {
        self.ensure_writable("put")?;
        let bytes = self.inner.codec.encode(value)?;
        let key = key.as_ref().to_vec();
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.write_encoded(&key, &bytes)).await?
    }

    fn write_encoded(&self, key: &[u8], bytes: &[u8]) -> Result<()> {
        let env = self.env("put")?;
        let mut wtxn = env.write_txn()?;
        self.inner.db.put(&mut wtxn, key, bytes)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Write a batch of entries in one write transaction
    pub fn put_many_sync<K, V, I>(&self, entries: I) -> Result<usize>
    where
        K: AsRef<[u8]>,
        V: Serialize,
        I: IntoIterator<Item = (K, V)>,
    {
        self.transaction_sync(|txn| {
            let mut written = 0;
            for (key, value) in entries {
                txn.put(key, &value)?;
                written += 1;
            }
            Ok(written)
        })
    }

    /// Delete a key, returning whether it existed
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.ensure_writable("delete")?;
        let env = self.env("delete")?;
        let mut wtxn = env.write_txn()?;
        let existed = self.inner.db.delete(&mut wtxn, key.as_ref())?;
        wtxn.commit()?;
        Ok(existed)
    }

    /// Lazily iterate keys in a range
    pub fn keys(&self, range: RangeSpec) -> Result<Keys> {
        self.check_range("keys", &range)?;
        Ok(Keys::new(RangeIter::new(self.clone(), "keys", range)))
    }

    /// Lazily iterate decoded entries in a range
    pub fn entries<V: DeserializeOwned>(&self, range: RangeSpec) -> Result<Entries<V>> {
        self.check_range("entries", &range)?;
        Ok(Entries::new(
            RangeIter::new(self.clone(), "entries", range),
            self.inner.codec,
        ))
    }

    /// Count entries in a range
    pub fn count(&self, range: RangeSpec) -> Result<u64> {
        self.check_range("count", &range)?;
        let env = self.env("count")?;
        let rtxn = env.read_txn()?;

        if range.is_unbounded() {
            let total = self.inner.db.len(&rtxn)?;
            return Ok(match range.limit {
                Some(limit) => total.min(limit as u64),
                None => total,
            });
        }

        let limit = range.limit.unwrap_or(usize::MAX);
        let bounds = iter::bounds(&range, None);
        let mut count = 0u64;
        for item in self.inner.db.range(&rtxn, &bounds)?.take(limit) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn check_range(&self, op: &'static str, range: &RangeSpec) -> Result<()> {
        range.validate().map_err(|reason| TideError::InvalidRange {
            op,
            name: self.inner.name.clone(),
            reason,
        })
    }

    /// Read the given keys once in the background so their pages are resident
    pub async fn prefetch<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<()> {
        let keys: Vec<Vec<u8>> = keys.iter().map(|k| k.as_ref().to_vec()).collect();
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.touch(&keys)).await?
    }

    fn touch(&self, keys: &[Vec<u8>]) -> Result<()> {
        let env = self.env("prefetch")?;
        let rtxn = env.read_txn()?;
        let mut resident = 0;
        for key in keys {
            if self.inner.db.get(&rtxn, key.as_slice())?.is_some() {
                resident += 1;
            }
        }
        debug!(
            "Prefetched {}/{} keys in partition {}",
            resident,
            keys.len(),
            self.inner.name
        );
        Ok(())
    }

    /// Get partition statistics
    pub fn stats(&self) -> Result<PartitionStats> {
        let env = self.env("stats")?;
        let rtxn = env.read_txn()?;
        let stat = self.inner.db.stat(&rtxn)?;
        let info = env.info();

        Ok(PartitionStats {
            name: self.inner.name.clone(),
            page_size: stat.page_size,
            depth: stat.depth,
            branch_pages: stat.branch_pages,
            leaf_pages: stat.leaf_pages,
            overflow_pages: stat.overflow_pages,
            entries: stat.entries,
            readers: info.number_of_readers,
            max_readers: info.maximum_number_of_readers,
        })
    }

    /// Run `f` inside one write transaction on this partition
    ///
    /// The transaction commits when `f` returns `Ok` and aborts otherwise.
    /// `f` holds the environment's single writer lock for its whole run and
    /// must not block on anything outside the engine.
    pub fn transaction_sync<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PartitionTxn<'_>) -> Result<R>,
    {
        self.ensure_writable("transaction")?;
        let env = self.env("transaction")?;
        let mut txn = PartitionTxn::new(self, WriteTxn::begin(&env)?);
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }

    /// Run `f` inside one write transaction on a blocking worker thread
    pub async fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PartitionTxn<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_writable("transaction")?;
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.transaction_sync(f)).await?
    }
}

impl fmt::Debug for PartitionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionHandle")
            .field("name", &self.inner.name)
            .field("codec", &self.inner.codec)
            .field("read_only", &self.inner.options.read_only)
            .field("open", &self.is_open())
            .finish()
    }
}
