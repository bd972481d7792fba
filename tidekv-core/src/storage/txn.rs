//! Write transactions spanning one partition or the whole environment

use super::PartitionHandle;
use crate::Result;
use heed::{Env, RwTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Environment-wide write transaction
///
/// Holds the environment's single writer lock. Operations apply in call
/// order and become visible together on commit.
pub struct WriteTxn<'t> {
    txn: RwTxn<'t>,
}

impl<'t> WriteTxn<'t> {
    pub(crate) fn begin(env: &'t Env) -> Result<Self> {
        Ok(Self {
            txn: env.write_txn()?,
        })
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    /// Read a value, seeing this transaction's own writes
    pub fn get<V: DeserializeOwned>(
        &self,
        partition: &PartitionHandle,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<V>> {
        partition.ensure_open("get")?;
        let found = partition.database().get(&self.txn, key.as_ref())?;
        found.map(|bytes| partition.codec().decode(bytes)).transpose()
    }

    pub fn has(&self, partition: &PartitionHandle, key: impl AsRef<[u8]>) -> Result<bool> {
        partition.ensure_open("has")?;
        Ok(partition.database().get(&self.txn, key.as_ref())?.is_some())
    }

    pub fn put<V: Serialize + ?Sized>(
        &mut self,
        partition: &PartitionHandle,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<()> {
        partition.ensure_writable("put")?;
        partition.ensure_open("put")?;
        let bytes = partition.codec().encode(value)?;
        partition
            .database()
            .put(&mut self.txn, key.as_ref(), bytes.as_slice())?;
        Ok(())
    }

    /// Delete a key, returning whether it existed
    pub fn delete(&mut self, partition: &PartitionHandle, key: impl AsRef<[u8]>) -> Result<bool> {
        partition.ensure_writable("delete")?;
        partition.ensure_open("delete")?;
        Ok(partition.database().delete(&mut self.txn, key.as_ref())?)
    }
}

/// Write transaction bound to one partition
pub struct PartitionTxn<'t> {
    partition: &'t PartitionHandle,
    txn: WriteTxn<'t>,
}

impl<'t> PartitionTxn<'t> {
    pub(crate) fn new(partition: &'t PartitionHandle, txn: WriteTxn<'t>) -> Self {
        Self { partition, txn }
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.txn.commit()
    }

    pub fn partition(&self) -> &PartitionHandle {
        self.partition
    }

    pub fn get<V: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>> {
        self.txn.get(self.partition, key)
    }

    pub fn has(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.txn.has(self.partition, key)
    }

    pub fn put<V: Serialize + ?Sized>(&mut self, key: impl AsRef<[u8]>, value: &V) -> Result<()> {
        self.txn.put(self.partition, key, value)
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.txn.delete(self.partition, key)
    }
}
