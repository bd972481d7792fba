//! Partition catalog kept in the system partition
//!
//! One JSON record per user partition under `partition:<name>`. A
//! partition exists on disk iff its record exists; records are written
//! and deleted in the same write transaction that creates or clears the
//! partition's sub-database.
//!
//! The engine cannot delete a named sub-database, so partitions live in
//! numbered slots. Dropping a partition clears its slot and parks it under
//! `free:<slot>`; the next create takes a parked slot before minting a new
//! one, which keeps the number of sub-databases bounded by the number of
//! live partitions.

use crate::codec::{Compression, ValueCodec, ValueEncoding};
use crate::Result;
use heed::types::Bytes;
use heed::{Database, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use tracing::warn;

pub(crate) type RawDatabase = Database<Bytes, Bytes>;

const PREFIX: &[u8] = b"partition:";
const PREFIX_END: &[u8] = b"partition;";
const FREE_PREFIX: &[u8] = b"free:";
const FREE_PREFIX_END: &[u8] = b"free;";
const NEXT_SLOT_KEY: &[u8] = b"slots:next";

/// Persisted description of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PartitionMeta {
    pub name: String,
    /// Sub-database holding the partition's entries
    pub slot: String,
    pub encoding: ValueEncoding,
    pub compression: Compression,
    /// UTC epoch seconds
    pub created_at: i64,
}

impl PartitionMeta {
    pub fn new(name: &str, slot: &str, codec: ValueCodec) -> Self {
        Self {
            name: name.to_string(),
            slot: slot.to_string(),
            encoding: codec.encoding,
            compression: codec.compression,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn codec(&self) -> ValueCodec {
        ValueCodec::new(self.encoding, self.compression)
    }
}

fn record_codec() -> ValueCodec {
    ValueCodec::default()
}

fn prefixed(prefix: &[u8], name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + name.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(name.as_bytes());
    key
}

fn record_key(name: &str) -> Vec<u8> {
    prefixed(PREFIX, name)
}

pub(crate) fn get(txn: &RoTxn<'_>, db: RawDatabase, name: &str) -> Result<Option<PartitionMeta>> {
    match db.get(txn, &record_key(name)[..])? {
        Some(bytes) => Ok(Some(record_codec().decode(bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn put(txn: &mut RwTxn<'_>, db: RawDatabase, meta: &PartitionMeta) -> Result<()> {
    let bytes = record_codec().encode(meta)?;
    db.put(txn, &record_key(&meta.name)[..], &bytes[..])?;
    Ok(())
}

pub(crate) fn delete(txn: &mut RwTxn<'_>, db: RawDatabase, name: &str) -> Result<bool> {
    Ok(db.delete(txn, &record_key(name)[..])?)
}

/// Names of every catalogued partition, in key order
pub(crate) fn names(txn: &RoTxn<'_>, db: RawDatabase) -> Result<Vec<String>> {
    let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
        (Bound::Included(PREFIX), Bound::Excluded(PREFIX_END));
    let mut names = Vec::new();
    for item in db.range(txn, &bounds)? {
        let (key, _) = item?;
        match std::str::from_utf8(&key[PREFIX.len()..]) {
            Ok(name) => names.push(name.to_string()),
            Err(e) => warn!("Skipping catalog record with non-UTF-8 name: {}", e),
        }
    }
    Ok(names)
}

/// Claim a slot for a new partition, reusing a parked one if any
pub(crate) fn allocate_slot(txn: &mut RwTxn<'_>, db: RawDatabase) -> Result<String> {
    let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
        (Bound::Included(FREE_PREFIX), Bound::Excluded(FREE_PREFIX_END));
    let parked = match db.range(txn, &bounds)?.next() {
        Some(item) => Some(item?.0.to_vec()),
        None => None,
    };

    if let Some(key) = parked {
        db.delete(txn, &key[..])?;
        match String::from_utf8(key[FREE_PREFIX.len()..].to_vec()) {
            Ok(slot) => return Ok(slot),
            Err(e) => warn!("Discarding parked slot with non-UTF-8 name: {}", e),
        }
    }

    let next: u64 = match db.get(txn, NEXT_SLOT_KEY)? {
        Some(bytes) => record_codec().decode(bytes)?,
        None => 0,
    };
    let counter = record_codec().encode(&(next + 1))?;
    db.put(txn, NEXT_SLOT_KEY, &counter[..])?;
    Ok(format!("slot_{:08}", next))
}

/// Park a cleared slot for reuse
pub(crate) fn release_slot(txn: &mut RwTxn<'_>, db: RawDatabase, slot: &str) -> Result<()> {
    db.put(txn, &prefixed(FREE_PREFIX, slot)[..], &b""[..])?;
    Ok(())
}
