//! Lazy range cursors
//!
//! A cursor reads up to `prefetch_batch` entries per short read
//! transaction and resumes after the last key it produced, so an
//! iterator that is held open never pins a reader slot between batches.
//! Each batch is a consistent snapshot; the sequence as a whole is not.

use super::PartitionHandle;
use crate::codec::ValueCodec;
use crate::types::RangeSpec;
use crate::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Bound;

/// Engine bounds for a range, optionally resuming after `resume_after`
pub(crate) fn bounds<'a>(
    range: &'a RangeSpec,
    resume_after: Option<&'a [u8]>,
) -> (Bound<&'a [u8]>, Bound<&'a [u8]>) {
    let start = match &range.start {
        Some(start) => Bound::Included(start.as_slice()),
        None => Bound::Unbounded,
    };
    let end = match &range.end {
        Some(end) => Bound::Excluded(end.as_slice()),
        None => Bound::Unbounded,
    };

    match (resume_after, range.reverse) {
        (None, _) => (start, end),
        (Some(last), false) => (Bound::Excluded(last), end),
        (Some(last), true) => (start, Bound::Excluded(last)),
    }
}

/// Raw `(key, encoded value)` cursor over one partition
pub(crate) struct RangeIter {
    handle: PartitionHandle,
    op: &'static str,
    range: RangeSpec,
    batch_size: usize,
    buffer: VecDeque<(Bytes, Vec<u8>)>,
    resume_after: Option<Vec<u8>>,
    remaining: Option<usize>,
    exhausted: bool,
}

impl RangeIter {
    pub(crate) fn new(handle: PartitionHandle, op: &'static str, range: RangeSpec) -> Self {
        let batch_size = handle.options().prefetch_batch.max(1);
        let remaining = range.limit;
        Self {
            handle,
            op,
            range,
            batch_size,
            buffer: VecDeque::new(),
            resume_after: None,
            remaining,
            exhausted: false,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let want = match self.remaining {
            Some(remaining) => remaining.min(self.batch_size),
            None => self.batch_size,
        };
        if want == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let env = self.handle.env(self.op)?;
        let db = self.handle.database();
        let rtxn = env.read_txn()?;
        let span = bounds(&self.range, self.resume_after.as_deref());

        let mut fetched = 0;
        if self.range.reverse {
            for item in db.rev_range(&rtxn, &span)?.take(want) {
                let (key, value) = item?;
                self.buffer
                    .push_back((Bytes::copy_from_slice(key), value.to_vec()));
                fetched += 1;
            }
        } else {
            for item in db.range(&rtxn, &span)?.take(want) {
                let (key, value) = item?;
                self.buffer
                    .push_back((Bytes::copy_from_slice(key), value.to_vec()));
                fetched += 1;
            }
        }

        if fetched < want {
            self.exhausted = true;
        }
        if let Some((last, _)) = self.buffer.back() {
            self.resume_after = Some(last.to_vec());
        }
        Ok(())
    }
}

impl Iterator for RangeIter {
    type Item = Result<(Bytes, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let entry = self.buffer.pop_front()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        Some(Ok(entry))
    }
}

/// Keys of a range, in range order
pub struct Keys {
    inner: RangeIter,
}

impl Keys {
    pub(crate) fn new(inner: RangeIter) -> Self {
        Self { inner }
    }
}

impl Iterator for Keys {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| entry.map(|(key, _)| key))
    }
}

/// Decoded entries of a range, in range order
pub struct Entries<V> {
    inner: RangeIter,
    codec: ValueCodec,
    _value: PhantomData<fn() -> V>,
}

impl<V> Entries<V> {
    pub(crate) fn new(inner: RangeIter, codec: ValueCodec) -> Self {
        Self {
            inner,
            codec,
            _value: PhantomData,
        }
    }
}

impl<V: DeserializeOwned> Iterator for Entries<V> {
    type Item = Result<(Bytes, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, bytes) = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        Some(self.codec.decode(&bytes).map(|value| (key, value)))
    }
}
