// src/store.rs

//! Concurrent flow table.
//!
//! Records live behind `Arc`s in a sharded `DashMap`. A reader clones the
//! `Arc` and keeps a consistent snapshot for as long as it likes; a writer
//! never touches a published record, it installs a replacement under the
//! key's shard lock. Removing an entry only drops the map's reference, so
//! an in-flight reader is never invalidated.

// dependencies
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::StoreError;
use crate::flow::{FlowKey, FlowRecord};

#[derive(Debug)]
pub struct TrackingStore {
    records: DashMap<FlowKey, Arc<FlowRecord>>,
    // tracked separately: DashMap::len locks every shard, which would
    // deadlock from inside an entry guard
    live: AtomicUsize,
    capacity: usize,
}

impl TrackingStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: DashMap::new(),
            live: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the record for `key`, if tracked.
    pub fn lookup(&self, key: &FlowKey) -> Option<Arc<FlowRecord>> {
        self.records.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Atomic read-modify-write of a single record.
    ///
    /// `f` sees the current record (or `None`) while the key's shard is
    /// locked, and returns the replacement plus a value handed back to the
    /// caller. Returning `None` as the replacement leaves the entry as is.
    /// Creating a new entry while the store is full fails with `InsertFailed`
    /// and nothing is stored.
    pub fn upsert<F, R>(&self, key: FlowKey, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(Option<&FlowRecord>) -> (Option<FlowRecord>, R),
    {
        match self.records.entry(key) {
            Entry::Occupied(mut entry) => {
                let (next, out) = f(Some(entry.get().as_ref()));
                if let Some(next) = next {
                    entry.insert(Arc::new(next));
                }
                Ok(out)
            }
            Entry::Vacant(entry) => {
                let (next, out) = f(None);
                if let Some(next) = next {
                    self.reserve_slot()?;
                    entry.insert(Arc::new(next));
                }
                Ok(out)
            }
        }
    }

    /// Insert `record` only if its key is not tracked yet. Returns whether it was stored.
    pub fn insert_if_absent(&self, record: FlowRecord) -> Result<bool, StoreError> {
        self.upsert(record.key, |current| match current {
            Some(_) => (None, false),
            None => (Some(record), true),
        })
    }

    /// Remove every record matching `predicate`, returning the removed keys.
    pub fn remove_if<P>(&self, mut predicate: P) -> Vec<FlowKey>
    where
        P: FnMut(&FlowRecord) -> bool,
    {
        let mut removed = Vec::new();
        self.records.retain(|key, record| {
            if predicate(record.as_ref()) {
                removed.push(*key);
                false
            } else {
                true
            }
        });
        self.live.fetch_sub(removed.len(), Ordering::AcqRel);
        removed
    }

    /// Remove `key` if its record still matches `predicate` at the moment of removal.
    pub fn remove_key_if<P>(&self, key: &FlowKey, predicate: P) -> bool
    where
        P: FnOnce(&FlowRecord) -> bool,
    {
        let removed = self
            .records
            .remove_if(key, |_, record| predicate(record.as_ref()))
            .is_some();
        if removed {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Keys of records matching `predicate` at the time each shard was read.
    pub fn keys_where<P>(&self, mut predicate: P) -> Vec<FlowKey>
    where
        P: FnMut(&FlowRecord) -> bool,
    {
        self.records
            .iter()
            .filter(|entry| predicate(entry.value().as_ref()))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Snapshots of every tracked record.
    pub fn snapshot(&self) -> Vec<Arc<FlowRecord>> {
        self.records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drop all tracked state.
    pub fn clear(&self) {
        let removed = self.remove_if(|_| true);
        tracing::debug!(flows = removed.len(), "tracking store cleared");
    }

    fn reserve_slot(&self) -> Result<(), StoreError> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| StoreError::InsertFailed {
                capacity: self.capacity,
            })
    }
}
