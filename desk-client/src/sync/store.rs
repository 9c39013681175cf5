//! Cache Store - 缓存表
//!
//! Keyed table of cached values with generation and staleness metadata.
//! No I/O happens here; the fetch coordinator and the mutation executor are
//! the only writers.
//!
//! Every entry lives inside a `watch` channel: subscribers always see the
//! latest entry, and an accepted write is what wakes them up. A rejected
//! write (stale generation, patch without a value) leaves the channel
//! untouched.

use super::{CacheKey, CacheValue};
use crate::error::SyncError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// One cached unit
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// Absent until the first successful fetch
    pub value: Option<V>,
    /// Generation of the fetch that produced `value`
    pub fetched_at_generation: u64,
    /// When `value` was last written by an authoritative fetch
    pub fetched_at: Option<Instant>,
    /// Error of the latest failed refresh; cleared by the next success
    pub last_error: Option<SyncError>,
    /// A read or a mutation is pending for this key
    pub is_fetching: bool,
    pending: u32,
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at_generation: 0,
            fetched_at: None,
            last_error: None,
            is_fetching: false,
            pending: 0,
        }
    }
}

impl<V> CacheEntry<V> {
    /// Nothing to render yet and nothing failed: show a spinner
    pub fn is_loading(&self) -> bool {
        self.value.is_none() && self.last_error.is_none()
    }

    /// Whether the value is older than `stale_time` (or was never fetched)
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        match self.fetched_at {
            Some(at) => at.elapsed() >= stale_time,
            None => true,
        }
    }
}

/// A live view of one entry
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription<V> {
    rx: watch::Receiver<CacheEntry<V>>,
}

impl<V: Clone> Subscription<V> {
    /// Latest entry
    pub fn current(&self) -> CacheEntry<V> {
        self.rx.borrow().clone()
    }

    /// Waits for the next accepted write and returns the entry after it.
    ///
    /// Returns `None` once the entry has been removed from the store.
    pub async fn next(&mut self) -> Option<CacheEntry<V>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until `predicate` holds for the current entry.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<CacheEntry<V>>
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        let entry = self.rx.wait_for(|entry| predicate(entry)).await.ok()?;
        Some((*entry).clone())
    }
}

type Slots<K, V> = HashMap<K, watch::Sender<CacheEntry<V>>>;

/// Keyed cache table
///
/// Cheap to clone; clones share the same table.
#[derive(Debug)]
pub struct CacheStore<K, V> {
    inner: Arc<Mutex<Slots<K, V>>>,
}

impl<K, V> Clone for CacheStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Default for CacheStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> CacheStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot<'a>(slots: &'a mut Slots<K, V>, key: &K) -> &'a watch::Sender<CacheEntry<V>> {
        slots
            .entry(key.clone())
            .or_insert_with(|| watch::channel(CacheEntry::default()).0)
    }

    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.slots().get(key).map(|tx| tx.borrow().clone())
    }

    /// Cached value, if one has been fetched
    pub fn value(&self, key: &K) -> Option<V> {
        self.slots().get(key).and_then(|tx| tx.borrow().value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.slots().keys().cloned().collect()
    }

    /// Authoritative write.
    ///
    /// Accepted only when `generation >= fetched_at_generation`; an older
    /// generation leaves the entry untouched and reports
    /// [`SyncError::StaleResponseDiscarded`].
    pub fn set(&self, key: &K, value: V, generation: u64) -> Result<(), SyncError> {
        let mut slots = self.slots();
        let tx = Self::slot(&mut slots, key);
        let mut rejected = None;
        tx.send_if_modified(|entry| {
            if generation < entry.fetched_at_generation {
                rejected = Some(entry.fetched_at_generation);
                return false;
            }
            entry.value = Some(value);
            entry.fetched_at_generation = generation;
            entry.fetched_at = Some(Instant::now());
            entry.last_error = None;
            true
        });
        match rejected {
            Some(current) => Err(SyncError::StaleResponseDiscarded {
                generation,
                current,
            }),
            None => Ok(()),
        }
    }

    /// Optimistic write: replaces the value with `updater(&value)` and
    /// returns the previous value for rollback.
    ///
    /// No-op returning `None` when nothing is cached yet.
    pub fn patch<F>(&self, key: &K, updater: F) -> Option<V>
    where
        F: FnOnce(&V) -> V,
    {
        let slots = self.slots();
        let tx = slots.get(key)?;
        let mut prior = None;
        tx.send_if_modified(|entry| match entry.value.take() {
            Some(current) => {
                entry.value = Some(updater(&current));
                prior = Some(current);
                true
            }
            None => false,
        });
        prior
    }

    /// Puts a snapshot taken by [`patch`](Self::patch) back in place.
    pub fn restore(&self, key: &K, snapshot: V) {
        let mut slots = self.slots();
        Self::slot(&mut slots, key).send_modify(|entry| entry.value = Some(snapshot));
    }

    /// Records a failed refresh. The cached value is kept.
    pub fn record_error(&self, key: &K, error: SyncError) {
        let mut slots = self.slots();
        Self::slot(&mut slots, key).send_modify(|entry| entry.last_error = Some(error));
    }

    /// Marks the start of a read or mutation for `key`.
    pub fn begin_activity(&self, key: &K) {
        let mut slots = self.slots();
        Self::slot(&mut slots, key).send_if_modified(|entry| {
            entry.pending += 1;
            let changed = !entry.is_fetching;
            entry.is_fetching = true;
            changed
        });
    }

    /// Marks the end of a read or mutation for `key`.
    pub fn end_activity(&self, key: &K) {
        let slots = self.slots();
        if let Some(tx) = slots.get(key) {
            tx.send_if_modified(|entry| {
                entry.pending = entry.pending.saturating_sub(1);
                let fetching = entry.pending > 0;
                let changed = fetching != entry.is_fetching;
                entry.is_fetching = fetching;
                changed
            });
        }
    }

    /// Forces the next staleness check for `key` to fail.
    pub fn mark_stale(&self, key: &K) {
        let slots = self.slots();
        if let Some(tx) = slots.get(key) {
            tx.send_if_modified(|entry| entry.fetched_at.take().is_some());
        }
    }

    /// Subscribes to `key`, creating an empty entry when needed.
    pub fn subscribe(&self, key: &K) -> Subscription<V> {
        let mut slots = self.slots();
        Subscription {
            rx: Self::slot(&mut slots, key).subscribe(),
        }
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.slots()
            .get(key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drops an entry. Its subscribers see the end of their stream.
    pub fn remove(&self, key: &K) -> Option<CacheEntry<V>> {
        self.slots().remove(key).map(|tx| tx.borrow().clone())
    }

    /// Snapshot of every entry
    pub fn entries(&self) -> Vec<(K, CacheEntry<V>)> {
        self.slots()
            .iter()
            .map(|(key, tx)| (key.clone(), tx.borrow().clone()))
            .collect()
    }
}
