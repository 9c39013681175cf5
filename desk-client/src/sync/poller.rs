// desk-client/src/sync/poller.rs
// 轮询器 - 为被订阅的 key 定期刷新

use super::fetch::FetchCoordinator;
use super::store::{CacheEntry, Subscription};
use super::{CacheKey, CacheValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct PollerState {
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Recurring refresh per key
///
/// A key's timer only turns into a read while the key has at least one
/// subscriber, and never while a read or mutation is pending for it.
#[derive(Debug)]
pub struct Poller<K, V> {
    coordinator: FetchCoordinator<K, V>,
    tasks: Mutex<HashMap<K, PollerState>>,
}

impl<K: CacheKey, V: CacheValue> Poller<K, V> {
    pub fn new(coordinator: FetchCoordinator<K, V>) -> Self {
        Self {
            coordinator,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &FetchCoordinator<K, V> {
        &self.coordinator
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<K, PollerState>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a recurring tick for `key`. The first tick fires one
    /// `interval` from now.
    ///
    /// Returns `false` when the key is already polled; the running timer is
    /// kept as is.
    pub fn start_polling(&self, key: K, interval: Duration) -> bool {
        self.start_locked(&mut self.tasks(), key, interval)
    }

    fn start_locked(&self, tasks: &mut HashMap<K, PollerState>, key: K, interval: Duration) -> bool {
        if let Some(existing) = tasks.get(&key)
            && !existing.task.is_finished()
        {
            return false;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.coordinator.clone(),
            key.clone(),
            interval,
            cancel.clone(),
        ));
        tracing::debug!(?key, ?interval, "polling started");
        tasks.insert(
            key,
            PollerState {
                interval,
                cancel,
                task,
            },
        );
        true
    }

    /// Cancels the timer of `key`. No tick fires afterwards.
    pub fn stop_polling(&self, key: &K) -> bool {
        Self::stop_locked(&mut self.tasks(), key)
    }

    fn stop_locked(tasks: &mut HashMap<K, PollerState>, key: &K) -> bool {
        match tasks.remove(key) {
            Some(state) => {
                state.cancel.cancel();
                state.task.abort();
                tracing::debug!(?key, "polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, key: &K) -> bool {
        self.tasks().contains_key(key)
    }

    pub fn interval(&self, key: &K) -> Option<Duration> {
        self.tasks().get(key).map(|s| s.interval)
    }

    pub fn active_keys(&self) -> Vec<K> {
        self.tasks().keys().cloned().collect()
    }

    /// Subscribes to `key` and makes sure its timer runs.
    pub fn watch(self: &Arc<Self>, key: K, interval: Duration) -> Watch<K, V> {
        let mut tasks = self.tasks();
        let subscription = self.coordinator.store().subscribe(&key);
        self.start_locked(&mut tasks, key.clone(), interval);
        Watch {
            key,
            subscription: Some(subscription),
            poller: Arc::clone(self),
        }
    }

    /// Drops one subscription; the timer stops with the last one.
    fn release(&self, key: &K, subscription: Subscription<V>) {
        let mut tasks = self.tasks();
        drop(subscription);
        if self.coordinator.store().subscriber_count(key) == 0 {
            Self::stop_locked(&mut tasks, key);
        }
    }

    /// Stops every timer
    pub fn shutdown(&self) {
        for (_, state) in self.tasks().drain() {
            state.cancel.cancel();
            state.task.abort();
        }
    }
}

impl<K, V> Drop for Poller<K, V> {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, state) in tasks.drain() {
            state.cancel.cancel();
            state.task.abort();
        }
    }
}

/// A view's hold on one key
///
/// Keeps the key polled while alive. Dropping the last watch of a key stops
/// its timer.
#[derive(Debug)]
pub struct Watch<K: CacheKey, V: CacheValue> {
    key: K,
    subscription: Option<Subscription<V>>,
    poller: Arc<Poller<K, V>>,
}

impl<K: CacheKey, V: CacheValue> Watch<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Latest entry
    pub fn current(&self) -> CacheEntry<V> {
        self.subscription
            .as_ref()
            .map(Subscription::current)
            .unwrap_or_default()
    }

    /// Latest value, if any
    pub fn value(&self) -> Option<V> {
        self.current().value
    }

    /// Waits for the next change of the entry.
    pub async fn changed(&mut self) -> Option<CacheEntry<V>> {
        self.subscription.as_mut()?.next().await
    }

    /// Waits until `predicate` holds for the entry.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<CacheEntry<V>>
    where
        F: FnMut(&CacheEntry<V>) -> bool,
    {
        self.subscription.as_mut()?.wait_for(predicate).await
    }
}

impl<K: CacheKey, V: CacheValue> Drop for Watch<K, V> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.poller.release(&self.key, subscription);
        }
    }
}

async fn poll_loop<K: CacheKey, V: CacheValue>(
    coordinator: FetchCoordinator<K, V>,
    key: K,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let store = coordinator.store();
        if store.subscriber_count(&key) == 0 {
            tracing::trace!(?key, "no subscribers, tick skipped");
            continue;
        }
        if coordinator.is_in_flight(&key) || store.get(&key).is_some_and(|e| e.is_fetching) {
            tracing::debug!(?key, "tick coalesced with pending work");
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = coordinator.fetch(&key) => {
                if let Err(error) = result {
                    tracing::debug!(?key, %error, "poll tick failed");
                }
            }
        }
    }
}
