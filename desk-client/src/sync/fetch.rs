//! Fetch Coordinator
//!
//! Sequences remote reads per key:
//!
//! - at most one read per key is in flight for [`FetchCoordinator::fetch`];
//!   concurrent callers attach to it and receive the same result
//! - every read *initiation* takes the next generation of its key; only the
//!   read holding the latest generation writes to the cache, so a response
//!   that lost the race against a newer read (or a mutation) is dropped
//! - a failed read keeps the cached value and records `last_error`
//!
//! Reads run on spawned tasks: a caller that goes away does not cancel the
//! read, and its result still lands in the cache.

use super::store::CacheStore;
use super::{CacheKey, CacheValue};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Where the values of one key space come from
#[async_trait]
pub trait Source<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> SyncResult<V>;
}

/// Read behaviour of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub stale_time: Duration,
    pub read_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        FetchPolicy::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for FetchPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            stale_time: config.stale_time,
            read_retries: config.read_retries,
            retry_delay: config.retry_delay,
            request_timeout: config.request_timeout,
        }
    }
}

type Waiter<V> = oneshot::Sender<SyncResult<V>>;

struct InFlight<V> {
    generation: u64,
    waiters: Vec<Waiter<V>>,
}

struct KeyState<V> {
    /// Last generation handed out; 0 until the first read
    generation: u64,
    in_flight: Option<InFlight<V>>,
    /// Reads outrun by [`FetchCoordinator::supersede`]; their callers still
    /// get the response, the cache does not
    superseded: Vec<InFlight<V>>,
}

impl<V> Default for KeyState<V> {
    fn default() -> Self {
        Self {
            generation: 0,
            in_flight: None,
            superseded: Vec::new(),
        }
    }
}

/// Deduplicating, generation-ordered reader for one key space
pub struct FetchCoordinator<K, V> {
    store: CacheStore<K, V>,
    source: Arc<dyn Source<K, V>>,
    policy: FetchPolicy,
    state: Arc<Mutex<HashMap<K, KeyState<V>>>>,
}

impl<K, V> Clone for FetchCoordinator<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            source: Arc::clone(&self.source),
            policy: self.policy,
            state: Arc::clone(&self.state),
        }
    }
}

impl<K, V> std::fmt::Debug for FetchCoordinator<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("policy", &self.policy)
            .field("source", &"<dyn Source>")
            .finish_non_exhaustive()
    }
}

impl<K: CacheKey, V: CacheValue> FetchCoordinator<K, V> {
    pub fn new(store: CacheStore<K, V>, source: Arc<dyn Source<K, V>>, policy: FetchPolicy) -> Self {
        Self {
            store,
            source,
            policy,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &CacheStore<K, V> {
        &self.store
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    fn key_states(&self) -> MutexGuard<'_, HashMap<K, KeyState<V>>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last generation initiated for `key` (0 = never fetched)
    pub fn generation(&self, key: &K) -> u64 {
        self.key_states().get(key).map(|s| s.generation).unwrap_or(0)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.key_states()
            .get(key)
            .is_some_and(|s| s.in_flight.is_some())
    }

    /// Reads `key`, attaching to the in-flight read when there is one.
    pub async fn fetch(&self, key: &K) -> SyncResult<V> {
        let (tx, rx) = oneshot::channel();
        let started = {
            let mut states = self.key_states();
            let state = states.entry(key.clone()).or_default();
            match state.in_flight.as_mut() {
                Some(in_flight) => {
                    tracing::debug!(?key, generation = in_flight.generation, "attaching to in-flight read");
                    in_flight.waiters.push(tx);
                    None
                }
                None => {
                    state.generation += 1;
                    state.in_flight = Some(InFlight {
                        generation: state.generation,
                        waiters: vec![tx],
                    });
                    Some(state.generation)
                }
            }
        };
        if let Some(generation) = started {
            self.spawn_read(key.clone(), generation);
        }
        Self::wait(rx).await
    }

    /// Starts a new read for `key` even if one is in flight.
    ///
    /// The older read becomes stale: its response is dropped and its waiters
    /// are moved over to this one.
    pub async fn refetch(&self, key: &K) -> SyncResult<V> {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut states = self.key_states();
            let state = states.entry(key.clone()).or_default();
            state.generation += 1;
            let mut waiters = state
                .in_flight
                .take()
                .map(|in_flight| {
                    tracing::debug!(
                        ?key,
                        superseded = in_flight.generation,
                        generation = state.generation,
                        "superseding in-flight read"
                    );
                    in_flight.waiters
                })
                .unwrap_or_default();
            waiters.push(tx);
            state.in_flight = Some(InFlight {
                generation: state.generation,
                waiters,
            });
            state.generation
        };
        self.spawn_read(key.clone(), generation);
        Self::wait(rx).await
    }

    /// Takes the next generation of `key` without reading.
    ///
    /// A read in flight can no longer write to the cache; its callers still
    /// receive its response. Used before an optimistic patch so that a read
    /// started earlier cannot overwrite it.
    pub fn supersede(&self, key: &K) -> u64 {
        let mut states = self.key_states();
        let state = states.entry(key.clone()).or_default();
        state.generation += 1;
        if let Some(in_flight) = state.in_flight.take() {
            tracing::debug!(
                ?key,
                superseded = in_flight.generation,
                generation = state.generation,
                "in-flight read superseded"
            );
            state.superseded.push(in_flight);
        }
        state.generation
    }

    /// Refetches `key` and absorbs the outcome into the cache entry.
    pub async fn invalidate(&self, key: &K) {
        if let Err(error) = self.refetch(key).await {
            tracing::warn!(?key, %error, "refetch after invalidation failed");
        }
    }

    /// Serves the cached value while it is fresh, reads otherwise.
    pub async fn fetch_if_stale(&self, key: &K) -> SyncResult<V> {
        if let Some(entry) = self.store.get(key)
            && let Some(value) = &entry.value
            && !entry.is_stale(self.policy.stale_time)
        {
            return Ok(value.clone());
        }
        self.fetch(key).await
    }

    async fn wait(rx: oneshot::Receiver<SyncResult<V>>) -> SyncResult<V> {
        rx.await
            .unwrap_or_else(|_| Err(SyncError::NetworkFailure("read task ended without a result".into())))
    }

    fn spawn_read(&self, key: K, generation: u64) {
        self.store.begin_activity(&key);
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.load_with_retry(&key, generation).await;
            this.complete(&key, generation, result);
        });
    }

    async fn load_with_retry(&self, key: &K, generation: u64) -> SyncResult<V> {
        let attempts = self.policy.read_retries + 1;
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.policy.request_timeout, self.source.load(key)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::NetworkFailure(format!(
                    "read timed out after {:?}",
                    self.policy.request_timeout
                ))),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(error) if attempt < attempts => {
                    tracing::debug!(?key, generation, attempt, %error, "read failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn complete(&self, key: &K, generation: u64, result: SyncResult<V>) {
        let (is_current, waiters) = {
            let mut states = self.key_states();
            match states.get_mut(key) {
                Some(state)
                    if state
                        .in_flight
                        .as_ref()
                        .is_some_and(|f| f.generation == generation) =>
                {
                    (true, state.in_flight.take().map(|f| f.waiters).unwrap_or_default())
                }
                Some(state) => {
                    let waiters = state
                        .superseded
                        .iter()
                        .position(|f| f.generation == generation)
                        .map(|i| state.superseded.swap_remove(i).waiters)
                        .unwrap_or_default();
                    (false, waiters)
                }
                None => (false, Vec::new()),
            }
        };

        match &result {
            Ok(value) if is_current => {
                if let Err(error) = self.store.set(key, value.clone(), generation) {
                    tracing::debug!(?key, %error, "dropping late response");
                }
            }
            Ok(_) => {
                tracing::debug!(?key, generation, "dropping response of superseded read");
            }
            Err(error) if is_current => {
                tracing::warn!(?key, generation, %error, "refresh failed, keeping cached value");
                self.store.record_error(key, error.clone());
            }
            Err(error) => {
                tracing::debug!(?key, generation, %error, "ignoring failure of superseded read");
            }
        }
        self.store.end_activity(key);

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Each load takes the next gate and resolves when the test fires it
    #[derive(Default)]
    struct GatedSource {
        calls: AtomicUsize,
        gates: Mutex<VecDeque<oneshot::Receiver<SyncResult<u32>>>>,
    }

    impl GatedSource {
        fn gate(&self) -> oneshot::Sender<SyncResult<u32>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().push_back(rx);
            tx
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Source<String, u32> for GatedSource {
        async fn load(&self, _key: &String) -> SyncResult<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gates.lock().unwrap().pop_front();
            match gate {
                Some(rx) => rx
                    .await
                    .unwrap_or_else(|_| Err(SyncError::NetworkFailure("gate dropped".into()))),
                None => Err(SyncError::NetworkFailure("no gate".into())),
            }
        }
    }

    fn policy() -> FetchPolicy {
        FetchPolicy {
            stale_time: Duration::from_secs(5),
            read_retries: 0,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn coordinator(source: Arc<GatedSource>, policy: FetchPolicy) -> FetchCoordinator<String, u32> {
        FetchCoordinator::new(CacheStore::new(), source, policy)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn key() -> String {
        "T1".to_string()
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_read() {
        let source = Arc::new(GatedSource::default());
        let gate = source.gate();
        let coordinator = coordinator(source.clone(), policy());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move { c.fetch(&key()).await }));
        }
        settle().await;
        assert!(coordinator.is_in_flight(&key()));
        assert!(coordinator.store().get(&key()).unwrap().is_fetching);

        gate.send(Ok(42)).unwrap();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(source.calls(), 1);
        assert_eq!(coordinator.generation(&key()), 1);

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(42));
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_late_response_of_older_generation_dropped() {
        let source = Arc::new(GatedSource::default());
        let gate_a = source.gate();
        let gate_b = source.gate();
        let coordinator = coordinator(source.clone(), policy());

        let c = coordinator.clone();
        let a = tokio::spawn(async move { c.fetch(&key()).await });
        settle().await;
        let c = coordinator.clone();
        let b = tokio::spawn(async move { c.refetch(&key()).await });
        settle().await;
        assert_eq!(source.calls(), 2);
        assert_eq!(coordinator.generation(&key()), 2);

        gate_b.send(Ok(2)).unwrap();
        assert_eq!(b.await.unwrap(), Ok(2));
        // a's caller was moved onto the newer read
        assert_eq!(a.await.unwrap(), Ok(2));

        gate_a.send(Ok(1)).unwrap();
        settle().await;

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(2));
        assert_eq!(entry.fetched_at_generation, 2);
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_older_read_answering_first_is_not_cached() {
        let source = Arc::new(GatedSource::default());
        let gate_a = source.gate();
        let gate_b = source.gate();
        let coordinator = coordinator(source.clone(), policy());

        let c = coordinator.clone();
        let a = tokio::spawn(async move { c.fetch(&key()).await });
        settle().await;
        let c = coordinator.clone();
        let b = tokio::spawn(async move { c.refetch(&key()).await });
        settle().await;

        gate_a.send(Ok(1)).unwrap();
        settle().await;
        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, None);
        assert_eq!(entry.fetched_at_generation, 0);
        assert!(entry.is_fetching);
        assert!(!a.is_finished());

        gate_b.send(Ok(2)).unwrap();
        assert_eq!(b.await.unwrap(), Ok(2));
        assert_eq!(a.await.unwrap(), Ok(2));

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(2));
        assert_eq!(entry.fetched_at_generation, 2);
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_older_read_answering_after_newer_failed_is_not_cached() {
        let source = Arc::new(GatedSource::default());
        let gate_a = source.gate();
        let gate_b = source.gate();
        let coordinator = coordinator(source.clone(), policy());

        let c = coordinator.clone();
        let a = tokio::spawn(async move { c.fetch(&key()).await });
        settle().await;
        let c = coordinator.clone();
        let b = tokio::spawn(async move { c.refetch(&key()).await });
        settle().await;

        gate_b
            .send(Err(SyncError::NetworkFailure("offline".into())))
            .unwrap();
        assert!(matches!(b.await.unwrap(), Err(SyncError::NetworkFailure(_))));
        assert!(matches!(a.await.unwrap(), Err(SyncError::NetworkFailure(_))));

        gate_a.send(Ok(1)).unwrap();
        settle().await;

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, None);
        assert_eq!(
            entry.last_error,
            Some(SyncError::NetworkFailure("offline".into()))
        );
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_superseded_read_answers_caller_but_not_cache() {
        let source = Arc::new(GatedSource::default());
        source.gate().send(Ok(1)).unwrap();
        let gate = source.gate();
        let coordinator = coordinator(source.clone(), policy());
        coordinator.fetch(&key()).await.unwrap();

        let c = coordinator.clone();
        let read = tokio::spawn(async move { c.fetch(&key()).await });
        settle().await;
        assert_eq!(coordinator.supersede(&key()), 3);
        assert!(!coordinator.is_in_flight(&key()));
        coordinator.store().patch(&key(), |v| v + 100);

        gate.send(Ok(5)).unwrap();
        assert_eq!(read.await.unwrap(), Ok(5));

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(101));
        assert_eq!(entry.fetched_at_generation, 1);
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_value() {
        let source = Arc::new(GatedSource::default());
        let coordinator = coordinator(source.clone(), policy());

        source.gate().send(Ok(7)).unwrap();
        assert_eq!(coordinator.fetch(&key()).await, Ok(7));

        source
            .gate()
            .send(Err(SyncError::NetworkFailure("offline".into())))
            .unwrap();
        let result = coordinator.fetch(&key()).await;
        assert!(matches!(result, Err(SyncError::NetworkFailure(_))));

        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(7));
        assert_eq!(
            entry.last_error,
            Some(SyncError::NetworkFailure("offline".into()))
        );
    }

    #[tokio::test]
    async fn test_single_retry_for_reads() {
        let source = Arc::new(GatedSource::default());
        let policy = FetchPolicy {
            read_retries: 1,
            ..policy()
        };
        let coordinator = coordinator(source.clone(), policy);

        source
            .gate()
            .send(Err(SyncError::NetworkFailure("blip".into())))
            .unwrap();
        source.gate().send(Ok(3)).unwrap();
        assert_eq!(coordinator.fetch(&key()).await, Ok(3));
        assert_eq!(source.calls(), 2);

        // two failures in a row exhaust the retry
        for _ in 0..2 {
            source
                .gate()
                .send(Err(SyncError::RemoteRejection {
                    status: 500,
                    message: "boom".into(),
                }))
                .unwrap();
        }
        assert!(coordinator.fetch(&key()).await.is_err());
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_network_failure() {
        let source = Arc::new(GatedSource::default());
        let _never = source.gate();
        let coordinator = coordinator(source.clone(), policy());

        let result = coordinator.fetch(&key()).await;
        assert!(matches!(result, Err(SyncError::NetworkFailure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_if_stale_serves_fresh_value() {
        let source = Arc::new(GatedSource::default());
        let coordinator = coordinator(source.clone(), policy());

        source.gate().send(Ok(1)).unwrap();
        assert_eq!(coordinator.fetch_if_stale(&key()).await, Ok(1));
        assert_eq!(coordinator.fetch_if_stale(&key()).await, Ok(1));
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        source.gate().send(Ok(2)).unwrap();
        assert_eq!(coordinator.fetch_if_stale(&key()).await, Ok(2));
        assert_eq!(source.calls(), 2);
    }
}
