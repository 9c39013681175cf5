//! Mutation Executor
//!
//! Optimistic write protocol for one key space:
//!
//! 1. take the key's mutation lock (a second mutation on the key waits)
//! 2. supersede any read in flight, patch the cached value and keep the
//!    prior value as snapshot
//! 3. run the remote write; the entry reports `is_fetching` meanwhile
//! 4. success: refetch the key, reconcile dependent keys, notify once
//! 5. failure: put the snapshot back, notify once, return the error
//!
//! Writes are never retried.

use super::fetch::FetchCoordinator;
use super::{CacheKey, CacheValue};
use crate::error::SyncResult;
use crate::notify::{Notice, Notifier, TracingNotifier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// What a mutation does, for logs and notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    AppendMessage,
    UpdateFields,
    AssignAgent,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::AppendMessage => "append_message",
            MutationKind::UpdateFields => "update_fields",
            MutationKind::AssignAgent => "assign_agent",
        }
    }

    /// Human readable name
    pub fn label(&self) -> &'static str {
        match self {
            MutationKind::AppendMessage => "Send message",
            MutationKind::UpdateFields => "Ticket update",
            MutationKind::AssignAgent => "Agent assignment",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys of other caches derived from a mutated key
#[async_trait]
pub trait Dependents<K, V>: Send + Sync {
    /// Called after a successful mutation of `key`. `value` is the freshest
    /// value known for it (authoritative when the refetch succeeded).
    async fn reconcile(&self, key: &K, value: Option<&V>);
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Runs optimistic mutations against one key space
#[derive(Clone)]
pub struct MutationExecutor<K, V> {
    coordinator: FetchCoordinator<K, V>,
    locks: Arc<Mutex<HashMap<K, KeyLock>>>,
    dependents: Option<Arc<dyn Dependents<K, V>>>,
    notifier: Arc<dyn Notifier>,
}

impl<K, V> fmt::Debug for MutationExecutor<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationExecutor")
            .field("coordinator", &self.coordinator)
            .field("has_dependents", &self.dependents.is_some())
            .finish_non_exhaustive()
    }
}

impl<K, V> MutationExecutor<K, V>
where
    K: CacheKey + fmt::Display,
    V: CacheValue,
{
    pub fn new(coordinator: FetchCoordinator<K, V>) -> Self {
        Self {
            coordinator,
            locks: Arc::new(Mutex::new(HashMap::new())),
            dependents: None,
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_dependents(mut self, dependents: Arc<dyn Dependents<K, V>>) -> Self {
        self.dependents = Some(dependents);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn coordinator(&self) -> &FetchCoordinator<K, V> {
        &self.coordinator
    }

    fn key_lock(&self, key: &K) -> KeyLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Whether a mutation currently holds the lock of `key`
    pub fn is_pending(&self, key: &K) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.get(key).is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Applies `optimistic` to the cached value, then runs `remote_write`.
    ///
    /// With nothing cached yet the patch is skipped and only the remote
    /// write runs.
    pub async fn mutate<R, P, W, Fut>(
        &self,
        key: &K,
        kind: MutationKind,
        optimistic: P,
        remote_write: W,
    ) -> SyncResult<R>
    where
        P: FnOnce(&V) -> V,
        W: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<R>>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let store = self.coordinator.store();
        store.begin_activity(key);
        self.coordinator.supersede(key);
        let snapshot = store.patch(key, optimistic);
        tracing::debug!(%key, %kind, patched = snapshot.is_some(), "mutation started");

        let result = remote_write().await;
        match result {
            Ok(output) => {
                store.end_activity(key);
                self.reconcile(key).await;
                self.notifier.notify(Notice::Success {
                    action: kind,
                    target: key.to_string(),
                });
                Ok(output)
            }
            Err(error) => {
                if let Some(snapshot) = snapshot {
                    store.restore(key, snapshot);
                }
                store.end_activity(key);
                self.notifier.notify(Notice::Failure {
                    action: kind,
                    target: key.to_string(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn reconcile(&self, key: &K) {
        let fresh = match self.coordinator.refetch(key).await {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(%key, %error, "refetch after mutation failed");
                self.coordinator.store().value(key)
            }
        };
        if let Some(dependents) = &self.dependents {
            dependents.reconcile(key, fresh.as_ref()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::sync::fetch::{FetchPolicy, Source};
    use crate::sync::store::CacheStore;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    /// Remote value the source serves; writes go through `remote`
    #[derive(Default)]
    struct Remote {
        value: AtomicU32,
        loads: AtomicUsize,
        read_gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl Remote {
        /// The next load reads the value now and answers once released
        fn hold_next_read(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.read_gate.lock().unwrap() = Some(rx);
            tx
        }
    }

    #[async_trait]
    impl Source<String, u32> for Remote {
        async fn load(&self, _key: &String) -> SyncResult<u32> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let value = self.value.load(Ordering::SeqCst);
            let gate = self.read_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(value)
        }
    }

    #[derive(Default)]
    struct Notices(Mutex<Vec<Notice>>);

    impl Notifier for Notices {
        fn notify(&self, notice: Notice) {
            self.0.lock().unwrap().push(notice);
        }
    }

    #[derive(Default)]
    struct SeenDependents(Mutex<Vec<(String, Option<u32>)>>);

    #[async_trait]
    impl Dependents<String, u32> for SeenDependents {
        async fn reconcile(&self, key: &String, value: Option<&u32>) {
            self.0.lock().unwrap().push((key.clone(), value.copied()));
        }
    }

    struct Fixture {
        remote: Arc<Remote>,
        notices: Arc<Notices>,
        dependents: Arc<SeenDependents>,
        executor: MutationExecutor<String, u32>,
    }

    async fn fixture(initial: u32) -> Fixture {
        let remote = Arc::new(Remote::default());
        remote.value.store(initial, Ordering::SeqCst);
        let coordinator = FetchCoordinator::new(
            CacheStore::new(),
            remote.clone(),
            FetchPolicy {
                read_retries: 0,
                ..FetchPolicy::default()
            },
        );
        coordinator.fetch(&key()).await.unwrap();

        let notices = Arc::new(Notices::default());
        let dependents = Arc::new(SeenDependents::default());
        let executor = MutationExecutor::new(coordinator)
            .with_notifier(notices.clone())
            .with_dependents(dependents.clone());
        Fixture {
            remote,
            notices,
            dependents,
            executor,
        }
    }

    fn key() -> String {
        "T1".to_string()
    }

    #[tokio::test]
    async fn test_success_reconciles_and_notifies() {
        let f = fixture(1).await;
        let remote = f.remote.clone();

        let out = f
            .executor
            .mutate(&key(), MutationKind::UpdateFields, |v| v + 10, || async move {
                remote.value.store(12, Ordering::SeqCst);
                Ok("done")
            })
            .await;
        assert_eq!(out, Ok("done"));

        // authoritative value replaced the optimistic 11
        let store = f.executor.coordinator().store();
        assert_eq!(store.value(&key()), Some(12));
        assert!(!store.get(&key()).unwrap().is_fetching);
        assert_eq!(f.remote.loads.load(Ordering::SeqCst), 2);
        assert_eq!(*f.dependents.0.lock().unwrap(), vec![(key(), Some(12))]);

        let notices = f.notices.0.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(!notices[0].is_failure());
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot_exactly() {
        let f = fixture(5).await;
        let before = f.executor.coordinator().store().get(&key()).unwrap();

        let out: SyncResult<()> = f
            .executor
            .mutate(&key(), MutationKind::UpdateFields, |v| v * 100, || async {
                Err(SyncError::RemoteRejection {
                    status: 500,
                    message: "boom".into(),
                })
            })
            .await;
        assert!(matches!(out, Err(SyncError::RemoteRejection { status: 500, .. })));

        let after = f.executor.coordinator().store().get(&key()).unwrap();
        assert_eq!(after, before);
        assert_eq!(f.remote.loads.load(Ordering::SeqCst), 1);
        assert!(f.dependents.0.lock().unwrap().is_empty());

        let notices = f.notices.0.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].is_failure());
    }

    #[tokio::test]
    async fn test_optimistic_value_visible_while_pending() {
        let f = fixture(1).await;
        let (release, gate) = oneshot::channel::<()>();
        let executor = f.executor.clone();

        let task = tokio::spawn(async move {
            executor
                .mutate(&key(), MutationKind::AppendMessage, |v| v + 1, || async move {
                    let _ = gate.await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let store = f.executor.coordinator().store();
        let entry = store.get(&key()).unwrap();
        assert_eq!(entry.value, Some(2));
        assert!(entry.is_fetching);
        assert!(f.executor.is_pending(&key()));

        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!f.executor.is_pending(&key()));
    }

    #[tokio::test]
    async fn test_read_started_before_patch_cannot_erase_it() {
        let f = fixture(1).await;
        let coordinator = f.executor.coordinator().clone();
        let release_read = f.remote.hold_next_read();
        let read = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.fetch(&key()).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.is_in_flight(&key()));

        let (release_write, gate) = oneshot::channel::<()>();
        let executor = f.executor.clone();
        let remote = f.remote.clone();
        let task = tokio::spawn(async move {
            executor
                .mutate(&key(), MutationKind::UpdateFields, |v| v + 100, || async move {
                    let _ = gate.await;
                    remote.value.store(101, Ordering::SeqCst);
                    Ok(())
                })
                .await
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        release_read.send(()).unwrap();
        // the caller of the older read still gets its answer
        assert_eq!(read.await.unwrap(), Ok(1));
        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(101));
        assert!(entry.is_fetching);

        release_write.send(()).unwrap();
        task.await.unwrap().unwrap();
        let entry = coordinator.store().get(&key()).unwrap();
        assert_eq!(entry.value, Some(101));
        assert!(!entry.is_fetching);
    }

    #[tokio::test]
    async fn test_mutations_on_one_key_are_serialized() {
        let f = fixture(0).await;
        let (release, gate) = oneshot::channel::<()>();
        let first_exec = f.executor.clone();
        let second_exec = f.executor.clone();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let first = tokio::spawn(async move {
            first_exec
                .mutate(&key(), MutationKind::UpdateFields, |v| v + 1, || async move {
                    let _ = gate.await;
                    o.lock().unwrap().push("first");
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let o = order.clone();
        let second = tokio::spawn(async move {
            second_exec
                .mutate(&key(), MutationKind::UpdateFields, |v| v + 1, || async move {
                    o.lock().unwrap().push("second");
                    Ok(())
                })
                .await
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(order.lock().unwrap().is_empty());

        release.send(()).unwrap();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_mutation_without_cached_value_still_writes() {
        let remote = Arc::new(Remote::default());
        let coordinator = FetchCoordinator::new(CacheStore::new(), remote.clone(), FetchPolicy::default());
        let executor = MutationExecutor::new(coordinator);
        let writes = Arc::new(AtomicUsize::new(0));

        let w = writes.clone();
        let out = executor
            .mutate(&key(), MutationKind::AssignAgent, |v: &u32| v + 1, || async move {
                w.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(out.is_ok());
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        // reconciliation fetched the authoritative value
        assert_eq!(executor.coordinator().store().value(&key()), Some(0));
    }
}
