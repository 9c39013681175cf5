//! Synchronization core
//!
//! Local cache of tickets and ticket lists kept consistent with the ticket
//! service by polling, deduplicated reads and optimistic mutations.
//!
//! ```text
//! view ── watch ──▶ Poller ── tick ──▶ FetchCoordinator ── set ──▶ CacheStore ──▶ subscribers
//! view ── action ─▶ MutationExecutor ── patch / restore ─────────▶ CacheStore
//!                          └── refetch (detail + dependent lists) ─▶ FetchCoordinator
//! ```
//!
//! [`TicketSync`] wires one stack for ticket details (keyed by id) and one
//! for ticket lists (keyed by [`TicketFilters`]).

pub mod fetch;
pub mod mutation;
pub mod poller;
pub mod sources;
pub mod store;
pub mod timeline;

pub use fetch::{FetchCoordinator, FetchPolicy, Source};
pub use mutation::{Dependents, MutationExecutor, MutationKind};
pub use poller::{Poller, Watch};
pub use store::{CacheEntry, CacheStore, Subscription};
pub use timeline::{ListStats, TimelineCounts, TimelineView};

use crate::api::{HttpTicketApi, TicketApi};
use crate::config::{ClientConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::notify::{Notifier, TracingNotifier};
use chrono::Utc;
use shared::client::{MessageCreate, TicketFilters, TicketList};
use shared::models::{Message, Ticket, TicketUpdate};
use sources::{ListDependents, ListLoader, TicketLoader};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Anything usable as a cache key
pub trait CacheKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Anything storable in the cache
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// Live view of one ticket
pub type TicketWatch = Watch<String, Ticket>;

/// Live view of one ticket list
pub type ListWatch = Watch<TicketFilters, TicketList>;

/// Prefix of client-side message ids, replaced on reconciliation
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Ticket synchronization facade
///
/// Explicitly constructed; every instance owns its own caches and timers.
/// Must be used inside a tokio runtime.
pub struct TicketSync {
    api: Arc<dyn TicketApi>,
    config: SyncConfig,
    tickets: Arc<Poller<String, Ticket>>,
    lists: Arc<Poller<TicketFilters, TicketList>>,
    mutations: MutationExecutor<String, Ticket>,
}

impl std::fmt::Debug for TicketSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSync")
            .field("config", &self.config)
            .field("polled_tickets", &self.tickets.active_keys())
            .field("polled_lists", &self.lists.active_keys())
            .finish()
    }
}

impl TicketSync {
    pub fn new(api: Arc<dyn TicketApi>, config: SyncConfig) -> SyncResult<Self> {
        Self::with_notifier(api, config, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(
        api: Arc<dyn TicketApi>,
        config: SyncConfig,
        notifier: Arc<dyn Notifier>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let policy = FetchPolicy::from(&config);

        let tickets = FetchCoordinator::new(
            CacheStore::new(),
            Arc::new(TicketLoader::new(Arc::clone(&api))),
            policy,
        );
        let lists = FetchCoordinator::new(
            CacheStore::new(),
            Arc::new(ListLoader::new(Arc::clone(&api))),
            policy,
        );
        let mutations = MutationExecutor::new(tickets.clone())
            .with_dependents(Arc::new(ListDependents::new(lists.clone())))
            .with_notifier(notifier);

        Ok(Self {
            api,
            config,
            tickets: Arc::new(Poller::new(tickets)),
            lists: Arc::new(Poller::new(lists)),
            mutations,
        })
    }

    /// Talks to the ticket service over HTTP
    pub fn connect(client: &ClientConfig, config: SyncConfig) -> SyncResult<Self> {
        let api = HttpTicketApi::from_config(client)?;
        Self::new(Arc::new(api), config)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn ticket_store(&self) -> &CacheStore<String, Ticket> {
        self.tickets.coordinator().store()
    }

    pub fn list_store(&self) -> &CacheStore<TicketFilters, TicketList> {
        self.lists.coordinator().store()
    }

    // ========== Subscriptions ==========

    /// Watches one ticket: polled every `detail_poll_interval` while the
    /// watch lives, fetched right away unless the cache is fresh.
    pub fn watch_ticket(&self, ticket_id: impl Into<String>) -> TicketWatch {
        let ticket_id = ticket_id.into();
        let watch = self
            .tickets
            .watch(ticket_id.clone(), self.config.detail_poll_interval);
        prime(self.tickets.coordinator(), ticket_id);
        watch
    }

    /// Watches one ticket list page, polled every `list_poll_interval`.
    pub fn watch_list(&self, filters: TicketFilters) -> ListWatch {
        let watch = self
            .lists
            .watch(filters.clone(), self.config.list_poll_interval);
        prime(self.lists.coordinator(), filters);
        watch
    }

    pub fn is_polling_ticket(&self, ticket_id: &str) -> bool {
        self.tickets.is_polling(&ticket_id.to_string())
    }

    pub fn is_polling_list(&self, filters: &TicketFilters) -> bool {
        self.lists.is_polling(filters)
    }

    // ========== Reads ==========

    /// Cached ticket, if any
    pub fn ticket(&self, ticket_id: &str) -> Option<Ticket> {
        self.ticket_store().value(&ticket_id.to_string())
    }

    /// Cached list page, if any
    pub fn list(&self, filters: &TicketFilters) -> Option<TicketList> {
        self.list_store().value(filters)
    }

    /// Reads the ticket now, superseding any read in flight.
    pub async fn refresh_ticket(&self, ticket_id: &str) -> SyncResult<Ticket> {
        self.tickets.coordinator().refetch(&ticket_id.to_string()).await
    }

    pub async fn refresh_list(&self, filters: &TicketFilters) -> SyncResult<TicketList> {
        self.lists.coordinator().refetch(filters).await
    }

    /// Ordered, deduplicated timeline of the cached ticket
    pub fn ticket_view(&self, ticket_id: &str) -> Option<TimelineView> {
        self.ticket(ticket_id).as_ref().map(timeline::derive_view)
    }

    /// Aggregates of the cached list page
    pub fn list_stats(&self, filters: &TicketFilters) -> Option<ListStats> {
        self.list(filters).as_ref().map(timeline::summarize)
    }

    // ========== Mutations ==========

    /// Appends a message: shown at once under a `local-` id, replaced by the
    /// server's copy when the ticket is refetched.
    pub async fn append_message(&self, ticket_id: &str, message: MessageCreate) -> SyncResult<Ticket> {
        if message.content.trim().is_empty() && message.attachments.is_empty() {
            return Err(SyncError::InvalidInput("message content is empty".into()));
        }
        let local = optimistic_message(&message);
        let api = Arc::clone(&self.api);
        let key = ticket_id.to_string();
        self.mutations
            .mutate(
                &key,
                MutationKind::AppendMessage,
                move |ticket| ticket.with_appended(local, Utc::now()),
                || async { api.add_message(ticket_id, &message).await.map_err(SyncError::from) },
            )
            .await
    }

    /// Shallow-merges status / priority / assignee / tags.
    pub async fn update_fields(&self, ticket_id: &str, update: TicketUpdate) -> SyncResult<Ticket> {
        if update.is_empty() {
            return Err(SyncError::InvalidInput("empty ticket update".into()));
        }
        let api = Arc::clone(&self.api);
        let key = ticket_id.to_string();
        self.mutations
            .mutate(
                &key,
                MutationKind::UpdateFields,
                |ticket| ticket.with_update(&update, Utc::now()),
                || async { api.update_ticket(ticket_id, &update).await.map_err(SyncError::from) },
            )
            .await
    }

    /// Assigns the ticket to `agent_id`.
    pub async fn assign(&self, ticket_id: &str, agent_id: &str) -> SyncResult<Ticket> {
        if agent_id.trim().is_empty() {
            return Err(SyncError::InvalidInput("agent id is empty".into()));
        }
        let api = Arc::clone(&self.api);
        let key = ticket_id.to_string();
        let patch = TicketUpdate::default().with_assignee(agent_id);
        self.mutations
            .mutate(
                &key,
                MutationKind::AssignAgent,
                |ticket| ticket.with_update(&patch, Utc::now()),
                || async { api.assign_ticket(ticket_id, agent_id).await.map_err(SyncError::from) },
            )
            .await
    }

    /// Whether a mutation of the ticket is pending
    pub fn is_mutating(&self, ticket_id: &str) -> bool {
        self.mutations.is_pending(&ticket_id.to_string())
    }

    /// Stops every timer. Cached data stays readable.
    pub fn shutdown(&self) {
        self.tickets.shutdown();
        self.lists.shutdown();
        tracing::debug!("ticket sync shut down");
    }
}

/// Starts a background read unless the cache is fresh.
fn prime<K: CacheKey, V: CacheValue>(coordinator: &FetchCoordinator<K, V>, key: K) {
    let coordinator = coordinator.clone();
    tokio::spawn(async move {
        if let Err(error) = coordinator.fetch_if_stale(&key).await {
            tracing::debug!(?key, %error, "initial read failed");
        }
    });
}

fn optimistic_message(message: &MessageCreate) -> Message {
    Message {
        message_id: format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4()),
        timestamp: Utc::now(),
        sender_type: message.sender_type,
        content: message.content.clone(),
        content_type: "text".to_string(),
        visibility: message.visibility,
        agent_id: message.agent_id.clone(),
        attachments: message.attachments.clone(),
    }
}
