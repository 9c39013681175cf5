//! Desk Client - ticket service client and synchronization core
//!
//! Provides the HTTP client of the ticket service and a local cache that
//! keeps tickets and ticket lists in sync with it.

pub mod api;
pub mod config;
pub mod error;
pub mod http;
pub mod notify;
pub mod sync;

pub use api::{HttpTicketApi, TicketApi};
pub use config::{ClientConfig, SyncConfig};
pub use error::{ClientError, ClientResult, SyncError, SyncResult};
pub use http::HttpClient;
pub use notify::{Notice, Notifier, TracingNotifier};
pub use sync::{
    CacheEntry, ListStats, ListWatch, MutationKind, TicketSync, TicketWatch, TimelineView,
};

// Re-export shared types for convenience
pub use shared::client::{MessageCreate, TicketFilters, TicketList};
pub use shared::models::{Message, Ticket, TicketPriority, TicketStatus, TicketUpdate};
