//! Data models
//!
//! Shared between the ticket service API and the client cache.
//! Timestamps are UTC, ids are opaque strings assigned by the server.

pub mod message;
pub mod ticket;

// Re-exports
pub use message::*;
pub use ticket::*;
