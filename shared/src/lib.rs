//! Shared types for the desk workspace
//!
//! Wire models of the ticket service and the request/response DTOs of its
//! REST API.

pub mod client;
pub mod models;

// Re-exports
pub use serde::{Deserialize, Serialize};
