//! Client-related types shared between server and client
//!
//! Request/response DTOs of the ticket REST API (`/api/tickets`).

use crate::models::{Attachment, MessageVisibility, SenderType, Ticket, TicketStatus};
use serde::{Deserialize, Serialize};

// =============================================================================
// Ticket list
// =============================================================================

/// Server-side default page size
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Query parameters of `GET /api/tickets/`
///
/// Also the cache key of a ticket list: two lists with equal filters are
/// the same list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl TicketFilters {
    /// All tickets, first page
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_status(status: TicketStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent_id = Some(agent_id.into());
        self
    }

    pub fn paginate(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Whether a ticket in this state could show up in a list with these
    /// filters. Pagination is not considered.
    pub fn could_include(&self, ticket: &Ticket) -> bool {
        let status_ok = self.status.is_none_or(|status| status == ticket.status);
        let agent_ok = self
            .assigned_agent_id
            .as_deref()
            .is_none_or(|agent| ticket.assigned_agent_id.as_deref() == Some(agent));
        status_ok && agent_ok
    }
}

/// Response of `GET /api/tickets/`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketList {
    pub tickets: Vec<Ticket>,
    #[serde(default)]
    pub total_count: u64,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl TicketList {
    pub fn contains(&self, ticket_id: &str) -> bool {
        self.tickets.iter().any(|t| t.ticket_id == ticket_id)
    }

    pub fn get(&self, ticket_id: &str) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.ticket_id == ticket_id)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Body of `POST /api/tickets/{id}/message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreate {
    pub content: String,
    #[serde(default)]
    pub sender_type: SenderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub visibility: MessageVisibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl MessageCreate {
    /// Public agent reply
    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_type: SenderType::Agent,
            agent_id: None,
            visibility: MessageVisibility::Public,
            attachments: Vec::new(),
        }
    }

    /// Internal note, not visible to the customer
    pub fn internal_note(content: impl Into<String>) -> Self {
        Self {
            visibility: MessageVisibility::Internal,
            ..Self::reply(content)
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

// =============================================================================
// Assignment
// =============================================================================

/// Response of `PUT /api/tickets/{id}/assign`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignResponse {
    pub success: bool,
    pub ticket: Option<Ticket>,
}
