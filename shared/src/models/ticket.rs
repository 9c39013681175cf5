//! Ticket Model

use super::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    New,
    Open,
    PendingCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::New,
        TicketStatus::Open,
        TicketStatus::PendingCustomer,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::Open => "open",
            TicketStatus::PendingCustomer => "pending_customer",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel a ticket arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WebChat,
    Email,
    Facebook,
    Twitter,
    Whatsapp,
    Instagram,
}

/// Where the ticket came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSource {
    pub channel: Channel,
    /// Thread id on the external platform, used for reply routing
    pub origin_platform_id: String,
    #[serde(default)]
    pub is_bot_handoff: bool,
}

/// Customer identity attached to a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub internal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_email: Option<String>,
    /// Handle, phone number or address specific to the source channel
    pub channel_identity: String,
}

impl Customer {
    /// Name to show for the customer, falling back to the channel identity.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.channel_identity)
    }
}

/// Ticket entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: TicketPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub source: TicketSource,
    pub customer: Customer,
    pub subject: String,
    #[serde(default)]
    pub timeline: Vec<Message>,
}

/// Partial ticket update (`PUT /api/tickets/{id}`)
///
/// Only the fields that are `Some` are sent and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TicketPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
}

impl TicketUpdate {
    pub fn status(status: TicketStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn priority(priority: TicketPriority) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    pub fn with_assignee(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.assigned_agent_id.is_none()
            && self.tags.is_none()
    }
}

impl Ticket {
    /// Latest message in the timeline, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.timeline.last()
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.timeline.iter().any(|m| m.message_id == message_id)
    }

    /// Returns a copy with the update's fields shallow-merged in.
    ///
    /// `updated_at` never moves backwards.
    pub fn with_update(&self, update: &TicketUpdate, now: DateTime<Utc>) -> Ticket {
        let mut next = self.clone();
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(priority) = update.priority {
            next.priority = priority;
        }
        if let Some(agent_id) = &update.assigned_agent_id {
            next.assigned_agent_id = Some(agent_id.clone());
        }
        if let Some(tags) = &update.tags {
            next.tags = tags.clone();
        }
        next.updated_at = next.updated_at.max(now);
        next
    }

    /// Returns a copy with `message` appended to the timeline.
    ///
    /// The message timestamp is clamped to the last timeline entry so the
    /// timeline stays ascending; a message whose id is already present is
    /// not appended twice.
    pub fn with_appended(&self, mut message: Message, now: DateTime<Utc>) -> Ticket {
        let mut next = self.clone();
        if next.contains_message(&message.message_id) {
            return next;
        }
        if let Some(last) = next.timeline.last()
            && message.timestamp < last.timestamp
        {
            message.timestamp = last.timestamp;
        }
        next.updated_at = next.updated_at.max(now).max(message.timestamp);
        next.timeline.push(message);
        next
    }
}
