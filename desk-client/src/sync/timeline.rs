//! Timeline Merger - 派生视图
//!
//! Pure functions over cached ticket data. Nothing here is cached: views
//! are recomputed from the current entry on every read.

use shared::client::TicketList;
use shared::models::{Message, SenderType, Ticket, TicketPriority, TicketStatus};
use std::collections::{BTreeMap, HashMap};

/// Message counters of one timeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineCounts {
    pub total: usize,
    pub by_sender: BTreeMap<SenderType, usize>,
    pub public: usize,
    pub internal: usize,
    pub attachments: usize,
}

impl TimelineCounts {
    pub fn from_sender(&self, sender: SenderType) -> usize {
        self.by_sender.get(&sender).copied().unwrap_or(0)
    }
}

/// Render-ready timeline of one ticket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineView {
    pub ordered_messages: Vec<Message>,
    pub last_message: Option<Message>,
    pub counts: TimelineCounts,
}

/// Drops repeated ids, keeping the last occurrence at the position of the
/// first.
pub fn dedupe_by_id(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Message> = Vec::new();
    for message in messages {
        match index.get(&message.message_id) {
            Some(&at) => out[at] = message,
            None => {
                index.insert(message.message_id.clone(), out.len());
                out.push(message);
            }
        }
    }
    out
}

/// Timestamp ascending; ties keep their input order.
pub fn order_messages(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp);
}

pub fn derive_view(ticket: &Ticket) -> TimelineView {
    let mut ordered_messages = dedupe_by_id(ticket.timeline.iter().cloned());
    order_messages(&mut ordered_messages);

    let mut counts = TimelineCounts {
        total: ordered_messages.len(),
        ..TimelineCounts::default()
    };
    for message in &ordered_messages {
        *counts.by_sender.entry(message.sender_type).or_default() += 1;
        if message.is_internal() {
            counts.internal += 1;
        } else {
            counts.public += 1;
        }
        counts.attachments += message.attachments.len();
    }

    TimelineView {
        last_message: ordered_messages.last().cloned(),
        ordered_messages,
        counts,
    }
}

/// Union of two timelines keyed by message id. On conflict the
/// authoritative message wins; locally pending messages the server does not
/// know yet are kept.
pub fn merge_timelines(local: &[Message], authoritative: &[Message]) -> Vec<Message> {
    let mut merged = dedupe_by_id(local.iter().chain(authoritative.iter()).cloned());
    order_messages(&mut merged);
    merged
}

/// Latest message written by an agent, internal notes included
pub fn last_agent_reply(ticket: &Ticket) -> Option<&Message> {
    ticket
        .timeline
        .iter()
        .filter(|m| m.sender_type == SenderType::Agent)
        .max_by_key(|m| m.timestamp)
}

/// Aggregates of one ticket list page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListStats {
    /// Tickets on the page
    pub total: usize,
    /// Server-side count over every page
    pub total_count: u64,
    pub by_status: BTreeMap<TicketStatus, usize>,
    pub by_priority: BTreeMap<TicketPriority, usize>,
    pub unassigned: usize,
    pub bot_handoffs: usize,
}

impl ListStats {
    pub fn with_status(&self, status: TicketStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn with_priority(&self, priority: TicketPriority) -> usize {
        self.by_priority.get(&priority).copied().unwrap_or(0)
    }
}

pub fn summarize(list: &TicketList) -> ListStats {
    let mut stats = ListStats {
        total: list.tickets.len(),
        total_count: list.total_count,
        ..ListStats::default()
    };
    for ticket in &list.tickets {
        *stats.by_status.entry(ticket.status).or_default() += 1;
        *stats.by_priority.entry(ticket.priority).or_default() += 1;
        if ticket.assigned_agent_id.is_none() {
            stats.unassigned += 1;
        }
        if ticket.source.is_bot_handoff {
            stats.bot_handoffs += 1;
        }
    }
    stats
}
