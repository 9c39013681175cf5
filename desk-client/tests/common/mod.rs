// desk-client/tests/common/mod.rs
// 测试公共工具 - 内存版 TicketApi
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use desk_client::api::TicketApi;
use desk_client::{ClientError, ClientResult, Notice, Notifier};
use shared::client::{MessageCreate, TicketFilters, TicketList, DEFAULT_PAGE_SIZE};
use shared::models::{
    Channel, Customer, Message, SenderType, Ticket, TicketPriority, TicketSource, TicketStatus,
    TicketUpdate,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(id: &str, secs: i64, sender: SenderType, content: &str) -> Message {
    Message::new(id, at(secs), sender, content)
}

/// Open ticket with `messages` customer/agent messages
pub fn ticket(id: &str, messages: usize) -> Ticket {
    let timeline = (1..=messages)
        .map(|n| {
            let sender = if n % 2 == 1 {
                SenderType::Customer
            } else {
                SenderType::Agent
            };
            message(&format!("{id}-m{n}"), n as i64 * 10, sender, "hello")
        })
        .collect();
    Ticket {
        ticket_id: id.into(),
        created_at: at(0),
        updated_at: at(messages as i64 * 10),
        status: TicketStatus::Open,
        priority: TicketPriority::Medium,
        assigned_agent_id: None,
        tags: BTreeSet::new(),
        source: TicketSource {
            channel: Channel::WebChat,
            origin_platform_id: format!("chat-{id}"),
            is_bot_handoff: false,
        },
        customer: Customer {
            internal_id: format!("cust-{id}"),
            name: Some("Ada".into()),
            primary_email: None,
            channel_identity: "ada@example.com".into(),
        },
        subject: format!("Help with {id}"),
        timeline,
    }
}

/// Ticket service double
///
/// Keeps the authoritative tickets in memory and counts every call.
#[derive(Default)]
pub struct MockTicketApi {
    tickets: Mutex<BTreeMap<String, Ticket>>,
    list_calls: Mutex<Vec<TicketFilters>>,
    get_calls: AtomicUsize,
    write_calls: AtomicUsize,
    next_message: AtomicUsize,
    reject_writes: Mutex<Option<(u16, String)>>,
    message_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockTicketApi {
    pub fn with_tickets(tickets: impl IntoIterator<Item = Ticket>) -> Self {
        let api = Self::default();
        {
            let mut map = api.tickets.lock().unwrap();
            for t in tickets {
                map.insert(t.ticket_id.clone(), t);
            }
        }
        api
    }

    pub fn stored(&self, ticket_id: &str) -> Option<Ticket> {
        self.tickets.lock().unwrap().get(ticket_id).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn list_calls_for(&self, filters: &TicketFilters) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|f| *f == filters)
            .count()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Every following write fails with `status`
    pub fn reject_writes(&self, status: u16, message: &str) {
        *self.reject_writes.lock().unwrap() = Some((status, message.to_string()));
    }

    /// The next `add_message` waits until the returned sender fires
    pub fn hold_next_message(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.message_gate.lock().unwrap() = Some(rx);
        tx
    }

    fn check_write(&self) -> ClientResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        match self.reject_writes.lock().unwrap().clone() {
            Some((403, message)) => Err(ClientError::Forbidden(message)),
            Some((status, message)) => Err(ClientError::Api { status, message }),
            None => Ok(()),
        }
    }

    fn modify<F>(&self, ticket_id: &str, f: F) -> ClientResult<Ticket>
    where
        F: FnOnce(&Ticket) -> Ticket,
    {
        let mut tickets = self.tickets.lock().unwrap();
        let current = tickets
            .get(ticket_id)
            .ok_or_else(|| ClientError::NotFound(format!("Ticket {ticket_id} not found")))?;
        let next = f(current);
        tickets.insert(ticket_id.to_string(), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl TicketApi for MockTicketApi {
    async fn list_tickets(&self, filters: &TicketFilters) -> ClientResult<TicketList> {
        self.list_calls.lock().unwrap().push(filters.clone());
        let mut matching: Vec<Ticket> = self
            .tickets
            .lock()
            .unwrap()
            .values()
            .filter(|t| filters.could_include(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let page = filters.page.unwrap_or(1).max(1);
        let page_size = filters.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        let total_count = matching.len() as u64;
        let tickets = matching
            .into_iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .collect();
        Ok(TicketList {
            tickets,
            total_count,
            page,
            page_size,
        })
    }

    async fn get_ticket(&self, ticket_id: &str) -> ClientResult<Ticket> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.stored(ticket_id)
            .ok_or_else(|| ClientError::NotFound(format!("Ticket {ticket_id} not found")))
    }

    async fn update_ticket(&self, ticket_id: &str, update: &TicketUpdate) -> ClientResult<Ticket> {
        self.check_write()?;
        self.modify(ticket_id, |t| t.with_update(update, Utc::now()))
    }

    async fn add_message(&self, ticket_id: &str, create: &MessageCreate) -> ClientResult<Ticket> {
        let gate = self.message_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.check_write()?;
        let n = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = Message::new(
            format!("srv-{n}"),
            Utc::now(),
            create.sender_type,
            create.content.clone(),
        );
        stored.visibility = create.visibility;
        stored.agent_id = create.agent_id.clone();
        stored.attachments = create.attachments.clone();
        self.modify(ticket_id, |t| t.with_appended(stored, Utc::now()))
    }

    async fn assign_ticket(&self, ticket_id: &str, agent_id: &str) -> ClientResult<Ticket> {
        self.check_write()?;
        let update = TicketUpdate::default().with_assignee(agent_id);
        self.modify(ticket_id, |t| t.with_update(&update, Utc::now()))
    }
}

/// Notifier keeping every notice
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn failures(&self) -> usize {
        self.notices().iter().filter(|n| n.is_failure()).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Lets spawned tasks run to their next suspension point
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
