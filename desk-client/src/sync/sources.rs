// desk-client/src/sync/sources.rs
// 数据源适配 - TicketApi 接入同步核心

use super::fetch::{FetchCoordinator, Source};
use super::mutation::Dependents;
use crate::api::TicketApi;
use crate::error::SyncResult;
use async_trait::async_trait;
use futures::future::join_all;
use shared::client::{TicketFilters, TicketList};
use shared::models::Ticket;
use std::sync::Arc;

/// Detail keys: ticket id → ticket
pub struct TicketLoader {
    api: Arc<dyn TicketApi>,
}

impl TicketLoader {
    pub fn new(api: Arc<dyn TicketApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Source<String, Ticket> for TicketLoader {
    async fn load(&self, ticket_id: &String) -> SyncResult<Ticket> {
        Ok(self.api.get_ticket(ticket_id).await?)
    }
}

/// List keys: filters → one page of tickets
pub struct ListLoader {
    api: Arc<dyn TicketApi>,
}

impl ListLoader {
    pub fn new(api: Arc<dyn TicketApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Source<TicketFilters, TicketList> for ListLoader {
    async fn load(&self, filters: &TicketFilters) -> SyncResult<TicketList> {
        Ok(self.api.list_tickets(filters).await?)
    }
}

/// Ticket lists affected by a ticket mutation
///
/// A list is affected when its filters could include the ticket as it is
/// now, or when its cached page shows the ticket (it may have to leave).
/// Watched lists are refetched right away, the others only marked stale.
pub struct ListDependents {
    lists: FetchCoordinator<TicketFilters, TicketList>,
}

impl ListDependents {
    pub fn new(lists: FetchCoordinator<TicketFilters, TicketList>) -> Self {
        Self { lists }
    }

    fn affected(&self, ticket_id: &str, ticket: Option<&Ticket>) -> Vec<TicketFilters> {
        let store = self.lists.store();
        store
            .entries()
            .into_iter()
            .filter(|(filters, entry)| {
                let may_include = ticket.is_none_or(|t| filters.could_include(t));
                let on_page = entry
                    .value
                    .as_ref()
                    .is_some_and(|list| list.contains(ticket_id));
                may_include || on_page
            })
            .map(|(filters, _)| filters)
            .collect()
    }
}

#[async_trait]
impl Dependents<String, Ticket> for ListDependents {
    async fn reconcile(&self, ticket_id: &String, ticket: Option<&Ticket>) {
        let store = self.lists.store();
        let (watched, idle): (Vec<_>, Vec<_>) = self
            .affected(ticket_id, ticket)
            .into_iter()
            .partition(|filters| store.subscriber_count(filters) > 0);

        for filters in &idle {
            store.mark_stale(filters);
        }
        tracing::debug!(
            %ticket_id,
            refetched = watched.len(),
            marked_stale = idle.len(),
            "lists invalidated"
        );
        join_all(watched.iter().map(|filters| self.lists.invalidate(filters))).await;
    }
}
