//! Ticket service API
//!
//! [`TicketApi`] is the seam between the synchronization core and the
//! remote store. [`HttpTicketApi`] talks to the real service; tests plug in
//! an in-memory implementation.

use crate::http::HttpClient;
use crate::{ClientConfig, ClientError, ClientResult};
use async_trait::async_trait;
use shared::client::{AssignResponse, MessageCreate, TicketFilters, TicketList};
use shared::models::{Ticket, TicketUpdate};

/// Remote operations of the ticket service
#[async_trait]
pub trait TicketApi: Send + Sync {
    /// `GET /api/tickets/`
    async fn list_tickets(&self, filters: &TicketFilters) -> ClientResult<TicketList>;

    /// `GET /api/tickets/{id}`
    async fn get_ticket(&self, ticket_id: &str) -> ClientResult<Ticket>;

    /// `PUT /api/tickets/{id}`
    async fn update_ticket(&self, ticket_id: &str, update: &TicketUpdate) -> ClientResult<Ticket>;

    /// `POST /api/tickets/{id}/message`, answers with the whole ticket
    async fn add_message(&self, ticket_id: &str, message: &MessageCreate) -> ClientResult<Ticket>;

    /// `PUT /api/tickets/{id}/assign?agent_id=`
    async fn assign_ticket(&self, ticket_id: &str, agent_id: &str) -> ClientResult<Ticket>;
}

/// [`TicketApi`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpTicketApi {
    http: HttpClient,
}

impl HttpTicketApi {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::new(config.build_http_client()?))
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }
}

/// Characters that would change the meaning of the request URL
fn breaks_path_segment(c: char) -> bool {
    matches!(c, '/' | '?' | '#' | '%' | '\\') || c.is_whitespace() || c.is_control()
}

fn ticket_path(ticket_id: &str) -> ClientResult<String> {
    if ticket_id.is_empty() || ticket_id.chars().any(breaks_path_segment) {
        return Err(ClientError::Validation(format!(
            "invalid ticket id: {ticket_id:?}"
        )));
    }
    Ok(format!("api/tickets/{ticket_id}"))
}

#[async_trait]
impl TicketApi for HttpTicketApi {
    async fn list_tickets(&self, filters: &TicketFilters) -> ClientResult<TicketList> {
        self.http.get_query("api/tickets/", filters).await
    }

    async fn get_ticket(&self, ticket_id: &str) -> ClientResult<Ticket> {
        self.http.get(&ticket_path(ticket_id)?).await
    }

    async fn update_ticket(&self, ticket_id: &str, update: &TicketUpdate) -> ClientResult<Ticket> {
        self.http.put(&ticket_path(ticket_id)?, update).await
    }

    async fn add_message(&self, ticket_id: &str, message: &MessageCreate) -> ClientResult<Ticket> {
        let path = format!("{}/message", ticket_path(ticket_id)?);
        self.http.post(&path, message).await
    }

    async fn assign_ticket(&self, ticket_id: &str, agent_id: &str) -> ClientResult<Ticket> {
        let path = format!("{}/assign", ticket_path(ticket_id)?);
        let resp: AssignResponse = self.http.put_query(&path, &[("agent_id", agent_id)]).await?;
        if !resp.success {
            return Err(ClientError::InvalidResponse(format!(
                "assignment of {ticket_id} was not accepted"
            )));
        }
        resp.ticket
            .ok_or_else(|| ClientError::InvalidResponse("Missing ticket data".into()))
    }
}
