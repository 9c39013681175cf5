//! Watch a ticket and its queue
//!
//! Connects to the ticket service, keeps one ticket and the open-ticket
//! list in sync and prints every change.
//!
//! Run: DESK_API_URL=http://localhost:8000 cargo run --example watch_ticket -- <ticket_id>

use anyhow::Context;
use desk_client::{
    ClientConfig, SyncConfig, TicketFilters, TicketStatus, TicketSync, TimelineView,
};
use tracing_subscriber::EnvFilter;

fn print_view(ticket_id: &str, view: &TimelineView) {
    println!(
        "[{ticket_id}] {} messages ({} internal, {} attachments)",
        view.counts.total, view.counts.internal, view.counts.attachments
    );
    if let Some(last) = &view.last_message {
        println!("  last: {} {:?}: {}", last.timestamp, last.sender_type, last.content);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("desk_client=debug")),
        )
        .init();

    let ticket_id = std::env::args()
        .nth(1)
        .context("usage: watch_ticket <ticket_id>")?;

    let sync = TicketSync::connect(&ClientConfig::from_env(), SyncConfig::from_env())?;
    let open = TicketFilters::by_status(TicketStatus::Open);

    let mut ticket = sync.watch_ticket(ticket_id.clone());
    let _queue = sync.watch_list(open.clone());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            entry = ticket.changed() => {
                let Some(entry) = entry else { break };
                if let Some(error) = &entry.last_error {
                    println!("[{ticket_id}] refresh failed: {error}");
                }
                if let Some(view) = sync.ticket_view(&ticket_id) {
                    print_view(&ticket_id, &view);
                }
                if let Some(stats) = sync.list_stats(&open) {
                    println!(
                        "  queue: {} open, {} unassigned, {} bot handoffs",
                        stats.total_count, stats.unassigned, stats.bot_handoffs
                    );
                }
            }
        }
    }

    sync.shutdown();
    Ok(())
}
