//! Live dashboard fan-out.
//!
//! Each connected dashboard gets a bounded mpsc channel; the WebSocket task
//! drains it. A client whose channel is closed or full is dropped on the next
//! broadcast, so one slow tab cannot hold up the others.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{ApprovalStatus, Call};

/// Per-client buffer. A dashboard this far behind is considered gone.
const CLIENT_BUFFER: usize = 64;

/// Event pushed to every live dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    NewCall {
        call: Call,
    },
    ApprovalUpdated {
        call_id: String,
        approval_status: ApprovalStatus,
        business_ref: String,
    },
}

/// Opaque handle returned by [`BroadcastHub::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(Uuid);

#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    clients: Arc<DashMap<ClientHandle, mpsc::Sender<String>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Messages arrive on the returned receiver.
    pub fn connect(&self) -> (ClientHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let handle = ClientHandle(Uuid::new_v4());
        self.clients.insert(handle, tx);
        tracing::debug!("Dashboard client {} connected ({} live)", handle.0, self.clients.len());
        (handle, rx)
    }

    pub fn disconnect(&self, handle: ClientHandle) {
        if self.clients.remove(&handle).is_some() {
            tracing::debug!("Dashboard client {} disconnected", handle.0);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Send to every client, dropping any that cannot accept the message.
    /// Returns the number of clients that received it.
    pub fn broadcast(&self, event: &DashboardEvent) -> usize {
        match serde_json::to_string(event) {
            Ok(text) => self.broadcast_text(&text),
            Err(e) => {
                tracing::error!("Failed to serialize dashboard event: {}", e);
                0
            }
        }
    }

    pub fn broadcast_text(&self, text: &str) -> usize {
        let mut delivered = 0;
        self.clients.retain(|handle, tx| match tx.try_send(text.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                tracing::warn!("Dropping dashboard client {}: {}", handle.0, e);
                false
            }
        });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let hub = BroadcastHub::new();
        let (_a, mut rx_a) = hub.connect();
        let (_b, mut rx_b) = hub.connect();

        assert_eq!(hub.broadcast_text("hello"), 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn closed_client_is_removed() {
        let hub = BroadcastHub::new();
        let (_gone, rx_gone) = hub.connect();
        let (_live, mut rx_live) = hub.connect();
        drop(rx_gone);

        assert_eq!(hub.broadcast_text("ping"), 1);
        assert_eq!(hub.client_count(), 1);
        assert_eq!(rx_live.recv().await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn full_client_is_removed() {
        let hub = BroadcastHub::new();
        let (_slow, _rx_slow) = hub.connect();
        for _ in 0..CLIENT_BUFFER {
            hub.broadcast_text("x");
        }
        assert_eq!(hub.client_count(), 1);

        assert_eq!(hub.broadcast_text("overflow"), 0);
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let hub = BroadcastHub::new();
        let (handle, _rx) = hub.connect();
        hub.disconnect(handle);
        hub.disconnect(handle);
        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.broadcast_text("nobody"), 0);
    }

    #[test]
    fn approval_event_shape() {
        let event = DashboardEvent::ApprovalUpdated {
            call_id: "c1".to_string(),
            approval_status: ApprovalStatus::Approved,
            business_ref: "agent-1".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "approval_updated");
        assert_eq!(value["approval_status"], "approved");
    }
}
