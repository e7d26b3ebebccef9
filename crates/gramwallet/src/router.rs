//! Delivery of controller messages to the UI surface and the page client.
//!
//! The UI channel is at-least-once-on-reconnect: messages sent with `queue_if_disconnected`
//! while no UI is attached are held and flushed, in order, right after the snapshot on the
//! next connect. The page-client channel is best effort.

use crate::rpc::{jsonrpc::PageEnvelope, ui::UiMessage};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;

/// Identifies one attached connection, so a stale disconnect cannot detach its successor.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued,
    Dropped,
}

#[derive(Debug)]
struct Link<T> {
    id: ConnectionId,
    tx: UnboundedSender<T>,
}

#[derive(Debug, Default)]
pub struct ChannelRouter {
    ui: Option<Link<UiMessage>>,
    /// Same-process view that bypasses the port. Takes precedence over `ui`.
    embedded: Option<UnboundedSender<UiMessage>>,
    page: Option<Link<PageEnvelope>>,
    queue: VecDeque<UiMessage>,
    next_id: ConnectionId,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> ConnectionId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    pub const fn is_ui_connected(&self) -> bool {
        self.embedded.is_some() || self.ui.is_some()
    }

    pub const fn is_page_connected(&self) -> bool {
        self.page.is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Push a message to whichever UI path is live. Never fails; a dead channel is detached
    /// and the message treated as undeliverable.
    fn deliver(&mut self, msg: UiMessage) -> Result<(), UiMessage> {
        if let Some(tx) = &self.embedded {
            match tx.send(msg) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.embedded = None;
                    return self.deliver(e.0);
                }
            }
        }
        let Some(link) = &self.ui else {
            return Err(msg);
        };
        match link.tx.send(msg) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(conn = link.id, "ui channel closed before disconnect");
                self.ui = None;
                Err(e.0)
            }
        }
    }

    pub fn send_to_ui(&mut self, msg: UiMessage, queue_if_disconnected: bool) -> Delivery {
        match self.deliver(msg) {
            Ok(()) => Delivery::Sent,
            Err(msg) if queue_if_disconnected => {
                self.queue.push_back(msg);
                Delivery::Queued
            }
            Err(msg) => {
                tracing::trace!(method = %msg.method, "dropping ui message, no ui attached");
                Delivery::Dropped
            }
        }
    }

    /// Deliver the queue in order, then clear it. Anything that cannot be delivered stays
    /// queued in its place.
    fn flush_queue(&mut self) {
        let mut pending = std::mem::take(&mut self.queue);
        while let Some(msg) = pending.pop_front() {
            if let Err(msg) = self.deliver(msg) {
                pending.push_front(msg);
                self.queue = pending;
                return;
            }
        }
    }

    fn send_snapshot(&mut self, snapshot: Vec<UiMessage>) {
        for msg in snapshot {
            if self.deliver(msg).is_err() {
                return;
            }
        }
        self.flush_queue();
    }

    /// Attach a UI connection. The snapshot goes out first, then the queue.
    pub fn connect_ui(
        &mut self,
        tx: UnboundedSender<UiMessage>,
        snapshot: Vec<UiMessage>,
    ) -> ConnectionId {
        let id = self.allocate_id();
        self.ui = Some(Link { id, tx });
        self.send_snapshot(snapshot);
        id
    }

    /// Detach `id` if it is still the current UI connection.
    pub fn disconnect_ui(&mut self, id: ConnectionId) -> bool {
        if self.ui.as_ref().is_some_and(|l| l.id == id) {
            self.ui = None;
            return true;
        }
        false
    }

    pub fn attach_embedded_view(
        &mut self,
        tx: UnboundedSender<UiMessage>,
        snapshot: Vec<UiMessage>,
    ) {
        self.embedded = Some(tx);
        self.send_snapshot(snapshot);
    }

    pub fn detach_embedded_view(&mut self) {
        self.embedded = None;
    }

    pub fn connect_page(&mut self, tx: UnboundedSender<PageEnvelope>) -> ConnectionId {
        let id = self.allocate_id();
        self.page = Some(Link { id, tx });
        id
    }

    pub fn disconnect_page(&mut self, id: ConnectionId) -> bool {
        if self.page.as_ref().is_some_and(|l| l.id == id) {
            self.page = None;
            return true;
        }
        false
    }

    /// Broadcast a notification to the page client, if one is attached.
    pub fn send_to_page(&mut self, method: &str, params: Value) -> Delivery {
        let Some(link) = &self.page else {
            return Delivery::Dropped;
        };
        if link.tx.send(PageEnvelope::notification(method, params)).is_err() {
            self.page = None;
            return Delivery::Dropped;
        }
        Delivery::Sent
    }

    /// Drop queued UI messages. Connections stay attached.
    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }
}
