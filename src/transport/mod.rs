//! The message substrate the engine runtime talks over.
//!
//! A [`Transport`] hands out two kinds of sockets: an [`EventSocket`] that
//! receives every message published at an address, and a [`RequestSocket`]
//! carrying request/reply text over one persistent connection. Sockets own
//! their background IO; dropping a socket closes it.

use std::fmt::Debug;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use tokio_util::sync::DropGuard;

use crate::error::TransportError;

pub mod memory;
pub mod tcp;

pub trait Transport: Debug + Send + Sync + 'static {
    /// Opens a subscription to every topic published at `address`.
    fn subscribe(&self, address: &str) -> Result<EventSocket, TransportError>;

    /// Opens a bidirectional request socket connected to `address`.
    fn connect_requests(&self, address: &str) -> Result<RequestSocket, TransportError>;
}

#[derive(Debug)]
pub struct EventSocket {
    messages: UnboundedReceiver<String>,
    _guard: Option<DropGuard>,
}

impl EventSocket {
    pub fn new(messages: UnboundedReceiver<String>, guard: Option<DropGuard>) -> Self {
        EventSocket { messages, _guard: guard }
    }

    /// Waits for the next message. `None` once the socket has been closed by its IO side.
    pub async fn recv(&mut self) -> Option<String> {
        self.messages.next().await
    }
}

#[derive(Debug)]
pub struct RequestSocket {
    outgoing: UnboundedSender<String>,
    incoming: UnboundedReceiver<String>,
    _guard: Option<DropGuard>,
}

impl RequestSocket {
    pub fn new(
        outgoing: UnboundedSender<String>,
        incoming: UnboundedReceiver<String>,
        guard: Option<DropGuard>,
    ) -> Self {
        RequestSocket { outgoing, incoming, _guard: guard }
    }

    /// Queues a message for sending. Returns false if the socket can no longer send.
    pub fn send(&self, message: String) -> bool {
        self.outgoing.unbounded_send(message).is_ok()
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.next().await
    }
}
