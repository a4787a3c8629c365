//! In-process transport, keyed by address.
//!
//! Useful for driving a session without a running engine: publish event
//! text with [`MemoryTransport::publish`] and answer requests with a
//! [`FakeEngine`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::warn;
use serde_json::{json, Value};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{EventSocket, RequestSocket, Transport};

/// The engine side of one request socket.
#[derive(Debug)]
pub struct MemoryConnection {
    pub requests: UnboundedReceiver<String>,
    pub replies: UnboundedSender<String>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    subscribers: HashMap<String, Vec<UnboundedSender<String>>>,
    listeners: HashMap<String, UnboundedSender<MemoryConnection>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    /// Delivers `message` to every open subscription at `address`.
    /// Returns the number of subscriptions that received it.
    pub fn publish(&self, address: &str, message: impl Into<String>) -> usize {
        let message = message.into();

        self.with_inner(|inner| {
            let Some(subscribers) = inner.subscribers.get_mut(address) else {
                return 0;
            };
            subscribers.retain(|subscriber| !subscriber.is_closed());
            subscribers
                .iter()
                .filter(|subscriber| subscriber.unbounded_send(message.clone()).is_ok())
                .count()
        })
    }

    pub fn subscriber_count(&self, address: &str) -> usize {
        self.with_inner(|inner| {
            inner.subscribers
                .get(address)
                .map(|subscribers| subscribers.iter().filter(|s| !s.is_closed()).count())
                .unwrap_or(0)
        })
    }

    /// Accepts request sockets connecting to `address` from now on.
    /// A later call for the same address replaces the earlier listener.
    pub fn listen(&self, address: &str) -> UnboundedReceiver<MemoryConnection> {
        let (sender, receiver) = unbounded();
        self.with_inner(|inner| {
            inner.listeners.insert(address.to_string(), sender);
        });
        receiver
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&self, address: &str) -> Result<EventSocket, TransportError> {
        let (sender, receiver) = unbounded();
        self.with_inner(|inner| {
            inner.subscribers.entry(address.to_string()).or_default().push(sender);
        });
        Ok(EventSocket::new(receiver, None))
    }

    fn connect_requests(&self, address: &str) -> Result<RequestSocket, TransportError> {
        let (outgoing_sender, outgoing_receiver) = unbounded();
        let (incoming_sender, incoming_receiver) = unbounded();

        let connection = MemoryConnection {
            requests: outgoing_receiver,
            replies: incoming_sender,
        };

        // without a listener the connection is dropped and the socket can't send
        self.with_inner(|inner| {
            if let Some(listener) = inner.listeners.get(address) {
                if listener.unbounded_send(connection).is_err() {
                    inner.listeners.remove(address);
                }
            }
        });

        Ok(RequestSocket::new(outgoing_sender, incoming_receiver, None))
    }
}

type Responder = dyn Fn(&str, &Value) -> Option<Value> + Send + Sync;

/// A scriptable request responder standing in for the engine.
///
/// The responder receives the method name and the `params` value (`Null`
/// when absent) and returns the `result` to reply with, or `None` to leave
/// the request unanswered. Every parsed request is recorded.
#[derive(Debug)]
pub struct FakeEngine {
    requests: Arc<Mutex<Vec<Value>>>,
    cancel: CancellationToken,
}

impl FakeEngine {
    pub fn start<F>(transport: &MemoryTransport, address: &str, responder: F) -> FakeEngine
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let responder: Arc<Responder> = Arc::new(responder);
        let mut connections = transport.listen(address);

        let requests2 = requests.clone();
        let cancel2 = cancel.clone();
        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel2.cancelled() => {
                        break 'mainloop;
                    },
                    connection = connections.next() => match connection {
                        None => break 'mainloop,
                        Some(connection) => {
                            spawn(serve_connection(
                                cancel2.clone(),
                                connection,
                                requests2.clone(),
                                responder.clone(),
                            ));
                        },
                    },
                }
            }
        });

        FakeEngine { requests, cancel }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|request| request["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve_connection(
    cancel: CancellationToken,
    mut connection: MemoryConnection,
    requests: Arc<Mutex<Vec<Value>>>,
    responder: Arc<Responder>,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = connection.requests.next() => match message {
                None => return,
                Some(message) => message,
            },
        };

        let request: Value = match serde_json::from_str(&message) {
            Ok(request) => request,
            Err(err) => {
                warn!("Fake engine received malformed request {:?}: {}", message, err);
                continue;
            },
        };
        requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());

        let method = request["method"].as_str().unwrap_or_default();
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        if let Some(result) = responder(method, &params) {
            let reply = json!({ "id": request["id"], "result": result });
            if connection.replies.unbounded_send(reply.to_string()).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_open_subscriptions_only() {
        let transport = MemoryTransport::new();
        let mut first = transport.subscribe("mem://pub").unwrap();
        let second = transport.subscribe("mem://pub").unwrap();
        drop(second);

        assert_eq!(transport.publish("mem://pub", "hello"), 1);
        assert_eq!(transport.publish("mem://other", "hello"), 0);
        assert_eq!(first.recv().await.unwrap(), "hello");
        assert_eq!(transport.subscriber_count("mem://pub"), 1);
    }

    #[tokio::test]
    async fn request_socket_without_listener_cannot_send() {
        let transport = MemoryTransport::new();
        let socket = transport.connect_requests("mem://rpc").unwrap();
        assert!(!socket.send("{}".to_string()));
    }

    #[tokio::test]
    async fn fake_engine_replies_with_matching_id() {
        let transport = MemoryTransport::new();
        let engine = FakeEngine::start(&transport, "mem://rpc", |method, _| {
            (method == "getVersion").then(|| json!("1.2.3"))
        });

        let mut socket = transport.connect_requests("mem://rpc").unwrap();
        assert!(socket.send(r#"{"jsonrpc": "2.0", "method": "getVersion", "id": 7}"#.to_string()));

        let reply: Value = serde_json::from_str(&socket.recv().await.unwrap()).unwrap();
        assert_eq!(reply, json!({"id": 7, "result": "1.2.3"}));
        assert_eq!(engine.methods(), vec!["getVersion"]);
    }
}
