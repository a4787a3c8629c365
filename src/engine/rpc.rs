use std::sync::Arc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::{timeout_at, Duration, Instant};
use uuid::Uuid;

use crate::device::constants::JSON_RPC_VERSION;
use crate::transport::{RequestSocket, Transport};

/// Parameters of one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    /// Named parameters win over positional ones; empty lists count as absent.
    pub fn new(positional: Vec<Value>, named: Map<String, Value>) -> Params {
        if !named.is_empty() {
            Params::Named(named)
        } else if !positional.is_empty() {
            Params::Positional(positional)
        } else {
            Params::None
        }
    }

    pub fn named<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Params {
        let named = pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Params::new(Vec::new(), named)
    }

    fn into_value(self) -> Option<Value> {
        match self {
            Params::None => None,
            Params::Positional(list) if list.is_empty() => None,
            Params::Positional(list) => Some(Value::Array(list)),
            Params::Named(map) if map.is_empty() => None,
            Params::Named(map) => Some(Value::Object(map)),
        }
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    result: Option<Value>,
}

fn correlation_id() -> u16 {
    (Uuid::new_v4().as_u128() % (1 << 16)) as u16
}

/// Synchronous request/reply channel to the engine.
///
/// One request may be outstanding at a time; the owner must not call
/// `send` concurrently. Every `send` is bounded by a single deadline of
/// `timeout`, stray replies included.
#[derive(Debug)]
pub struct RpcChannel {
    transport: Arc<dyn Transport>,
    socket: Option<RequestSocket>,
    address: Option<String>,
    timeout: Duration,
}

impl RpcChannel {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        RpcChannel {
            transport,
            socket: None,
            address: None,
            timeout,
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Replaces the socket with a new one connected to `address`.
    /// Replies to requests sent on the old socket are never seen.
    pub fn change_address(&mut self, address: &str) {
        self.socket = None;
        self.address = Some(address.to_string());

        match self.transport.connect_requests(address) {
            Ok(socket) => {
                debug!("Request socket connected to {}", address);
                self.socket = Some(socket);
            },
            Err(err) => {
                warn!("Failed to connect request socket to {}: {}", address, err);
            },
        }
    }

    pub fn close(&mut self) {
        self.socket = None;
    }

    /// Sends a request and waits for its reply.
    ///
    /// Returns the reply's `result`, or `None` if the result is absent, the
    /// socket is unusable or no matching reply arrived in time.
    pub async fn send(&mut self, method: &str, params: Params) -> Option<Value> {
        let Some(socket) = self.socket.as_mut() else {
            debug!("No request socket, dropping request {}", method);
            return None;
        };

        let id = correlation_id();
        let request = Request {
            jsonrpc: JSON_RPC_VERSION,
            method,
            id,
            params: params.into_value(),
        };

        let message = match serde_json::to_string(&request) {
            Ok(message) => message,
            Err(err) => {
                warn!("Failed to encode request {}: {}", method, err);
                return None;
            },
        };

        debug!("Sending the following request msg: {}", message);
        if !socket.send(message) {
            warn!("Request socket is closed, dropping request {}", method);
            return None;
        }

        let deadline = Instant::now() + self.timeout;

        loop {
            let message = match timeout_at(deadline, socket.recv()).await {
                Err(_) => {
                    warn!("No reply to {} within {}", method, humantime::format_duration(self.timeout));
                    return None;
                },
                Ok(None) => {
                    warn!("Request socket closed while waiting for a reply to {}", method);
                    return None;
                },
                Ok(Some(message)) => message,
            };

            let reply: Reply = match serde_json::from_str(&message) {
                Ok(reply) => reply,
                Err(err) => {
                    warn!("Discarding malformed reply {:?}: {}", message, err);
                    continue;
                },
            };

            if reply.id != Some(i64::from(id)) {
                warn!("Received answer out of order! (expected id {}, got {:?})", id, reply.id);
                continue;
            }

            if let Some(result) = &reply.result {
                debug!("Received following reply: {}", result);
            }
            return reply.result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use tokio::spawn;

    use crate::transport::memory::{FakeEngine, MemoryTransport};

    fn channel(transport: &MemoryTransport) -> RpcChannel {
        let mut rpc = RpcChannel::new(Arc::new(transport.clone()), Duration::from_secs(2));
        rpc.change_address("mem://rpc");
        rpc
    }

    #[test]
    fn named_params_take_precedence() {
        let named: Map<String, Value> = [("band".to_string(), json!("A"))].into_iter().collect();

        assert_eq!(Params::new(vec![json!(1)], named.clone()), Params::Named(named));
        assert_eq!(Params::new(vec![json!(1)], Map::new()), Params::Positional(vec![json!(1)]));
        assert_eq!(Params::new(Vec::new(), Map::new()), Params::None);
        assert_eq!(Params::Positional(Vec::new()).into_value(), None);
    }

    #[tokio::test]
    async fn request_shape_and_result() {
        let transport = MemoryTransport::new();
        let engine = FakeEngine::start(&transport, "mem://rpc", |method, params| match method {
            "getBattery" => Some(json!(80)),
            "getVersion" => Some(json!({"version": "1.0", "params": params})),
            _ => None,
        });
        let mut rpc = channel(&transport);

        let result = rpc.send("getBattery", Params::named([("band", json!("A"))])).await;
        assert_eq!(result, Some(json!(80)));

        let result = rpc.send("getVersion", Params::None).await;
        assert_eq!(result, Some(json!({"version": "1.0", "params": null})));

        let requests = engine.requests();
        assert_eq!(requests[0]["jsonrpc"], json!("2.0"));
        assert_eq!(requests[0]["method"], json!("getBattery"));
        assert_eq!(requests[0]["params"], json!({"band": "A"}));
        assert!(requests[0]["id"].as_u64().unwrap() <= u64::from(u16::MAX));
        assert!(requests[1].get("params").is_none());
    }

    #[tokio::test]
    async fn reply_without_result_is_none() {
        let transport = MemoryTransport::new();
        let _engine = FakeEngine::start(&transport, "mem://rpc", |_, _| Some(Value::Null));
        let mut rpc = channel(&transport);

        assert_eq!(rpc.send("connectStrongest", Params::None).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_reply_is_discarded() {
        let transport = MemoryTransport::new();
        let mut connections = transport.listen("mem://rpc");
        let mut rpc = channel(&transport);
        let mut connection = connections.next().await.unwrap();

        let engine = spawn(async move {
            let request: Value = serde_json::from_str(&connection.requests.next().await.unwrap()).unwrap();
            let id = request["id"].as_u64().unwrap();
            connection.replies.unbounded_send(json!({"id": (id + 1) % 65536, "result": "stale"}).to_string()).unwrap();
            connection.replies.unbounded_send("garbage".to_string()).unwrap();
            connection.replies.unbounded_send(json!({"id": id, "result": "fresh"}).to_string()).unwrap();
            connection
        });

        assert_eq!(rpc.send("getVersion", Params::None).await, Some(json!("fresh")));
        drop(engine.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_one_window() {
        let transport = MemoryTransport::new();
        let engine = FakeEngine::start(&transport, "mem://rpc", |_, _| None);
        let mut rpc = channel(&transport);

        let started = Instant::now();
        assert_eq!(rpc.send("getBands", Params::None).await, None);
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
        assert_eq!(engine.methods(), vec!["getBands"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_replies_do_not_extend_the_deadline() {
        let transport = MemoryTransport::new();
        let mut connections = transport.listen("mem://rpc");
        let mut rpc = channel(&transport);
        let mut connection = connections.next().await.unwrap();

        let engine = spawn(async move {
            let request: Value = serde_json::from_str(&connection.requests.next().await.unwrap()).unwrap();
            let id = request["id"].as_u64().unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            connection.replies.unbounded_send(json!({"id": (id + 1) % 65536}).to_string()).unwrap();
            connection
        });

        let started = Instant::now();
        assert_eq!(rpc.send("getBands", Params::None).await, None);
        assert!(started.elapsed() < Duration::from_millis(2100));
        drop(engine.await.unwrap());
    }

    #[tokio::test]
    async fn without_socket_returns_none() {
        let transport = MemoryTransport::new();
        let mut rpc = RpcChannel::new(Arc::new(transport), Duration::from_secs(2));
        assert_eq!(rpc.send("getVersion", Params::None).await, None);
    }

    #[tokio::test]
    async fn change_address_moves_to_the_new_engine() {
        let transport = MemoryTransport::new();
        let old = FakeEngine::start(&transport, "mem://rpc", |_, _| Some(json!("old")));
        let new = FakeEngine::start(&transport, "mem://rpc2", |_, _| Some(json!("new")));
        let mut rpc = channel(&transport);
        assert_eq!(rpc.send("getVersion", Params::None).await, Some(json!("old")));

        rpc.change_address("mem://rpc2");
        assert_eq!(rpc.address(), Some("mem://rpc2"));
        assert_eq!(rpc.send("getVersion", Params::None).await, Some(json!("new")));
        assert_eq!(old.requests().len(), 1);
        assert_eq!(new.requests().len(), 1);
    }
}
