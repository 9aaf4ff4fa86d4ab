use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use webloom_core::traits::MessageTransport;

use crate::protocol::{self, Envelope, Inbound};

/// Handles one inbound message type.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()>;
}

/// What a handler gets to see of the router while handling one message.
pub struct HandlerContext<'a> {
    pub router: &'a MessageRouter,
    pub connection_id: &'a str,
}

impl HandlerContext<'_> {
    /// Send to the connection the message came from.
    pub async fn reply(&self, message: &Envelope) -> bool {
        self.router.send_to(self.connection_id, message).await
    }
}

/// Frames waiting to be written to one connection, with an optional
/// delivery acknowledgement.
type Outbound = (String, Option<oneshot::Sender<bool>>);

/// Frames queued per connection before `publish` starts dropping them.
const OUTBOX_CAPACITY: usize = 256;
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct Connections {
    outboxes: HashMap<String, mpsc::Sender<Outbound>>,
    /// node id -> connection id
    bindings: HashMap<String, String>,
}

/// Multiplexes many client connections.
///
/// Owns the connection registry and node bindings behind one lock, which is
/// never held while a message is being written. Each connection has its own
/// writer task fed by a bounded queue, so frames to one peer stay in order
/// and a slow peer only delays itself. The handler table is fixed at
/// construction.
pub struct MessageRouter {
    state: Mutex<Connections>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

pub struct MessageRouterBuilder {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    send_timeout: Duration,
}

impl Default for MessageRouterBuilder {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl MessageRouterBuilder {
    /// Register `handler` for messages of type `kind`. A later registration
    /// for the same type replaces the earlier one.
    pub fn handler(mut self, kind: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(kind.to_string(), handler);
        self
    }

    /// How long one write may take before the connection is given up on.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn build(self) -> MessageRouter {
        info!(handlers = self.handlers.len(), "Message router ready");
        MessageRouter {
            state: Mutex::new(Connections::default()),
            handlers: self.handlers,
            next_id: AtomicU64::new(1),
            send_timeout: self.send_timeout,
        }
    }
}

impl MessageRouter {
    pub fn builder() -> MessageRouterBuilder {
        MessageRouterBuilder::default()
    }

    /// Register a new connection, start its writer task and return its id.
    /// Must be called inside a tokio runtime.
    pub fn on_connect(&self, transport: Arc<dyn MessageTransport>) -> String {
        let connection_id = format!("conn_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        tokio::spawn(write_loop(
            connection_id.clone(),
            transport,
            rx,
            self.send_timeout,
        ));
        self.lock().outboxes.insert(connection_id.clone(), tx);
        info!(connection_id = %connection_id, "Connection registered");
        connection_id
    }

    /// Forget a connection and every node bound to it.
    pub fn on_disconnect(&self, connection_id: &str) {
        let mut state = self.lock();
        state.outboxes.remove(connection_id);
        let before = state.bindings.len();
        state.bindings.retain(|_, conn| conn != connection_id);
        let unbound = before - state.bindings.len();
        drop(state);
        info!(connection_id = %connection_id, unbound, "Connection closed");
    }

    /// Dispatch one raw inbound frame. Problems are logged, never sent back
    /// as protocol errors, except for payloads of a known type that fail to
    /// decode.
    pub async fn on_message(&self, connection_id: &str, raw: &str) {
        let envelope = match Envelope::parse(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "Dropping malformed message");
                return;
            }
        };
        debug!(connection_id = %connection_id, kind = %envelope.kind, "Message received");

        let message = match Inbound::from_envelope(&envelope) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection_id = %connection_id, kind = %envelope.kind, error = %e, "Rejected message payload");
                self.send_to(connection_id, &protocol::error(e.to_string())).await;
                return;
            }
        };

        if let Inbound::NodeConnectionRequest { node_id } = &message {
            if self.bind_node(node_id, connection_id) {
                self.send_to(connection_id, &protocol::connection_status(node_id, "connected"))
                    .await;
            }
            return;
        }

        let Some(handler) = self.handlers.get(&envelope.kind) else {
            warn!(connection_id = %connection_id, kind = %envelope.kind, "No handler for message type");
            return;
        };
        let ctx = HandlerContext {
            router: self,
            connection_id,
        };
        handler.handle(ctx, message).await;
    }

    /// Point `node_id` at `connection_id`, replacing any earlier binding.
    /// Returns false if the connection is not registered.
    pub fn bind_node(&self, node_id: &str, connection_id: &str) -> bool {
        let mut state = self.lock();
        if !state.outboxes.contains_key(connection_id) {
            return false;
        }
        let previous = state
            .bindings
            .insert(node_id.to_string(), connection_id.to_string());
        drop(state);
        match previous {
            Some(prev) if prev != connection_id => {
                info!(node_id = %node_id, from = %prev, to = %connection_id, "Node rebound")
            }
            _ => info!(node_id = %node_id, connection_id = %connection_id, "Node bound"),
        }
        true
    }

    /// Write to one connection and wait for the outcome. Returns false if
    /// the connection is unknown, the write failed, or it timed out.
    pub async fn send_to(&self, connection_id: &str, message: &Envelope) -> bool {
        let outbox = self.lock().outboxes.get(connection_id).cloned();
        match outbox {
            Some(outbox) => deliver(connection_id, outbox, message.to_text()).await,
            None => {
                debug!(connection_id = %connection_id, "Send to unknown connection");
                false
            }
        }
    }

    pub async fn send_to_node(&self, node_id: &str, message: &Envelope) -> bool {
        let target = {
            let state = self.lock();
            state.bindings.get(node_id).and_then(|conn| {
                state
                    .outboxes
                    .get(conn)
                    .map(|tx| (conn.clone(), tx.clone()))
            })
        };
        match target {
            Some((connection_id, outbox)) => {
                deliver(&connection_id, outbox, message.to_text()).await
            }
            None => {
                debug!(node_id = %node_id, "Node not bound");
                false
            }
        }
    }

    /// Deliver to every connection not in `exclude` and wait for the writes.
    /// Returns how many deliveries succeeded; one failing peer does not
    /// affect the others, and a stalled one costs at most the send timeout.
    pub async fn broadcast(&self, message: &Envelope, exclude: &[&str]) -> usize {
        let targets = self.targets(exclude);
        if targets.is_empty() {
            return 0;
        }

        let text = message.to_text();
        let results = join_all(targets.into_iter().map(|(id, outbox)| {
            let text = text.clone();
            async move { deliver(&id, outbox, text).await }
        }))
        .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Queue `message` for every connection not in `exclude` without waiting
    /// for any write. A connection whose queue is full misses this message.
    /// Returns how many connections it was queued for.
    pub fn publish(&self, message: &Envelope, exclude: &[&str]) -> usize {
        let text = message.to_text();
        let mut queued = 0;
        for (connection_id, outbox) in self.targets(exclude) {
            match outbox.try_send((text.clone(), None)) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %connection_id, "Outbound queue full; message dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection_id = %connection_id, "Outbound queue closed")
                }
            }
        }
        queued
    }

    pub fn connection_count(&self) -> usize {
        self.lock().outboxes.len()
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.lock().outboxes.contains_key(connection_id)
    }

    /// Connection currently representing `node_id`.
    pub fn connection_of(&self, node_id: &str) -> Option<String> {
        self.lock().bindings.get(node_id).cloned()
    }

    /// Snapshot of node bindings.
    pub fn bindings(&self) -> HashMap<String, String> {
        self.lock().bindings.clone()
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    fn targets(&self, exclude: &[&str]) -> Vec<(String, mpsc::Sender<Outbound>)> {
        self.lock()
            .outboxes
            .iter()
            .filter(|(id, _)| !exclude.contains(&id.as_str()))
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn deliver(connection_id: &str, outbox: mpsc::Sender<Outbound>, text: String) -> bool {
    let (ack, done) = oneshot::channel();
    if outbox.send((text, Some(ack))).await.is_err() {
        debug!(connection_id = %connection_id, "Connection writer gone");
        return false;
    }
    done.await.unwrap_or(false)
}

/// Drain one connection's queue in order. A write that times out closes the
/// queue: the peer is treated as gone and later sends fail fast.
async fn write_loop(
    connection_id: String,
    transport: Arc<dyn MessageTransport>,
    mut rx: mpsc::Receiver<Outbound>,
    send_timeout: Duration,
) {
    while let Some((text, ack)) = rx.recv().await {
        let (ok, stalled) = match tokio::time::timeout(send_timeout, transport.send_text(text)).await {
            Ok(Ok(())) => (true, false),
            Ok(Err(e)) => {
                warn!(connection_id = %connection_id, error = %e, "Delivery failed");
                (false, false)
            }
            Err(_) => {
                warn!(
                    connection_id = %connection_id,
                    timeout_ms = send_timeout.as_millis() as u64,
                    "Delivery timed out; closing outbound queue"
                );
                (false, true)
            }
        };
        if let Some(ack) = ack {
            let _ = ack.send(ok);
        }
        if stalled {
            break;
        }
    }
    debug!(connection_id = %connection_id, "Connection writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use webloom_test_utils::MemoryTransport;

    fn ping() -> Envelope {
        Envelope::new("PING", json!({}))
    }

    fn bind_frame(node: &str) -> String {
        json!({"type": "node_connection_request", "payload": {"node_id": node}}).to_string()
    }

    struct Counting(AtomicUsize);

    impl MessageHandler for Counting {
        fn handle<'a>(&'a self, ctx: HandlerContext<'a>, message: Inbound) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                if let Inbound::Other { payload, .. } = message {
                    ctx.reply(&Envelope::new("ECHO", payload)).await;
                }
            })
        }
    }

    #[tokio::test]
    async fn test_rebinding_moves_node_to_latest_connection() {
        let router = MessageRouter::builder().build();
        let t1 = MemoryTransport::new();
        let t2 = MemoryTransport::new();
        let c1 = router.on_connect(Arc::new(t1.clone()));
        let c2 = router.on_connect(Arc::new(t2.clone()));

        router.on_message(&c1, &bind_frame("A")).await;
        router.on_message(&c2, &bind_frame("A")).await;
        assert_eq!(router.connection_of("A").as_deref(), Some(c2.as_str()));

        assert!(router.send_to_node("A", &ping()).await);
        assert!(t1.sent_of_type("PING").is_empty());
        assert_eq!(t2.sent_of_type("PING").len(), 1);
    }

    #[tokio::test]
    async fn test_bound_node_gets_connection_status() {
        let router = MessageRouter::builder().build();
        let t = MemoryTransport::new();
        let c = router.on_connect(Arc::new(t.clone()));

        router.on_message(&c, &bind_frame("node-7")).await;
        let status = t.sent_of_type("connection_status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0]["payload"]["node_id"], "node-7");
        assert_eq!(status[0]["payload"]["status"], "connected");
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failing_peer() {
        let router = MessageRouter::builder().build();
        let healthy: Vec<MemoryTransport> = (0..3).map(|_| MemoryTransport::new()).collect();
        for t in &healthy {
            router.on_connect(Arc::new(t.clone()));
        }
        router.on_connect(Arc::new(MemoryTransport::broken()));

        assert_eq!(router.broadcast(&ping(), &[]).await, 3);
        for t in &healthy {
            assert_eq!(t.sent_of_type("PING").len(), 1);
        }
    }

    #[tokio::test]
    async fn test_broadcast_gives_up_on_stalled_peer() {
        let router = MessageRouter::builder()
            .send_timeout(Duration::from_millis(50))
            .build();
        let healthy = MemoryTransport::new();
        router.on_connect(Arc::new(healthy.clone()));
        let stalled = router.on_connect(Arc::new(MemoryTransport::stalled()));

        let delivered = tokio::time::timeout(Duration::from_secs(1), router.broadcast(&ping(), &[]))
            .await
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(healthy.sent_of_type("PING").len(), 1);

        // The stalled peer's queue is closed now; later sends fail at once.
        let again = tokio::time::timeout(Duration::from_millis(20), router.send_to(&stalled, &ping()))
            .await
            .unwrap();
        assert!(!again);
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_writes() {
        let router = MessageRouter::builder().build();
        let healthy = MemoryTransport::new();
        let stalled = router.on_connect(Arc::new(MemoryTransport::stalled()));
        let ok = router.on_connect(Arc::new(healthy.clone()));

        assert_eq!(router.publish(&ping(), &[]), 2);
        assert_eq!(router.publish(&ping(), &[stalled.as_str()]), 1);

        // A reply queued after published frames arrives after them.
        assert!(router.send_to(&ok, &Envelope::new("PONG", json!({}))).await);
        let kinds: Vec<String> = healthy
            .sent_json()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(kinds, vec!["PING", "PING", "PONG"]);
    }

    #[tokio::test]
    async fn test_broadcast_honours_exclude() {
        let router = MessageRouter::builder().build();
        let a = MemoryTransport::new();
        let b = MemoryTransport::new();
        let ca = router.on_connect(Arc::new(a.clone()));
        router.on_connect(Arc::new(b.clone()));

        assert_eq!(router.broadcast(&ping(), &[ca.as_str()]).await, 1);
        assert!(a.sent().is_empty());
        assert_eq!(b.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_drops_bindings() {
        let router = MessageRouter::builder().build();
        let c = router.on_connect(Arc::new(MemoryTransport::new()));
        router.on_message(&c, &bind_frame("A")).await;
        router.on_message(&c, &bind_frame("B")).await;
        assert_eq!(router.bindings().len(), 2);

        router.on_disconnect(&c);
        assert!(router.bindings().is_empty());
        assert!(!router.send_to_node("A", &ping()).await);
        assert!(!router.send_to(&c, &ping()).await);
        assert_eq!(router.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_broken_transport_returns_false() {
        let router = MessageRouter::builder().build();
        let t = MemoryTransport::new();
        let c = router.on_connect(Arc::new(t.clone()));
        t.break_pipe();
        assert!(!router.send_to(&c, &ping()).await);
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let router = MessageRouter::builder()
            .handler("custom", counter.clone())
            .build();
        let t = MemoryTransport::new();
        let c = router.on_connect(Arc::new(t.clone()));

        router
            .on_message(&c, r#"{"type":"custom","payload":{"n":1}}"#)
            .await;
        router.on_message(&c, r#"{"type":"unhandled"}"#).await;
        router.on_message(&c, "not json").await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        let echoes = t.sent_of_type("ECHO");
        assert_eq!(echoes.len(), 1);
        assert_eq!(echoes[0]["payload"]["n"], 1);
        // Unknown types and malformed JSON produce no reply.
        assert_eq!(t.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_payload_for_known_type_gets_error_reply() {
        let router = MessageRouter::builder().build();
        let t = MemoryTransport::new();
        let c = router.on_connect(Arc::new(t.clone()));

        router
            .on_message(&c, r#"{"type":"node_connection_request","payload":{}}"#)
            .await;
        assert_eq!(t.sent_of_type("ERROR").len(), 1);
        assert!(router.bindings().is_empty());
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let router = MessageRouter::builder().build();
        let a = router.on_connect(Arc::new(MemoryTransport::new()));
        let b = router.on_connect(Arc::new(MemoryTransport::new()));
        assert_ne!(a, b);
        assert!(a.starts_with("conn_"));
    }
}
