use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::debug;

use webloom_core::error::{Result, WebloomError};
use webloom_core::traits::MessageTransport;

use crate::router::MessageRouter;

/// Write half of an axum WebSocket, shared between the router and the
/// connection's read loop.
pub struct WsTransport {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsTransport {
    async fn send(&self, message: Message) -> Result<()> {
        let mut tx = self.tx.lock().await;
        tx.send(message)
            .await
            .map_err(|e| WebloomError::Gateway(format!("WebSocket send failed: {}", e)))
    }
}

impl MessageTransport for WsTransport {
    fn send_text(&self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.send(Message::Text(text.into())).await })
    }
}

/// Serve one WebSocket until the peer goes away.
pub async fn handle_connection(ws: WebSocket, router: Arc<MessageRouter>) {
    let (ws_tx, mut ws_rx) = ws.split();
    let transport = Arc::new(WsTransport {
        tx: Mutex::new(ws_tx),
    });
    let connection_id = router.on_connect(transport.clone());

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => router.on_message(&connection_id, text.as_str()).await,
            Message::Close(_) => break,
            Message::Ping(data) => {
                let _ = transport.send(Message::Pong(data)).await;
            }
            _ => {}
        }
    }

    router.on_disconnect(&connection_id);
}
