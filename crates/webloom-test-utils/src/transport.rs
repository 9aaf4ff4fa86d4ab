use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use webloom_core::error::{Result, WebloomError};
use webloom_core::traits::MessageTransport;

/// Transport that stores sent frames in memory. Can be switched to fail
/// every send to simulate a broken socket, or to never finish a send to
/// simulate a peer that stopped reading.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    sent: Arc<Mutex<Vec<String>>>,
    broken: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        let t = Self::default();
        t.break_pipe();
        t
    }

    pub fn stalled() -> Self {
        let t = Self::default();
        t.stalled.store(true, Ordering::SeqCst);
        t
    }

    pub fn break_pipe(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent frames parsed as JSON.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    /// Parsed frames whose `type` equals `kind`.
    pub fn sent_of_type(&self, kind: &str) -> Vec<serde_json::Value> {
        self.sent_json()
            .into_iter()
            .filter(|v| v["type"] == kind)
            .collect()
    }
}

impl MessageTransport for MemoryTransport {
    fn send_text(&self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.stalled.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
            if self.broken.load(Ordering::SeqCst) {
                return Err(WebloomError::Gateway("connection reset".into()));
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        })
    }
}
