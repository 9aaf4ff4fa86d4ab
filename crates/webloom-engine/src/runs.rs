use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use webloom_core::types::ExecutionId;

struct RunHandle {
    cancel: CancellationToken,
    node_count: usize,
    started_at: DateTime<Utc>,
}

/// Snapshot of one in-flight run.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRun {
    pub execution_id: ExecutionId,
    pub node_count: usize,
    pub started_at: DateTime<Utc>,
}

/// In-flight runs keyed by execution id. Holds the cancellation token for
/// each so a stop request can reach a run from outside its task.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<ExecutionId, RunHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new run and hand back its cancellation token.
    pub fn register(&self, id: &ExecutionId, node_count: usize) -> CancellationToken {
        let cancel = CancellationToken::new();
        let handle = RunHandle {
            cancel: cancel.clone(),
            node_count,
            started_at: Utc::now(),
        };
        self.lock().insert(id.clone(), handle);
        cancel
    }

    pub fn remove(&self, id: &ExecutionId) {
        self.lock().remove(id);
    }

    /// Request cooperative cancellation. Returns false if the run is unknown
    /// or already finished.
    pub fn cancel(&self, id: &ExecutionId) -> bool {
        match self.lock().get(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight run. Used on shutdown.
    pub fn cancel_all(&self) -> usize {
        let runs = self.lock();
        for handle in runs.values() {
            handle.cancel.cancel();
        }
        runs.len()
    }

    pub fn is_active(&self, id: &ExecutionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest first.
    pub fn active(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<ActiveRun> = self
            .lock()
            .iter()
            .map(|(id, h)| ActiveRun {
                execution_id: id.clone(),
                node_count: h.node_count,
                started_at: h.started_at,
            })
            .collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ExecutionId, RunHandle>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
