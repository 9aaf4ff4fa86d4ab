use std::sync::Mutex;

use webloom_core::traits::EventSink;
use webloom_core::types::{NodeRunState, RunEvent};

/// Event sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(state, error)` updates for one node, in emission order.
    pub fn node_updates(&self, node: &str) -> Vec<(NodeRunState, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::NodeUpdate {
                    node_id,
                    state,
                    error,
                    ..
                } if node_id == node => Some((state, error)),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Warning { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_events(&self) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(RunEvent::is_terminal)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }
}
