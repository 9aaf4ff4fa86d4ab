use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use webloom_core::event::EventBus;

use crate::protocol;
use crate::router::MessageRouter;

/// Fan engine events out to every connected client. One forwarder serves
/// all connections; it only queues frames, so a slow client never holds up
/// the others.
pub fn spawn_event_forwarder(
    bus: &EventBus,
    router: Arc<MessageRouter>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = rx.recv() => received,
                _ = shutdown.cancelled() => break,
            };
            match event {
                Ok(event) => {
                    let Some(envelope) = protocol::from_run_event(&event) else {
                        continue;
                    };
                    let queued = router.publish(&envelope, &[]);
                    debug!(
                        execution_id = %event.execution_id(),
                        kind = %envelope.kind,
                        queued,
                        "Run event forwarded"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event forwarder lagged; clients missed updates");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
