use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use webloom_core::error::{Result, WebloomError};
use webloom_core::traits::{BrowserPage, SessionProvider};

/// Bounds the number of open browser pages. Callers past the limit wait for
/// a slot instead of failing.
pub struct SessionPool {
    provider: Arc<dyn SessionProvider>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl SessionPool {
    pub fn new(provider: Arc<dyn SessionProvider>, max_sessions: usize) -> Self {
        let capacity = max_sessions.max(1);
        Self {
            provider,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, then open a page in it.
    pub async fn acquire(&self) -> Result<PooledSession> {
        self.reserve().await?.open().await
    }

    /// Wait for a free slot without opening anything yet. Dropping the slot
    /// gives it back.
    pub async fn reserve(&self) -> Result<SessionSlot> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WebloomError::Session("session pool closed".into()))?;
        Ok(SessionSlot {
            provider: self.provider.clone(),
            permit,
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A reserved pool slot with no page yet.
pub struct SessionSlot {
    provider: Arc<dyn SessionProvider>,
    permit: OwnedSemaphorePermit,
}

impl SessionSlot {
    /// Open a page in this slot. On failure the slot is returned to the pool.
    pub async fn open(self) -> Result<PooledSession> {
        let page = self.provider.open_page().await?;
        debug!(available = self.permit.semaphore().available_permits(), "Browser session acquired");
        Ok(PooledSession {
            page: Some(page),
            _permit: self.permit,
        })
    }
}

/// One page checked out of the pool. Call [`release`](Self::release) to close
/// it; the pool slot is returned when this value drops.
pub struct PooledSession {
    page: Option<Box<dyn BrowserPage>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn page(&self) -> Option<&dyn BrowserPage> {
        self.page.as_deref()
    }

    /// Close the page. Close errors are logged, never returned.
    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!(error = %e, "Failed to close browser session");
            }
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        warn!("Browser session dropped without release, closing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    warn!(error = %e, "Failed to close dropped browser session");
                }
            });
        }
    }
}
