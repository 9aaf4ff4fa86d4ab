use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::info;

use webloom_core::config::BrowserConfig;
use webloom_core::error::Result;
use webloom_core::traits::{BrowserPage, CookieStore, SessionProvider};

use crate::page::WebDriverPage;
use crate::webdriver::WebDriverClient;

/// Opens one WebDriver session per page.
pub struct WebDriverProvider {
    client: WebDriverClient,
    config: BrowserConfig,
    cookies: Option<Arc<dyn CookieStore>>,
}

impl WebDriverProvider {
    pub fn new(config: BrowserConfig) -> Result<Self> {
        let client = WebDriverClient::new(
            &config.webdriver_url,
            Duration::from_secs(config.request_timeout_secs.max(1)),
        )?;
        Ok(Self {
            client,
            config,
            cookies: None,
        })
    }

    /// Persist cookies across sessions. Ignored when `auto_cookies` is off.
    pub fn with_cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        if self.config.auto_cookies {
            self.cookies = Some(store);
        }
        self
    }

    pub fn client(&self) -> &WebDriverClient {
        &self.client
    }
}

impl SessionProvider for WebDriverProvider {
    fn open_page(&self) -> BoxFuture<'_, Result<Box<dyn BrowserPage>>> {
        Box::pin(async move {
            let session_id = self.client.new_session(&self.config).await?;
            info!(session = %session_id, browser = %self.config.browser, "WebDriver session opened");
            Ok(Box::new(WebDriverPage::new(
                self.client.clone(),
                session_id,
                self.cookies.clone(),
            )) as Box<dyn BrowserPage>)
        })
    }
}
