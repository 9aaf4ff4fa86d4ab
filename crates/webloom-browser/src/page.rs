use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use webloom_core::cookie::{cookie_matches_domain, domain_from_url, DomainCookies};
use webloom_core::error::{Result, WebloomError};
use webloom_core::traits::{BrowserPage, CookieStore};

use crate::webdriver::{cookie_from_driver, cookie_to_driver, element_id, WebDriverClient};

/// One WebDriver session acting as a single page.
pub struct WebDriverPage {
    client: WebDriverClient,
    session_id: String,
    cookies: Option<Arc<dyn CookieStore>>,
}

impl WebDriverPage {
    pub(crate) fn new(
        client: WebDriverClient,
        session_id: String,
        cookies: Option<Arc<dyn CookieStore>>,
    ) -> Self {
        Self {
            client,
            session_id,
            cookies,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn path(&self, rest: &str) -> String {
        format!("/session/{}{}", self.session_id, rest)
    }

    async fn find(&self, selector: &str) -> Result<String> {
        let value = self
            .client
            .command(
                Method::POST,
                &self.path("/element"),
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        element_id(&value)
            .ok_or_else(|| WebloomError::Session(format!("no element reference for {}", selector)))
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.client.command(Method::GET, &self.path("/url"), None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Add stored cookies for the URL's primary domain; reload if any were set.
    async fn apply_cookies(&self, store: &dyn CookieStore, url: &str) -> Result<()> {
        let Some(saved) = store.load_cookies(url).await? else {
            return Ok(());
        };
        let mut applied = 0usize;
        for cookie in &saved.cookies {
            match self
                .client
                .command(Method::POST, &self.path("/cookie"), Some(cookie_to_driver(cookie)))
                .await
            {
                Ok(_) => applied += 1,
                Err(e) => debug!(cookie = %cookie.name, error = %e, "Cookie rejected by browser"),
            }
        }
        if applied > 0 {
            self.client
                .command(Method::POST, &self.path("/refresh"), Some(json!({})))
                .await?;
            info!(domain = %saved.domain, applied, "Stored cookies applied");
        }
        Ok(())
    }

    /// Save the current page's cookies under its primary domain.
    async fn save_cookies(&self, store: &dyn CookieStore) -> Result<()> {
        let url = self.current_url().await?;
        if !url.starts_with("http") {
            return Ok(());
        }
        let domain = domain_from_url(&url);
        let value = self.client.command(Method::GET, &self.path("/cookie"), None).await?;
        let cookies: Vec<_> = value
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|c| cookie_from_driver(c, &domain))
            .filter(|c| cookie_matches_domain(&c.domain, &domain))
            .collect();
        if cookies.is_empty() {
            return Ok(());
        }
        store
            .save_cookies(DomainCookies {
                domain,
                cookies,
                saved_at: Utc::now(),
                url,
            })
            .await?;
        Ok(())
    }
}

impl BrowserPage for WebDriverPage {
    fn navigate<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .command(Method::POST, &self.path("/url"), Some(json!({ "url": url })))
                .await
                .map_err(|e| WebloomError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            if let Some(store) = &self.cookies {
                if let Err(e) = self.apply_cookies(store.as_ref(), url).await {
                    warn!(url = %url, error = %e, "Failed to apply stored cookies");
                }
            }
            Ok(())
        })
    }

    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let element = self.find(selector).await?;
            self.client
                .command(
                    Method::POST,
                    &self.path(&format!("/element/{}/click", element)),
                    Some(json!({})),
                )
                .await?;
            Ok(())
        })
    }

    fn fill<'a>(&'a self, selector: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let element = self.find(selector).await?;
            self.client
                .command(
                    Method::POST,
                    &self.path(&format!("/element/{}/clear", element)),
                    Some(json!({})),
                )
                .await?;
            self.client
                .command(
                    Method::POST,
                    &self.path(&format!("/element/{}/value", element)),
                    Some(json!({ "text": value })),
                )
                .await?;
            Ok(())
        })
    }

    fn text_of<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let element = self.find(selector).await?;
            let value = self
                .client
                .command(
                    Method::GET,
                    &self.path(&format!("/element/{}/text", element)),
                    None,
                )
                .await?;
            Ok(match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            })
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(store) = &self.cookies {
                if let Err(e) = self.save_cookies(store.as_ref()).await {
                    warn!(session = %self.session_id, error = %e, "Failed to save cookies on close");
                }
            }
            self.client.delete_session(&self.session_id).await?;
            debug!(session = %self.session_id, "WebDriver session closed");
            Ok(())
        })
    }
}
