use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use webloom_core::error::{Result, WebloomError};
use webloom_core::traits::{BrowserPage, SessionProvider};

/// One call made against a scripted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCall {
    Navigate(String),
    Click(String),
    Fill(String, String),
    TextOf(String),
    Close,
}

#[derive(Default)]
struct Script {
    texts: HashMap<String, String>,
    failing_selectors: HashMap<String, String>,
    navigation_error: Option<String>,
    open_error: Option<String>,
    open_delay: Option<Duration>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<PageCall>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Session provider whose pages follow a fixed script and record every call.
/// All pages opened from one provider share a single call log.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Script>,
    shared: Arc<Shared>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("configure the provider before sharing it")
    }

    /// `text_of(selector)` returns `text`.
    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.script_mut()
            .texts
            .insert(selector.to_string(), text.to_string());
        self
    }

    /// Any action on `selector` fails with `message`.
    pub fn fail_on(mut self, selector: &str, message: &str) -> Self {
        self.script_mut()
            .failing_selectors
            .insert(selector.to_string(), message.to_string());
        self
    }

    pub fn fail_navigation(mut self, message: &str) -> Self {
        self.script_mut().navigation_error = Some(message.to_string());
        self
    }

    pub fn fail_open(mut self, message: &str) -> Self {
        self.script_mut().open_error = Some(message.to_string());
        self
    }

    /// Opening a page takes this long. The page counts as opened before the
    /// wait, like a driver that has accepted the session request.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.script_mut().open_delay = Some(delay);
        self
    }

    /// Every page call sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script_mut().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<PageCall> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl SessionProvider for ScriptedProvider {
    fn open_page(&self) -> BoxFuture<'_, Result<Box<dyn BrowserPage>>> {
        Box::pin(async move {
            if let Some(msg) = &self.script.open_error {
                return Err(WebloomError::Session(msg.clone()));
            }
            self.shared.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.script.open_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Box::new(ScriptedPage {
                script: self.script.clone(),
                shared: self.shared.clone(),
            }) as Box<dyn BrowserPage>)
        })
    }
}

pub struct ScriptedPage {
    script: Arc<Script>,
    shared: Arc<Shared>,
}

impl ScriptedPage {
    async fn record(&self, call: PageCall) {
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.calls.lock().unwrap().push(call);
    }

    fn check(&self, selector: &str) -> Result<()> {
        match self.script.failing_selectors.get(selector) {
            Some(msg) => Err(WebloomError::Session(msg.clone())),
            None => Ok(()),
        }
    }
}

impl BrowserPage for ScriptedPage {
    fn navigate<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(PageCall::Navigate(url.to_string())).await;
            match &self.script.navigation_error {
                Some(msg) => Err(WebloomError::Navigation {
                    url: url.to_string(),
                    message: msg.clone(),
                }),
                None => Ok(()),
            }
        })
    }

    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(PageCall::Click(selector.to_string())).await;
            self.check(selector)
        })
    }

    fn fill<'a>(&'a self, selector: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(PageCall::Fill(selector.to_string(), value.to_string()))
                .await;
            self.check(selector)
        })
    }

    fn text_of<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record(PageCall::TextOf(selector.to_string())).await;
            self.check(selector)?;
            Ok(self.script.texts.get(selector).cloned().unwrap_or_default())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.shared.calls.lock().unwrap().push(PageCall::Close);
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
