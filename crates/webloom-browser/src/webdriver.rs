use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use webloom_core::config::BrowserConfig;
use webloom_core::cookie::CookieData;
use webloom_core::error::{Result, WebloomError};

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Thin HTTP client for one WebDriver endpoint.
#[derive(Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    base: String,
}

impl WebDriverClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("webloom/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WebloomError::Session(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send one command and unwrap the `value` member of the reply.
    pub async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        debug!(method = %method, url = %url, "WebDriver command");

        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| WebloomError::Session(format!("WebDriver request failed: {}", e)))?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(WebloomError::Session(driver_error(status.as_u16(), &body)));
        }
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Start a new browser session; returns its id.
    pub async fn new_session(&self, config: &BrowserConfig) -> Result<String> {
        let value = self
            .command(Method::POST, "/session", Some(capabilities(config)))
            .await?;
        value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WebloomError::Session("driver returned no sessionId".into()))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.command(Method::DELETE, &format!("/session/{}", session_id), None)
            .await
            .map(|_| ())
    }

    pub async fn status(&self) -> Result<Value> {
        self.command(Method::GET, "/status", None).await
    }
}

/// New-session payload for the configured browser.
pub fn capabilities(config: &BrowserConfig) -> Value {
    let browser = config.browser.to_ascii_lowercase();
    let mut always = json!({ "browserName": browser });
    if config.headless {
        match browser.as_str() {
            "firefox" => {
                always["moz:firefoxOptions"] = json!({ "args": ["-headless"] });
            }
            "chrome" | "chromium" => {
                always["goog:chromeOptions"] = json!({ "args": ["--headless=new"] });
            }
            "msedge" | "edge" => {
                always["ms:edgeOptions"] = json!({ "args": ["--headless=new"] });
            }
            _ => {}
        }
    }
    json!({ "capabilities": { "alwaysMatch": always } })
}

/// Pull the element id out of a find-element reply.
pub fn element_id(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Human-readable message from a WebDriver error reply.
pub fn driver_error(status: u16, body: &Value) -> String {
    let value = body.get("value").unwrap_or(body);
    let error = value.get("error").and_then(Value::as_str);
    let message = value.get("message").and_then(Value::as_str);
    match (error, message) {
        (Some(e), Some(m)) => format!("{}: {}", e, m),
        (Some(e), None) => e.to_string(),
        (None, Some(m)) => m.to_string(),
        (None, None) => format!("HTTP {}", status),
    }
}

/// WebDriver cookie JSON to the stored form.
pub fn cookie_from_driver(value: &Value, fallback_domain: &str) -> Option<CookieData> {
    Some(CookieData {
        name: value.get("name")?.as_str()?.to_string(),
        value: value.get("value")?.as_str()?.to_string(),
        domain: value
            .get("domain")
            .and_then(Value::as_str)
            .unwrap_or(fallback_domain)
            .to_string(),
        path: value
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string(),
        expires: value.get("expiry").and_then(Value::as_f64),
        http_only: value.get("httpOnly").and_then(Value::as_bool).unwrap_or(false),
        secure: value.get("secure").and_then(Value::as_bool).unwrap_or(false),
        same_site: value
            .get("sameSite")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Stored cookie to the body of an add-cookie command.
pub fn cookie_to_driver(cookie: &CookieData) -> Value {
    let mut c = json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "httpOnly": cookie.http_only,
        "secure": cookie.secure,
    });
    if let Some(expires) = cookie.expires {
        // Drivers require an integer expiry in seconds.
        c["expiry"] = json!(expires as i64);
    }
    if let Some(same_site) = &cookie.same_site {
        c["sameSite"] = json!(same_site);
    }
    json!({ "cookie": c })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firefox_headless_capabilities() {
        let caps = capabilities(&BrowserConfig::default());
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "firefox");
        assert_eq!(always["moz:firefoxOptions"]["args"][0], "-headless");
    }

    #[test]
    fn test_chrome_headed_capabilities() {
        let config = BrowserConfig {
            browser: "Chrome".into(),
            headless: false,
            ..Default::default()
        };
        let caps = capabilities(&config);
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "chrome");
        assert!(always.get("goog:chromeOptions").is_none());
    }

    #[test]
    fn test_element_id_variants() {
        assert_eq!(
            element_id(&json!({"element-6066-11e4-a52e-4f735466cecf": "abc"})).as_deref(),
            Some("abc")
        );
        assert_eq!(element_id(&json!({"ELEMENT": "legacy"})).as_deref(), Some("legacy"));
        assert!(element_id(&json!({})).is_none());
    }

    #[test]
    fn test_driver_error_message() {
        let body = json!({"value": {"error": "no such element", "message": "Unable to locate #x"}});
        assert_eq!(driver_error(404, &body), "no such element: Unable to locate #x");
        assert_eq!(driver_error(500, &Value::Null), "HTTP 500");
    }

    #[test]
    fn test_cookie_conversion() {
        let driver = json!({
            "name": "sid", "value": "42", "domain": ".example.com",
            "path": "/", "expiry": 1900000000, "httpOnly": true, "secure": true, "sameSite": "Lax"
        });
        let cookie = cookie_from_driver(&driver, "example.com").unwrap();
        assert_eq!(cookie.domain, ".example.com");
        assert_eq!(cookie.expires, Some(1_900_000_000.0));
        assert!(cookie.http_only);

        let back = cookie_to_driver(&cookie);
        assert_eq!(back["cookie"]["expiry"], 1_900_000_000i64);
        assert_eq!(back["cookie"]["sameSite"], "Lax");
    }

    #[test]
    fn test_cookie_without_name_is_skipped() {
        assert!(cookie_from_driver(&json!({"value": "x"}), "example.com").is_none());
    }
}
