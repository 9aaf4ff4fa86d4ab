use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WebloomError};

/// Top-level webloom configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// WebSocket endpoint path.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Optional bearer token. When unset, every client is accepted.
    #[serde(default)]
    pub token: Option<String>,
    /// Allowed CORS origins. Empty = permissive.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ws_path: default_ws_path(),
            token: None,
            cors_origins: vec![],
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8765".to_string() }
fn default_ws_path() -> String { "/ws".to_string() }

/// What to do with an Action node whose operation type is not supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsupportedOperationPolicy {
    /// Report the node Completed and log a warning.
    #[default]
    Skip,
    /// Report the node Failed and abort the run.
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of browser sessions open at once.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub unsupported_operations: UnsupportedOperationPolicy,
    /// Capacity of the run event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            unsupported_operations: UnsupportedOperationPolicy::default(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_max_sessions() -> usize { 5 }
fn default_event_buffer() -> usize { 256 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// W3C WebDriver endpoint (geckodriver, chromedriver, selenium).
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    /// Browser name sent in the session capabilities.
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Load stored cookies on navigation and save them when a page closes.
    #[serde(default = "default_auto_cookies")]
    pub auto_cookies: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            browser: default_browser(),
            headless: default_headless(),
            request_timeout_secs: default_request_timeout(),
            auto_cookies: default_auto_cookies(),
        }
    }
}

fn default_webdriver_url() -> String { "http://localhost:4444".to_string() }
fn default_browser() -> String { "firefox".to_string() }
fn default_headless() -> bool { true }
fn default_request_timeout() -> u64 { 30 }
fn default_auto_cookies() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            database: default_database(),
        }
    }
}

fn default_workspace() -> String { "~/.webloom".to_string() }
fn default_database() -> String { "webloom.db".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run cron-triggered tasks while serving.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// How often the task list is re-read for new or changed schedules.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

fn default_scheduler_enabled() -> bool { true }
fn default_refresh_secs() -> u64 { 60 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WebloomError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| WebloomError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.max_sessions == 0 {
            return Err(WebloomError::Config(
                "engine.max_sessions must be at least 1".into(),
            ));
        }
        if !self.gateway.ws_path.starts_with('/') {
            return Err(WebloomError::Config(format!(
                "gateway.ws_path must start with '/': {}",
                self.gateway.ws_path
            )));
        }
        Ok(())
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        let ws = &self.storage.workspace;
        if let Some(rest) = ws.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(ws)
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.workspace_dir().join(&self.storage.database)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEBLOOM_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEBLOOM_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEBLOOM_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEBLOOM_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEBLOOM_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.bind, "127.0.0.1:8765");
        assert_eq!(config.gateway.ws_path, "/ws");
        assert_eq!(config.engine.max_sessions, 5);
        assert_eq!(
            config.engine.unsupported_operations,
            UnsupportedOperationPolicy::Skip
        );
        assert_eq!(config.browser.browser, "firefox");
        assert!(config.browser.auto_cookies);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_unsupported_policy_parses() {
        let config: AppConfig = toml::from_str(
            r#"
[engine]
unsupported_operations = "fail"
max_sessions = 2
"#,
        )
        .unwrap();
        assert_eq!(
            config.engine.unsupported_operations,
            UnsupportedOperationPolicy::Fail
        );
        assert_eq!(config.engine.max_sessions, 2);
    }

    #[test]
    fn test_zero_sessions_rejected() {
        let config: AppConfig = toml::from_str("[engine]\nmax_sessions = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(WebloomError::Config(_))));
    }

    #[test]
    fn test_database_path_joins_workspace() {
        let mut config = AppConfig::default();
        config.storage.workspace = "/tmp/webloom-test".into();
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/webloom-test/webloom.db")
        );
    }
}
