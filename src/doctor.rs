use std::net::SocketAddr;
use std::time::Duration;

use webloom_browser::WebDriverClient;
use webloom_core::config::AppConfig;
use webloom_core::records::TaskQuery;
use webloom_core::traits::TaskStore;
use webloom_engine::validate_trigger;
use webloom_store::SqliteStore;

struct CheckResult {
    label: &'static str,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn ok(label: &'static str, detail: impl Into<String>) -> Self {
        Self {
            label,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(label: &'static str, detail: impl Into<String>) -> Self {
        Self {
            label,
            ok: false,
            detail: detail.into(),
        }
    }
}

pub async fn run_doctor(config: &AppConfig) {
    let checks = vec![
        check_workspace(config),
        check_gateway(config),
        check_webdriver(config).await,
        check_tasks(config).await,
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;
    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_workspace(config: &AppConfig) -> CheckResult {
    let ws = config.workspace_dir();
    if !ws.is_dir() {
        return CheckResult::fail("Workspace", format!("{} (does not exist)", ws.display()));
    }
    let marker = ws.join(".doctor_test");
    match std::fs::write(&marker, "test") {
        Ok(_) => {
            std::fs::remove_file(&marker).ok();
            CheckResult::ok("Workspace", ws.display().to_string())
        }
        Err(e) => CheckResult::fail(
            "Workspace",
            format!("{} (not writable: {})", ws.display(), e),
        ),
    }
}

fn check_gateway(config: &AppConfig) -> CheckResult {
    let gw = &config.gateway;
    match gw.bind.parse::<SocketAddr>() {
        Ok(addr) => {
            let auth = if gw.token.is_some() { "token auth" } else { "no auth" };
            CheckResult::ok(
                "Gateway",
                format!("ws://{}{} ({})", addr, gw.ws_path, auth),
            )
        }
        Err(e) => CheckResult::fail("Gateway", format!("invalid bind '{}': {}", gw.bind, e)),
    }
}

async fn check_webdriver(config: &AppConfig) -> CheckResult {
    let url = &config.browser.webdriver_url;
    let client = match WebDriverClient::new(url, Duration::from_secs(5)) {
        Ok(c) => c,
        Err(e) => return CheckResult::fail("WebDriver", e.to_string()),
    };
    match client.status().await {
        Ok(status) => {
            let ready = status.get("ready").and_then(|v| v.as_bool()).unwrap_or(false);
            let message = status
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if ready {
                CheckResult::ok("WebDriver", format!("{} ready ({})", url, config.browser.browser))
            } else {
                CheckResult::fail("WebDriver", format!("{} not ready: {}", url, message))
            }
        }
        Err(e) => CheckResult::fail("WebDriver", format!("{} unreachable: {}", url, e)),
    }
}

async fn check_tasks(config: &AppConfig) -> CheckResult {
    let db_path = config.database_path();
    if !db_path.exists() {
        return CheckResult::ok("Tasks", "No database yet");
    }
    let store = match SqliteStore::open(&db_path) {
        Ok(s) => s,
        Err(e) => return CheckResult::fail("Tasks", format!("{}: {}", db_path.display(), e)),
    };
    let tasks = match store
        .list_tasks(TaskQuery {
            limit: usize::MAX,
            ..Default::default()
        })
        .await
    {
        Ok(t) => t,
        Err(e) => return CheckResult::fail("Tasks", e.to_string()),
    };

    let bad: Vec<String> = tasks
        .iter()
        .filter(|t| validate_trigger(&t.trigger).is_err())
        .map(|t| t.id.clone())
        .collect();
    if bad.is_empty() {
        CheckResult::ok("Tasks", format!("{} tasks in {}", tasks.len(), db_path.display()))
    } else {
        CheckResult::fail("Tasks", format!("invalid triggers: {}", bad.join(", ")))
    }
}
