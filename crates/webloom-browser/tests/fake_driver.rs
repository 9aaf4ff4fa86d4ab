use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use webloom_browser::WebDriverProvider;
use webloom_core::config::BrowserConfig;
use webloom_core::cookie::{CookieData, DomainCookies};
use webloom_core::traits::{CookieStore, SessionProvider};
use webloom_store::SqliteStore;

#[derive(Default)]
struct Driver {
    log: Vec<String>,
    url: String,
    cookies: Vec<Value>,
}

type Shared = Arc<Mutex<Driver>>;

fn record(state: &Shared, entry: String) {
    state.lock().unwrap().log.push(entry);
}

async fn new_session(State(s): State<Shared>) -> Json<Value> {
    record(&s, "new_session".into());
    Json(json!({"value": {"sessionId": "s1", "capabilities": {}}}))
}

async fn navigate(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let url = body["url"].as_str().unwrap_or_default().to_string();
    record(&s, format!("navigate {}", url));
    s.lock().unwrap().url = url;
    Json(json!({"value": null}))
}

async fn current_url(State(s): State<Shared>) -> Json<Value> {
    Json(json!({"value": s.lock().unwrap().url}))
}

async fn find(State(s): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let selector = body["value"].as_str().unwrap_or_default().to_string();
    record(&s, format!("find {}", selector));
    if selector == "#missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"value": {"error": "no such element", "message": "Unable to locate element"}})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"value": {"element-6066-11e4-a52e-4f735466cecf": "e1"}})),
    )
}

async fn element_action(
    State(s): State<Shared>,
    Path((_, element, action)): Path<(String, String, String)>,
) -> Json<Value> {
    record(&s, format!("{} {}", action, element));
    Json(json!({"value": null}))
}

async fn element_text(State(s): State<Shared>) -> Json<Value> {
    record(&s, "text".into());
    Json(json!({"value": "Hello"}))
}

async fn get_cookies(State(s): State<Shared>) -> Json<Value> {
    Json(json!({"value": s.lock().unwrap().cookies}))
}

async fn add_cookie(State(s): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    record(&s, format!("add_cookie {}", body["cookie"]["name"].as_str().unwrap_or("")));
    s.lock().unwrap().cookies.push(body["cookie"].clone());
    Json(json!({"value": null}))
}

async fn refresh(State(s): State<Shared>) -> Json<Value> {
    record(&s, "refresh".into());
    Json(json!({"value": null}))
}

async fn delete_session(State(s): State<Shared>) -> Json<Value> {
    record(&s, "delete_session".into());
    Json(json!({"value": null}))
}

async fn spawn_driver() -> (String, Shared) {
    let state: Shared = Arc::default();
    let app = Router::new()
        .route("/session", post(new_session))
        .route("/session/{id}", delete(delete_session))
        .route("/session/{id}/url", post(navigate).get(current_url))
        .route("/session/{id}/element", post(find))
        .route("/session/{id}/element/{element}/text", get(element_text))
        .route("/session/{id}/element/{element}/{action}", post(element_action))
        .route("/session/{id}/cookie", get(get_cookies).post(add_cookie))
        .route("/session/{id}/refresh", post(refresh))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn config(url: &str) -> BrowserConfig {
    BrowserConfig {
        webdriver_url: url.to_string(),
        request_timeout_secs: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn page_actions_map_to_webdriver_commands() {
    let (url, state) = spawn_driver().await;
    let provider = WebDriverProvider::new(config(&url)).unwrap();

    let page = provider.open_page().await.unwrap();
    page.navigate("https://example.com/").await.unwrap();
    page.click("#btn").await.unwrap();
    page.fill("#q", "rust").await.unwrap();
    assert_eq!(page.text_of(".result").await.unwrap(), "Hello");
    page.close().await.unwrap();

    let log = state.lock().unwrap().log.clone();
    assert_eq!(
        log,
        vec![
            "new_session",
            "navigate https://example.com/",
            "find #btn",
            "click e1",
            "find #q",
            "clear e1",
            "value e1",
            "find .result",
            "text",
            "delete_session",
        ]
    );
}

#[tokio::test]
async fn missing_element_surfaces_driver_message() {
    let (url, _) = spawn_driver().await;
    let provider = WebDriverProvider::new(config(&url)).unwrap();
    let page = provider.open_page().await.unwrap();

    let err = page.click("#missing").await.unwrap_err();
    assert!(err.to_string().contains("no such element"));
}

#[tokio::test]
async fn cookies_restored_on_navigate_and_saved_on_close() {
    let (url, state) = spawn_driver().await;
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store
        .save_cookies(DomainCookies {
            domain: "example.com".into(),
            cookies: vec![CookieData {
                name: "sid".into(),
                value: "abc".into(),
                domain: ".example.com".into(),
                path: "/".into(),
                expires: None,
                http_only: true,
                secure: true,
                same_site: None,
            }],
            saved_at: chrono::Utc::now(),
            url: "https://example.com/".into(),
        })
        .await
        .unwrap();

    let provider = WebDriverProvider::new(config(&url))
        .unwrap()
        .with_cookie_store(store.clone());
    let page = provider.open_page().await.unwrap();
    page.navigate("https://www.example.com/login").await.unwrap();

    {
        let log = state.lock().unwrap().log.clone();
        assert!(log.contains(&"add_cookie sid".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("refresh"));
    }

    state.lock().unwrap().cookies.push(json!({
        "name": "pref", "value": "dark", "domain": "www.example.com", "path": "/"
    }));
    page.close().await.unwrap();

    let saved = store.load_cookies("example.com").await.unwrap().unwrap();
    let names: Vec<&str> = saved.cookies.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["sid", "pref"]);
    assert_eq!(saved.url, "https://www.example.com/login");
}
