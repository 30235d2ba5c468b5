//! Common test utilities for E2E tests
//!
//! Serves an in-memory imitation of the hosting service API through axum
//! on an ephemeral port and builds a full `AppState` against it.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use omgsync::{
    AppState,
    auth::{AddressGrant, Profile},
    config,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TOKEN: &str = "test-token";

/// One request as the fake API saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

/// Remote data held by the fake API
#[derive(Default)]
pub struct FakeData {
    pub statuses: Vec<Value>,
    pub purls: Vec<(String, Value)>,
    pub pastes: Vec<(String, Value)>,
    pub pics: Vec<(String, Value)>,
    pub entries: Vec<(String, Value)>,
    pub now: Vec<(String, Value)>,
    pub web: Vec<(String, Value)>,
    pub fail_pic_annotation: bool,
    pub requests: Vec<RecordedRequest>,
    next_id: u64,
    clock: i64,
}

impl FakeData {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    /// Strictly increasing unix time
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        1_700_000_000 + self.clock
    }

    fn record(&mut self, method: &'static str, path: String, body: Option<Value>) {
        self.requests.push(RecordedRequest { method, path, body });
    }
}

fn owned_by<'a>(items: &'a [(String, Value)], address: &'a str) -> impl Iterator<Item = &'a Value> {
    items
        .iter()
        .filter(move |(owner, _)| owner == address)
        .map(|(_, item)| item)
}

/// In-memory hosting service API
#[derive(Default)]
pub struct FakeApi {
    pub data: Mutex<FakeData>,
}

impl FakeApi {
    pub fn with<T>(&self, f: impl FnOnce(&mut FakeData) -> T) -> T {
        f(&mut self.data.lock().unwrap())
    }

    pub fn add_status(&self, author: &str, content: &str) -> String {
        self.with(|data| {
            let id = data.next_id("status");
            let created = data.tick();
            data.statuses.push(json!({
                "id": id,
                "address": author,
                "created": created.to_string(),
                "emoji": "💬",
                "content": content,
            }));
            id
        })
    }

    pub fn add_purl(&self, address: &str, name: &str, url: &str) {
        self.with(|data| {
            data.purls.push((
                address.to_string(),
                json!({ "name": name, "url": url, "counter": 0, "listed": 1 }),
            ));
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.with(|data| data.requests.clone())
    }
}

type Api = State<Arc<FakeApi>>;

fn envelope(status: StatusCode, response: Value) -> Response {
    (
        status,
        Json(json!({
            "request": { "status_code": status.as_u16(), "success": status.is_success() },
            "response": response,
        })),
    )
        .into_response()
}

fn ok(response: Value) -> Response {
    envelope(StatusCode::OK, response)
}

fn fail(status: StatusCode, message: &str) -> Response {
    envelope(status, json!({ "message": message }))
}

fn check_auth(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {TOKEN}");
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(fail(StatusCode::UNAUTHORIZED, "Bad token")),
    }
}

macro_rules! authorized {
    ($headers:expr) => {
        if let Err(response) = check_auth(&$headers) {
            return response;
        }
    };
}

// =============================================================================
// Statuslog
// =============================================================================

async fn latest_statuses(State(api): Api, headers: HeaderMap) -> Response {
    authorized!(headers);
    let statuses = api.with(|data| {
        let mut statuses = data.statuses.clone();
        statuses.reverse();
        statuses
    });
    ok(json!({ "statuses": statuses }))
}

async fn address_statuses(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
) -> Response {
    authorized!(headers);
    let statuses: Vec<Value> = api.with(|data| {
        data.statuses
            .iter()
            .filter(|s| s["address"] == address.as_str())
            .cloned()
            .collect()
    });
    ok(json!({ "statuses": statuses }))
}

async fn create_status(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    let status = api.with(|data| {
        data.record("POST", format!("/address/{address}/statuses"), Some(body.clone()));
        let id = data.next_id("status");
        let created = data.tick();
        let status = json!({
            "id": id,
            "address": address,
            "created": created,
            "emoji": body.get("emoji").cloned().unwrap_or(Value::Null),
            "content": body["content"],
        });
        data.statuses.push(status.clone());
        status
    });
    ok(json!({ "status": status }))
}

// =============================================================================
// PURLs
// =============================================================================

async fn list_purls(State(api): Api, headers: HeaderMap, Path(address): Path<String>) -> Response {
    authorized!(headers);
    let purls: Vec<Value> = api.with(|data| owned_by(&data.purls, &address).cloned().collect());
    ok(json!({ "purls": purls }))
}

async fn create_purl(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    let name = body["name"].as_str().unwrap_or_default().to_string();
    api.with(|data| {
        data.record("POST", format!("/address/{address}/purl"), Some(body.clone()));
        data.purls.retain(|(owner, p)| !(owner == &address && p["name"] == name.as_str()));
        data.purls.push((
            address.clone(),
            json!({ "name": name, "url": body["url"], "counter": 0, "listed": body["listed"] }),
        ));
    });
    ok(json!({ "message": "PURL created" }))
}

async fn get_purl(
    State(api): Api,
    headers: HeaderMap,
    Path((address, name)): Path<(String, String)>,
) -> Response {
    authorized!(headers);
    let purl = api.with(|data| {
        owned_by(&data.purls, &address)
            .find(|p| p["name"] == name.as_str())
            .cloned()
    });
    match purl {
        Some(purl) => ok(json!({ "purl": purl })),
        None => fail(StatusCode::NOT_FOUND, "No such PURL"),
    }
}

async fn delete_purl(
    State(api): Api,
    headers: HeaderMap,
    Path((address, name)): Path<(String, String)>,
) -> Response {
    authorized!(headers);
    api.with(|data| {
        data.record("DELETE", format!("/address/{address}/purl/{name}"), None);
        data.purls.retain(|(owner, p)| !(owner == &address && p["name"] == name.as_str()));
    });
    ok(json!({ "message": "PURL deleted" }))
}

// =============================================================================
// Pastebin
// =============================================================================

async fn list_pastes(State(api): Api, headers: HeaderMap, Path(address): Path<String>) -> Response {
    authorized!(headers);
    let pastes: Vec<Value> = api.with(|data| owned_by(&data.pastes, &address).cloned().collect());
    ok(json!({ "pastebin": pastes }))
}

async fn write_paste(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    let title = body["title"].as_str().unwrap_or_default().to_string();
    api.with(|data| {
        data.record("POST", format!("/address/{address}/pastebin"), Some(body.clone()));
        let modified = data.tick();
        data.pastes.retain(|(owner, p)| !(owner == &address && p["title"] == title.as_str()));
        data.pastes.push((
            address.clone(),
            json!({
                "title": title,
                "content": body["content"],
                "modified_on": modified,
                "listed": body["listed"],
            }),
        ));
    });
    ok(json!({ "message": "Paste saved", "title": title }))
}

async fn get_paste(
    State(api): Api,
    headers: HeaderMap,
    Path((address, title)): Path<(String, String)>,
) -> Response {
    authorized!(headers);
    let paste = api.with(|data| {
        owned_by(&data.pastes, &address)
            .find(|p| p["title"] == title.as_str())
            .cloned()
    });
    match paste {
        Some(paste) => ok(json!({ "paste": paste })),
        None => fail(StatusCode::NOT_FOUND, "No such paste"),
    }
}

async fn delete_paste(
    State(api): Api,
    headers: HeaderMap,
    Path((address, title)): Path<(String, String)>,
) -> Response {
    authorized!(headers);
    api.with(|data| {
        data.record("DELETE", format!("/address/{address}/pastebin/{title}"), None);
        data.pastes.retain(|(owner, p)| !(owner == &address && p["title"] == title.as_str()));
    });
    ok(json!({ "message": "Paste deleted" }))
}

// =============================================================================
// Pics
// =============================================================================

async fn list_pics(State(api): Api, headers: HeaderMap, Path(address): Path<String>) -> Response {
    authorized!(headers);
    let pics: Vec<Value> = api.with(|data| owned_by(&data.pics, &address).cloned().collect());
    ok(json!({ "pics": pics }))
}

async fn upload_pic(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    let (id, url) = api.with(|data| {
        data.record("POST", format!("/address/{address}/pics/upload"), Some(body.clone()));
        let id = data.next_id("pic");
        let created = data.tick();
        let url = format!("https://cdn.example.com/{address}/{id}.png");
        data.pics.push((
            address.clone(),
            json!({ "id": id, "url": url, "created": created, "size": 3, "mime": "image/png" }),
        ));
        (id, url)
    });
    ok(json!({ "message": "Uploaded", "id": id, "url": url }))
}

async fn annotate_pic(
    State(api): Api,
    headers: HeaderMap,
    Path((address, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    let result = api.with(|data| {
        data.record("PUT", format!("/address/{address}/pics/{id}"), Some(body.clone()));
        if data.fail_pic_annotation {
            return Err(fail(StatusCode::INTERNAL_SERVER_ERROR, "Annotation failed"));
        }
        let Some((_, pic)) = data
            .pics
            .iter_mut()
            .find(|(owner, p)| owner == &address && p["id"] == id.as_str())
        else {
            return Err(fail(StatusCode::NOT_FOUND, "No such pic"));
        };
        pic["description"] = body.get("description").cloned().unwrap_or(Value::Null);
        pic["tags"] = body.get("tags").cloned().unwrap_or_else(|| json!([]));
        pic["hidden"] = body.get("hidden").cloned().unwrap_or(json!(false));
        Ok(pic.clone())
    });
    match result {
        Ok(pic) => ok(json!({ "pic": pic })),
        Err(response) => response,
    }
}

async fn delete_pic(
    State(api): Api,
    headers: HeaderMap,
    Path((address, id)): Path<(String, String)>,
) -> Response {
    authorized!(headers);
    api.with(|data| {
        data.record("DELETE", format!("/address/{address}/pics/{id}"), None);
        data.pics.retain(|(owner, p)| !(owner == &address && p["id"] == id.as_str()));
    });
    ok(json!({ "message": "Deleted" }))
}

// =============================================================================
// Weblog
// =============================================================================

async fn list_entries(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
) -> Response {
    authorized!(headers);
    let entries: Vec<Value> = api.with(|data| owned_by(&data.entries, &address).cloned().collect());
    ok(json!({ "entries": entries }))
}

async fn create_entry(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    body: String,
) -> Response {
    authorized!(headers);
    let entry = api.with(|data| {
        data.record(
            "POST",
            format!("/address/{address}/weblog/entry"),
            Some(Value::String(body.clone())),
        );
        let id = data.next_id("entry");
        let date = data.tick();
        let title = body.lines().next().unwrap_or_default().trim_start_matches("# ").to_string();
        let entry = json!({
            "entry": id,
            "title": title,
            "location": format!("/{id}"),
            "status": "live",
            "date": date,
            "body": body,
        });
        data.entries.push((address.clone(), entry.clone()));
        entry
    });
    ok(json!({ "entry": entry }))
}

async fn delete_entry(
    State(api): Api,
    headers: HeaderMap,
    Path((address, id)): Path<(String, String)>,
) -> Response {
    authorized!(headers);
    api.with(|data| {
        data.entries.retain(|(owner, e)| !(owner == &address && e["entry"] == id.as_str()));
    });
    ok(json!({ "message": "Entry deleted" }))
}

// =============================================================================
// Now and web pages
// =============================================================================

async fn get_now(State(api): Api, headers: HeaderMap, Path(address): Path<String>) -> Response {
    authorized!(headers);
    let now = api.with(|data| owned_by(&data.now, &address).last().cloned());
    match now {
        Some(now) => ok(json!({ "now": now })),
        None => fail(StatusCode::NOT_FOUND, "No now page"),
    }
}

async fn update_now(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    api.with(|data| {
        let updated = data.tick();
        data.now.retain(|(owner, _)| owner != &address);
        data.now.push((
            address.clone(),
            json!({ "content": body["content"], "updated": updated, "listed": body["listed"] }),
        ));
    });
    ok(json!({ "message": "Now page updated" }))
}

async fn get_web(State(api): Api, headers: HeaderMap, Path(address): Path<String>) -> Response {
    authorized!(headers);
    let web = api.with(|data| owned_by(&data.web, &address).last().cloned());
    match web {
        Some(web) => ok(web),
        None => fail(StatusCode::NOT_FOUND, "No web page"),
    }
}

async fn update_web(
    State(api): Api,
    headers: HeaderMap,
    Path(address): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    authorized!(headers);
    api.with(|data| {
        let modified = data.tick();
        data.web.push((
            address.clone(),
            json!({
                "message": "Web page",
                "content": body["content"],
                "modified": modified,
                "published": body["publish"],
            }),
        ));
    });
    ok(json!({ "message": "Web page updated" }))
}

fn router(api: Arc<FakeApi>) -> Router {
    Router::new()
        .route("/statuslog/latest", get(latest_statuses))
        .route("/address/:address/statuses", get(address_statuses).post(create_status))
        .route("/address/:address/purls", get(list_purls))
        .route("/address/:address/purl", post(create_purl))
        .route("/address/:address/purl/:name", get(get_purl).delete(delete_purl))
        .route("/address/:address/pastebin", get(list_pastes).post(write_paste))
        .route("/address/:address/pastebin/:title", get(get_paste).delete(delete_paste))
        .route("/address/:address/pics", get(list_pics))
        .route("/address/:address/pics/upload", post(upload_pic))
        .route("/address/:address/pics/:id", put(annotate_pic).delete(delete_pic))
        .route("/address/:address/weblog/entries", get(list_entries))
        .route("/address/:address/weblog/entry", post(create_entry))
        .route("/address/:address/weblog/delete/:id", axum::routing::delete(delete_entry))
        .route("/address/:address/now", get(get_now).post(update_now))
        .route("/address/:address/web", get(get_web).post(update_web))
        .with_state(api)
}

/// Full application wired against the fake API
pub struct TestHarness {
    pub api: Arc<FakeApi>,
    pub state: AppState,
    pub base_url: String,
    pub _temp_dir: TempDir,
}

impl TestHarness {
    /// Harness with the in-memory cache backend
    pub async fn new() -> Self {
        Self::with_backend(config::CacheBackend::Memory).await
    }

    pub async fn with_backend(backend: config::CacheBackend) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let api = Arc::new(FakeApi::default());

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let app = router(api.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = config::AppConfig {
            api: config::ApiConfig {
                base_url: base_url.clone(),
                timeout_seconds: 10,
                user_agent: "omgsync-test".to_string(),
            },
            sync: config::SyncConfig {
                poll_interval_seconds: 1,
                updates_interval_seconds: 1,
            },
            cache: config::CacheConfig {
                backend,
                path: Some(temp_dir.path().join("cache.db")),
            },
            auth: config::AuthConfig::default(),
            logging: config::LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        };

        let state = AppState::new(config).await.unwrap();

        Self {
            api,
            state,
            base_url,
            _temp_dir: temp_dir,
        }
    }

    /// Sign in as alice (also granted alice-blog) and select alice
    pub fn sign_in(&self) {
        self.sign_in_with_token(TOKEN);
        self.state.session.select_address("alice").unwrap();
    }

    pub fn sign_in_with_token(&self, token: &str) {
        self.state
            .session
            .sign_in(
                Profile {
                    name: "Alice".to_string(),
                    email: "alice@example.com".to_string(),
                },
                vec![AddressGrant::new("alice"), AddressGrant::new("alice-blog")],
                token,
            )
            .unwrap();
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
