use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tgdash::Error;
use tgdash::modules::catalog::LinkCatalog;
use tgdash::modules::config::{HostContext, Protocol};
use tgdash::modules::groups::GroupConfigClient;
use tgdash::modules::moderation::ModerationDesk;
use tgdash::modules::notify::Answer;
use tgdash::modules::poller::{BotIndicator, Poller};
use tgdash::modules::session::Session;
use tgdash::modules::transport::{ApiClient, HttpTransport};
use tgdash::modules::types::Resource;
use url::Url;

#[derive(Default)]
struct Backend {
    links: Vec<Value>,
    pending: Vec<Value>,
    balance: i64,
    feedback_down: bool,
    filters: Vec<String>,
}

type Shared = Arc<Mutex<Backend>>;

async fn status() -> Json<Value> {
    Json(json!({"bot_status": "online", "uptime": "3d 4h", "cpu_percent": 21.5, "memory_percent": 40.0}))
}

async fn users() -> Json<Value> {
    Json(json!({"total_users": 1500, "active_users": 900, "premium_users": 12}))
}

async fn media() -> Json<Value> {
    Json(json!({"total_media": 320}))
}

async fn groups(State(state): State<Shared>) -> Json<Value> {
    let total = state.lock().unwrap().links.len();
    Json(json!({"total_groups": total}))
}

async fn feedback(State(state): State<Shared>) -> impl IntoResponse {
    if state.lock().unwrap().feedback_down {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "down"})));
    }
    (StatusCode::OK, Json(json!({"total_feedback": 4})))
}

async fn search(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let backend = state.lock().unwrap();
    let q = params.get("q").cloned().unwrap_or_default();
    let limit: usize = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(20);
    let offset: usize = params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let matching: Vec<Value> = backend
        .links
        .iter()
        .filter(|l| l["title"].as_str().unwrap_or("").to_lowercase().contains(&q))
        .cloned()
        .collect();
    let page: Vec<Value> = matching.iter().skip(offset).take(limit).cloned().collect();
    Json(json!({"success": true, "links": page, "total": matching.len()}))
}

async fn report(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut backend = state.lock().unwrap();
    backend.links.retain(|l| l["link"] != body["link"]);
    Json(json!({"success": true, "message": "Reported"}))
}

async fn user_info(Path(id): Path<i64>, State(state): State<Shared>) -> Json<Value> {
    let backend = state.lock().unwrap();
    Json(json!({"is_admin": id == 1, "is_premium": false, "token_balance": backend.balance}))
}

async fn access(State(state): State<Shared>) -> Json<Value> {
    let mut backend = state.lock().unwrap();
    backend.balance -= 10;
    Json(json!({"success": true, "tokens_deducted": 10, "remaining_balance": backend.balance}))
}

async fn pending(Query(params): Query<HashMap<String, String>>, State(state): State<Shared>) -> Json<Value> {
    if params.get("admin_id").map(String::as_str) != Some("1") {
        return Json(json!({"success": false, "error": "Unauthorized"}));
    }
    Json(json!({"success": true, "pending_links": state.lock().unwrap().pending}))
}

async fn approve(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut backend = state.lock().unwrap();
    let Some(idx) = backend.pending.iter().position(|p| p["link"] == body["link"]) else {
        return Json(json!({"success": false, "error": "Not pending"}));
    };
    let submission = backend.pending.remove(idx);
    backend
        .links
        .push(json!({"link": submission["link"], "title": submission["name"]}));
    Json(json!({"success": true}))
}

async fn add_filter(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let trigger = body["trigger"].as_str().unwrap_or_default().to_string();
    state.lock().unwrap().filters.push(trigger);
    Json(json!({"success": true}))
}

async fn remove_filter(
    Path((_group, trigger)): Path<(i64, String)>,
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> Json<Value> {
    if body["admin_id"] != json!(1) {
        return Json(json!({"success": false, "error": "Not an admin"}));
    }
    let mut backend = state.lock().unwrap();
    let before = backend.filters.len();
    backend.filters.retain(|f| *f != trigger);
    Json(json!({"success": backend.filters.len() < before}))
}

async fn spawn_backend(backend: Backend) -> (SocketAddr, Shared) {
    let state: Shared = Arc::new(Mutex::new(backend));
    let app = Router::new()
        .route("/api/status", get(status))
        .route("/api/users", get(users))
        .route("/api/media", get(media))
        .route("/api/groups", get(groups))
        .route("/api/feedback", get(feedback))
        .route("/api/links/search", get(search))
        .route("/api/links/report", post(report))
        .route("/api/links/access", post(access))
        .route("/api/links/pending", get(pending))
        .route("/api/links/approve", post(approve))
        .route("/api/user/:id/info", get(user_info))
        .route("/api/group/:id/filters", post(add_filter))
        .route("/api/group/:id/filters/:trigger", delete(remove_filter))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn api(base: &str, host: HostContext) -> Arc<ApiClient> {
    let transport = HttpTransport::new(Some(Duration::from_secs(5))).unwrap();
    Arc::new(ApiClient::new(transport, Url::parse(base).unwrap(), host))
}

fn local(addr: SocketAddr) -> Arc<ApiClient> {
    api(&format!("http://{addr}"), HostContext::new(Protocol::Http, "127.0.0.1"))
}

fn catalog_links() -> Vec<Value> {
    vec![
        json!({"link": "https://t.me/cryptonews", "title": "Crypto News @cryptonews Channel"}),
        json!({"link": "https://t.me/cryptotalk", "title": "Crypto Talk Group"}),
        json!({"link": "https://t.me/rustlang", "title": "Rust"}),
    ]
}

#[tokio::test]
async fn polls_all_resources_over_http() {
    let (addr, _) = spawn_backend(Backend { links: catalog_links(), ..Backend::default() }).await;
    let mut poller = Poller::new(local(addr), Duration::from_secs(10));

    let report = poller.poll_all(Instant::now()).await.unwrap();
    assert!(report.is_complete());
    let view = poller.view();
    assert_eq!(view.indicator, BotIndicator::Online);
    assert_eq!(view.users.as_ref().unwrap().total_users, 1500);
    assert_eq!(view.total_groups(), Some(3));
    assert_eq!(view.status.as_ref().unwrap().uptime.as_deref(), Some("3d 4h"));
}

#[tokio::test]
async fn non_2xx_resource_is_a_partial_failure() {
    let (addr, _) = spawn_backend(Backend { feedback_down: true, ..Backend::default() }).await;
    let mut poller = Poller::new(local(addr), Duration::from_secs(10));

    let report = poller.poll_all(Instant::now()).await.unwrap();
    assert_eq!(report.failed_resources(), vec![Resource::Feedback]);
    assert!(report.failed[0].1.starts_with("HTTP 503"));
    assert_eq!(poller.view().media.as_ref().unwrap().total_media, 320);
}

#[tokio::test]
async fn unreachable_backend_is_a_total_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let mut poller = Poller::new(local(addr), Duration::from_secs(10));

    let err = poller.poll_all(Instant::now()).await.unwrap_err();
    assert!(matches!(err, Error::TotalFailure { failed: 5, .. }));
    assert_eq!(poller.view().indicator, BotIndicator::Error);
}

#[tokio::test]
async fn search_then_report_shrinks_the_page() {
    let (addr, state) = spawn_backend(Backend { links: catalog_links(), ..Backend::default() }).await;
    let client = local(addr);
    let mut catalog = LinkCatalog::new(client.clone(), Some(7));

    let page = catalog.search("Crypto").await.unwrap();
    assert_eq!(page.state.total, 2);
    assert!(!page.state.pagination_visible());

    let session = Session::load(&client, 7).await;
    let message = catalog
        .report(Some(&session), "https://t.me/cryptotalk", "Crypto Talk Group", &Answer(true))
        .await
        .unwrap();
    assert_eq!(message.as_deref(), Some("Reported"));
    assert_eq!(catalog.page().state.total, 1);
    assert_eq!(state.lock().unwrap().links.len(), 2);

    let reloaded = catalog.reload().await.unwrap();
    assert_eq!(reloaded.state.total, 1);
}

#[tokio::test]
async fn https_failure_falls_back_to_http() {
    let (addr, _) = spawn_backend(Backend { links: catalog_links(), ..Backend::default() }).await;
    let client = api(
        &format!("https://{addr}"),
        HostContext::new(Protocol::Https, "someone.github.io"),
    );
    let mut catalog = LinkCatalog::new(client.clone(), None);

    let page = catalog.show_all().await.unwrap();
    assert_eq!(page.links.len(), 3);
    assert_eq!(client.base_url().scheme(), "http");
}

#[tokio::test]
async fn access_uses_server_balance() {
    let (addr, _) = spawn_backend(Backend { balance: 25, ..Backend::default() }).await;
    let client = local(addr);
    let mut session = Session::load(&client, 7).await;
    assert_eq!(session.token_balance, 25);

    let receipt = session.access_link(&client, "https://t.me/rustlang").await.unwrap();
    assert_eq!(receipt.remaining_balance, 15);
    assert_eq!(session.token_balance, 15);

    session.access_link(&client, "https://t.me/rustlang").await.unwrap();
    let err = session.access_link(&client, "https://t.me/rustlang").await.unwrap_err();
    assert!(matches!(err, Error::InsufficientTokens { balance: 5, .. }));
}

#[tokio::test]
async fn approving_a_submission_publishes_it() {
    let (addr, state) = spawn_backend(Backend {
        pending: vec![json!({"link": "https://t.me/newgroup", "name": "New Group", "description": "", "submitted_by": 9})],
        ..Backend::default()
    })
    .await;
    let client = local(addr);
    let admin = Session::load(&client, 1).await;
    assert!(admin.is_admin);

    let mut desk = ModerationDesk::new(client.clone());
    assert_eq!(desk.load_pending(&admin).await.unwrap().len(), 1);
    let outcome = desk
        .approve(&admin, "https://t.me/newgroup", &Answer(true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.counter_delta, 1);
    assert!(desk.pending().is_empty());
    assert!(state.lock().unwrap().pending.is_empty());

    let mut catalog = LinkCatalog::new(client, Some(1));
    assert_eq!(catalog.search("new").await.unwrap().links.len(), 1);
}

#[tokio::test]
async fn filter_with_spaces_round_trips_through_delete() {
    let (addr, state) = spawn_backend(Backend::default()).await;
    let groups = GroupConfigClient::new(local(addr), 1);

    groups.add_filter(-1001, "good morning", "Morning!").await.unwrap();
    assert_eq!(state.lock().unwrap().filters, vec!["good morning".to_string()]);

    assert!(groups.remove_filter(-1001, "good morning", &Answer(true)).await.unwrap());
    assert!(state.lock().unwrap().filters.is_empty());

    let stranger = GroupConfigClient::new(local(addr), 2);
    let err = stranger.remove_filter(-1001, "anything", &Answer(true)).await.unwrap_err();
    assert_eq!(err.to_string(), "Not an admin");
}
