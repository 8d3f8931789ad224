use super::*;
use std::{collections::HashMap, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::{Author, Collection, ContentKind, UserId};
use tokio::{net::TcpListener, sync::Mutex};

use crate::test_support::{item, item_json, page_json, FakeTransport, Method, RecordingNotifier};

#[derive(Clone, Default)]
struct Backend {
    log: Arc<Mutex<Vec<String>>>,
    send_code_attempts: Arc<Mutex<u32>>,
}

impl Backend {
    async fn record(&self, line: String) {
        self.log.lock().await.push(line);
    }

    async fn lines(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }
}

async fn list_comments(
    State(backend): State<Backend>,
    Path(post_id): Path<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let relative_id = params.get("relativeId").cloned();
    backend
        .record(format!(
            "GET posts/{post_id}/comments relativeId={} up={} limit={} sort={}",
            relative_id.as_deref().unwrap_or("-"),
            params.get("up").map_or("-", String::as_str),
            params.get("limit").map_or("-", String::as_str),
            params.get("sort").map_or("-", String::as_str),
        ))
        .await;
    match relative_id {
        None => Json(page_json("comment", &[3, 2], true)),
        Some(_) => Json(page_json("comment", &[1], false)),
    }
}

async fn create_comment(
    State(backend): State<Backend>,
    Path(post_id): Path<i64>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend
        .record(format!("POST posts/{post_id}/comments {body}"))
        .await;
    let mut created = item_json("comment", 42);
    created["parentId"] = json!(post_id);
    created["body"] = body["body"].clone();
    (StatusCode::CREATED, Json(created))
}

async fn like_comment(
    State(backend): State<Backend>,
    Path(comment_id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    backend
        .record(format!("PATCH comments/{comment_id}/like {body}"))
        .await;
    Json(json!({ "ok": true }))
}

async fn delete_comment(
    State(backend): State<Backend>,
    Path(comment_id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    backend.record(format!("DELETE comments/{comment_id}")).await;
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "code": "internal", "message": "database unavailable" })),
    )
}

async fn send_code(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    backend.record(format!("POST auth/send-code {body}")).await;
    let mut attempts = backend.send_code_attempts.lock().await;
    *attempts += 1;
    if *attempts == 1 {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "code": "bot_not_linked", "message": "open the bot first" })),
        )
            .into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn spawn_backend() -> anyhow::Result<(String, Backend)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let backend = Backend::default();
    let app = Router::new()
        .route(
            "/api/posts/:post_id/comments",
            get(list_comments).post(create_comment),
        )
        .route("/api/comments/:comment_id/like", patch(like_comment))
        .route("/api/comments/:comment_id", delete(delete_comment))
        .route("/api/auth/send-code", post(send_code))
        .with_state(backend.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}/api"), backend))
}

fn alice() -> Arc<StaticIdentity> {
    Arc::new(StaticIdentity(Some(Author {
        user_id: UserId(7),
        name: "alice".to_string(),
        avatar_url: None,
    })))
}

fn comments_of(post_id: i64) -> ListOwner {
    ListOwner::under(Collection::Comments, post_id)
}

async fn wait_for_line(backend: &Backend, prefix: &str) -> Option<String> {
    for _ in 0..80 {
        if let Some(line) = backend
            .lines()
            .await
            .into_iter()
            .find(|line| line.starts_with(prefix))
        {
            return Some(line);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    None
}

#[tokio::test]
async fn http_client_runs_every_flow_against_a_backend() {
    let (base_url, backend) = spawn_backend().await.expect("spawn backend");
    let settings = SyncSettings {
        api_base_url: base_url.clone(),
        toggle_debounce_ms: 50,
        send_code_retry_delay_ms: 10,
        ..SyncSettings::default()
    };
    let notifier = Arc::new(RecordingNotifier::default());
    let client = SyncClient::new(
        settings,
        Arc::new(HttpTransport::new(&base_url).expect("transport")),
        alice(),
        notifier.clone(),
    );
    let owner = comments_of(1);

    assert_eq!(
        client.fetch_page(&owner, Direction::Down).await.expect("join"),
        Some(FetchOutcome::Loaded { received: 2 })
    );
    assert_eq!(
        client.fetch_page(&owner, Direction::Down).await.expect("join"),
        Some(FetchOutcome::Loaded { received: 1 })
    );
    assert_eq!(
        client.fetch_page(&owner, Direction::Down).await.expect("join"),
        Some(FetchOutcome::Exhausted)
    );
    let list = client.list(&owner);
    assert_eq!(
        list.ids(),
        vec![ItemId::Server(3), ItemId::Server(2), ItemId::Server(1)]
    );
    assert_eq!(
        backend.lines().await[1],
        "GET posts/1/comments relativeId=2 up=false limit=20 sort=feed"
    );

    let draft = DraftBuffer::new("first!");
    client
        .create(&draft, CreateTarget::comment_on(1))
        .expect("create")
        .await
        .expect("settle");
    assert_eq!(list.ids()[0], ItemId::Server(42));
    assert_eq!(list.items()[0].body, "first!");

    client.toggle_like(&ItemId::Server(42)).expect("like");
    let patched = wait_for_line(&backend, "PATCH comments/42/like")
        .await
        .expect("like call");
    assert_eq!(patched, r#"PATCH comments/42/like {"value":true}"#);

    client
        .delete(DeleteTarget::comment(1, 3))
        .expect("delete")
        .await
        .expect("settle");
    assert_eq!(list.position(&ItemId::Server(3)), Some(1));
    assert_eq!(notifier.errors(), 1);

    client.send_login_code("+15550100").await.expect("send code");
    assert_eq!(*backend.send_code_attempts.lock().await, 2);
}

#[tokio::test]
async fn http_transport_decodes_server_error_bodies() {
    let (base_url, _backend) = spawn_backend().await.expect("spawn backend");
    let transport = HttpTransport::new(&base_url).expect("transport");

    let err = transport
        .delete("comments/9")
        .await
        .expect_err("server error");
    match err {
        TransportError::Api { status, error } => {
            assert_eq!(status, 500);
            assert_eq!(error.message, "database unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = transport
        .get("missing", &[])
        .await
        .expect_err("not found");
    assert!(matches!(err, TransportError::Status { status: 404, .. }));
}

fn fake_client(transport: Arc<FakeTransport>) -> (Arc<SyncClient>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let client = SyncClient::new(SyncSettings::default(), transport, alice(), notifier.clone());
    (client, notifier)
}

#[tokio::test(start_paused = true)]
async fn like_on_a_provisional_comment_reaches_its_server_id() {
    let transport = Arc::new(FakeTransport::default());
    transport.respond(Method::Get, "posts/1/comments", page_json("comment", &[5], false));
    let gate = transport.hold(Method::Post, "posts/1/comments");
    let mut created = item_json("comment", 42);
    created["parentId"] = json!(1);
    transport.respond(Method::Post, "posts/1/comments", created);
    transport.respond_always(Method::Patch, "comments/42/like", json!({}));
    let (client, _notifier) = fake_client(transport.clone());
    let owner = comments_of(1);
    client
        .fetch_page(&owner, Direction::Down)
        .await
        .expect("join");

    let task = client
        .create(&DraftBuffer::new("hello"), CreateTarget::comment_on(1))
        .expect("create");
    let provisional = client.list(&owner).ids()[0].clone();
    client.toggle_like(&provisional).expect("like");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.calls_to(Method::Patch, "comments/42/like"), 0);

    gate.notify_one();
    task.await.expect("settle");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(transport.calls_to(Method::Patch, "comments/42/like"), 1);
    let head = &client.list(&owner).items()[0];
    assert_eq!(head.id, ItemId::Server(42));
    assert!(head.user_liked);
    assert!(head.user_liked_static);
    assert_eq!(head.counters.likes_count, 1);
}

#[tokio::test]
async fn sort_switch_loads_only_missing_variants() {
    let transport = Arc::new(FakeTransport::default());
    transport.respond_always(Method::Get, "posts/1/comments", page_json("comment", &[2, 1], false));
    let (client, _notifier) = fake_client(transport.clone());
    let owner = comments_of(1);

    let (switch, load) = client.change_sort_key(&owner, SortKey::New).expect("new");
    assert_eq!(switch, SortSwitch::NeedsFetch);
    assert_eq!(
        load.expect("load task").await.expect("join"),
        Some(FetchOutcome::Loaded { received: 2 })
    );

    let (switch, load) = client.change_sort_key(&owner, SortKey::New).expect("again");
    assert_eq!(switch, SortSwitch::Ready);
    assert!(load.is_none());
    assert_eq!(transport.calls_to(Method::Get, "posts/1/comments"), 1);
    assert_eq!(
        transport
            .last_call(Method::Get, "posts/1/comments")
            .expect("call")
            .query_value("sort"),
        Some("new")
    );

    assert!(matches!(
        client.change_sort_key(&owner, SortKey::Popular),
        Err(SyncError::Validation(_))
    ));
}

#[tokio::test]
async fn fetch_failures_notify_but_validation_stays_quiet() {
    let transport = Arc::new(FakeTransport::default());
    let (client, notifier) = fake_client(transport.clone());

    let orphan = ListOwner::root(Collection::Comments);
    assert_eq!(
        client.fetch_page(&orphan, Direction::Down).await.expect("join"),
        None
    );
    assert_eq!(notifier.errors(), 0);
    assert!(transport.calls().is_empty());

    assert_eq!(
        client
            .fetch_page(&comments_of(1), Direction::Down)
            .await
            .expect("join"),
        None
    );
    assert_eq!(notifier.errors(), 1);
}

#[tokio::test]
async fn subscribers_see_each_applied_mutation() {
    let transport = Arc::new(FakeTransport::default());
    transport.respond(Method::Get, "posts/1/comments", page_json("comment", &[1], false));
    let (client, _notifier) = fake_client(transport);
    let mut changes = client.subscribe();
    let seen = *changes.borrow_and_update();

    client
        .fetch_page(&comments_of(1), Direction::Down)
        .await
        .expect("join");

    assert!(changes.has_changed().expect("sender alive"));
    assert!(*changes.borrow_and_update() > seen);
}

#[tokio::test]
async fn tracked_detail_follows_creates_on_its_lists() {
    let transport = Arc::new(FakeTransport::default());
    let mut created = item_json("comment", 42);
    created["parentId"] = json!(1);
    transport.respond(Method::Post, "posts/1/comments", created);
    let (client, _notifier) = fake_client(transport);
    let mut post = item(ContentKind::Post, 1);
    post.counters.comments_count = 2;
    client.track_detail(post);

    client
        .create(&DraftBuffer::new("hi"), CreateTarget::comment_on(1))
        .expect("create")
        .await
        .expect("settle");

    let detail = client.untrack_detail(&ItemId::Server(1)).expect("tracked");
    assert_eq!(detail.counters.comments_count, 3);
    assert!(client.cache().read(|state| state.detail(&ItemId::Server(1)).is_none()));
}
