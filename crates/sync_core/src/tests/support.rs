//! Scripted transport and fixtures shared by the crate's tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{ContentItem, ContentKind, Counters, ItemId},
    error::{ApiError, ErrorCode},
};
use tokio::sync::Notify;

use crate::{
    error::TransportError,
    notify::{Notice, NoticeKind, Notifier},
    reactive::lock,
    transport::{Query, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RecordedCall {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

type Route = (Method, String);

#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<RecordedCall>>,
    scripted: Mutex<HashMap<Route, VecDeque<Result<Value, TransportError>>>>,
    sticky: Mutex<HashMap<Route, Value>>,
    gates: Mutex<HashMap<Route, Arc<Notify>>>,
}

impl FakeTransport {
    /// Queues one successful response for the route.
    pub fn respond(&self, method: Method, path: &str, value: Value) {
        lock(&self.scripted)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(Ok(value));
    }

    pub fn respond_err(&self, method: Method, path: &str, err: TransportError) {
        lock(&self.scripted)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(Err(err));
    }

    /// Answers every call to the route once the queued responses run out.
    pub fn respond_always(&self, method: Method, path: &str, value: Value) {
        lock(&self.sticky).insert((method, path.to_string()), value);
    }

    /// Calls to the route block until the returned `Notify` is signalled.
    pub fn hold(&self, method: Method, path: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.gates).insert((method, path.to_string()), gate.clone());
        gate
    }

    /// Lifts a hold and lets the blocked calls through.
    pub fn release(&self, method: Method, path: &str) {
        if let Some(gate) = lock(&self.gates).remove(&(method, path.to_string())) {
            gate.notify_waiters();
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }

    pub fn last_call(&self, method: Method, path: &str) -> Option<RecordedCall> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|call| call.method == method && call.path == path)
            .cloned()
    }

    async fn answer(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        lock(&self.calls).push(RecordedCall {
            method,
            path: path.to_string(),
            query,
            body,
        });

        let route = (method, path.to_string());
        let gate = lock(&self.gates).get(&route).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let queued = lock(&self.scripted)
            .get_mut(&route)
            .and_then(VecDeque::pop_front);
        if let Some(result) = queued {
            return result;
        }
        if let Some(value) = lock(&self.sticky).get(&route).cloned() {
            return Ok(value);
        }
        Err(TransportError::Status {
            status: 404,
            body: format!("no scripted response for {method:?} {path}"),
        })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, path: &str, query: &Query<'_>) -> Result<Value, TransportError> {
        let query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.answer(Method::Get, path, query, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.answer(Method::Post, path, Vec::new(), Some(body)).await
    }

    async fn patch(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        self.answer(Method::Patch, path, Vec::new(), Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<Value, TransportError> {
        self.answer(Method::Delete, path, Vec::new(), None).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }

    pub fn errors(&self) -> usize {
        lock(&self.notices)
            .iter()
            .filter(|notice| notice.kind == NoticeKind::Error)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, kind: NoticeKind, message: &str) {
        lock(&self.notices).push(Notice {
            kind,
            message: message.to_string(),
        });
    }
}

pub fn item(kind: ContentKind, id: i64) -> ContentItem {
    ContentItem {
        id: ItemId::Server(id),
        kind,
        parent_id: None,
        author: None,
        body: format!("item {id}"),
        created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
        counters: Counters::default(),
        user_liked: false,
        user_disliked: false,
        user_liked_static: false,
        user_disliked_static: false,
        is_temp: false,
    }
}

pub fn item_json(kind: &str, id: i64) -> Value {
    json!({
        "id": id,
        "kind": kind,
        "body": format!("item {id}"),
        "createdAt": "2024-01-01T00:00:00Z",
    })
}

pub fn page_json(kind: &str, ids: &[i64], has_more: bool) -> Value {
    json!({
        "items": ids.iter().map(|id| item_json(kind, *id)).collect::<Vec<_>>(),
        "hasMore": has_more,
    })
}

pub fn api_error(status: u16, code: ErrorCode) -> TransportError {
    TransportError::Api {
        status,
        error: ApiError::new(code, "scripted failure"),
    }
}

pub fn server_error() -> TransportError {
    TransportError::Status {
        status: 500,
        body: "boom".to_string(),
    }
}
