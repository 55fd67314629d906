//! Mock HTTP server for the upstream event API and the push endpoint
#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};

/// A `GET /api/events/{id}` as seen by the server
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub id: String,
    pub uid: Option<String>,
    pub app_version: Option<String>,
    pub authorization: Option<String>,
}

/// A `POST /push/{topic}` as seen by the server
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub topic: String,
    pub title: Option<String>,
    pub click: Option<String>,
    pub tags: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Debug)]
struct ApiState {
    responses: Mutex<VecDeque<(StatusCode, Value)>>,
    event_requests: Mutex<Vec<EventRequest>>,
    push_requests: Mutex<Vec<PushRequest>>,
    push_status: Mutex<StatusCode>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

async fn events(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    state.event_requests.lock().push(EventRequest {
        id: id.clone(),
        uid: header(&headers, "x-pm-uid"),
        app_version: header(&headers, "x-pm-appversion"),
        authorization: header(&headers, "authorization"),
    });

    let (status, body) = state.responses.lock().pop_front().unwrap_or_else(|| {
        // Nothing new: the stream stays at the requested event
        let id = if id == "latest" { "head".to_string() } else { id };
        (StatusCode::OK, json!({ "Code": 1000, "EventID": id }))
    });

    (status, Json(body))
}

async fn publish(
    State(state): State<Arc<ApiState>>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    state.push_requests.lock().push(PushRequest {
        topic,
        title: header(&headers, "title"),
        click: header(&headers, "click"),
        tags: header(&headers, "tags"),
        authorization: header(&headers, "authorization"),
        body,
    });

    *state.push_status.lock()
}

/// Serves `/api/events/{id}` and `/push/{topic}` on a random local port
pub struct MockApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
    handle: JoinHandle<()>,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = Arc::new(ApiState {
            responses: Mutex::default(),
            event_requests: Mutex::default(),
            push_requests: Mutex::default(),
            push_status: Mutex::new(StatusCode::OK),
        });

        let router = Router::new()
            .route("/api/events/{id}", get(events))
            .route("/push/{topic}", post(publish))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock API");
        let addr = listener.local_addr().expect("Mock API has no address");

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL to use as `upstream.api_endpoint`
    pub fn api_endpoint(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Base URL to use as `push.url`
    pub fn push_url(&self) -> String {
        format!("http://{}/push", self.addr)
    }

    /// Queue the response for the next events request
    pub fn respond(&self, status: StatusCode, body: Value) {
        self.state.responses.lock().push_back((status, body));
    }

    pub fn set_push_status(&self, status: StatusCode) {
        *self.state.push_status.lock() = status;
    }

    pub fn event_requests(&self) -> Vec<EventRequest> {
        self.state.event_requests.lock().clone()
    }

    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.state.push_requests.lock().clone()
    }

    /// Wait until at least `count` pushes have been received
    pub async fn wait_for_pushes(&self, count: usize, limit: Duration) -> Vec<PushRequest> {
        tokio::time::timeout(limit, async {
            loop {
                let pushes = self.push_requests();
                if pushes.len() >= count {
                    return pushes;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for push notifications")
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}
