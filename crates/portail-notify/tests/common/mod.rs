//! In-process stand-in for the portal backend: the notification REST routes
//! and a STOMP broker on `/ws/websocket`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use url::Url;

use portail_notify::backoff::BackoffPolicy;
use portail_notify::stomp::{Command, Frame};
use portail_notify::{ClientConfig, Session};
use portail_types::models::parse_timestamp;
use portail_types::{Notification, Reader, Role};

pub struct Backend {
    pub addr: SocketAddr,
    state: Arc<BackendState>,
}

/// Out-of-band instruction for every open broker session.
#[derive(Debug, Clone)]
enum Control {
    /// Cut the socket without a STOMP goodbye
    Drop,
    /// Send an ERROR frame and leave the socket open
    Error(String),
}

#[derive(Default)]
struct BackendState {
    notifications: Mutex<Vec<Notification>>,
    fail_fetch: Mutex<bool>,
    fail_views: Mutex<Option<u16>>,
    views: Mutex<Vec<String>>,
    read_by: Mutex<Vec<(String, String)>>,
    /// `heart-beat` header of CONNECTED; None means `0,0`
    heartbeat: Mutex<Option<String>>,
    rest_auth: Mutex<Vec<Option<String>>>,
    stomp_auth: Mutex<Vec<Option<String>>>,
    subscriptions: Mutex<Vec<String>>,
    unsubscriptions: Mutex<Vec<String>>,
    connections: AtomicUsize,
    disconnects: AtomicUsize,
    push_tx: Mutex<Option<broadcast::Sender<(String, String)>>>,
    control_tx: Mutex<Option<broadcast::Sender<Control>>>,
}

impl BackendState {
    fn push_tx(&self) -> broadcast::Sender<(String, String)> {
        self.push_tx
            .lock()
            .get_or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn control_tx(&self) -> broadcast::Sender<Control> {
        self.control_tx
            .lock()
            .get_or_insert_with(|| broadcast::channel(4).0)
            .clone()
    }
}

type Shared = Arc<BackendState>;

impl Backend {
    pub async fn spawn(initial: Vec<Notification>) -> Self {
        let state: Shared = Arc::new(BackendState::default());
        *state.notifications.lock() = initial;

        let app = Router::new()
            .route("/api/notifications", get(list))
            .route("/api/notifications/{id}/view", post(view))
            .route("/api/notifications/mark-all-read", put(mark_all_read))
            .route("/api/notifications/unreadnbr", get(unread_count))
            .route("/api/notifications/{id}/mark-read-by", post(mark_read_by))
            .route("/api/notifications/mark-all-read-by-user", post(mark_all_read_by_user))
            .route("/api/notifications/unread-count-for-user", get(unread_count_for_user))
            .route("/ws/websocket", get(ws_upgrade))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Client config pointed at this backend, with fast retry timings.
    pub fn config(&self, session: Session) -> ClientConfig {
        let api = Url::parse(&format!("http://{}", self.addr)).unwrap();
        let mut config = ClientConfig::new(api, session).unwrap();
        config.request_timeout = Duration::from_secs(2);
        config.reconnect = BackoffPolicy {
            base: Duration::from_millis(20),
            cap: Duration::from_millis(100),
            max_retries: None,
        };
        config.read_retry = BackoffPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_retries: Some(2),
        };
        config
    }

    /// Publish `body` on `destination` to every connected client subscribed to it.
    pub fn push(&self, destination: &str, body: impl Into<String>) {
        let _ = self.state.push_tx().send((destination.to_string(), body.into()));
    }

    pub fn push_notification(&self, destination: &str, notification: &Notification) {
        self.push(destination, serde_json::to_string(notification).unwrap());
    }

    /// Cut every open WebSocket without a STOMP goodbye.
    pub fn drop_connections(&self) {
        let _ = self.state.control_tx().send(Control::Drop);
    }

    /// Send an ERROR frame on every open session, keeping the sockets open.
    pub fn send_error(&self, message: &str) {
        let _ = self.state.control_tx().send(Control::Error(message.to_string()));
    }

    /// Promise broker heart-beats every `ms` in CONNECTED, then never send any.
    pub fn promise_heartbeat(&self, ms: u32) {
        *self.state.heartbeat.lock() = Some(format!("{},0", ms));
    }

    pub fn fail_fetch(&self, fail: bool) {
        *self.state.fail_fetch.lock() = fail;
    }

    pub fn fail_views(&self, status: Option<u16>) {
        *self.state.fail_views.lock() = status;
    }

    pub fn views(&self) -> Vec<String> {
        self.state.views.lock().clone()
    }

    /// `(notification id, personnel id)` per mark-read-by call.
    pub fn read_by(&self) -> Vec<(String, String)> {
        self.state.read_by.lock().clone()
    }

    pub fn is_read_by(&self, id: &str, personnel: &str) -> bool {
        self.state
            .notifications
            .lock()
            .iter()
            .any(|n| n.id.as_str() == id && n.read_by.iter().any(|p| p == personnel))
    }

    pub fn rest_auth(&self) -> Vec<Option<String>> {
        self.state.rest_auth.lock().clone()
    }

    pub fn stomp_auth(&self) -> Vec<Option<String>> {
        self.state.stomp_auth.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().clone()
    }

    pub fn unsubscriptions(&self) -> usize {
        self.state.unsubscriptions.lock().len()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_viewed(&self, id: &str) -> bool {
        self.state
            .notifications
            .lock()
            .iter()
            .any(|n| n.id.as_str() == id && n.viewed)
    }
}

pub fn notification(id: &str, timestamp: &str) -> Notification {
    Notification::new(
        id,
        format!("Notification {}", id),
        Role::admin(),
        parse_timestamp(timestamp).unwrap(),
    )
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// -- REST --

fn record_auth(state: &BackendState, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.rest_auth.lock().push(auth);
}

async fn list(State(state): State<Shared>, headers: HeaderMap) -> Response {
    record_auth(&state, &headers);
    if *state.fail_fetch.lock() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response();
    }
    let list = state.notifications.lock().clone();
    Json(list).into_response()
}

async fn view(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    record_auth(&state, &headers);
    state.views.lock().push(id.clone());
    if let Some(code) = *state.fail_views.lock() {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "view failed").into_response();
    }
    let mut notifications = state.notifications.lock();
    match notifications.iter_mut().find(|n| n.id.as_str() == id) {
        Some(n) => {
            n.viewed = true;
            StatusCode::OK.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn mark_all_read(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(_body): Json<serde_json::Value>,
) -> Response {
    record_auth(&state, &headers);
    let mut updated = 0;
    for n in state.notifications.lock().iter_mut().filter(|n| !n.viewed) {
        n.viewed = true;
        updated += 1;
    }
    Json(serde_json::json!({
        "message": "All notifications marked as read",
        "updatedCount": updated,
    }))
    .into_response()
}

async fn unread_count(State(state): State<Shared>, headers: HeaderMap) -> Response {
    record_auth(&state, &headers);
    let count = state.notifications.lock().iter().filter(|n| !n.viewed).count();
    Json(count).into_response()
}

async fn mark_read_by(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record_auth(&state, &headers);
    let Some(personnel) = query.get("personnelId").cloned() else {
        return (StatusCode::BAD_REQUEST, "personnelId is required").into_response();
    };
    state.read_by.lock().push((id.clone(), personnel.clone()));
    if let Some(code) = *state.fail_views.lock() {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "mark-read-by failed").into_response();
    }
    let mut notifications = state.notifications.lock();
    match notifications.iter_mut().find(|n| n.id.as_str() == id) {
        Some(n) => {
            n.mark_read(&Reader::Personnel(personnel));
            (StatusCode::OK, "Notification marked as read by user.").into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn reader_of(query: &HashMap<String, String>) -> Option<Reader> {
    query.get("personnelId").cloned().map(Reader::Personnel)
}

async fn mark_all_read_by_user(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record_auth(&state, &headers);
    let Some(reader) = reader_of(&query) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    for n in state.notifications.lock().iter_mut() {
        n.mark_read(&reader);
    }
    StatusCode::OK.into_response()
}

async fn unread_count_for_user(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record_auth(&state, &headers);
    let Some(reader) = reader_of(&query) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let count = state
        .notifications
        .lock()
        .iter()
        .filter(|n| !n.is_read(&reader))
        .count();
    Json(count).into_response()
}

// -- STOMP broker --

async fn ws_upgrade(State(state): State<Shared>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stomp_session(socket, state))
}

async fn send(socket: &mut WebSocket, frame: Frame) -> bool {
    socket.send(Message::Text(frame.encode().into())).await.is_ok()
}

async fn stomp_session(mut socket: WebSocket, state: Shared) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut push_rx = state.push_tx().subscribe();
    let mut control_rx = state.control_tx().subscribe();

    // CONNECT
    loop {
        let Some(Ok(Message::Text(text))) = socket.recv().await else {
            return;
        };
        let Ok(Some(frame)) = Frame::parse(text.as_str()) else {
            continue;
        };
        if frame.command == Command::Connect || frame.command == Command::Stomp {
            state.stomp_auth.lock().push(frame.get("Authorization").map(str::to_string));
            let heartbeat = state.heartbeat.lock().clone().unwrap_or_else(|| "0,0".to_string());
            let connected = Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", heartbeat);
            if !send(&mut socket, connected).await {
                return;
            }
            break;
        }
    }

    // destination -> subscription id
    let mut subs: HashMap<String, String> = HashMap::new();
    let mut message_id = 0u64;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let Ok(Some(frame)) = Frame::parse(text.as_str()) else {
                    continue;
                };
                match frame.command {
                    Command::Subscribe => {
                        if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                            subs.insert(dest.to_string(), id.to_string());
                            state.subscriptions.lock().push(dest.to_string());
                        }
                    }
                    Command::Unsubscribe => {
                        if let Some(id) = frame.get("id") {
                            subs.retain(|_, sub| sub.as_str() != id);
                            state.unsubscriptions.lock().push(id.to_string());
                        }
                    }
                    Command::Disconnect => {
                        state.disconnects.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    _ => {}
                }
            }
            push = push_rx.recv() => {
                let Ok((dest, body)) = push else {
                    return;
                };
                if let Some(sub) = subs.get(&dest) {
                    message_id += 1;
                    let frame = Frame::new(Command::Message)
                        .header("destination", dest.as_str())
                        .header("subscription", sub.as_str())
                        .header("message-id", message_id.to_string())
                        .header("content-type", "application/json")
                        .body(body);
                    if !send(&mut socket, frame).await {
                        return;
                    }
                }
            }
            control = control_rx.recv() => match control {
                Ok(Control::Error(message)) => {
                    let frame = Frame::new(Command::Error)
                        .header("message", message)
                        .body("session rejected");
                    if !send(&mut socket, frame).await {
                        return;
                    }
                }
                Ok(Control::Drop) | Err(_) => return,
            },
        }
    }
}
