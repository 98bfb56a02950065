//! STOMP-over-WebSocket connection to the backend's push endpoint.
//!
//! One spawned task owns the socket. It reconnects with backoff, re-subscribes
//! every active topic after each CONNECTED, and fans `MESSAGE` bodies out to
//! the broadcast sender registered for the topic.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use portail_types::LiveEvent;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::Error;
use crate::stomp::{self, Command as StompCommand, Frame, Heartbeat};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Placeholder period for a disabled heart-beat timer.
const IDLE_TICK: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct ChannelConfig {
    pub url: Url,
    /// Value of the STOMP `host` header
    pub host: String,
    pub token: Option<String>,
    pub heartbeat: Heartbeat,
    pub reconnect: BackoffPolicy,
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("url", &self.url.as_str())
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("heartbeat", &self.heartbeat)
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    /// Sleeping before reconnect attempt `attempt`
    Waiting { attempt: u32, delay: Duration },
    Closed,
}

enum Command {
    Subscribe { topic: String, tx: broadcast::Sender<LiveEvent> },
    Unsubscribe { topic: String },
    Shutdown,
}

/// Handle to the connection task. Dropping every handle stops the task.
#[derive(Debug)]
pub struct LiveUpdateChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ChannelState>,
}

impl LiveUpdateChannel {
    pub fn spawn(config: ChannelConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let worker = Worker {
            config,
            cmd_rx,
            state_tx,
            routes: HashMap::new(),
            next_sub: 0,
        };
        tokio::spawn(worker.run());

        Self { cmd_tx, state_rx }
    }

    /// Route `topic` to `tx`, subscribing on the broker if connected.
    pub fn subscribe(&self, topic: &str, tx: broadcast::Sender<LiveEvent>) {
        let _ = self.cmd_tx.send(Command::Subscribe { topic: topic.to_string(), tx });
    }

    pub fn unsubscribe(&self, topic: &str) {
        let _ = self.cmd_tx.send(Command::Unsubscribe { topic: topic.to_string() });
    }

    /// Ask the task to DISCONNECT and exit.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.state_rx.borrow() == ChannelState::Closed
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe { topic, .. } => write!(f, "Subscribe({})", topic),
            Self::Unsubscribe { topic } => write!(f, "Unsubscribe({})", topic),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

struct Route {
    id: String,
    tx: broadcast::Sender<LiveEvent>,
}

enum SessionEnd {
    Shutdown,
    Lost(Error),
}

fn lost(reason: impl Into<String>) -> SessionEnd {
    SessionEnd::Lost(Error::Transport(reason.into()))
}

struct Worker {
    config: ChannelConfig,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ChannelState>,
    /// topic -> route
    routes: HashMap<String, Route>,
    next_sub: u64,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = self.config.reconnect.start();

        loop {
            self.state_tx.send_replace(ChannelState::Connecting);
            match self.session(&mut backoff).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(err) => warn!("Notification channel lost: {}", err),
            }

            let Some(delay) = backoff.next_delay() else {
                error!(
                    "Notification channel giving up after {} reconnect attempts",
                    backoff.attempt()
                );
                break;
            };
            let attempt = backoff.attempt();
            warn!("Reconnecting to {} in {:?} (attempt {})", self.config.url, delay, attempt);
            self.state_tx.send_replace(ChannelState::Waiting { attempt, delay });

            if self.wait(delay).await {
                break;
            }
        }

        self.state_tx.send_replace(ChannelState::Closed);
        info!("Notification channel closed");
    }

    /// Sleep out a reconnect delay while still tracking route changes.
    /// Returns true if the task should stop.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe { topic, tx }) => {
                        self.add_route(topic, tx);
                    }
                    Some(Command::Unsubscribe { topic }) => {
                        self.routes.remove(&topic);
                    }
                    Some(Command::Shutdown) | None => return true,
                },
            }
        }
    }

    /// Returns the subscription id when the topic is new.
    fn add_route(&mut self, topic: String, tx: broadcast::Sender<LiveEvent>) -> Option<String> {
        if let Some(route) = self.routes.get_mut(&topic) {
            route.tx = tx;
            return None;
        }
        let id = format!("sub-{}", self.next_sub);
        self.next_sub += 1;
        self.routes.insert(topic, Route { id: id.clone(), tx });
        Some(id)
    }

    async fn session(&mut self, backoff: &mut Backoff) -> SessionEnd {
        let timeout = self.config.connect_timeout;
        let ws = match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.config.url.as_str())).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return lost(format!("connect to {} failed: {}", self.config.url, e)),
            Err(_) => return lost(format!("connect to {} timed out", self.config.url)),
        };
        let (mut sink, mut stream) = ws.split();

        if self.config.token.is_none() {
            warn!("No bearer token available, connecting to notification channel anonymously");
        }
        let connect = Frame::connect(&self.config.host, self.config.token.as_deref(), self.config.heartbeat);
        if let Err(e) = send_frame(&mut sink, &connect).await {
            return lost(format!("CONNECT failed: {}", e));
        }

        let connected = match tokio::time::timeout(timeout, await_connected(&mut stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => return SessionEnd::Lost(err),
            Err(_) => return lost("no CONNECTED frame before timeout"),
        };
        let server_heartbeat = connected
            .get("heart-beat")
            .and_then(|v| v.parse::<Heartbeat>().ok())
            .unwrap_or_default();
        let (send_every, recv_every) = self.config.heartbeat.negotiate(server_heartbeat);

        backoff.reset();
        self.state_tx.send_replace(ChannelState::Connected);
        info!(
            "Connected to notification channel {} (heart-beat send {:?}, expect {:?})",
            self.config.url, send_every, recv_every
        );

        for (topic, route) in &self.routes {
            if let Err(e) = send_frame(&mut sink, &Frame::subscribe(&route.id, topic)).await {
                return lost(format!("SUBSCRIBE {} failed: {}", topic, e));
            }
            info!("Subscribed to {}", topic);
        }

        let mut beat = tokio::time::interval(send_every.unwrap_or(IDLE_TICK));
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        beat.tick().await;
        let mut watchdog = tokio::time::interval(recv_every.unwrap_or(IDLE_TICK));
        watchdog.tick().await;
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        if let Some(end) = self.handle_text(text.as_str()) {
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return lost("closed by server");
                    }
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => return lost(e.to_string()),
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe { topic, tx }) => {
                        if let Some(id) = self.add_route(topic.clone(), tx) {
                            if let Err(e) = send_frame(&mut sink, &Frame::subscribe(&id, &topic)).await {
                                return lost(format!("SUBSCRIBE {} failed: {}", topic, e));
                            }
                            info!("Subscribed to {}", topic);
                        }
                    }
                    Some(Command::Unsubscribe { topic }) => {
                        if let Some(route) = self.routes.remove(&topic) {
                            if let Err(e) = send_frame(&mut sink, &Frame::unsubscribe(&route.id)).await {
                                return lost(format!("UNSUBSCRIBE {} failed: {}", topic, e));
                            }
                            info!("Unsubscribed from {}", topic);
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = send_frame(&mut sink, &Frame::disconnect()).await;
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = beat.tick(), if send_every.is_some() => {
                    if let Err(e) = sink.send(Message::Text(stomp::HEARTBEAT.into())).await {
                        return lost(format!("heart-beat send failed: {}", e));
                    }
                }
                _ = watchdog.tick(), if recv_every.is_some() => {
                    let limit = recv_every.unwrap_or(IDLE_TICK) * 2;
                    if last_seen.elapsed() > limit {
                        return lost(format!("no traffic for {:?}", last_seen.elapsed()));
                    }
                }
            }
        }
    }

    /// Returns `Some` when the frame ends the session.
    fn handle_text(&self, text: &str) -> Option<SessionEnd> {
        let frame = match Frame::parse(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!("Dropping malformed STOMP frame: {}", e);
                return None;
            }
        };

        match frame.command {
            StompCommand::Message => self.dispatch(&frame),
            StompCommand::Error => {
                let message = frame.get("message").unwrap_or("no message");
                warn!("Broker sent ERROR: {} {}", message, frame.body.trim());
                return Some(lost(format!("broker error: {}", message)));
            }
            StompCommand::Receipt => debug!("Receipt {}", frame.get("receipt-id").unwrap_or("?")),
            other => debug!("Ignoring {} frame", other),
        }
        None
    }

    fn dispatch(&self, frame: &Frame) {
        let by_sub = frame
            .get("subscription")
            .and_then(|id| self.routes.iter().find(|(_, r)| r.id == id));
        let by_dest = || {
            frame
                .get("destination")
                .and_then(|dest| self.routes.get_key_value(dest))
        };
        let Some((topic, route)) = by_sub.or_else(by_dest) else {
            debug!("MESSAGE for unknown subscription, dropping");
            return;
        };

        match LiveEvent::parse(&frame.body) {
            Ok(event) => {
                debug!("Live event on {}: {:?}", topic, event);
                // no receivers left just means the hub is about to unsubscribe
                let _ = route.tx.send(event);
            }
            Err(e) => warn!("Dropping payload on {}: {}", topic, e),
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &Frame) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    sink.send(Message::Text(frame.encode().into())).await
}

async fn await_connected(stream: &mut WsSource) -> Result<Frame, Error> {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(Error::Transport(e.to_string())),
        };
        match Frame::parse(text.as_str()) {
            Ok(Some(frame)) if frame.command == StompCommand::Connected => return Ok(frame),
            Ok(Some(frame)) if frame.command == StompCommand::Error => {
                return Err(Error::Transport(format!(
                    "broker refused CONNECT: {}",
                    frame.get("message").unwrap_or(frame.body.trim())
                )));
            }
            Ok(_) => continue,
            Err(e) => return Err(Error::Transport(format!("bad frame while connecting: {}", e))),
        }
    }
    Err(Error::Transport("socket closed before CONNECTED".into()))
}
