use std::time::Duration;

use url::Url;

use crate::backoff::BackoffPolicy;
use crate::channel::ChannelConfig;
use crate::error::{Error, Result};
use crate::session::{Session, TopicScope};
use crate::stomp::Heartbeat;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_HEARTBEAT: Heartbeat = Heartbeat { outgoing: 4000, incoming: 4000 };

/// Spring's SockJS endpoint exposes a raw WebSocket under `/websocket`.
const WS_PATH: &str = "/ws/websocket";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub ws_url: Url,
    pub session: Session,
    pub request_timeout: Duration,
    pub reconnect: BackoffPolicy,
    pub read_retry: BackoffPolicy,
    pub heartbeat: Heartbeat,
}

impl ClientConfig {
    /// Defaults for a backend at `api_url`.
    pub fn new(api_url: Url, session: Session) -> Result<Self> {
        let ws_url = derive_ws_url(&api_url)?;
        Ok(Self {
            api_url,
            ws_url,
            session,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: BackoffPolicy::RECONNECT,
            read_retry: BackoffPolicy::READ_RETRY,
            heartbeat: DEFAULT_HEARTBEAT,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_raw = get("PORTAIL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let api_url = parse_url("PORTAIL_API_URL", &api_raw)?;

        let mut session = Session::new(get("PORTAIL_ROLE").unwrap_or_else(|| "Admin".into()));
        if let Some(token) = get("PORTAIL_TOKEN") {
            session = session.with_token(token);
        }
        session.personnel_id = get("PORTAIL_PERSONNEL_ID");
        session.service_id = get("PORTAIL_SERVICE_ID");
        session.code_soc = get("PORTAIL_CODE_SOC");
        if let Some(scope) = get("PORTAIL_TOPIC_SCOPE") {
            session.topic_scope = scope.parse::<TopicScope>()?;
        }

        let mut config = Self::new(api_url, session)?;

        if let Some(ws) = get("PORTAIL_WS_URL") {
            config.ws_url = parse_url("PORTAIL_WS_URL", &ws)?;
        }
        if let Some(max) = get("PORTAIL_RECONNECT_MAX_ATTEMPTS") {
            let max: u32 = max.parse().map_err(|_| {
                Error::Config(format!("PORTAIL_RECONNECT_MAX_ATTEMPTS must be a number, got '{}'", max))
            })?;
            config.reconnect = config.reconnect.with_max_retries(Some(max));
        }
        if let Some(secs) = get("PORTAIL_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::Config(format!("PORTAIL_REQUEST_TIMEOUT_SECS must be a number, got '{}'", secs))
            })?;
            if secs == 0 {
                return Err(Error::Config("PORTAIL_REQUEST_TIMEOUT_SECS must be positive".into()));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            url: self.ws_url.clone(),
            host: self.api_url.host_str().unwrap_or("localhost").to_string(),
            token: self.session.bearer().map(str::to_string),
            heartbeat: self.heartbeat,
            reconnect: self.reconnect,
            connect_timeout: self.request_timeout,
        }
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("{} is not a valid URL ('{}'): {}", key, raw, e)))
}

/// `http(s)://host[/base]` -> `ws(s)://host[/base]/ws/websocket`.
pub fn derive_ws_url(api: &Url) -> Result<Url> {
    let scheme = match api.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::Config(format!("unsupported API URL scheme '{}'", other))),
    };
    let host = api
        .host_str()
        .ok_or_else(|| Error::Config(format!("API URL '{}' has no host", api)))?;
    let port = api.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let base = api.path().trim_end_matches('/');
    let raw = format!("{}://{}{}{}{}", scheme, host, port, base, WS_PATH);
    parse_url("PORTAIL_WS_URL", &raw)
}
