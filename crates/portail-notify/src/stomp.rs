//! Minimal STOMP 1.2 frame codec.
//!
//! Covers what the notification channel needs: CONNECT / SUBSCRIBE /
//! UNSUBSCRIBE / DISCONNECT from the client, CONNECTED / MESSAGE / RECEIPT /
//! ERROR from the broker, and EOL heart-beats. One WebSocket text message
//! carries at most one frame.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const VERSION: &str = "1.2";

/// Body of an outgoing heart-beat.
pub const HEARTBEAT: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are never escaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.chars().take(32).collect())),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown STOMP command '{0}'")]
    UnknownCommand(String),
    #[error("malformed header line '{0}'")]
    BadHeader(String),
    #[error("invalid escape sequence in '{0}'")]
    BadEscape(String),
    #[error("frame is missing its NUL terminator")]
    Unterminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`. STOMP 1.2 says a repeated header keeps its first value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn connect(host: &str, token: Option<&str>, heartbeat: Heartbeat) -> Self {
        let mut frame = Self::new(Command::Connect)
            .header("accept-version", VERSION)
            .header("host", host)
            .header("heart-beat", heartbeat.to_string());
        if let Some(token) = token {
            frame = frame.header("Authorization", format!("Bearer {}", token));
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one WebSocket message. `Ok(None)` means the message was only a
    /// heart-beat (EOLs).
    pub fn parse(raw: &str) -> Result<Option<Self>, FrameError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(raw).ok_or(FrameError::Unterminated)?;
        let mut lines = head.lines();
        let command: Command = lines.next().unwrap_or_default().trim_end_matches('\r').parse()?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::BadHeader(line.chars().take(64).collect()))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse::<usize>().ok());

        let body = match content_length {
            Some(len) if rest.len() > len && rest.as_bytes()[len] == 0 && rest.is_char_boundary(len) => &rest[..len],
            _ => {
                let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
                &rest[..end]
            }
        };

        Ok(Some(Self { command, headers, body: body.to_string() }))
    }
}

/// Split at the blank line ending the headers, accepting LF or CRLF.
fn split_head(raw: &str) -> Option<(&str, &str)> {
    let lf = raw.find("\n\n").map(|i| (i, 2));
    let crlf = raw.find("\r\n\r\n").map(|i| (i, 4));
    let (idx, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => if a.0 < b.0 { a } else { b },
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&raw[..idx], &raw[idx + sep..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::BadEscape(s.chars().take(64).collect())),
        }
    }
    Ok(out)
}

// -- Heart-beating --

/// `heart-beat` header value: (can send every `outgoing` ms, wants to
/// receive every `incoming` ms). Zero means "cannot" / "does not want".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing: u32,
    pub incoming: u32,
}

impl Heartbeat {
    pub fn new(outgoing: u32, incoming: u32) -> Self {
        Self { outgoing, incoming }
    }

    /// Negotiate against the broker's CONNECTED header. Returns the interval
    /// at which we must send, and the interval at which we expect traffic.
    pub fn negotiate(self, server: Heartbeat) -> (Option<Duration>, Option<Duration>) {
        let send = (self.outgoing > 0 && server.incoming > 0)
            .then(|| Duration::from_millis(u64::from(self.outgoing.max(server.incoming))));
        let recv = (self.incoming > 0 && server.outgoing > 0)
            .then(|| Duration::from_millis(u64::from(self.incoming.max(server.outgoing))));
        (send, recv)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing, self.incoming)
    }
}

impl FromStr for Heartbeat {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || FrameError::BadHeader(format!("heart-beat:{}", s));
        let (out, inc) = s.split_once(',').ok_or_else(bad)?;
        Ok(Self {
            outgoing: out.trim().parse().map_err(|_| bad())?,
            incoming: inc.trim().parse().map_err(|_| bad())?,
        })
    }
}
