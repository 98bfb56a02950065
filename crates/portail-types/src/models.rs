use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Backend-assigned notification id.
///
/// The backend stores notifications in MongoDB and hands out ObjectId strings,
/// but older endpoints (and some fixtures) use integers. Both are accepted on
/// the wire and normalised to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for NotificationId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Number(n) => Self(n.to_string()),
        })
    }
}

// -- Roles --

/// Audience role of a notification or a session.
///
/// Kept as an open string: the backend compares roles case-insensitively and
/// new roles show up without a client release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub const ADMIN: &'static str = "Admin";
    pub const HR: &'static str = "RH";
    pub const MANAGER: &'static str = "Chef Hiérarchique";
    pub const COLLABORATOR: &'static str = "Collaborateur";

    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn admin() -> Self {
        Self::new(Self::ADMIN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.matches(Self::ADMIN)
    }

    /// RH and line managers get notifications scoped by service and company.
    pub fn is_service_scoped(&self) -> bool {
        self.matches(Self::HR) || self.matches(Self::MANAGER)
    }

    /// Case-insensitive comparison, same as the backend's routing.
    pub fn matches(&self, other: &str) -> bool {
        self.0.to_lowercase() == other.to_lowercase()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(role: &str) -> Self {
        Self::new(role)
    }
}

impl From<String> for Role {
    fn from(role: String) -> Self {
        Self(role)
    }
}

// -- Notifications --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub viewed: bool,
    #[serde(serialize_with = "serialize_timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personnel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_soc: Option<String>,
    /// Personnel ids that have read this notification. Service-scoped roles
    /// track read state here instead of in the shared `viewed` flag.
    #[serde(default)]
    pub read_by: Vec<String>,
}

impl Notification {
    pub fn new(
        id: impl Into<NotificationId>,
        message: impl Into<String>,
        role: impl Into<Role>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            role: role.into(),
            viewed: false,
            timestamp,
            personnel_id: None,
            service_id: None,
            code_soc: None,
            read_by: Vec::new(),
        }
    }

    pub fn is_read(&self, reader: &Reader) -> bool {
        match reader {
            Reader::Shared => self.viewed,
            Reader::Personnel(id) => self.read_by.iter().any(|r| r == id),
        }
    }

    /// Record a read by `reader`. Returns true if the notification was
    /// unread for it before.
    pub fn mark_read(&mut self, reader: &Reader) -> bool {
        if self.is_read(reader) {
            return false;
        }
        match reader {
            Reader::Shared => self.viewed = true,
            Reader::Personnel(id) => self.read_by.push(id.clone()),
        }
        true
    }
}

/// Whose read state decides if a notification counts as unread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reader {
    /// The role-wide `viewed` flag
    #[default]
    Shared,
    /// Membership of this personnel id in `readBy`
    Personnel(String),
}

/// Parse a notification timestamp.
///
/// Accepts RFC 3339 and the backend's zone-less `LocalDateTime` rendering
/// (`2024-05-01T10:20:30.123`), which is taken as UTC. SQL-style
/// `YYYY-MM-DD HH:MM:SS` is accepted as a last resort.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map(|ndt| ndt.and_utc())
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    use serde::de::Error;

    // Jackson without WRITE_DATES_AS_TIMESTAMPS disabled sends
    // [year, month, day, hour, minute, second, nanos].
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Parts(Vec<u32>),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => parse_timestamp(&s).map_err(|e| D::Error::custom(format!("bad timestamp '{}': {}", s, e))),
        Raw::Parts(parts) => {
            let part = |i: usize| parts.get(i).copied().unwrap_or(0);
            NaiveDate::from_ymd_opt(part(0) as i32, part(1), part(2))
                .and_then(|d| d.and_hms_nano_opt(part(3), part(4), part(5), part(6)))
                .map(|ndt| ndt.and_utc())
                .ok_or_else(|| D::Error::custom(format!("bad timestamp parts {:?}", parts)))
        }
    }
}
