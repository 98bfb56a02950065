use std::fmt;
use std::str::FromStr;

use portail_types::api::{MarkAllReadRequest, NotificationQuery, ReaderQuery, UnreadCountQuery};
use portail_types::{Reader, Role};

use crate::error::{Error, Result};

pub const TOPIC_PREFIX: &str = "/topic/notifications";

/// Which backend topic a session listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopicScope {
    /// `/topic/notifications/{role}`
    #[default]
    Role,
    /// `/topic/notifications/{role}/{serviceId}/{codeSoc}`
    Service,
    /// `/topic/notifications/{personnelId}`
    Personnel,
}

impl FromStr for TopicScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "role" => Ok(Self::Role),
            "service" => Ok(Self::Service),
            "personnel" => Ok(Self::Personnel),
            other => Err(Error::Config(format!(
                "unknown topic scope '{}' (expected role, service or personnel)",
                other
            ))),
        }
    }
}

/// Identity of the signed-in user, passed explicitly to everything that
/// needs it.
#[derive(Clone, Default)]
pub struct Session {
    pub role: Role,
    pub personnel_id: Option<String>,
    pub service_id: Option<String>,
    pub code_soc: Option<String>,
    pub topic_scope: TopicScope,
    token: Option<String>,
}

impl Session {
    pub fn new(role: impl Into<Role>) -> Self {
        Self { role: role.into(), ..Default::default() }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_personnel(mut self, personnel_id: impl Into<String>) -> Self {
        self.personnel_id = Some(personnel_id.into());
        self
    }

    pub fn with_service(mut self, service_id: impl Into<String>, code_soc: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self.code_soc = Some(code_soc.into());
        self
    }

    pub fn with_scope(mut self, scope: TopicScope) -> Self {
        self.topic_scope = scope;
        self
    }

    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn logout(&mut self) {
        self.token = None;
    }

    /// STOMP destination for this session's scope.
    pub fn topic(&self) -> Result<String> {
        match self.topic_scope {
            TopicScope::Role => Ok(format!("{}/{}", TOPIC_PREFIX, self.role)),
            TopicScope::Service => {
                let service = required(&self.service_id, "service scope needs a service id")?;
                let code_soc = required(&self.code_soc, "service scope needs a company code")?;
                Ok(format!("{}/{}/{}/{}", TOPIC_PREFIX, self.role, service, code_soc))
            }
            TopicScope::Personnel => {
                let personnel = required(&self.personnel_id, "personnel scope needs a personnel id")?;
                Ok(format!("{}/{}", TOPIC_PREFIX, personnel))
            }
        }
    }

    pub fn query(&self) -> NotificationQuery {
        NotificationQuery {
            role: self.role.clone(),
            personnel_id: self.personnel_id.clone(),
            service_id: self.service_id.clone().unwrap_or_default(),
            code_soc: self.code_soc.clone().unwrap_or_default(),
        }
    }

    pub fn unread_query(&self) -> UnreadCountQuery {
        UnreadCountQuery {
            role: self.role.clone(),
            personnel_id: self.personnel_id.clone(),
        }
    }

    /// HR and line managers with a known personnel id track read state per
    /// user (`readBy`); everyone else shares the role-wide `viewed` flag.
    pub fn reader(&self) -> Reader {
        match self.personnel_id.as_deref() {
            Some(id) if !id.is_empty() && self.role.is_service_scoped() => Reader::Personnel(id.to_string()),
            _ => Reader::Shared,
        }
    }

    pub fn reader_query(&self) -> Result<ReaderQuery> {
        let personnel_id = required(&self.personnel_id, "per-user read state needs a personnel id")?;
        Ok(ReaderQuery {
            personnel_id: personnel_id.to_string(),
            role: self.role.clone(),
            service_id: self.service_id.clone().unwrap_or_default(),
            code_soc: self.code_soc.clone().unwrap_or_default(),
        })
    }

    /// The backend only accepts a role-wide mark-all for admins.
    pub fn mark_all_request(&self) -> Result<MarkAllReadRequest> {
        if !self.is_admin() && self.personnel_id.is_none() {
            return Err(Error::Session(format!(
                "role '{}' needs a personnel id to mark all notifications as read",
                self.role
            )));
        }
        Ok(MarkAllReadRequest {
            role: self.role.clone(),
            personnel_id: self.personnel_id.clone(),
        })
    }
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Session(message.to_string()))
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("personnel_id", &self.personnel_id)
            .field("service_id", &self.service_id)
            .field("code_soc", &self.code_soc)
            .field("topic_scope", &self.topic_scope)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
