use thiserror::Error;

use crate::models::Notification;

/// Payload pushed on a `/topic/notifications/...` destination.
///
/// The backend publishes new notifications as JSON objects, but its
/// mark-as-viewed path also publishes the remaining unread count for the role
/// as a bare integer on the same topic.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A notification was created for this topic
    Created(Notification),

    /// Server-side unread count for the topic's role
    UnreadHint(u64),
}

#[derive(Debug, Error)]
#[error("unrecognised live payload: {reason} -- raw: {raw}")]
pub struct PayloadError {
    pub reason: String,
    pub raw: String,
}

impl LiveEvent {
    pub fn parse(body: &str) -> Result<Self, PayloadError> {
        let trimmed = body.trim();
        if let Ok(count) = trimmed.parse::<u64>() {
            return Ok(Self::UnreadHint(count));
        }

        serde_json::from_str::<Notification>(trimmed)
            .map(Self::Created)
            .map_err(|e| PayloadError {
                reason: e.to_string(),
                raw: trimmed.chars().take(200).collect(),
            })
    }
}
