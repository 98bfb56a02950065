use serde::{Deserialize, Serialize};

use crate::models::Role;

// -- Listing --

/// Query string for `GET /api/notifications`.
///
/// The backend requires `serviceId` and `codeSoc` to be present even when
/// empty, so they are always serialised.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personnel_id: Option<String>,
    pub service_id: String,
    pub code_soc: String,
}

/// Query string for `GET /api/notifications/unreadnbr`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountQuery {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personnel_id: Option<String>,
}

/// Query string for the per-user endpoints (`unread-count-for-user`,
/// `mark-all-read-by-user`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderQuery {
    pub personnel_id: String,
    pub role: Role,
    pub service_id: String,
    pub code_soc: String,
}

// -- Read state --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadRequest {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personnel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub updated_count: u64,
}
