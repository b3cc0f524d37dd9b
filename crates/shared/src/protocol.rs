use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// Insert payload for a new bookmark row. `id` and `created_at` are
/// assigned by the storage platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBookmarkRow {
    pub title: String,
    pub url: String,
    pub user_id: UserId,
}

/// Update payload. Only `title` and `url` are ever patched; ownership
/// and timestamps are immutable after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkPatch {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification for a watched row. The payload carries no row
/// data the client relies on; any event triggers a full re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
}

/// Envelope for frames on the realtime socket (phoenix-channel style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "ref")]
    pub reference: Option<String>,
}

impl RealtimeFrame {
    pub fn join(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event: "phx_join".to_string(),
            payload: serde_json::json!({}),
            reference: Some("1".to_string()),
        }
    }

    pub fn leave(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event: "phx_leave".to_string(),
            payload: serde_json::json!({}),
            reference: None,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            reference: None,
        }
    }

    /// Interprets a frame as a row-change notification, if it is one.
    pub fn as_change_event(&self) -> Option<ChangeEvent> {
        let kind = match self.event.as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => return None,
        };
        Some(ChangeEvent { kind })
    }
}
