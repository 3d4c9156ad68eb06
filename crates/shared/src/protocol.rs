use serde::{Deserialize, Serialize};

use crate::domain::{ChannelName, MessageId, Timestamp, UserId};

/// Label shown for a sender that is missing from the roster snapshot.
pub const DELETED_SENDER_LABEL: &str = "Deleted";

/// A message record as echoed back by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: MessageId,
    pub channel: ChannelName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub body: String,
    /// `None` while the store has not yet assigned the write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
}

/// Render-ready message, derived from a [`RawMessage`] and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    pub sender_label: String,
    pub is_own_message: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum LiveUpdate {
    Messages { messages: Vec<MessageView> },
    Failed { error: crate::error::ApiError },
}
