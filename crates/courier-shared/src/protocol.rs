use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{MessageId, MessageStatus, UserId};

/// A persisted message, as stored and as forwarded to its receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// A message submitted by a client, over the socket or the REST API.
///
/// Clients may send the full message shape. `sender_id` is kept only to log
/// a mismatched claim; `status`, `created_at` and any other field are
/// ignored whatever their value, since the server assigns them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRequest {
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub receiver_id: UserId,
    #[serde(default)]
    pub content: String,
}

impl MessageRequest {
    pub fn new(receiver_id: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            receiver_id: receiver_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Decode a client frame. A frame without a receiver is rejected.
    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        let request: Self = serde_json::from_slice(data)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.receiver_id.is_empty() {
            return Err(ProtocolError::MissingReceiver);
        }
        Ok(())
    }
}

/// Frames the server originates (as opposed to forwarded messages).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledgement sent back to the sender of a message.
    Delivery {
        message_id: MessageId,
        to: UserId,
        status: MessageStatus,
    },
}

impl ServerFrame {
    pub fn delivery(message: &Message) -> Self {
        Self::Delivery {
            message_id: message.id,
            to: message.receiver_id.clone(),
            status: message.status,
        }
    }
}
