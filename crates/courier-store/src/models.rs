//! Records returned by the store.
//!
//! Messages are the shared wire type, so the HTTP layer can hand them to
//! clients without conversion.

use serde::{Deserialize, Serialize};

pub use courier_shared::{Message, MessageId, MessageStatus, UserId};

/// A message about to be written. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub status: MessageStatus,
}

/// Snapshot of the database for diagnostics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub database_name: String,
    pub version: String,
    pub table_count: usize,
    pub key_tables: Vec<String>,
    pub connection_valid: bool,
}

/// A user directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
}

/// A history entry with the participants' directory details. Users missing
/// from the directory have empty names and emails.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MessageWithUsers {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    pub sender_email: String,
    pub receiver_name: String,
    pub receiver_email: String,
}
