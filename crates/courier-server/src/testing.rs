//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};

use courier_shared::{Message, MessageId, MessageStatus, OnlineUser, UserId};
use courier_store::{DatabaseInfo, MessageWithUsers, NewMessage, StoreError, User};

use crate::presence::{PresenceError, PresenceStore};
use crate::store::MessageStore;

pub fn online_user(id: &str) -> OnlineUser {
    OnlineUser {
        id: UserId::from(id),
        name: format!("user {id}"),
        role: "member".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Save(NewMessage),
    UpdateStatus(MessageId, MessageStatus),
}

/// In-memory message store that records every successful call.
#[derive(Default)]
pub struct RecordingStore {
    messages: Mutex<Vec<Message>>,
    calls: Mutex<Vec<StoreCall>>,
    users: Mutex<HashMap<UserId, User>>,
    fail_saves: AtomicBool,
    fail_updates: AtomicBool,
    fail_directory: AtomicBool,
}

impl RecordingStore {
    pub fn saved(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_of(&self, id: MessageId) -> Option<MessageStatus> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.status)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_directory(&self, fail: bool) {
        self.fail_directory.store(fail, Ordering::SeqCst);
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.users.lock().unwrap().get(&UserId::from(id)).cloned()
    }

    fn check_directory(&self) -> Result<(), StoreError> {
        if self.fail_directory.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        Ok(())
    }

    fn injected() -> StoreError {
        StoreError::Io(std::io::Error::other("injected failure"))
    }
}

#[async_trait]
impl MessageStore for RecordingStore {
    async fn save(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }

        let mut messages = self.messages.lock().unwrap();
        let stored = Message {
            id: messages.len() as MessageId + 1,
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            status: message.status,
            created_at: Utc::now().trunc_subsecs(6),
        };
        messages.push(stored.clone());
        self.calls.lock().unwrap().push(StoreCall::Save(message));
        Ok(stored)
    }

    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }

        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound)?;
        message.status = status;
        self.calls
            .lock()
            .unwrap()
            .push(StoreCall::UpdateStatus(id, status));
        Ok(())
    }

    async fn find_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                (&m.sender_id == a && &m.receiver_id == b)
                    || (&m.sender_id == b && &m.receiver_id == a)
            })
            .cloned()
            .collect())
    }

    async fn find_between_with_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<MessageWithUsers>, StoreError> {
        self.check_directory()?;
        let messages = self.find_between(a, b).await?;
        let users = self.users.lock().unwrap();
        let details = |id: &UserId| {
            users
                .get(id)
                .map(|u| (u.name.clone(), u.email.clone()))
                .unwrap_or_default()
        };
        Ok(messages
            .into_iter()
            .map(|message| {
                let (sender_name, sender_email) = details(&message.sender_id);
                let (receiver_name, receiver_email) = details(&message.receiver_id);
                MessageWithUsers {
                    message,
                    sender_name,
                    sender_email,
                    receiver_name,
                    receiver_email,
                }
            })
            .collect())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.check_directory()?;
        self.users.lock().unwrap().insert(user.id.clone(), user);
        Ok(())
    }

    async fn find_users(&self, ids: Vec<UserId>) -> Result<HashMap<UserId, User>, StoreError> {
        self.check_directory()?;
        let users = self.users.lock().unwrap();
        Ok(ids
            .into_iter()
            .filter_map(|id| users.get(&id).cloned().map(|u| (id, u)))
            .collect())
    }

    async fn info(&self) -> Result<DatabaseInfo, StoreError> {
        Ok(DatabaseInfo {
            database_name: ":memory:".to_string(),
            version: "recording".to_string(),
            table_count: 2,
            key_tables: vec!["messages".to_string(), "users".to_string()],
            connection_valid: true,
        })
    }
}

/// Presence store whose every call fails.
pub struct FailingPresenceStore;

#[async_trait]
impl PresenceStore for FailingPresenceStore {
    async fn mark_online(&self, _: &UserId, _: &OnlineUser) -> Result<(), PresenceError> {
        Err(unavailable())
    }

    async fn mark_offline(&self, _: &UserId) -> Result<(), PresenceError> {
        Err(unavailable())
    }

    async fn is_online(&self, _: &UserId) -> Result<bool, PresenceError> {
        Err(unavailable())
    }

    async fn list_online(&self) -> Result<Vec<OnlineUser>, PresenceError> {
        Err(unavailable())
    }
}

/// Presence store whose calls never complete.
pub struct HangingPresenceStore;

#[async_trait]
impl PresenceStore for HangingPresenceStore {
    async fn mark_online(&self, _: &UserId, _: &OnlineUser) -> Result<(), PresenceError> {
        std::future::pending().await
    }

    async fn mark_offline(&self, _: &UserId) -> Result<(), PresenceError> {
        std::future::pending().await
    }

    async fn is_online(&self, _: &UserId) -> Result<bool, PresenceError> {
        std::future::pending().await
    }

    async fn list_online(&self) -> Result<Vec<OnlineUser>, PresenceError> {
        std::future::pending().await
    }
}

fn unavailable() -> PresenceError {
    PresenceError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "presence backend unavailable",
    )))
}
