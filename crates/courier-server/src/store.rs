//! The durable message log as seen by the delivery pipeline.
//!
//! [`SqliteMessageStore`] adapts the synchronous `courier_store::Database`
//! to async callers by running every query on the blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use courier_shared::{Message, MessageId, MessageStatus, UserId};
use courier_store::{Database, DatabaseInfo, MessageWithUsers, NewMessage, StoreError, User};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message; the store assigns its id and creation time.
    async fn save(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError>;

    /// Messages exchanged between `a` and `b`, oldest first.
    async fn find_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError>;

    /// [`find_between`](Self::find_between) with participant names and
    /// emails from the user directory.
    async fn find_between_with_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<MessageWithUsers>, StoreError>;

    /// Record or refresh a user directory entry.
    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    /// Directory entries for `ids`; unknown ids are absent.
    async fn find_users(&self, ids: Vec<UserId>) -> Result<HashMap<UserId, User>, StoreError>;

    async fn info(&self) -> Result<DatabaseInfo, StoreError>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteMessageStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| {
                StoreError::Io(std::io::Error::other(format!("Lock poisoned: {e}")))
            })?;
            f(&*guard)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.with_db(move |db| db.insert_message(&message)).await
    }

    async fn update_status(&self, id: MessageId, status: MessageStatus) -> Result<(), StoreError> {
        self.with_db(move |db| db.update_message_status(id, status))
            .await
    }

    async fn find_between(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>, StoreError> {
        let (a, b) = (a.clone(), b.clone());
        self.with_db(move |db| db.get_messages_between(&a, &b))
            .await
    }

    async fn find_between_with_users(
        &self,
        a: &UserId,
        b: &UserId,
    ) -> Result<Vec<MessageWithUsers>, StoreError> {
        let (a, b) = (a.clone(), b.clone());
        self.with_db(move |db| db.get_messages_between_with_users(&a, &b))
            .await
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        self.with_db(move |db| db.upsert_user(&user)).await
    }

    async fn find_users(&self, ids: Vec<UserId>) -> Result<HashMap<UserId, User>, StoreError> {
        self.with_db(move |db| db.get_users_by_ids(&ids)).await
    }

    async fn info(&self) -> Result<DatabaseInfo, StoreError> {
        self.with_db(|db| db.info()).await
    }
}
