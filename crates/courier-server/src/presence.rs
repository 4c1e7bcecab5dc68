//! Presence tracking: who is connected right now, and as whom.
//!
//! Presence is advisory. The [`Hub`](crate::hub::Hub) registry alone decides
//! whether a message can be routed in this process; the presence store is
//! a shared record that other processes (and the REST "who's online"
//! query) read.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use courier_shared::constants::{PRESENCE_DATA_KEY, PRESENCE_SET_KEY};
use courier_shared::{OnlineUser, UserId};

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("presence store did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn mark_online(&self, user_id: &UserId, data: &OnlineUser) -> Result<(), PresenceError>;

    async fn mark_offline(&self, user_id: &UserId) -> Result<(), PresenceError>;

    async fn is_online(&self, user_id: &UserId) -> Result<bool, PresenceError>;

    async fn list_online(&self) -> Result<Vec<OnlineUser>, PresenceError>;
}

// ---------------------------------------------------------------------------
// In-process store
// ---------------------------------------------------------------------------

/// Presence kept in this process. Suitable for single-node deployments
/// and tests.
#[derive(Clone, Default)]
pub struct MemoryPresenceStore {
    users: Arc<RwLock<HashMap<UserId, OnlineUser>>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn mark_online(&self, user_id: &UserId, data: &OnlineUser) -> Result<(), PresenceError> {
        self.users
            .write()
            .await
            .insert(user_id.clone(), data.clone());
        Ok(())
    }

    async fn mark_offline(&self, user_id: &UserId) -> Result<(), PresenceError> {
        self.users.write().await.remove(user_id);
        Ok(())
    }

    async fn is_online(&self, user_id: &UserId) -> Result<bool, PresenceError> {
        Ok(self.users.read().await.contains_key(user_id))
    }

    async fn list_online(&self) -> Result<Vec<OnlineUser>, PresenceError> {
        let mut users: Vec<OnlineUser> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }
}

// ---------------------------------------------------------------------------
// Redis store
// ---------------------------------------------------------------------------

/// Presence shared through Redis.
///
/// Records live in the hash `online_users_data` (user id -> JSON record);
/// the set `online_users` mirrors its keys for cheap membership checks.
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: MultiplexedConnection,
}

impl RedisPresenceStore {
    pub async fn connect(url: &str) -> Result<Self, PresenceError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis presence store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn mark_online(&self, user_id: &UserId, data: &OnlineUser) -> Result<(), PresenceError> {
        let payload = serde_json::to_string(data)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .cmd("HSET")
            .arg(PRESENCE_DATA_KEY)
            .arg(user_id.as_str())
            .arg(payload)
            .ignore()
            .cmd("SADD")
            .arg(PRESENCE_SET_KEY)
            .arg(user_id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_offline(&self, user_id: &UserId) -> Result<(), PresenceError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .cmd("HDEL")
            .arg(PRESENCE_DATA_KEY)
            .arg(user_id.as_str())
            .ignore()
            .cmd("SREM")
            .arg(PRESENCE_SET_KEY)
            .arg(user_id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_online(&self, user_id: &UserId) -> Result<bool, PresenceError> {
        let mut conn = self.conn.clone();
        let member: bool = redis::cmd("SISMEMBER")
            .arg(PRESENCE_SET_KEY)
            .arg(user_id.as_str())
            .query_async::<_, bool>(&mut conn)
            .await?;
        Ok(member)
    }

    async fn list_online(&self) -> Result<Vec<OnlineUser>, PresenceError> {
        let mut conn = self.conn.clone();
        let records: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(PRESENCE_DATA_KEY)
            .query_async::<_, HashMap<String, String>>(&mut conn)
            .await?;
        Ok(decode_records(records))
    }
}

fn decode_records(records: HashMap<String, String>) -> Vec<OnlineUser> {
    let mut users: Vec<OnlineUser> = records
        .into_iter()
        .filter_map(|(id, json)| match serde_json::from_str::<OnlineUser>(&json) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(user = %id, error = %e, "Skipping undecodable presence record");
                None
            }
        })
        .collect();
    users.sort_by(|a, b| a.id.cmp(&b.id));
    users
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> OnlineUser {
        OnlineUser {
            id: UserId::from(id),
            name: format!("user {id}"),
            role: "member".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_online_offline() {
        let store = MemoryPresenceStore::new();
        let alice = user("alice");

        store.mark_online(&alice.id, &alice).await.unwrap();
        assert!(store.is_online(&alice.id).await.unwrap());
        assert_eq!(store.list_online().await.unwrap(), vec![alice.clone()]);

        store.mark_offline(&alice.id).await.unwrap();
        assert!(!store.is_online(&alice.id).await.unwrap());
        assert!(store.list_online().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_mark_online_overwrites_record() {
        let store = MemoryPresenceStore::new();
        let mut alice = user("alice");
        store.mark_online(&alice.id, &alice).await.unwrap();

        alice.role = "admin".to_string();
        store.mark_online(&alice.id, &alice).await.unwrap();

        let online = store.list_online().await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].role, "admin");
    }

    #[test]
    fn test_decode_skips_bad_records() {
        let mut records = HashMap::new();
        records.insert(
            "b".to_string(),
            serde_json::to_string(&user("b")).unwrap(),
        );
        records.insert("x".to_string(), "{not json".to_string());
        records.insert(
            "a".to_string(),
            serde_json::to_string(&user("a")).unwrap(),
        );

        let users = decode_records(records);
        let ids: Vec<_> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
