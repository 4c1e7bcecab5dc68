//! Process-wide directory of live connections.
//!
//! The [`Hub`] is the only component that routes a payload to a specific
//! user's connection. Writes (register/unregister) take the registry's
//! exclusive lock; routing holds the shared lock for the whole
//! lookup-and-enqueue step, so a connection cannot be swapped out between
//! the two.
//!
//! Presence updates are best-effort: failures are logged and never undo a
//! registry change. They are serialized through a separate gate so that
//! presence calls land in the same order as the registry mutations that
//! caused them, without holding the routing lock across presence I/O.
//! Every presence call is bounded by the hub's presence timeout, so a
//! stalled backend delays registrations by at most that long per call and
//! never blocks routing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_shared::constants::DEFAULT_PRESENCE_TIMEOUT_MS;
use courier_shared::{OnlineUser, UserId};

use crate::connection::ConnectionHandle;
use crate::presence::{PresenceError, PresenceStore};

pub struct Hub {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
    presence: Arc<dyn PresenceStore>,
    presence_timeout: Duration,
    registration_gate: Mutex<()>,
}

impl Hub {
    pub fn new(presence: Arc<dyn PresenceStore>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            presence,
            presence_timeout: Duration::from_millis(DEFAULT_PRESENCE_TIMEOUT_MS),
            registration_gate: Mutex::new(()),
        }
    }

    pub fn with_presence_timeout(mut self, timeout: Duration) -> Self {
        self.presence_timeout = timeout;
        self
    }

    /// Make `handle` the route for `user_id` and mark the user online.
    ///
    /// A previous connection for the same user is replaced. Dropping its
    /// handle closes its outbound queue, so its write loop flushes what is
    /// left, closes the socket, and the connection winds down.
    pub async fn register(&self, user_id: UserId, handle: ConnectionHandle, data: OnlineUser) {
        let _gate = self.registration_gate.lock().await;

        let previous = {
            let mut conns = self.connections.write().await;
            conns.insert(user_id.clone(), handle)
        };

        if let Some(previous) = previous {
            info!(
                user = %user_id,
                replaced = %previous.id(),
                "Replacing existing connection"
            );
            drop(previous);
        } else {
            info!(user = %user_id, "Connection registered");
        }

        if let Err(e) = self
            .bounded(self.presence.mark_online(&user_id, &data))
            .await
        {
            warn!(user = %user_id, error = %e, "Failed to mark user online");
        }
    }

    /// Remove whatever connection is registered for `user_id`.
    ///
    /// Returns `true` if an entry was removed. The user is marked offline
    /// either way.
    pub async fn unregister(&self, user_id: &UserId) -> bool {
        let _gate = self.registration_gate.lock().await;

        let removed = self.connections.write().await.remove(user_id).is_some();
        if removed {
            info!(user = %user_id, "Connection unregistered");
        }

        self.mark_offline(user_id).await;
        removed
    }

    /// Remove the entry for `user_id` only if it still belongs to
    /// `connection_id`.
    ///
    /// Used by a connection tearing itself down: a connection that was
    /// already replaced must not evict its successor or mark the user
    /// offline.
    pub async fn unregister_connection(&self, user_id: &UserId, connection_id: Uuid) -> bool {
        let _gate = self.registration_gate.lock().await;

        let removed = {
            let mut conns = self.connections.write().await;
            match conns.get(user_id) {
                Some(current) if current.id() == connection_id => {
                    conns.remove(user_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            info!(user = %user_id, connection = %connection_id, "Connection unregistered");
            self.mark_offline(user_id).await;
        } else {
            debug!(
                user = %user_id,
                connection = %connection_id,
                "Superseded connection closed, registry untouched"
            );
        }
        removed
    }

    /// Hand `payload` to the receiver's connection if one is registered.
    ///
    /// Returns `true` when a route existed, even if the connection then
    /// dropped the payload because its queue was full. An absent receiver
    /// is a silent no-op.
    pub async fn send_message(&self, receiver_id: &UserId, payload: String) -> bool {
        let conns = self.connections.read().await;
        match conns.get(receiver_id) {
            Some(conn) => {
                conn.send(payload);
                true
            }
            None => false,
        }
    }

    /// Externally visible presence, read from the presence store rather
    /// than the local registry. Store errors read as offline.
    pub async fn is_online(&self, user_id: &UserId) -> bool {
        match self.bounded(self.presence.is_online(user_id)).await {
            Ok(online) => online,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Presence lookup failed");
                false
            }
        }
    }

    pub async fn list_online(&self) -> Result<Vec<OnlineUser>, PresenceError> {
        self.bounded(self.presence.list_online()).await
    }

    /// Whether this process can route to `user_id` right now.
    pub async fn is_connected(&self, user_id: &UserId) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn mark_offline(&self, user_id: &UserId) {
        if let Err(e) = self.bounded(self.presence.mark_offline(user_id)).await {
            warn!(user = %user_id, error = %e, "Failed to mark user offline");
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, PresenceError>>,
    ) -> Result<T, PresenceError> {
        let limit = self.presence_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| PresenceError::Timeout(limit))?
    }
}
