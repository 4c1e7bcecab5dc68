//! Persist, route, and advance the status of messages.
//!
//! Both entry points (socket frames and REST submissions) run the same
//! steps: take the sender from the authenticated identity, save the message
//! as `sent`, hand it to the hub, and mark it `delivered` if the receiver
//! had a live connection. Socket senders additionally get an
//! acknowledgement frame; REST senders get the message back in the
//! response.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use courier_shared::{Message, MessageRequest, MessageStatus, ProtocolError, ServerFrame, UserId};
use courier_store::{NewMessage, StoreError};

use crate::batch::DeliveryBatcher;
use crate::hub::Hub;
use crate::store::MessageStore;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid message: {0}")]
    Invalid(#[from] ProtocolError),

    #[error("failed to persist message: {0}")]
    Persist(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Dispatcher: the route -> status -> ack stage
// ---------------------------------------------------------------------------

/// Routes already-persisted messages. Shared by the pipeline and the
/// batcher.
#[derive(Clone)]
pub struct Dispatcher {
    hub: Arc<Hub>,
    store: Arc<dyn MessageStore>,
}

impl Dispatcher {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn MessageStore>) -> Self {
        Self { hub, store }
    }

    /// Hand the message to its receiver and record the outcome.
    ///
    /// The status moves to `delivered` whenever the hub had a route, even if
    /// the receiving connection then dropped the payload.
    pub async fn route(&self, mut message: Message) -> Message {
        let payload = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "Failed to encode message");
                return message;
            }
        };

        if !self.hub.send_message(&message.receiver_id, payload).await {
            debug!(
                message_id = message.id,
                receiver = %message.receiver_id,
                "Receiver not connected, message stays sent"
            );
            return message;
        }

        if let Err(e) = self
            .store
            .update_status(message.id, MessageStatus::Delivered)
            .await
        {
            warn!(message_id = message.id, error = %e, "Failed to mark message delivered");
        }
        message.status = MessageStatus::Delivered;
        message
    }

    /// Route, then acknowledge to the sender's own connection.
    pub async fn dispatch(&self, message: Message) -> Message {
        let message = self.route(message).await;
        self.acknowledge(&message).await;
        message
    }

    async fn acknowledge(&self, message: &Message) {
        match serde_json::to_string(&ServerFrame::delivery(message)) {
            Ok(ack) => {
                self.hub.send_message(&message.sender_id, ack).await;
            }
            Err(e) => warn!(message_id = message.id, error = %e, "Failed to encode ack"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DeliveryPipeline {
    hub: Arc<Hub>,
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    batcher: Option<DeliveryBatcher>,
}

impl DeliveryPipeline {
    pub fn new(hub: Arc<Hub>, store: Arc<dyn MessageStore>) -> Self {
        let dispatcher = Dispatcher::new(hub.clone(), store.clone());
        Self {
            hub,
            store,
            dispatcher,
            batcher: None,
        }
    }

    /// Route socket deliveries through `batcher` instead of immediately.
    pub fn with_batcher(mut self, batcher: DeliveryBatcher) -> Self {
        self.batcher = Some(batcher);
        self
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one raw inbound frame. Failures are logged and swallowed so
    /// the connection keeps reading.
    pub async fn handle_frame(&self, sender: &UserId, frame: &[u8]) {
        let request = match MessageRequest::from_json(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(user = %sender, error = %e, "Discarding invalid frame");
                return;
            }
        };

        if let Err(e) = self.submit_from_socket(sender, request).await {
            warn!(user = %sender, error = %e, "Dropping inbound message");
        }
    }

    /// Socket entry point. The sender gets an acknowledgement frame unless
    /// the message was addressed to itself.
    pub async fn submit_from_socket(
        &self,
        sender: &UserId,
        request: MessageRequest,
    ) -> Result<Message, DeliveryError> {
        let message = self.persist(sender, request).await?;

        if message.receiver_id == *sender {
            debug!(user = %sender, message_id = message.id, "Self-addressed message stored, not echoed");
            return Ok(message);
        }

        match &self.batcher {
            Some(batcher) => {
                batcher.enqueue(message.clone()).await;
                Ok(message)
            }
            None => Ok(self.dispatcher.dispatch(message).await),
        }
    }

    /// REST entry point. Always routes immediately; the returned message
    /// carries the resulting status.
    pub async fn submit_from_api(
        &self,
        sender: &UserId,
        request: MessageRequest,
    ) -> Result<Message, DeliveryError> {
        let message = self.persist(sender, request).await?;

        if message.receiver_id == *sender {
            return Ok(message);
        }

        Ok(self.dispatcher.route(message).await)
    }

    async fn persist(
        &self,
        sender: &UserId,
        request: MessageRequest,
    ) -> Result<Message, DeliveryError> {
        request.validate()?;

        if let Some(claimed) = &request.sender_id {
            if claimed != sender {
                debug!(user = %sender, claimed = %claimed, "Ignoring client-supplied sender");
            }
        }

        let message = self
            .store
            .save(NewMessage {
                sender_id: sender.clone(),
                receiver_id: request.receiver_id,
                content: request.content,
                status: MessageStatus::Sent,
            })
            .await?;

        debug!(
            message_id = message.id,
            sender = %message.sender_id,
            receiver = %message.receiver_id,
            "Message persisted"
        );
        Ok(message)
    }
}
