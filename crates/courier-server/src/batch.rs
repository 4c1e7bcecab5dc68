//! Optional interval batching for socket deliveries.
//!
//! Persisted messages are grouped per receiver and handed to the
//! [`Dispatcher`] on a fixed tick instead of one by one. Order within a
//! receiver's group is the order in which messages were enqueued.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use courier_shared::{Message, UserId};

use crate::delivery::Dispatcher;

const BATCH_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct DeliveryBatcher {
    tx: mpsc::Sender<Message>,
}

impl DeliveryBatcher {
    /// Start the flush task. It runs until every batcher handle is dropped,
    /// then flushes whatever is pending and exits.
    pub fn spawn(dispatcher: Dispatcher, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(BATCH_QUEUE_CAPACITY);
        tokio::spawn(run(dispatcher, interval, rx));
        info!(interval_ms = interval.as_millis() as u64, "Delivery batching enabled");
        Self { tx }
    }

    /// Queue an already-persisted message. Waits if the queue is full, which
    /// only slows down the connection that submitted it.
    pub async fn enqueue(&self, message: Message) {
        let id = message.id;
        if self.tx.send(message).await.is_err() {
            warn!(message_id = id, "Batcher stopped, message stays sent");
        }
    }
}

async fn run(dispatcher: Dispatcher, interval: Duration, mut rx: mpsc::Receiver<Message>) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: HashMap<UserId, Vec<Message>> = HashMap::new();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(message) => {
                    pending
                        .entry(message.receiver_id.clone())
                        .or_default()
                        .push(message);
                }
                None => break,
            },
            _ = ticker.tick() => flush(&dispatcher, &mut pending).await,
        }
    }

    flush(&dispatcher, &mut pending).await;
    debug!("Delivery batcher stopped");
}

async fn flush(dispatcher: &Dispatcher, pending: &mut HashMap<UserId, Vec<Message>>) {
    if pending.is_empty() {
        return;
    }

    for (receiver, messages) in pending.drain() {
        debug!(receiver = %receiver, count = messages.len(), "Flushing batch");
        for message in messages {
            dispatcher.dispatch(message).await;
        }
    }
}
