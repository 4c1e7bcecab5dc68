//! One authenticated WebSocket session and its two loops.
//!
//! ```text
//!   Hub::send_message ──try_send──▶ [bounded queue] ──▶ write loop ──▶ socket
//!   socket ──▶ read loop ──▶ DeliveryPipeline ──▶ Hub
//! ```
//!
//! Producers never wait on a connection: when the queue is full the payload
//! is dropped. The write loop ends when the queue closes (the hub let go of
//! the handle) or a write fails; the read loop ends on a read error, a close
//! frame, an idle timeout, or when the write loop has ended. Leaving the
//! read loop always unregisters the connection and closes the socket.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_shared::UserId;

use crate::delivery::DeliveryPipeline;

/// How long a closing connection waits for its write loop to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Per-connection tuning, taken from [`ServerConfig`](crate::config::ServerConfig).
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub queue_capacity: usize,
    pub ping_interval: Option<Duration>,
    pub idle_timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// The producer side of a connection, as held by the hub.
///
/// When the last handle is dropped the outbound queue closes and the
/// connection's write loop shuts the socket.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: UserId,
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl ConnectionHandle {
    /// A handle and the receiving end of its bounded queue.
    pub fn channel(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Enqueue a payload without waiting. Returns `false` if it was dropped.
    pub fn send(&self, payload: String) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    user = %self.user_id,
                    connection = %self.id,
                    total_drops = total,
                    "Outbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user = %self.user_id, connection = %self.id, "Connection closing, dropping message");
                false
            }
        }
    }

    /// Payloads dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// The consumer side of a connection: owns the queue receiver and runs the
/// socket loops.
pub struct Connection {
    id: Uuid,
    user_id: UserId,
    outbound: mpsc::Receiver<String>,
    ping_interval: Option<Duration>,
    idle_timeout: Option<Duration>,
}

impl Connection {
    /// Create a connection and the handle to register with the hub.
    ///
    /// The connection keeps no sender of its own, so its queue lives exactly
    /// as long as the hub (or whoever else holds a handle) keeps it.
    pub fn new(user_id: UserId, settings: &ConnectionSettings) -> (Self, ConnectionHandle) {
        let (handle, outbound) = ConnectionHandle::channel(user_id.clone(), settings.queue_capacity);
        let conn = Self {
            id: handle.id(),
            user_id,
            outbound,
            ping_interval: settings.ping_interval,
            idle_timeout: settings.idle_timeout,
        };
        (conn, handle)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the connection over an upgraded axum socket until it closes.
    pub async fn run(self, socket: WebSocket, pipeline: DeliveryPipeline) {
        let (sink, stream) = socket.split();
        self.serve(sink, stream, pipeline).await;
    }

    /// Run both loops over an arbitrary frame sink and stream.
    pub async fn serve<W, R, E>(self, sink: W, mut stream: R, pipeline: DeliveryPipeline)
    where
        W: Sink<WsMessage> + Unpin + Send + 'static,
        W::Error: Display,
        R: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: Display,
    {
        let Connection {
            id,
            user_id,
            outbound,
            ping_interval,
            idle_timeout,
        } = self;

        info!(user = %user_id, connection = %id, "Connection opened");

        let mut writer = tokio::spawn(write_loop(sink, outbound, ping_interval, user_id.clone()));
        let mut writer_done = false;

        loop {
            let inbound = tokio::select! {
                inbound = next_inbound(&mut stream, idle_timeout) => inbound,
                _ = &mut writer => {
                    writer_done = true;
                    debug!(user = %user_id, connection = %id, "Write loop ended");
                    break;
                }
            };

            match inbound {
                Inbound::Frame(WsMessage::Text(text)) => {
                    pipeline.handle_frame(&user_id, text.as_bytes()).await;
                }
                Inbound::Frame(WsMessage::Binary(data)) => {
                    pipeline.handle_frame(&user_id, &data).await;
                }
                Inbound::Frame(WsMessage::Close(_)) | Inbound::Closed => {
                    debug!(user = %user_id, connection = %id, "Peer closed connection");
                    break;
                }
                // Ping/pong only refresh the idle timer.
                Inbound::Frame(_) => {}
                Inbound::Idle => {
                    info!(user = %user_id, connection = %id, "Connection idle, closing");
                    break;
                }
                Inbound::Failed(e) => {
                    debug!(user = %user_id, connection = %id, error = %e, "Read error");
                    break;
                }
            }
        }

        // Unregistering drops the hub's handle, which closes the queue and
        // lets the write loop close the socket.
        pipeline.hub().unregister_connection(&user_id, id).await;

        if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            debug!(user = %user_id, connection = %id, "Write loop did not finish, aborting");
            writer.abort();
        }

        info!(user = %user_id, connection = %id, "Connection closed");
    }
}

enum Inbound {
    Frame(WsMessage),
    Closed,
    Idle,
    Failed(String),
}

async fn next_inbound<R, E>(stream: &mut R, idle_timeout: Option<Duration>) -> Inbound
where
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::Idle,
        },
        None => stream.next().await,
    };

    match next {
        Some(Ok(frame)) => Inbound::Frame(frame),
        Some(Err(e)) => Inbound::Failed(e.to_string()),
        None => Inbound::Closed,
    }
}

/// Drain the queue in FIFO order, one frame per payload. Stops when the
/// queue closes or a write fails; either way the socket is closed.
async fn write_loop<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<String>,
    ping_interval: Option<Duration>,
    user_id: UserId,
) where
    W: Sink<WsMessage> + Unpin,
    W::Error: Display,
{
    let mut pinger = ping_interval.map(|every| {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let frame = tokio::select! {
            biased;
            payload = outbound.recv() => match payload {
                Some(payload) => WsMessage::Text(payload),
                None => break,
            },
            _ = tick(&mut pinger) => WsMessage::Ping(Vec::new()),
        };

        if let Err(e) = sink.send(frame).await {
            warn!(user = %user_id, error = %e, "Write failed, closing connection");
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(user = %user_id, error = %e, "Error while closing socket");
    }
}

async fn tick(pinger: &mut Option<Interval>) {
    match pinger {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
