//! A real server on an ephemeral port, plus clients for it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use courier_server::api::{self, AppState};
use courier_server::auth::{Authenticator, Claims};
use courier_server::batch::DeliveryBatcher;
use courier_server::config::ServerConfig;
use courier_server::delivery::DeliveryPipeline;
use courier_server::hub::Hub;
use courier_server::presence::MemoryPresenceStore;
use courier_server::store::SqliteMessageStore;
use courier_shared::UserId;

pub const SECRET: &str = "integration-secret";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Arc<Hub>,
    pub http: reqwest::Client,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Start with socket deliveries batched every `batch_interval`.
    pub async fn start_with(batch_interval: Option<Duration>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            database_path: dir.path().join("courier.db"),
            jwt_secret: Some(SECRET.to_string()),
            delivery_batch_interval: batch_interval,
            ..ServerConfig::default()
        };

        let store = Arc::new(SqliteMessageStore::open(&config.database_path).unwrap());
        let hub = Arc::new(Hub::new(Arc::new(MemoryPresenceStore::new())));
        let mut pipeline = DeliveryPipeline::new(hub.clone(), store);
        if let Some(interval) = config.delivery_batch_interval {
            let batcher = DeliveryBatcher::spawn(pipeline.dispatcher().clone(), interval);
            pipeline = pipeline.with_batcher(batcher);
        }
        let authenticator = Authenticator::from_config(&config).unwrap();
        let state = AppState::new(&config, pipeline, authenticator);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            api::serve_on(state, listener).await.unwrap();
        });

        Self {
            addr,
            hub,
            http: reqwest::Client::new(),
            task,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Open a socket for `user` and wait until the hub can route to it.
    pub async fn connect(&self, user: &str) -> Client {
        let url = format!("ws://{}/ws?token={}", self.addr, token(user));
        let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        self.wait_until(user, true).await;
        client
    }

    pub async fn wait_until(&self, user: &str, connected: bool) {
        let user = UserId::from(user);
        for _ in 0..200 {
            if self.hub.is_connected(&user).await == connected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{user} never reached connected={connected}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn token(user: &str) -> String {
    let claims = Claims {
        sub: user.to_string(),
        name: format!("{user} (test)"),
        email: format!("{user}@example.com"),
        role: "member".to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub async fn send_json(client: &mut Client, value: serde_json::Value) {
    client
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_json(client: &mut Client) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended while waiting for a frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Assert that no text frame arrives within `window`.
pub async fn expect_silence(client: &mut Client, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(text.as_str().to_owned()),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await;
    if let Ok(Some(text)) = result {
        panic!("unexpected frame: {text}");
    }
}
