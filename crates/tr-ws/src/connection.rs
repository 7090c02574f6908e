//! WebSocket connection management
//!
//! A [`Connection`] is one handshaken socket plus its [`Correlator`]. A
//! single background task owns the transport: it writes queued frames and
//! dispatches every inbound frame. When the socket breaks, every pending
//! call fails and the connection stays dead; replacing it is up to the
//! caller (see [`Connector`]).

use crate::correlator::{CallOptions, Correlator, Response};
use crate::endpoint::Endpoint;
use crate::transport::{Transport, WsTransport};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tr_types::{ConnectConfig, ConnectionError, InboundFrame, OutboundFrame, Topic, TrError};
use tracing::{debug, info, instrument, warn};

/// WebSocket connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected and ready
    Connected,
    /// Shutting down
    ShuttingDown,
}

/// Configuration for the WebSocket connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint
    pub endpoint: Endpoint,
    /// Client description sent in the handshake
    pub client: ConnectConfig,
    /// Socket connect timeout
    pub connect_timeout: Duration,
    /// Time allowed for the `connected` acknowledgement
    pub handshake_timeout: Duration,
    /// Default per-call deadline
    pub call_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Production,
            client: ConnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl ConnectionConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the locale announced in the handshake
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.client = self.client.with_locale(locale);
        self
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the default per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Live, handshaken connection
pub struct Connection {
    endpoint: String,
    correlator: Arc<Correlator>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect (if needed), perform the handshake and start the I/O task
    #[instrument(skip_all, fields(url = %transport.endpoint()))]
    pub async fn open<T>(mut transport: T, config: &ConnectionConfig) -> Result<Self, TrError>
    where
        T: Transport + 'static,
    {
        let endpoint = transport.endpoint().to_string();

        if !transport.is_connected() {
            transport
                .connect()
                .await
                .map_err(|e| e.into_connection_error(&endpoint))?;
        }

        handshake(&mut transport, config).await?;
        info!("Connected to {}", endpoint);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let correlator = Arc::new(Correlator::new(outbound_tx, config.call_timeout));
        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        let task = tokio::spawn(run_io(
            transport,
            correlator.clone(),
            outbound_rx,
            shutdown_rx,
            state.clone(),
        ));

        Ok(Self {
            endpoint,
            correlator,
            state,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Issue a correlated call
    pub async fn call(&self, topic: Topic, options: CallOptions) -> Result<Response, TrError> {
        if self.state() == ConnectionState::ShuttingDown {
            return Err(TrError::ShuttingDown);
        }
        self.correlator.call(topic, options).await
    }

    /// Issue a call resolving on the first answer, with the default deadline
    pub async fn snapshot(&self, topic: Topic) -> Result<Response, TrError> {
        self.call(topic, CallOptions::snapshot()).await
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of in-flight calls
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Close the socket and wait for the I/O task to finish
    pub async fn close(&self) {
        *self.state.write() = ConnectionState::ShuttingDown;
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.get_mut().take() {
            let _ = tx.send(());
        }
    }
}

async fn handshake<T: Transport>(transport: &mut T, config: &ConnectionConfig) -> Result<(), TrError> {
    let url = transport.endpoint().to_string();
    let frame = OutboundFrame::Connect(config.client.clone()).encode()?;
    transport
        .send(&frame)
        .await
        .map_err(|e| e.into_connection_error(&url))?;

    match timeout(config.handshake_timeout, await_ack(transport, &url)).await {
        Ok(result) => result.map_err(TrError::from),
        Err(_) => Err(ConnectionError::Handshake(format!(
            "no acknowledgement within {:?}",
            config.handshake_timeout
        ))
        .into()),
    }
}

async fn await_ack<T: Transport>(transport: &mut T, url: &str) -> Result<(), ConnectionError> {
    loop {
        let text = transport
            .recv()
            .await
            .map_err(|e| e.into_connection_error(url))?;
        match InboundFrame::parse(&text) {
            Ok(InboundFrame::Connected) => return Ok(()),
            Ok(InboundFrame::Echo) => continue,
            _ => return Err(ConnectionError::Handshake(format!("unexpected reply: {}", text))),
        }
    }
}

async fn run_io<T: Transport>(
    mut transport: T,
    correlator: Arc<Correlator>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Closing connection");
                if let Err(e) = transport.close().await {
                    debug!("Close failed: {}", e);
                }
                break "connection closed".to_string();
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = transport.send(&frame).await {
                    warn!("Send failed: {}", e);
                    break e.to_string();
                }
            }
            received = transport.recv() => match received {
                Ok(text) => match InboundFrame::parse(&text) {
                    Ok(frame) => correlator.dispatch(frame),
                    Err(e) => warn!("Dropping malformed frame: {}", e),
                },
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break e.to_string();
                }
            },
        }
    };

    {
        let mut state = state.write();
        if *state != ConnectionState::ShuttingDown {
            *state = ConnectionState::Disconnected;
        }
    }
    correlator.fail_all(&reason);
}

/// Opens new connections
///
/// Lets callers replace a dead connection without knowing the transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh, handshaken connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, TrError>;
}

/// Connector over real WebSockets
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, TrError> {
        let transport = WsTransport::new(config.endpoint.url()).with_timeout(config.connect_timeout);
        Connection::open(transport, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{parse_subscription, MockReply, MockTransport};
    use serde_json::json;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new()
            .with_endpoint(Endpoint::Custom("wss://mock.test".into()))
            .with_handshake_timeout(Duration::from_millis(200))
            .with_call_timeout(Duration::from_millis(500))
    }

    fn cash_topic() -> Topic {
        Topic::AvailableCash { token: "tok".into() }
    }

    #[test]
    fn test_connection_config() {
        let config = ConnectionConfig::new()
            .with_locale("de")
            .with_timeout(Duration::from_secs(5))
            .with_call_timeout(Duration::from_secs(2));

        assert_eq!(config.endpoint, Endpoint::Production);
        assert_eq!(config.client.locale, "de");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.call_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_open_and_call() {
        let (transport, server) = MockTransport::pair("wss://mock.test");
        server.serve(|id, topic| {
            assert_eq!(topic["type"], "availableCash");
            MockReply::Frames(vec![format!(r#"{} A [{{"amount":12.5}}]"#, id)])
        });

        let conn = Connection::open(transport, &config()).await.unwrap();
        assert!(conn.is_connected());

        let response = conn.snapshot(cash_topic()).await.unwrap();
        assert_eq!(response.json().unwrap(), json!([{"amount": 12.5}]));

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::ShuttingDown);
        assert!(!conn.is_connected());
        assert!(matches!(conn.snapshot(cash_topic()).await, Err(TrError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let (transport, mut server) = MockTransport::pair("wss://mock.test");
        tokio::spawn(async move {
            server.next_sent().await;
            server.push("nope");
            // keep the server alive until the client gives up
            server.next_sent().await;
        });

        let err = Connection::open(transport, &config()).await.err().unwrap();
        assert!(matches!(err, TrError::Connection(ConnectionError::Handshake(_))));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (transport, mut server) = MockTransport::pair("wss://mock.test");
        tokio::spawn(async move {
            while server.next_sent().await.is_some() {}
        });

        let err = Connection::open(transport, &config()).await.err().unwrap();
        assert!(matches!(err, TrError::Connection(ConnectionError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (mut transport, _server) = MockTransport::pair("wss://mock.test");
        transport.fail_connect = true;

        let err = Connection::open(transport, &config()).await.err().unwrap();
        assert!(matches!(err, TrError::Connection(ConnectionError::Refused { .. })));
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_calls_with_interleaved_frames() {
        let (transport, mut server) = MockTransport::pair("wss://mock.test");
        let config = config();
        let conn = Arc::new({
            let opening = Connection::open(transport, &config);
            let (conn, _) = tokio::join!(opening, server.accept_handshake());
            conn.unwrap()
        });

        let first = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.snapshot(Topic::TimelineDetail { id: "first".into(), token: "t".into() })
                    .await
            }
        });
        let second = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.snapshot(Topic::TimelineDetail { id: "second".into(), token: "t".into() })
                    .await
            }
        });

        let mut subs = Vec::new();
        while subs.len() < 2 {
            let frame = server.next_sent().await.unwrap();
            if let Some(sub) = parse_subscription(&frame) {
                subs.push(sub);
            }
        }

        // Second request answered first, with an unrelated frame between
        for (id, topic) in subs.iter().rev() {
            server.push(format!("{} A {{\"echo\":{}}}", id, topic["id"]));
            server.push("777 A {}");
        }

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.json().unwrap()["echo"], "first");
        assert_eq!(second.json().unwrap()["echo"], "second");
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_lost_fails_pending_calls() {
        let (transport, mut server) = MockTransport::pair("wss://mock.test");
        let config = config();
        let conn = Arc::new({
            let opening = Connection::open(transport, &config);
            let (conn, _) = tokio::join!(opening, server.accept_handshake());
            conn.unwrap()
        });

        let calls: Vec<_> = (0..2)
            .map(|_| {
                let conn = conn.clone();
                tokio::spawn(async move { conn.snapshot(cash_topic()).await })
            })
            .collect();

        server.next_sent().await.unwrap();
        server.next_sent().await.unwrap();
        server.disconnect("reset by peer");

        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, TrError::Connection(ConnectionError::Lost(_))));
        }
        assert!(!conn.is_connected());
        assert!(conn.snapshot(cash_topic()).await.unwrap_err().requires_reconnect());
    }

    #[tokio::test]
    async fn test_call_timeout_keeps_connection() {
        let (transport, server) = MockTransport::pair("wss://mock.test");
        server.serve(|id, topic| {
            if topic["id"] == "slow" {
                MockReply::Ignore
            } else {
                MockReply::Frames(vec![format!("{} A {{}}", id)])
            }
        });
        let conn = Connection::open(transport, &config()).await.unwrap();

        let slow = conn
            .call(
                Topic::TimelineDetail { id: "slow".into(), token: "t".into() },
                CallOptions::snapshot().with_timeout(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(slow, Err(TrError::Timeout { .. })));
        assert!(conn.is_connected());

        let fast = conn
            .snapshot(Topic::TimelineDetail { id: "fast".into(), token: "t".into() })
            .await;
        assert!(fast.is_ok());
    }
}
