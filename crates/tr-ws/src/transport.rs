//! WebSocket transport abstraction
//!
//! This module provides a trait-based abstraction over the WebSocket socket,
//! enabling unit testing of the connection logic without real network calls.
//!
//! # Example
//!
//! ```no_run
//! use tr_ws::transport::{Transport, WsTransport, TransportError};
//!
//! async fn example() -> Result<(), TransportError> {
//!     let mut transport = WsTransport::new("wss://api.traderepublic.com");
//!     transport.connect().await?;
//!     transport.send(r#"connect 31 {"locale":"fr"}"#).await?;
//!     let response = transport.recv().await?;
//!     println!("Received: {}", response);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tr_types::ConnectionError;
use tracing::{debug, instrument};

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection attempt failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Socket closed unexpectedly or broke while in use
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// Not connected
    #[error("not connected")]
    NotConnected,

    /// Non-text payload that could not be decoded
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Convert into the shared connection error, naming the endpoint
    pub fn into_connection_error(self, url: &str) -> ConnectionError {
        match self {
            Self::ConnectionFailed(reason) => ConnectionError::Refused {
                url: url.to_string(),
                reason,
            },
            Self::Timeout(timeout) => ConnectionError::ConnectTimeout {
                url: url.to_string(),
                timeout,
            },
            Self::NotConnected => ConnectionError::Closed,
            Self::ConnectionLost(reason) | Self::SendFailed(reason) | Self::Protocol(reason) => {
                ConnectionError::Lost(reason)
            }
        }
    }
}

/// Trait for WebSocket transport abstraction
///
/// Exactly one live socket per transport. No implementation retries
/// internally; reconnection is the caller's decision.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the WebSocket endpoint
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send a text frame
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next text frame
    ///
    /// A close frame or a broken socket yields
    /// [`TransportError::ConnectionLost`], never an empty frame.
    /// Must be cancellation safe: dropping the future loses no frame.
    async fn recv(&mut self) -> Result<String, TransportError>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Get the endpoint URL
    fn endpoint(&self) -> &str;
}

/// Real WebSocket transport using tokio-tungstenite
pub struct WsTransport {
    url: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    connect_timeout: Duration,
}

impl WsTransport {
    /// Create a new WebSocket transport
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&mut self) -> Result<(), TransportError> {
        debug!("Connecting to WebSocket");

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        self.stream = Some(ws_stream);
        debug!("WebSocket connected");
        Ok(())
    }

    #[instrument(skip(self, message), fields(len = message.len()))]
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = stream.send(Message::Text(message.to_string())).await {
            self.stream = None;
            return Err(TransportError::ConnectionLost(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, TransportError> {
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| TransportError::Protocol(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    self.stream = None;
                    let reason = frame
                        .map(|f| format!("closed by server ({})", f.code))
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Err(TransportError::ConnectionLost(reason));
                }
                // Pongs are answered by tungstenite on the next flush
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(TransportError::ConnectionLost(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(TransportError::ConnectionLost("stream ended".into()));
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .close(None)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{parse_subscription, MockReply, MockServer, MockTransport};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::{Transport, TransportError};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    enum MockEvent {
        Frame(String),
        Disconnect(String),
    }

    /// Mock transport for testing
    ///
    /// Paired with a [`MockServer`] that sees every frame the client sends and
    /// pushes arbitrary inbound frames, in any order, or a connection drop.
    pub struct MockTransport {
        url: String,
        connected: bool,
        to_server: mpsc::UnboundedSender<String>,
        from_server: mpsc::UnboundedReceiver<MockEvent>,
        /// Simulate connection failure
        pub fail_connect: bool,
    }

    /// Scripted server side of a [`MockTransport`]
    pub struct MockServer {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<MockEvent>,
    }

    /// What a served mock answers to one subscription
    #[derive(Debug, Clone)]
    pub enum MockReply {
        /// Push these frames, in order
        Frames(Vec<String>),
        /// Push these frames after a delay, without holding up later requests
        Delayed(Duration, Vec<String>),
        /// Never answer
        Ignore,
        /// Drop the connection
        Disconnect,
    }

    impl MockTransport {
        /// Create a connected-on-demand mock and its server
        pub fn pair(url: impl Into<String>) -> (Self, MockServer) {
            let (to_server, from_client) = mpsc::unbounded_channel();
            let (to_client, from_server) = mpsc::unbounded_channel();
            let transport = Self {
                url: url.into(),
                connected: false,
                to_server,
                from_server,
                fail_connect: false,
            };
            let server = MockServer {
                from_client,
                to_client,
            };
            (transport, server)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            if self.fail_connect {
                return Err(TransportError::ConnectionFailed(
                    "mock connection failure".into(),
                ));
            }
            self.connected = true;
            Ok(())
        }

        async fn send(&mut self, message: &str) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            self.to_server.send(message.to_string()).map_err(|_| {
                self.connected = false;
                TransportError::ConnectionLost("mock server gone".into())
            })
        }

        async fn recv(&mut self) -> Result<String, TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            match self.from_server.recv().await {
                Some(MockEvent::Frame(text)) => Ok(text),
                Some(MockEvent::Disconnect(reason)) => {
                    self.connected = false;
                    Err(TransportError::ConnectionLost(reason))
                }
                None => {
                    self.connected = false;
                    Err(TransportError::ConnectionLost("mock server gone".into()))
                }
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn endpoint(&self) -> &str {
            &self.url
        }
    }

    impl MockServer {
        /// Next frame sent by the client, `None` once the client is gone
        pub async fn next_sent(&mut self) -> Option<String> {
            self.from_client.recv().await
        }

        /// Push an inbound frame to the client
        pub fn push(&self, frame: impl Into<String>) {
            let _ = self.to_client.send(MockEvent::Frame(frame.into()));
        }

        /// Break the connection
        pub fn disconnect(&self, reason: impl Into<String>) {
            let _ = self.to_client.send(MockEvent::Disconnect(reason.into()));
        }

        /// Wait for the `connect` frame and acknowledge it
        pub async fn accept_handshake(&mut self) -> Option<String> {
            let frame = self.next_sent().await?;
            if frame.starts_with("connect ") {
                self.push("connected");
            }
            Some(frame)
        }

        /// Answer every subscription with `handler` until the client goes away
        ///
        /// The handshake is acknowledged and `unsub` frames are ignored.
        pub fn serve<F>(mut self, mut handler: F) -> JoinHandle<()>
        where
            F: FnMut(u64, Value) -> MockReply + Send + 'static,
        {
            tokio::spawn(async move {
                while let Some(frame) = self.next_sent().await {
                    if frame.starts_with("connect ") {
                        self.push("connected");
                        continue;
                    }
                    let Some((id, topic)) = parse_subscription(&frame) else {
                        continue;
                    };
                    match handler(id, topic) {
                        MockReply::Frames(frames) => frames.into_iter().for_each(|f| self.push(f)),
                        MockReply::Delayed(delay, frames) => {
                            let to_client = self.to_client.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                for frame in frames {
                                    let _ = to_client.send(MockEvent::Frame(frame));
                                }
                            });
                        }
                        MockReply::Ignore => {}
                        MockReply::Disconnect => {
                            self.disconnect("mock disconnect");
                            return;
                        }
                    }
                }
            })
        }
    }

    /// Split a `sub <id> <json>` frame
    pub fn parse_subscription(frame: &str) -> Option<(u64, Value)> {
        let rest = frame.strip_prefix("sub ")?;
        let (id, body) = rest.split_once(' ')?;
        Some((id.parse().ok()?, serde_json::from_str(body).ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_send_recv() {
        let (mut transport, mut server) = MockTransport::pair("wss://mock.test");
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        transport.send("connect 31 {}").await.unwrap();
        assert_eq!(server.accept_handshake().await.unwrap(), "connect 31 {}");
        assert_eq!(transport.recv().await.unwrap(), "connected");
    }

    #[tokio::test]
    async fn test_mock_transport_connection_failure() {
        let (mut transport, _server) = MockTransport::pair("wss://mock.test");
        transport.fail_connect = true;

        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
        assert_eq!(
            transport.send("x").await.unwrap_err(),
            TransportError::NotConnected
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_connection_lost() {
        let (mut transport, server) = MockTransport::pair("wss://mock.test");
        transport.connect().await.unwrap();

        server.disconnect("reset");
        let err = transport.recv().await.unwrap_err();
        assert_eq!(err, TransportError::ConnectionLost("reset".into()));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_server_drop_is_connection_lost() {
        let (mut transport, server) = MockTransport::pair("wss://mock.test");
        transport.connect().await.unwrap();
        drop(server);

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionLost(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_does_not_block_next_request() {
        let (mut transport, server) = MockTransport::pair("wss://mock.test");
        server.serve(|id, _| {
            if id == 1 {
                MockReply::Delayed(Duration::from_millis(100), vec!["1 A {}".into()])
            } else {
                MockReply::Frames(vec![format!("{} A {{}}", id)])
            }
        });
        transport.connect().await.unwrap();

        let start = tokio::time::Instant::now();
        transport.send(r#"sub 1 {"type":"availableCash"}"#).await.unwrap();
        transport.send(r#"sub 2 {"type":"availableCash"}"#).await.unwrap();

        assert_eq!(transport.recv().await.unwrap(), "2 A {}");
        assert_eq!(transport.recv().await.unwrap(), "1 A {}");
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_subscription() {
        let (id, topic) = parse_subscription(r#"sub 7 {"type":"availableCash"}"#).unwrap();
        assert_eq!(id, 7);
        assert_eq!(topic["type"], "availableCash");
        assert!(parse_subscription("unsub 7").is_none());
    }

    #[test]
    fn test_error_mapping() {
        let err = TransportError::Timeout(Duration::from_secs(3)).into_connection_error("wss://x");
        assert!(matches!(err, ConnectionError::ConnectTimeout { .. }));

        let err = TransportError::ConnectionLost("eof".into()).into_connection_error("wss://x");
        assert_eq!(err, ConnectionError::Lost("eof".into()));
    }
}
