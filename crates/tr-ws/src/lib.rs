//! WebSocket client core for the Trade Republic API
//!
//! This crate owns the socket and the request/response plumbing on top of it:
//! the `connect` handshake, `sub`/`unsub` framing, and correlation of the
//! server's `A`/`D`/`C`/`E` frames to the calls waiting for them.
//!
//! # Features
//!
//! - One background I/O task per connection, no shared socket halves
//! - Concurrent calls multiplexed by request id
//! - Per-call deadlines that never disturb other calls
//! - Multi-part answers with delta decoding
//! - Bounded retry schedule and a shared request throttle
//!
//! # Example
//!
//! ```no_run
//! use tr_ws::{Connection, ConnectionConfig, Connector, WsConnector};
//! use tr_types::Topic;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new().with_locale("fr");
//!     let conn = WsConnector.connect(&config).await?;
//!
//!     let cash = conn
//!         .snapshot(Topic::AvailableCash { token: "session-token".into() })
//!         .await?;
//!     println!("{}", cash.json()?);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod correlator;
pub mod endpoint;
pub mod retry;
pub mod throttle;
pub mod transport;

// Re-export main types
pub use connection::{Connection, ConnectionConfig, ConnectionState, Connector, WsConnector};
pub use correlator::{CallMode, CallOptions, Correlator, Response};
pub use endpoint::Endpoint;
pub use retry::RetryPolicy;
pub use throttle::{RequestThrottle, SharedThrottle};
pub use transport::{Transport, TransportError, WsTransport};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::{parse_subscription, MockReply, MockServer, MockTransport};
