//! High-level client for the Trade Republic transaction timeline
//!
//! This crate ties the pieces together: a reconnecting [`Link`] over the
//! WebSocket connection, a [`Paginator`] that walks the whole timeline, and
//! an [`Enricher`] that attaches per-transaction details.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tr_sdk::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Log in (the code arrives by app notification or SMS)
//!     let api = Arc::new(HttpLoginApi::new()?);
//!     let mut authenticator = Authenticator::new(api.clone(), LoginConfig::default());
//!     let prompt: Arc<dyn SecondFactorPrompt> =
//!         Arc::new(|_: &Challenge| -> Result<SecondFactorInput, AuthError> {
//!             Ok(SecondFactorInput::Code("123456".into()))
//!         });
//!     let session = authenticator
//!         .authenticate(&Credentials::from_env()?, prompt)
//!         .await?;
//!
//!     // Export the timeline
//!     let client = TimelineClient::builder()
//!         .connect(Arc::new(SessionManager::new(session, api)))
//!         .await?;
//!     let transactions = client.fetch_transactions(true).await?;
//!     for tx in &transactions {
//!         println!("{} {}", tx.raw.timestamp(), tx.raw.title());
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Simple API**: Builder pattern for configuration
//! - **Automatic Reconnection**: A lost connection is replaced between retries
//! - **Bounded Pagination**: Cursor walking with an overrun guard
//! - **Isolated Failures**: A missing detail never aborts an export

pub mod builder;
pub mod client;
pub mod enricher;
pub mod link;
pub mod paginator;
pub mod prelude;

// Re-export main types
pub use builder::{ClientConfig, ConfigError, TimelineClientBuilder};
pub use client::TimelineClient;
pub use enricher::{EnrichConfig, Enricher};
pub use link::Link;
pub use paginator::{PaginationConfig, Paginator, DEFAULT_MAX_PAGES};

// Re-export commonly used types from dependencies
pub use tr_types::{EnrichedTransaction, RawTransaction, Session, TrError, TransactionSet};
pub use tr_ws::{ConnectionConfig, Endpoint, RetryPolicy};
