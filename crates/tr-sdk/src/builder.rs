//! Client Builder Pattern
//!
//! Provides a fluent builder API for configuring the timeline client
//! with sensible defaults and validation.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tr_sdk::builder::TimelineClientBuilder;
//!
//! let builder = TimelineClientBuilder::new()
//!     .with_locale("de")
//!     .with_call_timeout(Duration::from_secs(20))
//!     .with_detail_concurrency(8);
//! assert!(builder.validate().is_ok());
//! ```

use crate::client::TimelineClient;
use crate::enricher::{EnrichConfig, Enricher};
use crate::link::Link;
use crate::paginator::{PaginationConfig, Paginator};
use std::sync::Arc;
use std::time::Duration;
use tr_auth::TokenSource;
use tr_types::{TokenBucketConfig, TrError};
use tr_ws::{ConnectionConfig, Connector, Endpoint, RetryPolicy, WsConnector};
use tracing::{info, instrument};

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Endpoint is not a WebSocket URL
    #[error("invalid endpoint URL: {url} (expected ws:// or wss://)")]
    InvalidEndpoint { url: String },

    /// Call deadline too short to ever succeed
    #[error("call timeout must be at least 100 milliseconds")]
    TimeoutTooShort,

    /// Page bound of zero
    #[error("max_pages must be at least 1")]
    NoPages,

    /// Detail concurrency of zero
    #[error("detail concurrency must be at least 1")]
    NoConcurrency,

    /// Detail request rate not positive
    #[error("detail request rate must be positive (got capacity {capacity}, {per_second}/s)")]
    InvalidRate { capacity: u32, per_second: f64 },
}

impl From<ConfigError> for TrError {
    fn from(error: ConfigError) -> Self {
        TrError::Configuration(error.to_string())
    }
}

/// Every setting of a [`TimelineClient`]
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Socket, handshake and call settings
    pub connection: ConnectionConfig,
    /// Page walking settings
    pub pagination: PaginationConfig,
    /// Detail lookup settings
    pub enrich: EnrichConfig,
}

/// Builder for configuring a timeline client
#[derive(Clone)]
pub struct TimelineClientBuilder {
    /// Client settings
    pub config: ClientConfig,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for TimelineClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for TimelineClientBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            connector: Arc::new(WsConnector),
        }
    }
}

impl TimelineClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a complete configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Set the WebSocket endpoint
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.connection.endpoint = endpoint;
        self
    }

    /// Set the locale announced in the handshake
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.config.connection = self.config.connection.with_locale(locale);
        self
    }

    /// Set the socket connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.connect_timeout = timeout;
        self
    }

    /// Set the default per-call deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.call_timeout = timeout;
        self
    }

    /// Set the page bound
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.config.pagination.max_pages = max_pages;
        self
    }

    /// Set the retry schedule for page fetches
    pub fn with_page_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.pagination.retry = retry;
        self
    }

    /// Set the number of concurrent detail lookups
    pub fn with_detail_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.enrich.max_concurrency = max_concurrency;
        self
    }

    /// Set the number of retries per detail lookup
    pub fn with_detail_retries(mut self, retries: u32) -> Self {
        self.config.enrich.retries = retries;
        self
    }

    /// Set detail request pacing
    pub fn with_detail_rate(mut self, capacity: u32, per_second: f64) -> Self {
        self.config.enrich.rate = TokenBucketConfig::new(capacity, per_second);
        self
    }

    /// Open connections through `connector` instead of real WebSockets
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.config.connection.endpoint.url();
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(ConfigError::InvalidEndpoint {
                url: url.to_string(),
            });
        }

        if self.config.connection.call_timeout < Duration::from_millis(100) {
            return Err(ConfigError::TimeoutTooShort);
        }

        if self.config.pagination.max_pages == 0 {
            return Err(ConfigError::NoPages);
        }

        if self.config.enrich.max_concurrency == 0 {
            return Err(ConfigError::NoConcurrency);
        }

        let rate = self.config.enrich.rate;
        if rate.capacity == 0 || rate.refill_rate <= 0.0 || !rate.refill_rate.is_finite() {
            return Err(ConfigError::InvalidRate {
                capacity: rate.capacity,
                per_second: rate.refill_rate,
            });
        }

        Ok(())
    }

    /// Connect and return a client drawing session tokens from `tokens`
    #[instrument(skip_all, fields(endpoint = %self.config.connection.endpoint))]
    pub async fn connect(self, tokens: Arc<dyn TokenSource>) -> Result<TimelineClient, TrError> {
        self.validate()?;

        let ClientConfig {
            connection,
            pagination,
            enrich,
        } = self.config.clone();

        let link = Arc::new(Link::open(self.connector, connection).await?);
        info!("Timeline client connected");

        Ok(TimelineClient::new(
            link.clone(),
            tokens,
            Paginator::new(link.clone(), pagination),
            Enricher::new(link, enrich),
            self.config,
        ))
    }
}
