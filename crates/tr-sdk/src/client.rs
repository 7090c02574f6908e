//! High-level timeline client

use crate::builder::{ClientConfig, TimelineClientBuilder};
use crate::enricher::Enricher;
use crate::link::{with_retry, Link};
use crate::paginator::Paginator;
use serde_json::Value;
use std::sync::Arc;
use tr_auth::TokenSource;
use tr_types::{RawTransaction, Topic, TrError, TransactionSet};
use tr_ws::CallOptions;
use tracing::{info, instrument, warn};

/// High-level client for the transaction timeline
///
/// Owns one [`Link`] for the whole run and draws a session token for every
/// request, so a [`SessionManager`](tr_auth::SessionManager) can refresh it
/// along the way.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tr_sdk::TimelineClient;
/// use tr_types::Session;
///
/// # async fn example(session: Session) -> Result<(), Box<dyn std::error::Error>> {
/// let client = TimelineClient::builder().connect(Arc::new(session)).await?;
///
/// let transactions = client.fetch_transactions(true).await?;
/// println!("{} transactions", transactions.len());
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct TimelineClient {
    link: Arc<Link>,
    tokens: Arc<dyn TokenSource>,
    paginator: Paginator,
    enricher: Enricher,
    config: ClientConfig,
}

impl std::fmt::Debug for TimelineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineClient")
            .field("link", &self.link)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TimelineClient {
    /// Create a new client builder
    pub fn builder() -> TimelineClientBuilder {
        TimelineClientBuilder::new()
    }

    pub(crate) fn new(
        link: Arc<Link>,
        tokens: Arc<dyn TokenSource>,
        paginator: Paginator,
        enricher: Enricher,
        config: ClientConfig,
    ) -> Self {
        Self {
            link,
            tokens,
            paginator,
            enricher,
            config,
        }
    }

    /// Fetch the whole timeline, optionally with per-transaction details
    ///
    /// An account without transactions yields an empty set. Detail lookup
    /// failures never fail the call; they show up as warnings on the set.
    #[instrument(skip(self))]
    pub async fn fetch_transactions(&self, extract_details: bool) -> Result<TransactionSet, TrError> {
        let raw = self.paginator.fetch_all(self.tokens.as_ref()).await?;
        if raw.is_empty() {
            info!("No transactions found");
        }

        let enriched = self
            .enricher
            .enrich(raw, self.tokens.as_ref(), extract_details)
            .await;
        let set = TransactionSet::new(enriched)?;

        let warnings = set.warnings().count();
        if warnings > 0 {
            warn!("{} transactions exported without detail", warnings);
        }
        Ok(set)
    }

    /// Fetch the timeline without details
    pub async fn fetch_raw(&self) -> Result<Vec<RawTransaction>, TrError> {
        self.paginator.fetch_all(self.tokens.as_ref()).await
    }

    /// Fetch the cash balances (`availableCash`)
    #[instrument(skip(self))]
    pub async fn available_cash(&self) -> Result<Value, TrError> {
        let tokens = self.tokens.as_ref();
        let link = self.link.as_ref();
        let cash = with_retry(&self.config.pagination.retry, "Cash lookup", || {
            link.request(tokens, |token| Topic::AvailableCash { token }, CallOptions::snapshot())
        })
        .await
        .map_err(|failure| failure.error)?;

        if !cash.is_array() {
            warn!("Unexpected availableCash shape: {}", cash);
        }
        Ok(cash)
    }

    /// Get the page walker
    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    /// Get the detail enricher
    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Get the configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Number of times the connection was replaced
    pub fn reconnect_count(&self) -> u32 {
        self.link.reconnect_count()
    }

    /// Close the connection
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.link.close().await;
        info!("Timeline client closed");
    }
}
