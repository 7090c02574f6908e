//! Transaction detail enrichment
//!
//! One `timelineDetailV2` lookup per transaction, a few in flight at a time
//! and paced by a shared token bucket. A failed lookup leaves that one
//! transaction without detail and attaches a [`DetailFetchWarning`]; the
//! rest of the batch is unaffected.
//!
//! [`DetailFetchWarning`]: tr_types::DetailFetchWarning

use crate::link::{with_retry, Link};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tr_auth::TokenSource;
use tr_types::{
    DetailFailure, EnrichedTransaction, RawTransaction, TokenBucketConfig, Topic, TransactionDetail,
};
use tr_ws::{CallOptions, RequestThrottle, RetryPolicy, SharedThrottle};
use tracing::{info, instrument, warn};

/// Enrichment settings
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Maximum lookups in flight (default: 4)
    pub max_concurrency: usize,
    /// Retries per lookup after the first attempt (default: 1)
    pub retries: u32,
    /// Delay before a retry (default: 250ms)
    pub retry_delay: Duration,
    /// Request pacing shared by all lookups (default: burst 10, 10/s)
    pub rate: TokenBucketConfig,
    /// Per-lookup deadline; the connection default applies when `None`
    pub call_timeout: Option<Duration>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retries: 1,
            retry_delay: Duration::from_millis(250),
            rate: TokenBucketConfig::new(10, 10.0),
            call_timeout: None,
        }
    }
}

impl EnrichConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent lookups
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the number of retries per lookup
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay before a retry
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set request pacing
    pub fn with_rate(mut self, rate: TokenBucketConfig) -> Self {
        self.rate = rate;
        self
    }

    /// Set the per-lookup deadline
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_initial_delay(self.retry_delay)
            .with_max_attempts(self.retries.saturating_add(1))
    }

    fn call_options(&self) -> CallOptions {
        match self.call_timeout {
            Some(timeout) => CallOptions::snapshot().with_timeout(timeout),
            None => CallOptions::snapshot(),
        }
    }
}

/// Attaches details to transactions
#[derive(Debug, Clone)]
pub struct Enricher {
    link: Arc<Link>,
    config: EnrichConfig,
    throttle: SharedThrottle,
}

impl Enricher {
    /// Create an enricher over `link`
    pub fn new(link: Arc<Link>, config: EnrichConfig) -> Self {
        let throttle = Arc::new(RequestThrottle::new(config.rate));
        Self {
            link,
            config,
            throttle,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &EnrichConfig {
        &self.config
    }

    /// Enrich `transactions`, keeping their order
    ///
    /// With `enabled == false` no lookups are made and every detail is absent.
    #[instrument(skip_all, fields(count = transactions.len(), enabled = enabled))]
    pub async fn enrich(
        &self,
        transactions: Vec<RawTransaction>,
        tokens: &dyn TokenSource,
        enabled: bool,
    ) -> Vec<EnrichedTransaction> {
        if !enabled {
            return transactions.into_iter().map(EnrichedTransaction::bare).collect();
        }

        let total = transactions.len();
        info!("Fetching details for {} transactions", total);

        let enriched: Vec<EnrichedTransaction> = stream::iter(transactions)
            .map(|raw| self.enrich_one(raw, tokens))
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let failed = enriched.iter().filter(|t| t.warning.is_some()).count();
        if failed > 0 {
            warn!("{} of {} detail lookups failed", failed, total);
        } else {
            info!("Details fetched for {} transactions", total);
        }
        enriched
    }

    async fn enrich_one(&self, raw: RawTransaction, tokens: &dyn TokenSource) -> EnrichedTransaction {
        match self.fetch_detail(raw.id(), tokens).await {
            Ok(detail) => EnrichedTransaction::with_detail(raw, detail),
            Err(reason) => {
                warn!(transaction_id = raw.id(), "Detail unavailable: {}", reason);
                EnrichedTransaction::with_warning(raw, reason)
            }
        }
    }

    /// Look up the detail of one transaction
    pub async fn fetch_detail(
        &self,
        id: &str,
        tokens: &dyn TokenSource,
    ) -> Result<TransactionDetail, DetailFailure> {
        let options = self.config.call_options();
        let answer = with_retry(&self.config.retry_policy(), "Detail lookup", || async move {
            self.throttle.acquire().await;
            self.link
                .request(
                    tokens,
                    |token| Topic::TimelineDetail {
                        id: id.to_string(),
                        token,
                    },
                    options,
                )
                .await
        })
        .await
        .map_err(|failure| DetailFailure::from(&failure.error))?;

        TransactionDetail::from_response(&answer).map_err(DetailFailure::Malformed)
    }
}
