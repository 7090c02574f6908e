//! Timeline pagination
//!
//! Walks `timelineTransactions` pages by following the `after` cursor until
//! the server stops returning one. Every page fetch is retried on transient
//! failures; a lost connection is replaced by the [`Link`] in between.

use crate::link::{with_retry, Link, RetryExhausted};
use std::collections::HashSet;
use std::sync::Arc;
use tr_auth::TokenSource;
use tr_types::{EnrichedTransaction, Page, RawTransaction, Topic, TrError, TransactionSet};
use tr_ws::{CallOptions, RetryPolicy};
use tracing::{debug, info, instrument, warn};

/// Upper bound on pages followed in one run
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Pagination settings
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Abort with `PaginationOverrun` after this many pages
    pub max_pages: usize,
    /// Retry schedule for a single page
    pub retry: RetryPolicy,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            retry: RetryPolicy::default(),
        }
    }
}

impl PaginationConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page bound
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Set the per-page retry schedule
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Fetches the complete transaction timeline
#[derive(Debug, Clone)]
pub struct Paginator {
    link: Arc<Link>,
    config: PaginationConfig,
}

impl Paginator {
    /// Create a paginator over `link`
    pub fn new(link: Arc<Link>, config: PaginationConfig) -> Self {
        Self { link, config }
    }

    /// Get the configuration
    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Fetch every transaction, in server order
    ///
    /// Returns an empty list when the account has no transactions.
    #[instrument(skip_all, fields(max_pages = self.config.max_pages))]
    pub async fn fetch_all(&self, tokens: &dyn TokenSource) -> Result<Vec<RawTransaction>, TrError> {
        let mut transactions = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor: Option<String> = None;

        for page_number in 1..=self.config.max_pages {
            let page = self.fetch_page(tokens, cursor.as_deref(), page_number).await?;
            debug!(
                page = page_number,
                items = page.items.len(),
                final_page = page.is_final(),
                "Received timeline page"
            );

            for item in page.items {
                if !seen_ids.insert(item.id().to_string()) {
                    return Err(TrError::DuplicateTransaction {
                        id: item.id().to_string(),
                    });
                }
                transactions.push(item);
            }
            info!("Fetched page {} ({} transactions so far)", page_number, transactions.len());

            match page.next_cursor {
                None => {
                    info!("Timeline complete: {} transactions", transactions.len());
                    return Ok(transactions);
                }
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        warn!("Server repeated cursor {} on page {}", next, page_number);
                    }
                    cursor = Some(next);
                }
            }
        }

        Err(TrError::PaginationOverrun {
            limit: self.config.max_pages,
        })
    }

    /// Fetch every transaction as a [`TransactionSet`] without details
    pub async fn fetch_all_set(&self, tokens: &dyn TokenSource) -> Result<TransactionSet, TrError> {
        let transactions = self.fetch_all(tokens).await?;
        TransactionSet::new(transactions.into_iter().map(EnrichedTransaction::bare).collect())
    }

    /// Fetch one page, retrying transient failures
    ///
    /// `page_number` is 1-based and only used for reporting.
    pub async fn fetch_page(
        &self,
        tokens: &dyn TokenSource,
        cursor: Option<&str>,
        page_number: usize,
    ) -> Result<Page, TrError> {
        let fetched = with_retry(&self.config.retry, "Page fetch", || {
            let after = cursor.map(str::to_string);
            async move {
                let answer = self
                    .link
                    .request(
                        tokens,
                        |token| Topic::TimelineTransactions { token, after },
                        CallOptions::snapshot(),
                    )
                    .await?;
                Page::from_response(&answer)
            }
        })
        .await;

        fetched.map_err(|RetryExhausted { error, attempts }| {
            if error.is_retryable() {
                TrError::Fetch {
                    page: page_number,
                    attempts,
                    source: Box::new(error),
                }
            } else {
                error
            }
        })
    }
}
