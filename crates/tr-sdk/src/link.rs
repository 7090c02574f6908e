//! Reconnecting connection holder
//!
//! A [`Connection`] never comes back once its socket breaks. The [`Link`]
//! owns the current one and swaps in a fresh connection, through its
//! [`Connector`], whenever a call fails in a way that needs a new socket.
//! The failed call still reports its error; retrying is up to the caller.

use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tr_auth::TokenSource;
use tr_types::{Topic, TrError};
use tr_ws::{CallOptions, Connection, ConnectionConfig, Connector, Response, RetryPolicy};
use tracing::{debug, info, instrument, warn};

/// Holder of the current connection
pub struct Link {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    current: RwLock<Arc<Connection>>,
    reconnect_lock: tokio::sync::Mutex<()>,
    reconnects: AtomicU32,
    closed: AtomicBool,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.config.endpoint)
            .field("reconnects", &self.reconnect_count())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Open the first connection
    #[instrument(skip_all, fields(endpoint = %config.endpoint))]
    pub async fn open(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Result<Self, TrError> {
        let connection = connector.connect(&config).await?;
        Ok(Self {
            connector,
            config,
            current: RwLock::new(Arc::new(connection)),
            reconnect_lock: tokio::sync::Mutex::new(()),
            reconnects: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// The connection calls currently go through
    pub fn connection(&self) -> Arc<Connection> {
        self.current.read().clone()
    }

    /// Issue a correlated call on the current connection
    ///
    /// When the call fails because the connection is gone, the connection is
    /// replaced before the error is returned.
    pub async fn call(&self, topic: Topic, options: CallOptions) -> Result<Response, TrError> {
        if self.is_closed() {
            return Err(TrError::ShuttingDown);
        }

        let connection = self.connection();
        let result = connection.call(topic, options).await;

        if let Err(e) = &result {
            if e.requires_reconnect() && !self.is_closed() {
                if let Err(reconnect_error) = self.replace(&connection).await {
                    warn!("Reconnect failed: {}", reconnect_error);
                }
            }
        }
        result
    }

    /// Fetch a token, issue the call built from it and decode the answer
    pub async fn request<F>(
        &self,
        tokens: &dyn TokenSource,
        topic: F,
        options: CallOptions,
    ) -> Result<Value, TrError>
    where
        F: FnOnce(String) -> Topic,
    {
        let token = tokens.token().await?;
        self.call(topic(token), options).await?.json()
    }

    async fn replace(&self, failed: &Arc<Connection>) -> Result<(), TrError> {
        let _guard = self.reconnect_lock.lock().await;
        if !Arc::ptr_eq(&self.connection(), failed) {
            debug!("Connection already replaced");
            return Ok(());
        }

        info!("Reconnecting to {}", self.config.endpoint);
        let fresh = self.connector.connect(&self.config).await?;
        *self.current.write() = Arc::new(fresh);
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of times the connection was replaced
    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Check if the current connection is up
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.connection().is_connected()
    }

    /// Check if [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Connection settings used for (re)connecting
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Close the current connection; later calls fail with `ShuttingDown`
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let connection = self.connection();
        connection.close().await;
    }
}

/// Error that ended a retry loop
#[derive(Debug)]
pub(crate) struct RetryExhausted {
    pub error: TrError,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TrError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && policy.should_retry(attempts) => {
                let delay = policy.delay_with_jitter(attempts);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempts, policy.max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(RetryExhausted { error, attempts }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tr_types::{ConnectionError, Session};
    use tr_ws::{Endpoint, MockReply, MockTransport};

    /// Serves every connection with the same script; the first argument is
    /// the connection number, starting at 0
    struct ScriptedConnector {
        connects: AtomicUsize,
        script: Arc<dyn Fn(usize, u64, Value) -> MockReply + Send + Sync>,
    }

    impl ScriptedConnector {
        fn new(script: impl Fn(usize, u64, Value) -> MockReply + Send + Sync + 'static) -> Self {
            Self {
                connects: AtomicUsize::new(0),
                script: Arc::new(script),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, TrError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            let (transport, server) = MockTransport::pair(config.endpoint.url());
            let script = self.script.clone();
            server.serve(move |id, topic| script(n, id, topic));
            Connection::open(transport, config).await
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::new()
            .with_endpoint(Endpoint::Custom("wss://mock.test".into()))
            .with_call_timeout(Duration::from_millis(300))
    }

    fn session() -> Session {
        Session::new("tok", "ref", Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_reconnects_after_lost_connection() {
        let connector = Arc::new(ScriptedConnector::new(|n, id, _| {
            if n == 0 {
                MockReply::Disconnect
            } else {
                MockReply::Frames(vec![format!("{} A [1]", id)])
            }
        }));
        let link = Link::open(connector.clone(), config()).await.unwrap();
        let cash = |token| Topic::AvailableCash { token };

        let err = link
            .request(&session(), cash, CallOptions::snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, TrError::Connection(ConnectionError::Lost(_))));
        assert_eq!(link.reconnect_count(), 1);

        let answer = link
            .request(&session(), cash, CallOptions::snapshot())
            .await
            .unwrap();
        assert_eq!(answer, serde_json::json!([1]));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection() {
        let connector = Arc::new(ScriptedConnector::new(|_, _, _| MockReply::Ignore));
        let link = Link::open(connector, config()).await.unwrap();

        let err = link
            .request(&session(), |token| Topic::AvailableCash { token }, CallOptions::snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, TrError::Timeout { .. }));
        assert_eq!(link.reconnect_count(), 0);
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn test_closed_link_rejects_calls() {
        let connector = Arc::new(ScriptedConnector::new(|_, _, _| MockReply::Ignore));
        let link = Link::open(connector.clone(), config()).await.unwrap();

        link.close().await;
        assert!(link.is_closed());
        assert!(!link.is_connected());

        let err = link
            .call(Topic::AvailableCash { token: "t".into() }, CallOptions::snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, TrError::ShuttingDown));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_fatal_error() {
        let policy = RetryPolicy::new().with_initial_delay(Duration::from_millis(1));
        let mut calls = 0;
        let failure = with_retry(&policy, "op", || {
            calls += 1;
            async { Err::<(), _>(TrError::protocol("bad")) }
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_attempts(3);
        let failure = with_retry(&policy, "op", || async {
            Err::<(), _>(TrError::connection_lost("gone"))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert!(failure.error.is_retryable());
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let policy = RetryPolicy::new().with_initial_delay(Duration::from_millis(1));
        let mut calls = 0;
        let value = with_retry(&policy, "op", || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 2 {
                    Err(TrError::Timeout {
                        request_id: 1,
                        timeout: Duration::from_millis(1),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
    }
}
