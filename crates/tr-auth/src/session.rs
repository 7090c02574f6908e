//! Session token management
//!
//! Session tokens live about five minutes; a full export can take longer.
//! [`SessionManager`] hands out the current token and transparently swaps in
//! a refreshed session shortly before expiry.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tr_auth::{HttpLoginApi, SessionManager, TokenSource};
//! use tr_types::Session;
//!
//! # async fn example(session: Session) -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpLoginApi::new()?);
//! let manager = SessionManager::new(session, api);
//!
//! // Refreshes when the session is about to expire
//! let token = manager.token().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, AuthResult};
use crate::login::LoginApi;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tr_types::Session;
use tracing::{debug, error, info, instrument, warn};

/// Refresh this long before expiry
const REFRESH_BUFFER_SECS: u64 = 30;

/// Anything that can hand out a session token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current, valid session token
    async fn token(&self) -> AuthResult<String>;
}

#[async_trait]
impl TokenSource for Session {
    async fn token(&self) -> AuthResult<String> {
        Ok(self.session_token().to_string())
    }
}

/// State of the managed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// Token is valid and ready to use
    Valid,
    /// Token is being refreshed
    Refreshing,
    /// Token has expired and could not be refreshed
    Expired,
    /// Last refresh failed
    Error(String),
}

/// Configuration for refresh behavior
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How long before expiry to refresh (default: 30s)
    pub refresh_buffer: Duration,
    /// Maximum retry attempts on refresh failure (default: 3)
    pub max_retries: u32,
    /// Initial retry delay (default: 1s)
    pub retry_delay: Duration,
}

impl RefreshConfig {
    /// Pause after a failed refresh schedule before trying again,
    /// `retry_delay * 2^max_retries` (8s by default)
    pub fn failure_cooldown(&self) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(self.max_retries.min(16)))
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(REFRESH_BUFFER_SECS),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Session holder with refresh-before-expiry
pub struct SessionManager {
    api: Arc<dyn LoginApi>,
    session: RwLock<Session>,
    state: RwLock<TokenState>,
    config: RefreshConfig,
    refresh_lock: tokio::sync::Mutex<()>,
    // End of the last failed refresh schedule
    failed_at: RwLock<Option<Instant>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &*self.session.read())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Manage `session`, refreshing through `api`
    pub fn new(session: Session, api: Arc<dyn LoginApi>) -> Self {
        Self::with_config(session, api, RefreshConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(session: Session, api: Arc<dyn LoginApi>, config: RefreshConfig) -> Self {
        Self {
            api,
            session: RwLock::new(session),
            state: RwLock::new(TokenState::Valid),
            config,
            refresh_lock: tokio::sync::Mutex::new(()),
            failed_at: RwLock::new(None),
        }
    }

    /// Get the current token state
    pub fn state(&self) -> TokenState {
        self.state.read().clone()
    }

    /// Copy of the current session
    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    fn set_state(&self, state: TokenState) {
        *self.state.write() = state;
    }

    /// Check if a failed refresh is recent enough to skip another attempt
    fn cooling_down(&self) -> bool {
        match *self.failed_at.read() {
            Some(at) => at.elapsed() < self.config.failure_cooldown(),
            None => false,
        }
    }

    /// Force a refresh, retrying with doubling delays
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> AuthResult<Session> {
        self.set_state(TokenState::Refreshing);
        let refresh_token = self.session.read().refresh_token().to_string();
        if refresh_token.is_empty() {
            let err = AuthError::ProtocolError("session has no refresh token".into());
            self.set_state(TokenState::Error(err.to_string()));
            return Err(err);
        }

        let mut last_error = None;
        let mut delay = self.config.retry_delay;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                warn!("Session refresh attempt {} after {:?} delay", attempt + 1, delay);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match self.api.refresh_session(&refresh_token).await {
                Ok(session) => {
                    info!("Session refreshed");
                    *self.session.write() = session.clone();
                    *self.failed_at.write() = None;
                    self.set_state(TokenState::Valid);
                    return Ok(session);
                }
                Err(e) => {
                    error!("Session refresh failed: {}", e);
                    let retryable = e.allows_restart();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| AuthError::ProtocolError("refresh failed".into()));
        *self.failed_at.write() = Some(Instant::now());
        self.set_state(TokenState::Error(error.to_string()));
        Err(error)
    }
}

#[async_trait]
impl TokenSource for SessionManager {
    /// Returns the cached token, refreshing first when it is about to expire
    ///
    /// A failed refresh is tolerated while the old token is still valid; the
    /// next attempt waits for [`RefreshConfig::failure_cooldown`].
    async fn token(&self) -> AuthResult<String> {
        {
            let session = self.session.read();
            if !session.should_refresh(self.config.refresh_buffer) {
                return Ok(session.session_token().to_string());
            }
        }

        let _guard = self.refresh_lock.lock().await;
        {
            // Another caller may have refreshed while we waited
            let session = self.session.read();
            if !session.should_refresh(self.config.refresh_buffer) {
                return Ok(session.session_token().to_string());
            }
            if !session.is_expired() && self.cooling_down() {
                debug!("Last refresh failed recently, keeping current token");
                return Ok(session.session_token().to_string());
            }
        }

        debug!("Session about to expire, refreshing");
        match self.refresh().await {
            Ok(session) => Ok(session.session_token().to_string()),
            Err(e) => {
                let session = self.session.read();
                if session.is_expired() {
                    drop(session);
                    self.set_state(TokenState::Expired);
                    Err(e)
                } else {
                    warn!("Using current session token until expiry: {}", e);
                    Ok(session.session_token().to_string())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::MockLoginApi;

    fn expired_session() -> Session {
        Session::new("old", "refresh-token", Duration::ZERO)
    }

    fn fast_config() -> RefreshConfig {
        RefreshConfig {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plain_session_is_token_source() {
        let session = Session::new("tok", "ref", Duration::from_secs(60));
        assert_eq!(session.token().await.unwrap(), "tok");
    }

    #[tokio::test]
    async fn test_fresh_session_not_refreshed() {
        let api = Arc::new(MockLoginApi::new());
        let manager = SessionManager::new(
            Session::new("tok", "ref", Duration::from_secs(300)),
            api.clone(),
        );

        assert_eq!(manager.token().await.unwrap(), "tok");
        assert_eq!(api.refresh_calls(), 0);
        assert_eq!(manager.state(), TokenState::Valid);
    }

    #[tokio::test]
    async fn test_refresh_near_expiry() {
        let api = Arc::new(MockLoginApi::new());
        let manager = SessionManager::with_config(
            Session::new("tok", "ref", Duration::from_secs(10)),
            api.clone(),
            fast_config(),
        );

        let token = manager.token().await.unwrap();
        assert_eq!(token, "refreshed-1");
        assert_eq!(api.refresh_calls(), 1);
        assert_eq!(manager.session().refresh_token(), "ref");

        // The refreshed session is good for 290s
        assert_eq!(manager.token().await.unwrap(), "refreshed-1");
        assert_eq!(api.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_retries_then_succeeds() {
        let api = Arc::new(MockLoginApi::new().failing_refreshes(2));
        let manager = SessionManager::with_config(expired_session(), api.clone(), fast_config());

        assert_eq!(manager.token().await.unwrap(), "refreshed-3");
        assert_eq!(api.refresh_calls(), 3);
    }

    #[tokio::test]
    async fn test_refresh_exhausted_on_expired_session() {
        let api = Arc::new(MockLoginApi::new().failing_refreshes(10));
        let manager = SessionManager::with_config(expired_session(), api.clone(), fast_config());

        let err = manager.token().await.unwrap_err();
        assert!(matches!(err, AuthError::ConnectionLost(_)));
        assert_eq!(api.refresh_calls(), 4);
        assert_eq!(manager.state(), TokenState::Expired);
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_valid_token() {
        let api = Arc::new(MockLoginApi::new().failing_refreshes(10));
        let manager = SessionManager::with_config(
            Session::new("still-good", "ref", Duration::from_secs(20)),
            api,
            fast_config(),
        );

        assert_eq!(manager.token().await.unwrap(), "still-good");
        assert!(matches!(manager.state(), TokenState::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_not_repeated_during_cooldown() {
        let api = Arc::new(MockLoginApi::new().failing_refreshes(1000));
        let manager = SessionManager::new(
            Session::new("still-good", "ref", Duration::from_secs(25)),
            api.clone(),
        );
        let schedule = RefreshConfig::default().max_retries + 1;

        let started = Instant::now();
        for _ in 0..5 {
            assert_eq!(manager.token().await.unwrap(), "still-good");
        }
        assert_eq!(api.refresh_calls(), schedule);
        // One schedule of backoff sleeps (1s + 2s + 4s)
        assert_eq!(started.elapsed(), Duration::from_secs(7));

        tokio::time::advance(RefreshConfig::default().failure_cooldown()).await;
        assert_eq!(manager.token().await.unwrap(), "still-good");
        assert_eq!(api.refresh_calls(), schedule * 2);
    }

    #[test]
    fn test_failure_cooldown() {
        assert_eq!(RefreshConfig::default().failure_cooldown(), Duration::from_secs(8));
        let config = RefreshConfig {
            retry_delay: Duration::from_millis(10),
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(config.failure_cooldown(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let api = Arc::new(MockLoginApi::new());
        let manager = SessionManager::new(Session::new("tok", "", Duration::ZERO), api.clone());

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, AuthError::ProtocolError(_)));
        assert_eq!(api.refresh_calls(), 0);
    }
}
