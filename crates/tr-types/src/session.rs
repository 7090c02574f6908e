//! Authenticated session

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Session issued after a successful two-factor login
///
/// Memory resident only. `Debug` never prints the tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    session_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session that expires `ttl` from now
    pub fn new(
        session_token: impl Into<String>,
        refresh_token: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        Self::with_expiry(session_token, refresh_token, Utc::now() + ttl)
    }

    /// Create a session with an explicit expiry instant
    pub fn with_expiry(
        session_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_token: session_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Token sent with every subscription
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Token used to obtain a fresh session token
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Expiry instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check if the session token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the session should be refreshed, given a safety buffer
    pub fn should_refresh(&self, buffer: Duration) -> bool {
        self.time_until_expiry() <= buffer
    }

    /// Time until the session token expires (zero if already expired)
    pub fn time_until_expiry(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
