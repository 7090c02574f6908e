//! Error types for the timeline client

use std::time::Duration;
use thiserror::Error;

/// Transport-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The endpoint refused or failed the connection attempt
    #[error("failed to connect to {url}: {reason}")]
    Refused { url: String, reason: String },

    /// Connection attempt timed out
    #[error("connection timeout after {timeout:?} to {url}")]
    ConnectTimeout { url: String, timeout: Duration },

    /// Server did not acknowledge the `connect` frame
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// Socket closed or broke while in use
    #[error("connection lost: {0}")]
    Lost(String),

    /// Connection was closed by the client
    #[error("connection closed")]
    Closed,
}

/// Authentication failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Phone number or PIN rejected
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Wrong, malformed or expired two-factor code
    #[error("invalid second factor: {0}")]
    InvalidSecondFactor(String),

    /// Unexpected response or operation in the current state
    #[error("authentication protocol error: {0}")]
    ProtocolError(String),

    /// Network failure while talking to the login endpoints
    #[error("connection lost during authentication: {0}")]
    ConnectionLost(String),
}

impl AuthError {
    /// Returns true if the login attempt may be restarted from the credentials step
    pub fn allows_restart(&self) -> bool {
        matches!(self, Self::InvalidSecondFactor(_) | Self::ConnectionLost(_))
    }
}

/// Main error type for timeline operations
#[derive(Error, Debug)]
pub enum TrError {
    // === Transport ===
    /// Connection failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    // === Authentication ===
    /// Login or session refresh failure
    #[error(transparent)]
    Auth(#[from] AuthError),

    // === Calls ===
    /// A correlated call did not resolve before its deadline
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: u64, timeout: Duration },

    /// Server answered a request with an error frame
    #[error("server error for request {request_id}: {message}")]
    Remote { request_id: u64, message: String },

    /// Malformed frame or payload
    #[error("protocol error: {0}")]
    Protocol(String),

    // === Pagination ===
    /// Safety bound on page count exceeded
    #[error("pagination exceeded {limit} pages")]
    PaginationOverrun { limit: usize },

    /// Page fetch failed after exhausting retries
    #[error("failed to fetch page {page} after {attempts} attempts: {source}")]
    Fetch {
        page: usize,
        attempts: u32,
        #[source]
        source: Box<TrError>,
    },

    /// Same transaction id delivered twice
    #[error("duplicate transaction id {id}")]
    DuplicateTransaction { id: String },

    // === Internal ===
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Client is shutting down
    #[error("shutdown in progress")]
    ShuttingDown,
}

impl TrError {
    /// Returns true if this error is potentially recoverable via retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(ConnectionError::Handshake(_)) => false,
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Auth(AuthError::ConnectionLost(_)) => true,
            _ => false,
        }
    }

    /// Returns true if the connection must be replaced before retrying
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Auth(AuthError::ConnectionLost(_)) | Self::ShuttingDown
        )
    }

    /// Returns true if the server reported the requested resource as missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Remote { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("not found") || message.contains("not_found")
            }
            _ => false,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Auth(AuthError::ConnectionLost(_)) => 4,
            Self::Auth(_) => 3,
            Self::Connection(_) | Self::ShuttingDown => 4,
            Self::Fetch { source, .. } if matches!(**source, Self::Connection(_)) => 4,
            Self::Timeout { .. }
            | Self::Remote { .. }
            | Self::Protocol(_)
            | Self::PaginationOverrun { .. }
            | Self::Fetch { .. }
            | Self::DuplicateTransaction { .. } => 5,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a connection-lost error
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::Connection(ConnectionError::Lost(reason.into()))
    }
}

/// Result type alias for timeline operations
pub type TrResult<T> = Result<T, TrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let err = TrError::Timeout {
            request_id: 7,
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_retryable());
        assert!(!err.requires_reconnect());

        let err = TrError::connection_lost("reset by peer");
        assert!(err.is_retryable());
        assert!(err.requires_reconnect());

        let err = TrError::Auth(AuthError::InvalidCredentials("bad pin".into()));
        assert!(!err.is_retryable());

        let err = TrError::PaginationOverrun { limit: 10 };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_handshake_not_retryable() {
        let err = TrError::Connection(ConnectionError::Handshake("nope".into()));
        assert!(!err.is_retryable());
        assert!(err.requires_reconnect());
    }

    #[test]
    fn test_not_found_detection() {
        let err = TrError::Remote {
            request_id: 3,
            message: "{\"errorCode\":\"NOT_FOUND\"}".into(),
        };
        assert!(err.is_not_found());

        let err = TrError::Remote {
            request_id: 3,
            message: "unauthorized".into(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TrError::Configuration("x".into()).exit_code(), 2);
        assert_eq!(
            TrError::Auth(AuthError::InvalidSecondFactor("x".into())).exit_code(),
            3
        );
        assert_eq!(TrError::connection_lost("x").exit_code(), 4);
        assert_eq!(TrError::PaginationOverrun { limit: 1 }.exit_code(), 5);

        let wrapped = TrError::Fetch {
            page: 2,
            attempts: 3,
            source: Box::new(TrError::connection_lost("x")),
        };
        assert_eq!(wrapped.exit_code(), 4);
        assert!(wrapped.to_string().contains("page 2"));
    }

    #[test]
    fn test_auth_restart() {
        assert!(AuthError::InvalidSecondFactor("expired".into()).allows_restart());
        assert!(!AuthError::InvalidCredentials("x".into()).allows_restart());
        assert!(!AuthError::ProtocolError("x".into()).allows_restart());
    }
}
