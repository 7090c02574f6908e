//! Error mapping for the login endpoints

use reqwest::StatusCode;
pub use tr_types::AuthError;

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Map an HTTP client failure
pub(crate) fn from_http(err: reqwest::Error) -> AuthError {
    if err.is_decode() {
        AuthError::ProtocolError(format!("undecodable response: {}", err))
    } else {
        AuthError::ConnectionLost(err.to_string())
    }
}

/// Map a failed `/login` status
///
/// A 4xx means the phone number or PIN was refused, except 429 which is
/// throttling.
pub(crate) fn login_rejection(status: StatusCode, body: &str) -> AuthError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        AuthError::InvalidCredentials(format!("{}: {}", status, body))
    } else {
        from_status(status, body, "login")
    }
}

/// Map an unexpected status for a request that should have succeeded
pub(crate) fn from_status(status: StatusCode, body: &str, step: &str) -> AuthError {
    let detail = if body.is_empty() {
        format!("{} returned {}", step, status)
    } else {
        format!("{} returned {}: {}", step, status, body)
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AuthError::ConnectionLost(detail)
    } else {
        AuthError::ProtocolError(detail)
    }
}
