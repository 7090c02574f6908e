//! Login endpoints
//!
//! The web login is a three step HTTPS exchange:
//!
//! 1. `POST /login` with phone number and PIN returns a process id and
//!    starts the two-factor countdown
//! 2. optionally `POST /login/{process}/resend` sends the code by SMS
//! 3. `POST /login/{process}/{code}` sets the `tr_session` and `tr_refresh`
//!    cookies
//!
//! `GET /session` with the refresh cookie issues a fresh session cookie.

use crate::credentials::Credentials;
use crate::error::{from_http, from_status, login_rejection, AuthError, AuthResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tr_types::Session;
use tracing::{debug, instrument};

const BASE_URL: &str = "https://api.traderepublic.com/api/v1/auth/web";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Lifetime assumed when the session cookie carries no `Max-Age`
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(290);

const SESSION_COOKIE: &str = "tr_session";
const REFRESH_COOKIE: &str = "tr_refresh";

/// Two-factor challenge issued after the credentials were accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Login process identifier
    pub process_id: String,
    /// Time left to enter the code
    pub countdown: Duration,
}

/// Login round-trips
///
/// Implemented over HTTPS by [`HttpLoginApi`]; tests inject a mock.
#[async_trait]
pub trait LoginApi: Send + Sync {
    /// Submit phone number and PIN
    async fn start_login(&self, credentials: &Credentials) -> AuthResult<Challenge>;

    /// Ask for the code to be re-sent by SMS
    async fn resend_code(&self, challenge: &Challenge) -> AuthResult<()>;

    /// Submit the two-factor code
    async fn submit_code(&self, challenge: &Challenge, code: &str) -> AuthResult<Session>;

    /// Exchange a refresh token for a fresh session
    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    process_id: Option<String>,
    countdown_in_seconds: Option<u64>,
}

/// One parsed `Set-Cookie` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SetCookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<Duration>,
}

pub(crate) fn parse_set_cookie(header: &str) -> Option<SetCookie> {
    let mut attributes = header.split(';').map(str::trim);
    let (name, value) = attributes.next()?.split_once('=')?;
    if name.is_empty() {
        return None;
    }

    let max_age = attributes
        .filter_map(|attr| attr.split_once('='))
        .find(|(key, _)| key.eq_ignore_ascii_case("max-age"))
        .and_then(|(_, secs)| secs.parse::<u64>().ok())
        .map(Duration::from_secs);

    Some(SetCookie {
        name: name.to_string(),
        value: value.trim_matches('"').to_string(),
        max_age,
    })
}

fn find_cookie(headers: &HeaderMap, name: &str) -> Option<SetCookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .find(|cookie| cookie.name == name && !cookie.value.is_empty())
}

/// Login over HTTPS
#[derive(Debug, Clone)]
pub struct HttpLoginApi {
    client: Client,
    base_url: String,
}

impl HttpLoginApi {
    /// Create a login client for the production endpoints
    pub fn new() -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AuthError::ProtocolError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
        })
    }

    /// Point at a different base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn session_from_headers(
        headers: &HeaderMap,
        previous_refresh: Option<&str>,
    ) -> AuthResult<Session> {
        let session = find_cookie(headers, SESSION_COOKIE).ok_or_else(|| {
            AuthError::ProtocolError(format!("response without {} cookie", SESSION_COOKIE))
        })?;
        let refresh = find_cookie(headers, REFRESH_COOKIE)
            .map(|cookie| cookie.value)
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();

        let ttl = session.max_age.unwrap_or(DEFAULT_SESSION_TTL);
        Ok(Session::new(session.value, refresh, ttl))
    }
}

#[async_trait]
impl LoginApi for HttpLoginApi {
    #[instrument(skip_all)]
    async fn start_login(&self, credentials: &Credentials) -> AuthResult<Challenge> {
        debug!("Sending credentials");

        let body = serde_json::json!({
            "phoneNumber": credentials.phone_number(),
            "pin": credentials.pin(),
        });
        let response = self
            .client
            .post(format!("{}/login", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(from_http)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(login_rejection(status, &text));
        }

        let login: LoginResponse = response.json().await.map_err(from_http)?;
        let process_id = login
            .process_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthError::InvalidCredentials("no login process issued".into()))?;

        Ok(Challenge {
            process_id,
            countdown: Duration::from_secs(login.countdown_in_seconds.unwrap_or_default()),
        })
    }

    #[instrument(skip_all)]
    async fn resend_code(&self, challenge: &Challenge) -> AuthResult<()> {
        debug!("Requesting code by SMS");

        let response = self
            .client
            .post(format!("{}/login/{}/resend", self.base_url, challenge.process_id))
            .send()
            .await
            .map_err(from_http)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(from_status(status, &text, "resend"));
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn submit_code(&self, challenge: &Challenge, code: &str) -> AuthResult<Session> {
        debug!("Submitting second factor");

        let response = self
            .client
            .post(format!("{}/login/{}/{}", self.base_url, challenge.process_id, code))
            .send()
            .await
            .map_err(from_http)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(from_status(status, "", "code submission"));
        }
        if !status.is_success() {
            return Err(AuthError::InvalidSecondFactor(format!(
                "code rejected ({})",
                status
            )));
        }

        Self::session_from_headers(response.headers(), None)
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
        debug!("Refreshing session");

        let response = self
            .client
            .get(format!("{}/session", self.base_url))
            .header(COOKIE, format!("{}={}", REFRESH_COOKIE, refresh_token))
            .send()
            .await
            .map_err(from_http)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(from_status(status, &text, "session refresh"));
        }

        Self::session_from_headers(response.headers(), Some(refresh_token))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockLoginApi;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::{Challenge, LoginApi};
    use crate::credentials::Credentials;
    use crate::error::{AuthError, AuthResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tr_types::Session;

    /// In-memory login server
    ///
    /// Accepts PIN `1234` and the code `000000` unless configured otherwise,
    /// and counts every call.
    #[derive(Debug)]
    pub struct MockLoginApi {
        pin: String,
        code: String,
        ttl: Duration,
        failing_refreshes: AtomicU32,
        logins: AtomicU32,
        resends: AtomicU32,
        submissions: AtomicU32,
        refreshes: AtomicU32,
    }

    impl Default for MockLoginApi {
        fn default() -> Self {
            Self {
                pin: "1234".into(),
                code: "000000".into(),
                ttl: Duration::from_secs(290),
                failing_refreshes: AtomicU32::new(0),
                logins: AtomicU32::new(0),
                resends: AtomicU32::new(0),
                submissions: AtomicU32::new(0),
                refreshes: AtomicU32::new(0),
            }
        }
    }

    impl MockLoginApi {
        /// Create a mock with the default PIN and code
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the accepted PIN
        pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
            self.pin = pin.into();
            self
        }

        /// Set the accepted code
        pub fn with_code(mut self, code: impl Into<String>) -> Self {
            self.code = code.into();
            self
        }

        /// Set the lifetime of issued sessions
        pub fn with_ttl(mut self, ttl: Duration) -> Self {
            self.ttl = ttl;
            self
        }

        /// Fail the next `count` refreshes
        pub fn failing_refreshes(self, count: u32) -> Self {
            self.failing_refreshes.store(count, Ordering::SeqCst);
            self
        }

        /// Number of credential submissions
        pub fn login_calls(&self) -> u32 {
            self.logins.load(Ordering::SeqCst)
        }

        /// Number of SMS resend requests
        pub fn resend_calls(&self) -> u32 {
            self.resends.load(Ordering::SeqCst)
        }

        /// Number of code submissions
        pub fn submit_calls(&self) -> u32 {
            self.submissions.load(Ordering::SeqCst)
        }

        /// Number of refresh attempts
        pub fn refresh_calls(&self) -> u32 {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LoginApi for MockLoginApi {
        async fn start_login(&self, credentials: &Credentials) -> AuthResult<Challenge> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            if credentials.pin() != self.pin {
                return Err(AuthError::InvalidCredentials("wrong PIN".into()));
            }
            Ok(Challenge {
                process_id: format!("process-{}", n),
                countdown: Duration::from_secs(30),
            })
        }

        async fn resend_code(&self, _challenge: &Challenge) -> AuthResult<()> {
            self.resends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn submit_code(&self, challenge: &Challenge, code: &str) -> AuthResult<Session> {
            let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
            if code != self.code {
                return Err(AuthError::InvalidSecondFactor("code rejected".into()));
            }
            Ok(Session::new(
                format!("session-{}-{}", challenge.process_id, n),
                "refresh-token",
                self.ttl,
            ))
        }

        async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Session> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            let failing = self.failing_refreshes.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_refreshes.store(failing - 1, Ordering::SeqCst);
                return Err(AuthError::ConnectionLost("refresh endpoint unavailable".into()));
            }
            Ok(Session::new(format!("refreshed-{}", n), refresh_token, self.ttl))
        }
    }
}
