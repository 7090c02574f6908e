//! Two-factor login state machine
//!
//! ```text
//! Idle -> CredentialsSent -> AwaitingSecondFactor -> Authenticated
//!   \            \                    \
//!    +------------+--------------------+--> Failed
//! ```
//!
//! Every transition is recorded in [`Authenticator::history`]. A failed
//! attempt accepts no further operation until [`Authenticator::restart`].

use crate::credentials::Credentials;
use crate::error::{AuthError, AuthResult};
use crate::login::{Challenge, LoginApi};
use crate::prompt::{is_well_formed_code, SecondFactorInput, SecondFactorPrompt};
use std::sync::Arc;
use std::time::Duration;
use tr_types::Session;
use tracing::{debug, info, instrument, warn};

/// Login attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing sent yet
    Idle,
    /// Phone number and PIN accepted
    CredentialsSent,
    /// Waiting for the user's code
    AwaitingSecondFactor,
    /// Session issued
    Authenticated,
    /// Attempt failed; restart required
    Failed,
}

/// Login behavior
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Attempts allowed when the code is rejected (default: 3)
    pub max_second_factor_attempts: u32,
    /// Delay before the first restart (default: 1s)
    pub retry_delay: Duration,
    /// Longest delay between restarts (default: 8s)
    pub max_retry_delay: Duration,
    /// Allow the user to ask for an SMS once per attempt (default: true)
    pub allow_sms_fallback: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_second_factor_attempts: 3,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(8),
            allow_sms_fallback: true,
        }
    }
}

impl LoginConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_second_factor_attempts = attempts.max(1);
        self
    }

    /// Set the initial restart delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Disable the SMS fallback
    pub fn without_sms_fallback(mut self) -> Self {
        self.allow_sms_fallback = false;
        self
    }
}

/// Drives one login at a time
pub struct Authenticator {
    api: Arc<dyn LoginApi>,
    config: LoginConfig,
    state: AuthState,
    history: Vec<AuthState>,
    challenge: Option<Challenge>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("state", &self.state)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create an authenticator over the given login endpoints
    pub fn new(api: Arc<dyn LoginApi>, config: LoginConfig) -> Self {
        Self {
            api,
            config,
            state: AuthState::Idle,
            history: vec![AuthState::Idle],
            challenge: None,
        }
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// States visited by the current attempt, in order
    pub fn history(&self) -> &[AuthState] {
        &self.history
    }

    /// Challenge of the current attempt, if issued
    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    /// Discard the current attempt and return to `Idle`
    pub fn restart(&mut self) {
        self.state = AuthState::Idle;
        self.history = vec![AuthState::Idle];
        self.challenge = None;
    }

    fn transition(&mut self, next: AuthState) {
        debug!(from = ?self.state, to = ?next, "Login state change");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, error: AuthError) -> AuthError {
        warn!("Login failed: {}", error);
        self.transition(AuthState::Failed);
        self.challenge = None;
        error
    }

    fn expect_state(&self, expected: AuthState, operation: &str) -> AuthResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AuthError::ProtocolError(format!(
                "cannot {} while {:?}",
                operation, self.state
            )))
        }
    }

    /// Submit phone number and PIN (`Idle -> CredentialsSent`)
    #[instrument(skip_all)]
    pub async fn send_credentials(&mut self, credentials: &Credentials) -> AuthResult<Challenge> {
        self.expect_state(AuthState::Idle, "send credentials")?;

        match self.api.start_login(credentials).await {
            Ok(challenge) => {
                self.transition(AuthState::CredentialsSent);
                self.challenge = Some(challenge.clone());
                Ok(challenge)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Ask the prompt for the code (`CredentialsSent -> AwaitingSecondFactor`)
    ///
    /// An `SMS` answer triggers one resend and a second prompt.
    #[instrument(skip_all)]
    pub async fn request_second_factor(
        &mut self,
        prompt: Arc<dyn SecondFactorPrompt>,
    ) -> AuthResult<String> {
        self.expect_state(AuthState::CredentialsSent, "request the second factor")?;
        let challenge = match self.challenge.clone() {
            Some(challenge) => challenge,
            None => {
                let err = AuthError::ProtocolError("no challenge issued".into());
                return Err(self.fail(err));
            }
        };
        self.transition(AuthState::AwaitingSecondFactor);

        let mut sms_sent = false;
        loop {
            match ask(prompt.clone(), challenge.clone()).await {
                Ok(SecondFactorInput::Code(code)) => return Ok(code),
                Ok(SecondFactorInput::ResendSms) if self.config.allow_sms_fallback && !sms_sent => {
                    info!("Code requested by SMS");
                    if let Err(e) = self.api.resend_code(&challenge).await {
                        return Err(self.fail(e));
                    }
                    sms_sent = true;
                }
                Ok(SecondFactorInput::ResendSms) => {
                    let err = AuthError::InvalidSecondFactor("SMS already requested".into());
                    return Err(self.fail(err));
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Submit the code (`AwaitingSecondFactor -> Authenticated`)
    #[instrument(skip_all)]
    pub async fn submit_code(&mut self, code: &str) -> AuthResult<Session> {
        self.expect_state(AuthState::AwaitingSecondFactor, "submit a code")?;

        if !is_well_formed_code(code) {
            let err = AuthError::InvalidSecondFactor("code must be 6 digits".into());
            return Err(self.fail(err));
        }
        let Some(challenge) = self.challenge.clone() else {
            let err = AuthError::ProtocolError("no challenge issued".into());
            return Err(self.fail(err));
        };

        match self.api.submit_code(&challenge, code).await {
            Ok(session) if session.session_token().is_empty() => {
                let err = AuthError::ProtocolError("empty session token".into());
                Err(self.fail(err))
            }
            Ok(session) => {
                self.transition(AuthState::Authenticated);
                info!("Authenticated");
                Ok(session)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Run one full login attempt from `Idle`
    pub async fn authenticate(
        &mut self,
        credentials: &Credentials,
        prompt: Arc<dyn SecondFactorPrompt>,
    ) -> AuthResult<Session> {
        self.expect_state(AuthState::Idle, "authenticate")?;
        self.send_credentials(credentials).await?;
        let code = self.request_second_factor(prompt).await?;
        self.submit_code(&code).await
    }

    /// Login, restarting after a rejected code or a dropped connection
    ///
    /// Bounded by [`LoginConfig::max_second_factor_attempts`], with doubling
    /// delays between attempts.
    pub async fn authenticate_with_retries(
        &mut self,
        credentials: &Credentials,
        prompt: Arc<dyn SecondFactorPrompt>,
    ) -> AuthResult<Session> {
        let max_attempts = self.config.max_second_factor_attempts.max(1);
        let mut delay = self.config.retry_delay;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                warn!("Login attempt {} of {} after {:?}", attempt, max_attempts, delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.config.max_retry_delay);
            }
            self.restart();

            match self.authenticate(credentials, prompt.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) if e.allows_restart() && attempt < max_attempts => continue,
                Err(e) => return Err(e),
            }
        }

        Err(AuthError::ProtocolError("no login attempt made".into()))
    }
}

async fn ask(
    prompt: Arc<dyn SecondFactorPrompt>,
    challenge: Challenge,
) -> AuthResult<SecondFactorInput> {
    tokio::task::spawn_blocking(move || prompt.request_code(&challenge))
        .await
        .map_err(|e| AuthError::ProtocolError(format!("prompt failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::MockLoginApi;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn credentials() -> Credentials {
        Credentials::new("+33612345678", "1234").unwrap()
    }

    fn code_prompt(code: &'static str) -> Arc<dyn SecondFactorPrompt> {
        Arc::new(move |_: &Challenge| Ok::<_, AuthError>(SecondFactorInput::Code(code.into())))
    }

    fn scripted_prompt(answers: Vec<SecondFactorInput>) -> Arc<dyn SecondFactorPrompt> {
        let answers = Mutex::new(answers.into_iter());
        Arc::new(move |_: &Challenge| {
            answers
                .lock()
                .unwrap()
                .next()
                .ok_or_else(|| AuthError::ProtocolError("no more answers".into()))
        })
    }

    fn authenticator(api: Arc<MockLoginApi>) -> Authenticator {
        Authenticator::new(api, LoginConfig::new().with_retry_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_successful_login() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api.clone());

        let session = auth.authenticate(&credentials(), code_prompt("000000")).await.unwrap();
        assert!(!session.session_token().is_empty());
        assert_eq!(auth.state(), AuthState::Authenticated);
        assert_eq!(
            auth.history(),
            &[
                AuthState::Idle,
                AuthState::CredentialsSent,
                AuthState::AwaitingSecondFactor,
                AuthState::Authenticated
            ]
        );
        assert_eq!(api.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_wrong_pin() {
        let api = Arc::new(MockLoginApi::new().with_pin("4321"));
        let mut auth = authenticator(api.clone());

        let err = auth.authenticate(&credentials(), code_prompt("000000")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(auth.history(), &[AuthState::Idle, AuthState::Failed]);
    }

    #[tokio::test]
    async fn test_wrong_code_fails() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api);

        let err = auth.authenticate(&credentials(), code_prompt("111111")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSecondFactor(_)));
        assert_eq!(auth.state(), AuthState::Failed);
    }

    #[tokio::test]
    async fn test_failed_rejects_operations_until_restart() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api.clone());
        let _ = auth.authenticate(&credentials(), code_prompt("111111")).await;

        let err = auth.authenticate(&credentials(), code_prompt("000000")).await.unwrap_err();
        assert!(matches!(err, AuthError::ProtocolError(_)));
        let err = auth.submit_code("000000").await.unwrap_err();
        assert!(matches!(err, AuthError::ProtocolError(_)));
        assert_eq!(api.login_calls(), 1);

        auth.restart();
        assert!(auth.authenticate(&credentials(), code_prompt("000000")).await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_order_operation() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api);

        let err = auth.submit_code("000000").await.unwrap_err();
        assert!(matches!(err, AuthError::ProtocolError(_)));
        // A rejected out-of-order call does not move the machine
        assert_eq!(auth.state(), AuthState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_code_never_submitted() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api.clone());

        let err = auth.authenticate(&credentials(), code_prompt("12ab")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSecondFactor(_)));
        assert_eq!(api.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_sms_fallback() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api.clone());
        let prompt = scripted_prompt(vec![
            SecondFactorInput::ResendSms,
            SecondFactorInput::Code("000000".into()),
        ]);

        auth.authenticate(&credentials(), prompt).await.unwrap();
        assert_eq!(api.resend_calls(), 1);
    }

    #[tokio::test]
    async fn test_sms_only_once() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api.clone());
        let prompt = scripted_prompt(vec![SecondFactorInput::ResendSms, SecondFactorInput::ResendSms]);

        let err = auth.authenticate(&credentials(), prompt).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSecondFactor(_)));
        assert_eq!(api.resend_calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_after_wrong_code() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = authenticator(api.clone());
        let prompt = scripted_prompt(vec![
            SecondFactorInput::Code("999999".into()),
            SecondFactorInput::Code("000000".into()),
        ]);

        let session = auth.authenticate_with_retries(&credentials(), prompt).await.unwrap();
        assert!(session.session_token().starts_with("session-process-2"));
        assert_eq!(api.login_calls(), 2);
        assert_eq!(auth.history().first(), Some(&AuthState::Idle));
        assert_eq!(auth.history().last(), Some(&AuthState::Authenticated));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let api = Arc::new(MockLoginApi::new());
        let mut auth = Authenticator::new(
            api.clone(),
            LoginConfig::new()
                .with_max_attempts(3)
                .with_retry_delay(Duration::from_millis(1)),
        );
        let asked = Arc::new(AtomicUsize::new(0));
        let prompt: Arc<dyn SecondFactorPrompt> = {
            let asked = asked.clone();
            Arc::new(move |_: &Challenge| {
                asked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AuthError>(SecondFactorInput::Code("123123".into()))
            })
        };

        let err = auth.authenticate_with_retries(&credentials(), prompt).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSecondFactor(_)));
        assert_eq!(asked.load(Ordering::SeqCst), 3);
        assert_eq!(api.login_calls(), 3);
    }

    #[tokio::test]
    async fn test_invalid_credentials_not_retried() {
        let api = Arc::new(MockLoginApi::new().with_pin("0000"));
        let mut auth = authenticator(api.clone());

        let err = auth
            .authenticate_with_retries(&credentials(), code_prompt("000000"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(api.login_calls(), 1);
    }
}
