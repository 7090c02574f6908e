//! Two-factor login and session management for the Trade Republic API
//!
//! This crate turns a phone number, a PIN and a one-time code into a
//! [`Session`](tr_types::Session), and keeps that session fresh while an
//! export runs.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tr_auth::{
//!     Authenticator, Credentials, HttpLoginApi, LoginConfig, SecondFactorInput,
//!     SecondFactorPrompt,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let creds = Credentials::from_env()?;
//!     let api = Arc::new(HttpLoginApi::new()?);
//!     let mut auth = Authenticator::new(api, LoginConfig::default());
//!
//!     let prompt: Arc<dyn SecondFactorPrompt> = Arc::new(|_: &tr_auth::Challenge| -> tr_auth::AuthResult<SecondFactorInput> {
//!         let mut line = String::new();
//!         std::io::stdin().read_line(&mut line).map_err(|e| {
//!             tr_auth::AuthError::ProtocolError(e.to_string())
//!         })?;
//!         Ok(SecondFactorInput::parse(&line))
//!     });
//!
//!     let session = auth.authenticate_with_retries(&creds, prompt).await?;
//!     println!("Session valid for {:?}", session.time_until_expiry());
//!     Ok(())
//! }
//! ```

mod authenticator;
mod credentials;
mod error;
mod login;
mod prompt;
mod session;

pub use authenticator::{AuthState, Authenticator, LoginConfig};
pub use credentials::Credentials;
pub use error::{AuthError, AuthResult};
pub use login::{Challenge, HttpLoginApi, LoginApi, DEFAULT_SESSION_TTL};
pub use prompt::{is_well_formed_code, SecondFactorInput, SecondFactorPrompt};
pub use session::{RefreshConfig, SessionManager, TokenSource, TokenState};

#[cfg(any(test, feature = "test-utils"))]
pub use login::MockLoginApi;
