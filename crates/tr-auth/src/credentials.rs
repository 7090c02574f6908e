//! Login credentials
//!
//! The PIN is stored using the `secrecy` crate, so it is zeroized on drop
//! and never shows up in `Debug` output.

use crate::error::{AuthError, AuthResult};
use secrecy::{ExposeSecret, SecretString};

/// Phone number and PIN
pub struct Credentials {
    phone_number: String,
    pin: SecretString,
}

impl Credentials {
    /// Validate and wrap credentials
    ///
    /// The phone number must be in international format (`+4917...`), the
    /// PIN exactly four digits.
    pub fn new(phone_number: impl Into<String>, pin: impl Into<String>) -> AuthResult<Self> {
        let phone_number: String = phone_number.into().split_whitespace().collect();
        let pin = SecretString::from(pin.into());

        let digits = phone_number.strip_prefix('+').unwrap_or("");
        if digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(AuthError::InvalidCredentials(
                "phone number must be in international format, e.g. +33612345678".into(),
            ));
        }

        let exposed = pin.expose_secret();
        if exposed.len() != 4 || !exposed.chars().all(|c| c.is_ascii_digit()) {
            return Err(AuthError::InvalidCredentials("PIN must be 4 digits".into()));
        }

        Ok(Self { phone_number, pin })
    }

    /// Read `TR_PHONE_NUMBER` and `TR_PIN` from the environment
    pub fn from_env() -> AuthResult<Self> {
        let phone_number = std::env::var("TR_PHONE_NUMBER")
            .map_err(|_| AuthError::InvalidCredentials("TR_PHONE_NUMBER not set".into()))?;
        let pin = std::env::var("TR_PIN")
            .map_err(|_| AuthError::InvalidCredentials("TR_PIN not set".into()))?;
        Self::new(phone_number, pin)
    }

    /// Phone number, normalized without spaces
    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub(crate) fn pin(&self) -> &str {
        self.pin.expose_secret()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            phone_number: self.phone_number.clone(),
            pin: SecretString::from(self.pin.expose_secret().to_string()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let visible = &self.phone_number[self.phone_number.len().saturating_sub(2)..];
        f.debug_struct("Credentials")
            .field("phone_number", &format!("***{}", visible))
            .field("pin", &"[REDACTED]")
            .finish()
    }
}
