//! Second-factor prompt capability

use crate::error::AuthResult;
use crate::login::Challenge;

/// What the user answered at the two-factor prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondFactorInput {
    /// Code to submit
    Code(String),
    /// Re-send the code by SMS, then ask again
    ResendSms,
}

impl SecondFactorInput {
    /// Interpret a line typed by the user
    pub fn parse(answer: &str) -> Self {
        let answer = answer.trim();
        if answer.eq_ignore_ascii_case("sms") {
            Self::ResendSms
        } else {
            Self::Code(answer.chars().filter(|c| !c.is_whitespace()).collect())
        }
    }
}

/// Source of the two-factor code
///
/// Implementations may block (e.g. read from a terminal); the authenticator
/// calls them on a blocking thread.
pub trait SecondFactorPrompt: Send + Sync {
    /// Ask for the code of `challenge`
    fn request_code(&self, challenge: &Challenge) -> AuthResult<SecondFactorInput>;
}

impl<F> SecondFactorPrompt for F
where
    F: Fn(&Challenge) -> AuthResult<SecondFactorInput> + Send + Sync,
{
    fn request_code(&self, challenge: &Challenge) -> AuthResult<SecondFactorInput> {
        self(challenge)
    }
}

/// Check that a code is six ASCII digits
pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}
