//! Console two-factor prompt

use colored::*;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use tr_auth::{AuthError, AuthResult, Challenge, SecondFactorInput, SecondFactorPrompt};

/// Line-based prompt over any reader/writer pair
pub struct LinePrompt<R, W> {
    io: Mutex<(R, W)>,
    // Process id of the last challenge asked about; asking again for the same
    // one means the code was re-sent by SMS
    last_process: Mutex<Option<String>>,
}

/// Prompt on the terminal
pub type ConsolePrompt = LinePrompt<BufReader<Stdin>, Stdout>;

impl ConsolePrompt {
    /// Prompt on stdin/stdout
    pub fn console() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> LinePrompt<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
            last_process: Mutex::new(None),
        }
    }

    /// Give back the reader and writer
    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner()
    }

    fn ask(&self, question: &str) -> io::Result<Option<String>> {
        let mut io = self.io.lock();
        let (reader, writer) = &mut *io;
        write!(writer, "{} {}", "?".yellow().bold(), question)?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

impl<R, W> SecondFactorPrompt for LinePrompt<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn request_code(&self, challenge: &Challenge) -> AuthResult<SecondFactorInput> {
        let resent = {
            let mut last = self.last_process.lock();
            let resent = last.as_deref() == Some(challenge.process_id.as_str());
            *last = Some(challenge.process_id.clone());
            resent
        };

        let question = if resent {
            "Enter the 2FA code received by SMS: ".to_string()
        } else {
            format!(
                "Enter the 2FA code ({} seconds left) or type 'SMS': ",
                challenge.countdown.as_secs()
            )
        };

        match self.ask(&question) {
            Ok(Some(line)) => Ok(SecondFactorInput::parse(&line)),
            Ok(None) => Err(AuthError::InvalidSecondFactor("no code entered".into())),
            Err(e) => Err(AuthError::ProtocolError(format!("cannot read code: {}", e))),
        }
    }
}
