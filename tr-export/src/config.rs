//! Exporter settings
//!
//! Settings come from a TOML file with a `[secret]` and a `[general]`
//! section, overridden by environment variables and command-line flags.
//!
//! ```toml
//! [secret]
//! phone_number = "+33612345678"
//! pin = "1234"
//!
//! [general]
//! output_format = "csv"
//! output_folder = "out"
//! extract_details = true
//! ```

use crate::cli::Cli;
use crate::export::OutputFormat;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tr_auth::Credentials;

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

const DEFAULT_LOCALE: &str = "fr";

/// Settings errors; all map to exit code 2
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has wrong types
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Required setting absent everywhere
    #[error("missing setting {0}")]
    Missing(&'static str),

    /// `output_format` is neither json nor csv
    #[error("unknown output format '{0}' (expected 'json' or 'csv')")]
    UnknownFormat(String),

    /// Phone number or PIN malformed
    #[error("{0}")]
    Credentials(String),
}

/// Contents of the config file
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// `[secret]` section
    pub secret: SecretSection,
    /// `[general]` section
    pub general: GeneralSection,
}

/// `[secret]` section
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SecretSection {
    pub phone_number: Option<String>,
    pub pin: Option<String>,
}

/// `[general]` section
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GeneralSection {
    pub output_format: Option<String>,
    pub output_folder: Option<PathBuf>,
    pub extract_details: Option<bool>,
    pub locale: Option<String>,
}

impl FileConfig {
    /// Parse TOML text
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path`, or the default file if it exists
    ///
    /// An explicitly named file must exist; a missing default file yields an
    /// empty config.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }
}

/// Resolved settings for one export run
#[derive(Debug)]
pub struct Settings {
    pub phone_number: String,
    pub pin: SecretString,
    pub output_format: OutputFormat,
    pub output_folder: PathBuf,
    pub extract_details: bool,
    pub locale: String,
}

impl Settings {
    /// Load the config file named by `args` and apply overrides
    pub fn load(args: &Cli) -> Result<Self, ConfigError> {
        let file = FileConfig::load(args.config.as_deref())?;
        Self::resolve(args, file)
    }

    /// Merge command-line values (flags and env) over file values
    pub fn resolve(args: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let phone_number = args
            .phone_number
            .clone()
            .or(file.secret.phone_number)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("secret.phone_number (or TR_PHONE_NUMBER)"))?;
        let pin = args
            .pin
            .clone()
            .or(file.secret.pin)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("secret.pin (or TR_PIN)"))?;

        let output_format = match (args.format, file.general.output_format) {
            (Some(format), _) => format,
            (None, Some(name)) => name
                .parse()
                .map_err(|_| ConfigError::UnknownFormat(name.clone()))?,
            (None, None) => OutputFormat::default(),
        };

        let output_folder = args
            .output
            .clone()
            .or(file.general.output_folder)
            .unwrap_or_else(|| PathBuf::from("."));
        let extract_details = args
            .extract_details()
            .or(file.general.extract_details)
            .unwrap_or(false);
        let locale = args
            .locale
            .clone()
            .or(file.general.locale)
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        Ok(Self {
            phone_number,
            pin: SecretString::from(pin),
            output_format,
            output_folder,
            extract_details,
            locale,
        })
    }

    /// Validated login credentials
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        Credentials::new(self.phone_number.as_str(), self.pin.expose_secret())
            .map_err(|e| ConfigError::Credentials(e.to_string()))
    }
}
