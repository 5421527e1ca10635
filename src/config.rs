//! Appender configuration.
//!
//! Configuration arrives from outside (a JSON document, environment variables, or code)
//! and is applied through the appender's setters by
//! [`DispatchAppender::from_config`](crate::appender::DispatchAppender::from_config).
//!
//! ```
//! use logmail::config::AppenderConfig;
//!
//! let config = AppenderConfig::from_json_str(r#"{
//!     "to": "ops@example.com",
//!     "from": "app@example.com",
//!     "subject": "[%p] %m",
//!     "buffer_size": 64,
//!     "layout": { "kind": "pattern", "pattern": "%d %-5p %c - %m%n" },
//!     "credentials": { "access_key_id": "AKIA...", "secret_key": "s3cr3t" }
//! }"#).unwrap();
//! assert_eq!(config.buffer_size, 64);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::evaluator::DEFAULT_EVALUATOR;
use crate::layout::{Layout, PatternLayout, SimpleLayout};

/// Default number of buffered events.
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),
    /// `buffer_size` must be > 0.
    #[error("buffer_size must be > 0 (got {0})")]
    InvalidBufferSize(usize),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Option or variable name.
        key: String,
        /// Raw value supplied.
        value: String,
    },
}

/// Credentials used to build the sink session.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_key: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self { access_key_id: Some(access_key_id.into()), secret_key: Some(secret_key.into()) }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Layout selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutConfig {
    Pattern {
        pattern: String,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        footer: Option<String>,
        #[serde(default)]
        content_type: Option<String>,
    },
    Simple,
}

impl LayoutConfig {
    pub fn build(&self) -> Box<dyn Layout> {
        match self {
            LayoutConfig::Pattern { pattern, header, footer, content_type } => {
                let mut layout = PatternLayout::new(pattern.clone());
                if let Some(header) = header {
                    layout = layout.with_header(header.clone());
                }
                if let Some(footer) = footer {
                    layout = layout.with_footer(footer.clone());
                }
                if let Some(content_type) = content_type {
                    layout = layout.with_content_type(content_type.clone());
                }
                Box::new(layout)
            }
            LayoutConfig::Simple => Box::new(SimpleLayout),
        }
    }
}

/// Every recognized appender option.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    pub name: String,
    pub buffer_size: usize,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub reply_to: Option<String>,
    /// Pattern rendered against the triggering event to form the subject.
    pub subject: Option<String>,
    pub location_info: bool,
    pub send_on_close: bool,
    /// Registry name of the triggering evaluator.
    pub evaluator: String,
    pub evaluator_options: BTreeMap<String, String>,
    pub layout: Option<LayoutConfig>,
    pub credentials: Credentials,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            name: "logmail".into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            from: None,
            to: None,
            cc: None,
            bcc: None,
            reply_to: None,
            subject: None,
            location_info: false,
            send_on_close: false,
            evaluator: DEFAULT_EVALUATOR.into(),
            evaluator_options: BTreeMap::new(),
            layout: None,
            credentials: Credentials::default(),
        }
    }
}

impl AppenderConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppenderConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `<PREFIX>_*` variables from the process environment.
    ///
    /// | Variable | Option |
    /// |----------|--------|
    /// | `<PREFIX>_NAME` | `name` |
    /// | `<PREFIX>_BUFFER_SIZE` | `buffer_size` |
    /// | `<PREFIX>_FROM`, `_TO`, `_CC`, `_BCC`, `_REPLY_TO` | addresses |
    /// | `<PREFIX>_SUBJECT` | `subject` |
    /// | `<PREFIX>_LOCATION_INFO`, `_SEND_ON_CLOSE` | flags (`true`/`false`/`1`/`0`) |
    /// | `<PREFIX>_EVALUATOR` | `evaluator` |
    /// | `<PREFIX>_THRESHOLD` | `evaluator_options.threshold` |
    /// | `<PREFIX>_PATTERN` | pattern layout |
    /// | `<PREFIX>_ACCESS_KEY_ID`, `_SECRET_KEY` | credentials |
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", prefix, name));
        let mut config = AppenderConfig::default();

        if let Some(name) = var("NAME") {
            config.name = name;
        }
        if let Some(raw) = var("BUFFER_SIZE") {
            config.buffer_size = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: format!("{}_BUFFER_SIZE", prefix),
                value: raw.clone(),
            })?;
        }
        config.from = var("FROM");
        config.to = var("TO");
        config.cc = var("CC");
        config.bcc = var("BCC");
        config.reply_to = var("REPLY_TO");
        config.subject = var("SUBJECT");
        if let Some(raw) = var("LOCATION_INFO") {
            config.location_info = parse_flag(&format!("{}_LOCATION_INFO", prefix), &raw)?;
        }
        if let Some(raw) = var("SEND_ON_CLOSE") {
            config.send_on_close = parse_flag(&format!("{}_SEND_ON_CLOSE", prefix), &raw)?;
        }
        if let Some(evaluator) = var("EVALUATOR") {
            config.evaluator = evaluator;
        }
        if let Some(threshold) = var("THRESHOLD") {
            config.evaluator_options.insert("threshold".into(), threshold);
        }
        if let Some(pattern) = var("PATTERN") {
            config.layout = Some(LayoutConfig::Pattern {
                pattern,
                header: None,
                footer: None,
                content_type: None,
            });
        }
        config.credentials =
            Credentials { access_key_id: var("ACCESS_KEY_ID"), secret_key: var("SECRET_KEY") };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(self.buffer_size));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() }),
    }
}
