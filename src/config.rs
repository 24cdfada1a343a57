//! Client and responder settings.

use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::envelope::DEFAULT_ERROR_CODE;
use crate::error::ConfigError;

/// Settings shared by the request client and responders.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use sourced_reqres::Config;
///
/// let config = Config::from_json_str(r#"{ "default_timeout_ms": 5000 }"#).unwrap();
/// assert_eq!(config.default_timeout().as_millis(), 5000);
/// assert_eq!(config.default_error_code, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a request waits for its reply.
    pub default_timeout_ms: u64,
    /// How long each consumer poll blocks before checking for shutdown.
    /// Values below 1 ms are raised to 1 ms.
    pub poll_interval_ms: u64,
    /// Code used for error replies that do not name one.
    pub default_error_code: u32,
    /// Address replies are sent to. Generated per client when unset.
    pub reply_to: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            poll_interval_ms: 10,
            default_error_code: DEFAULT_ERROR_CODE,
            reply_to: None,
        }
    }
}

impl Config {
    /// Parse a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError(e.to_string()))
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_default_error_code(mut self, code: u32) -> Self {
        self.default_error_code = code;
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// The configured reply address, or a fresh `reply.<uuid>` one.
    pub(crate) fn resolve_reply_to(&self) -> String {
        self.reply_to
            .clone()
            .unwrap_or_else(|| format!("reply.{}", Uuid::new_v4()))
    }
}
