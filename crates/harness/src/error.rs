//! Error types for the install harness

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// A soft check did not hold. Normally caught by [`crate::check`].
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Timeout waiting for: {what} (after {} ms)", .after.as_millis())]
    Timeout { what: String, after: Duration },

    /// Uncaught error raised inside the observed page. Displayed verbatim.
    #[error("{0}")]
    PageRuntime(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Page event stream closed while waiting for: {0}")]
    EventStreamClosed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Scenario failed: {0}")]
    ScenarioFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl HarnessError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        HarnessError::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
