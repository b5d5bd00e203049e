#![forbid(unsafe_code)]

//! Error types.
//!
//! The containers themselves have no failure modes: cancelling twice or after
//! the container is gone is a no-op. The only errors are a malformed
//! environment configuration and, on request, a report of callbacks that
//! panicked during a notification pass.

use std::any::Any;
use std::fmt;

use crate::id::SubscriptionId;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value '{value}' for {key}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// One subscriber callback that panicked while being notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    /// Subscription whose callback panicked.
    pub id: SubscriptionId,
    /// Panic message, or `"unknown panic"` for non-string payloads.
    pub message: String,
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} panicked: {}", self.id, self.message)
    }
}

/// Report returned by `try_update` when at least one callback panicked.
///
/// Every other callback in the pass was still invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError {
    pub failures: Vec<CallbackFailure>,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} subscriber callback(s) panicked", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for NotifyError {}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
