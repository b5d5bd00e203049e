#![forbid(unsafe_code)]

//! Container configuration.
//!
//! | Key | Values | Default |
//! |-----|--------|---------|
//! | `STATEWIRE_REPLAY` | `1/true/yes/on`, `0/false/no/off` | on |
//! | `STATEWIRE_PANIC_POLICY` | `propagate`, `log` | `propagate` |
//!
//! Environment loading goes through an injectable lookup
//! ([`ObserveConfig::from_env_with`]) so tests never touch the real process
//! environment.

use crate::error::ConfigError;

/// Environment key for [`ObserveConfig::replay_on_subscribe`].
pub const ENV_REPLAY: &str = "STATEWIRE_REPLAY";
/// Environment key for [`ObserveConfig::panic_policy`].
pub const ENV_PANIC_POLICY: &str = "STATEWIRE_PANIC_POLICY";

/// What a container does after a subscriber callback panics.
///
/// Either way the panic is caught per callback and the rest of the pass is
/// still delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicPolicy {
    /// Finish the pass, then resume the first panic in the caller of
    /// `update`.
    #[default]
    Propagate,
    /// Log the panic with `tracing::error!` and carry on.
    Log,
}

impl PanicPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "propagate" => Some(Self::Propagate),
            "log" => Some(Self::Log),
            _ => None,
        }
    }
}

/// Behaviour switches shared by [`ObservableValue`](crate::ObservableValue)
/// and [`SharedObservableValue`](crate::SharedObservableValue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveConfig {
    /// Invoke a new subscriber immediately with the current value.
    /// Default: true.
    pub replay_on_subscribe: bool,

    /// Handling of subscriber panics. Default: [`PanicPolicy::Propagate`].
    pub panic_policy: PanicPolicy,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            replay_on_subscribe: true,
            panic_policy: PanicPolicy::Propagate,
        }
    }
}

impl ObserveConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay_on_subscribe = replay;
        self
    }

    #[must_use]
    pub fn with_panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    /// Load from the process environment, falling back to defaults for
    /// unset keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load using a custom environment lookup.
    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = get_env(ENV_REPLAY) {
            config.replay_on_subscribe =
                env_flag(&value).ok_or_else(|| invalid(ENV_REPLAY, &value))?;
        }
        if let Some(value) = get_env(ENV_PANIC_POLICY) {
            config.panic_policy =
                PanicPolicy::parse(&value).ok_or_else(|| invalid(ENV_PANIC_POLICY, &value))?;
        }
        Ok(config)
    }
}

fn env_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
