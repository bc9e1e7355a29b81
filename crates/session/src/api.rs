//! Runtime configuration and the process-wide entry points.

use std::time::Duration;

use enginelink_core::{
    ClientConfig, DEFAULT_MAX_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SHARED_STARTUP_OPTION, DEFAULT_STARTUP_OPTION,
};

use crate::error::Result;
use crate::future_result::Dispatched;
use crate::handle::EngineHandle;
use crate::registry::SessionRegistry;

/// Configuration of a [`SessionRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Startup option of plain session starts.
    pub startup_option: String,

    /// Startup option used when an unnamed shared connect finds no session.
    ///
    /// Must contain the share command for concurrent connects to end up in one
    /// session.
    pub shared_startup_option: String,

    /// First delay between two polls of a running call.
    pub poll_interval: Duration,

    /// Cap of the exponential poll back-off.
    pub max_poll_interval: Duration,
}

impl SessionConfig {
    /// Default first poll delay.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

    /// Default poll back-off cap.
    pub const DEFAULT_MAX_POLL_INTERVAL: Duration =
        Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS);

    pub(crate) fn normalized(mut self) -> Self {
        if self.shared_startup_option.trim().is_empty() {
            self.shared_startup_option = DEFAULT_SHARED_STARTUP_OPTION.to_string();
        }
        if self.poll_interval.is_zero() {
            self.poll_interval = Self::DEFAULT_POLL_INTERVAL;
        }
        if self.max_poll_interval.is_zero() {
            self.max_poll_interval = Self::DEFAULT_MAX_POLL_INTERVAL;
        }
        self.max_poll_interval = self.max_poll_interval.max(self.poll_interval);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            startup_option: DEFAULT_STARTUP_OPTION.to_string(),
            shared_startup_option: DEFAULT_SHARED_STARTUP_OPTION.to_string(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            max_poll_interval: Self::DEFAULT_MAX_POLL_INTERVAL,
        }
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            startup_option: cfg.startup_option.clone(),
            shared_startup_option: cfg.shared_startup_option.clone(),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            max_poll_interval: Duration::from_millis(cfg.max_poll_interval_ms),
        }
        .normalized()
    }
}

impl From<&SessionConfig> for ClientConfig {
    fn from(cfg: &SessionConfig) -> Self {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            startup_option: cfg.startup_option.clone(),
            shared_startup_option: cfg.shared_startup_option.clone(),
            poll_interval_ms: millis(cfg.poll_interval),
            max_poll_interval_ms: millis(cfg.max_poll_interval),
            log_filter: None,
        }
    }
}

/// Start a new session through the process-wide registry.
pub fn start_session(option: Option<&str>, background: bool) -> Result<Dispatched<EngineHandle>> {
    SessionRegistry::global().start_session(option, background)
}

/// Connect to a shared session through the process-wide registry.
pub fn connect_shared(name: Option<&str>, background: bool) -> Result<Dispatched<EngineHandle>> {
    SessionRegistry::global().connect_shared(name, background)
}

/// Shared sessions visible to the process-wide registry.
pub fn list_shared_sessions() -> Vec<String> {
    SessionRegistry::global().list_shared_sessions()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_intervals_fall_back_to_defaults() {
        let cfg = SessionConfig {
            shared_startup_option: "  ".to_string(),
            poll_interval: Duration::ZERO,
            max_poll_interval: Duration::ZERO,
            ..SessionConfig::default()
        }
        .normalized();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn client_config_converts_to_durations() {
        let client = ClientConfig {
            poll_interval_ms: 20,
            max_poll_interval_ms: 5,
            ..ClientConfig::default()
        };
        let cfg = SessionConfig::from(&client);
        assert_eq!(cfg.poll_interval, Duration::from_millis(20));
        assert_eq!(cfg.max_poll_interval, Duration::from_millis(20));
        assert_eq!(cfg.startup_option, DEFAULT_STARTUP_OPTION);
    }

    #[test]
    fn session_config_round_trips_through_client_config() {
        let cfg = SessionConfig {
            startup_option: "-nojvm".to_string(),
            poll_interval: Duration::from_millis(4),
            max_poll_interval: Duration::from_millis(40),
            ..SessionConfig::default()
        };
        let client = ClientConfig::from(&cfg);
        assert_eq!(client.startup_option, "-nojvm");
        assert_eq!(client.poll_interval_ms, 4);
        assert_eq!(client.max_poll_interval_ms, 40);
        assert_eq!(client.log_filter, None);
        assert_eq!(SessionConfig::from(&client), cfg);
    }
}
