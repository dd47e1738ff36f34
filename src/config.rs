//! Application-level configuration loading for the negotiation timers.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    hub::DEFAULT_EVENT_CAPACITY,
    pending::{
        DEFAULT_CHANGE_REQUEST_TIMEOUT, DEFAULT_PENDING_CHANGE_TIMEOUT, MAX_CANCELLATION_RESETS,
        PendingChangeSettings,
    },
};

/// Default location on disk where the binary looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/lockup.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "EGM_LOCKUP_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration.
pub struct AppConfig {
    /// Deadline for a negotiation started without an explicit timeout.
    pub pending_change_timeout: Duration,
    /// Acknowledgments tolerated before forced cancellation.
    pub max_cancellation_resets: u32,
    /// Deadline for negotiations started by queued change requests.
    pub change_request_timeout: Duration,
    /// Capacity of every event broadcast channel.
    pub event_capacity: usize,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), ?config, "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Settings for the pending-change coordinator.
    pub fn pending_change_settings(&self) -> PendingChangeSettings {
        PendingChangeSettings {
            default_timeout: self.pending_change_timeout,
            max_cancellation_resets: self.max_cancellation_resets,
            event_capacity: self.event_capacity,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    /// Negative values select the default.
    pending_change_timeout_ms: i64,
    max_cancellation_resets: u32,
    change_request_timeout_ms: i64,
    event_capacity: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            pending_change_timeout_ms: DEFAULT_PENDING_CHANGE_TIMEOUT.as_millis() as i64,
            max_cancellation_resets: MAX_CANCELLATION_RESETS,
            change_request_timeout_ms: DEFAULT_CHANGE_REQUEST_TIMEOUT.as_millis() as i64,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            pending_change_timeout: millis_or(
                value.pending_change_timeout_ms,
                DEFAULT_PENDING_CHANGE_TIMEOUT,
            ),
            max_cancellation_resets: value.max_cancellation_resets.max(1),
            change_request_timeout: millis_or(
                value.change_request_timeout_ms,
                DEFAULT_CHANGE_REQUEST_TIMEOUT,
            ),
            event_capacity: value.event_capacity.max(1),
        }
    }
}

fn millis_or(millis: i64, fallback: Duration) -> Duration {
    u64::try_from(millis)
        .map(Duration::from_millis)
        .unwrap_or(fallback)
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
