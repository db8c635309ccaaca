//! Runtime configuration

use std::time::Duration;

use meshdiag_core::{DiagError, DiagResult};
use meshdiag_wire::DIAGNOSTICS_CHANNEL;

pub const ENV_CHANNEL: &str = "MESHDIAG_CHANNEL";
pub const ENV_PROBE_TIMEOUT: &str = "MESHDIAG_PROBE_TIMEOUT";
pub const ENV_MAX_PENDING: &str = "MESHDIAG_MAX_PENDING";
pub const ENV_SWEEP_INTERVAL: &str = "MESHDIAG_SWEEP_INTERVAL";
pub const ENV_STALE_AFTER: &str = "MESHDIAG_STALE_AFTER";
pub const ENV_COMPLETE_EMPTY_ROOM: &str = "MESHDIAG_COMPLETE_EMPTY_ROOM";
pub const ENV_LOG: &str = "MESHDIAG_LOG";
pub const ENV_LOG_JSON: &str = "MESHDIAG_LOG_JSON";

/// Diagnostics runtime configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Channel tag used for every diagnostics send
    pub channel: String,
    /// Per-probe deadline; `None` waits for a reply indefinitely
    pub probe_timeout: Option<Duration>,
    /// Maximum number of pending transactions
    pub max_pending: usize,
    /// Period of the stale-transaction reaper; `None` disables it
    pub sweep_interval: Option<Duration>,
    /// Age at which the reaper expires a pending transaction
    pub stale_after: Duration,
    /// Complete a room probe immediately when nobody else is in the room
    pub complete_empty_room: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            channel: DIAGNOSTICS_CHANNEL.to_owned(),
            probe_timeout: None,
            max_pending: 4096,
            sweep_interval: None,
            stale_after: Duration::from_secs(60),
            complete_empty_room: false,
        }
    }
}

impl DiagnosticsConfig {
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Run the reaper every `interval`, expiring entries older than `stale_after`
    pub fn with_sweep(mut self, interval: Duration, stale_after: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self.stale_after = stale_after;
        self
    }

    pub fn with_complete_empty_room(mut self, complete: bool) -> Self {
        self.complete_empty_room = complete;
        self
    }

    /// Defaults overridden by `MESHDIAG_*` environment variables
    pub fn from_env() -> DiagResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key
    pub fn from_lookup<F>(lookup: F) -> DiagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = DiagnosticsConfig::default();

        if let Some(channel) = lookup(ENV_CHANNEL) {
            if channel.is_empty() {
                return Err(DiagError::InvalidConfig {
                    key: ENV_CHANNEL,
                    reason: "empty channel".into(),
                });
            }
            config.channel = channel;
        }
        if let Some(v) = lookup(ENV_PROBE_TIMEOUT) {
            config.probe_timeout = Some(parse_duration(ENV_PROBE_TIMEOUT, &v)?);
        }
        if let Some(v) = lookup(ENV_MAX_PENDING) {
            config.max_pending = v.trim().parse::<usize>().map_err(|e| DiagError::InvalidConfig {
                key: ENV_MAX_PENDING,
                reason: format!("{}", e),
            })?;
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL) {
            let period = parse_duration(ENV_SWEEP_INTERVAL, &v)?;
            if period.is_zero() {
                return Err(DiagError::InvalidConfig {
                    key: ENV_SWEEP_INTERVAL,
                    reason: "must be non-zero".into(),
                });
            }
            config.sweep_interval = Some(period);
        }
        if let Some(v) = lookup(ENV_STALE_AFTER) {
            config.stale_after = parse_duration(ENV_STALE_AFTER, &v)?;
        }
        if let Some(v) = lookup(ENV_COMPLETE_EMPTY_ROOM) {
            config.complete_empty_room = parse_bool(ENV_COMPLETE_EMPTY_ROOM, &v)?;
        }

        Ok(config)
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: "info".to_owned(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> DiagResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> DiagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LogConfig::default();
        if let Some(filter) = lookup(ENV_LOG) {
            config.filter = filter;
        }
        if let Some(v) = lookup(ENV_LOG_JSON) {
            config.json = parse_bool(ENV_LOG_JSON, &v)?;
        }
        Ok(config)
    }
}

fn parse_duration(key: &'static str, value: &str) -> DiagResult<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| DiagError::InvalidConfig {
        key,
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> DiagResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DiagError::InvalidConfig {
            key,
            reason: format!("not a boolean: {:?}", other),
        }),
    }
}
