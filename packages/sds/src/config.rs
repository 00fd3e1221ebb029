use std::env;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::ConfigError;
use crate::memory_core::{MemoryCoreOptions, DEFAULT_MAX_CAUSAL_HISTORY, DEFAULT_SYNC_INTERVAL};
use crate::queue::{DispatchMode, EVENT_CHANNEL_CAPACITY};

/// Bridge configuration loaded from environment variables.
///
/// | variable                 | default  |
/// |--------------------------|----------|
/// | `SDS_DISPATCH_MODE`      | `inline` |
/// | `SDS_EVENT_BUFFER_SIZE`  | `1024`   |
/// | `SDS_SYNC_INTERVAL_MS`   | `30000`  |
/// | `SDS_MAX_CAUSAL_HISTORY` | `10`     |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdsConfig {
    pub dispatch_mode: DispatchMode,
    pub sync_interval: Duration,
    pub max_causal_history: usize,
}

impl Default for SdsConfig {
    fn default() -> Self {
        Self {
            dispatch_mode: DispatchMode::Inline,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            max_causal_history: DEFAULT_MAX_CAUSAL_HISTORY,
        }
    }
}

impl SdsConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let capacity = parse_positive(&lookup, "SDS_EVENT_BUFFER_SIZE")?
            .unwrap_or(EVENT_CHANNEL_CAPACITY);

        let dispatch_mode = match lookup("SDS_DISPATCH_MODE").as_deref() {
            None | Some("inline") => DispatchMode::Inline,
            Some("queued") => DispatchMode::Queued { capacity },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "SDS_DISPATCH_MODE",
                    expected: "`inline` or `queued`",
                    value: other.to_string(),
                })
            }
        };

        let sync_interval = parse_positive(&lookup, "SDS_SYNC_INTERVAL_MS")?
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(DEFAULT_SYNC_INTERVAL);

        let max_causal_history = parse_positive(&lookup, "SDS_MAX_CAUSAL_HISTORY")?
            .unwrap_or(DEFAULT_MAX_CAUSAL_HISTORY);

        Ok(Self {
            dispatch_mode,
            sync_interval,
            max_causal_history,
        })
    }

    pub fn memory_core_options(&self) -> MemoryCoreOptions {
        MemoryCoreOptions {
            sync_interval: self.sync_interval,
            max_causal_history: self.max_causal_history,
        }
    }
}

fn parse_positive<F>(lookup: &F, name: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };

    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::InvalidValue {
            name,
            expected: "a positive integer",
            value: raw,
        }),
    }
}
