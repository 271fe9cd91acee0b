//! Server configuration values. Values only, no behavior: the components
//! read these once at construction time.

use std::str::FromStr;
use std::time::Duration;

/// Connection server settings.
/// `connection_limit <= 0` means unlimited; `trace_buffer_size` is clamped
/// to at least one entry.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub connection_limit: i32,
    /// Top-level trace entries kept per connection before the oldest is evicted.
    pub trace_buffer_size: usize,
    /// Whether new sessions start with call tracing enabled.
    pub trace_default_enabled: bool,
    /// Default validity of issued credential tokens.
    pub token_ttl: Duration,
    /// Interval between background sweeps of expired tokens.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connection_limit: -1,
            trace_buffer_size: 40,
            trace_default_enabled: false,
            token_ttl: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(2500),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl ServerConfig {
    /// Read settings from the environment, falling back to defaults for
    /// unset or unparseable values.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            connection_limit: env_parse("BERTH_CONNECTION_LIMIT", d.connection_limit),
            trace_buffer_size: env_parse("BERTH_TRACE_BUFFER", d.trace_buffer_size).max(1),
            trace_default_enabled: env_parse("BERTH_TRACE_ENABLED", d.trace_default_enabled),
            token_ttl: Duration::from_secs(env_parse("BERTH_TOKEN_TTL_SECS", d.token_ttl.as_secs())),
            sweep_interval: Duration::from_millis(env_parse(
                "BERTH_SWEEP_INTERVAL_MS",
                d.sweep_interval.as_millis() as u64,
            )),
        }
    }
}
