use secrecy::SecretString;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Tunables for each relay connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelaySettings {
    /// Upper bound on opening the upstream socket.
    pub connect_timeout: Duration,
    /// Upper bound on closing the second socket once the first one is gone.
    pub teardown_timeout: Duration,
    /// Frames buffered per direction before new frames are rejected.
    pub queue_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(2),
            queue_capacity: 256,
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
///
/// Provider credentials are optional here: their absence is reported when a
/// signed URL is requested, not when the process starts.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub elevenlabs_api_key: Option<SecretString>,
    pub agent_id: Option<String>,
    pub voice_id: Option<String>,
    pub elevenlabs_api_base: String,
    /// Signed URLs must start with this prefix to be relayed. `None` accepts
    /// any `ws://` or `wss://` URL.
    pub relay_upstream_prefix: Option<String>,
    pub relay: RelaySettings,
    pub issuer_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let elevenlabs_api_key = non_empty_var("ELEVENLABS_API_KEY").map(SecretString::from);
        let agent_id = non_empty_var("AGENT_ID");
        let voice_id = non_empty_var("ELEVENLABS_VOICE_ID");

        let elevenlabs_api_base = non_empty_var("ELEVENLABS_API_BASE")
            .unwrap_or_else(|| "https://api.elevenlabs.io".to_string())
            .trim_end_matches('/')
            .to_string();

        let relay_upstream_prefix = match std::env::var("RELAY_UPSTREAM_PREFIX") {
            Ok(prefix) if prefix.is_empty() => None,
            Ok(prefix) => Some(prefix),
            Err(_) => Some("wss://api.elevenlabs.io/".to_string()),
        };

        let defaults = RelaySettings::default();
        let relay = RelaySettings {
            connect_timeout: millis_var("RELAY_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
            teardown_timeout: millis_var("RELAY_TEARDOWN_TIMEOUT_MS", defaults.teardown_timeout)?,
            queue_capacity: parsed_var("RELAY_QUEUE_CAPACITY", defaults.queue_capacity)?,
        };
        if relay.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_QUEUE_CAPACITY".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let issuer_timeout = millis_var("ISSUER_TIMEOUT_MS", Duration::from_secs(10))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            elevenlabs_api_key,
            agent_id,
            voice_id,
            elevenlabs_api_base,
            relay_upstream_prefix,
            relay,
            issuer_timeout,
            log_level,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parsed_var(name, default_ms).map(Duration::from_millis)
}
