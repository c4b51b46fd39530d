use crate::config::{Config, RelaySettings};
use secrecy::SecretString;
use std::time::Duration;

/// A fully configured `Config` pointing the issuer at `api_base`.
pub(crate) fn test_config(api_base: &str) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        elevenlabs_api_key: Some(SecretString::from("xi-test-key".to_string())),
        agent_id: Some("agent_123".to_string()),
        voice_id: Some("voice_456".to_string()),
        elevenlabs_api_base: api_base.to_string(),
        relay_upstream_prefix: None,
        relay: RelaySettings {
            connect_timeout: Duration::from_secs(2),
            teardown_timeout: Duration::from_millis(500),
            queue_capacity: 64,
        },
        issuer_timeout: Duration::from_secs(5),
        log_level: tracing::Level::INFO,
    }
}
