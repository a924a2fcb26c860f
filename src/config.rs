use std::time::Duration;

use serde::Deserialize;

use crate::registry::Network;

/// Runtime configuration for the settlement client.
///
/// Read once at startup and passed explicitly into the components that need
/// it; nothing in this crate reads the environment at call time.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Base URL of the settlement endpoint.
    pub settlement_url: String,
    /// Upper bound on every network call. A timeout is a hard failure.
    #[serde(skip)]
    pub request_timeout: Duration,
    /// Network used when the caller does not specify one.
    pub default_network: Network,
    /// API credential attached to every settlement call.
    pub api_key: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. `from_env` passes the process
    /// environment; tests pass a fixed map.
    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, config::ConfigError> {
        let timeout_secs: u64 = lookup("SETTLEMENT_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map_err(|e| {
                config::ConfigError::Message(format!("invalid SETTLEMENT_TIMEOUT_SECS: {}", e))
            })?;

        let default_network = lookup("SETTLEMENT_NETWORK")
            .unwrap_or_else(|| "base-sepolia".to_string())
            .parse()
            .map_err(|e: String| config::ConfigError::Message(e))?;

        Ok(Self {
            settlement_url: lookup("SETTLEMENT_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            default_network,
            api_key: lookup("SETTLEMENT_API_KEY").unwrap_or_default(),
        })
    }
}
