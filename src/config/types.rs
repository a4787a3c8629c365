use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::device::constants::{DEFAULT_PUBLISHER_ADDRESS, DEFAULT_RPC_ADDRESS, HEARTBEAT_TIMEOUT, MIN_TIMEOUT, REQUEST_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Bands that stay in the band set even while the engine does not report them.
    pub favorite_bands: Vec<String>,
    pub publisher_address: String,
    pub rpc_address: String,
    pub heartbeat_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Config {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms.max(MIN_TIMEOUT))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(MIN_TIMEOUT))
    }

    pub fn add_favorites(&mut self, bands: &[String]) {
        for band in bands {
            if !self.favorite_bands.contains(band) {
                self.favorite_bands.push(band.clone());
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            favorite_bands: Vec::new(),
            publisher_address: DEFAULT_PUBLISHER_ADDRESS.to_string(),
            rpc_address: DEFAULT_RPC_ADDRESS.to_string(),
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT,
            request_timeout_ms: REQUEST_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"favoriteBands": ["A"], "unknown": 1}"#).unwrap();

        assert_eq!(config.favorite_bands, vec!["A"]);
        assert_eq!(config.publisher_address, DEFAULT_PUBLISHER_ADDRESS);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(3));
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn zero_timeouts_are_raised_to_the_minimum() {
        let config: Config = serde_json::from_str(r#"{"heartbeatTimeoutMs": 0, "requestTimeoutMs": 0}"#).unwrap();

        assert_eq!(config.heartbeat_timeout(), Duration::from_millis(MIN_TIMEOUT));
        assert_eq!(config.request_timeout(), Duration::from_millis(MIN_TIMEOUT));
    }

    #[test]
    fn favorites_are_not_duplicated() {
        let mut config = Config::default();
        config.add_favorites(&["A".to_string(), "B".to_string()]);
        config.add_favorites(&["B".to_string()]);
        assert_eq!(config.favorite_bands, vec!["A", "B"]);
    }
}
