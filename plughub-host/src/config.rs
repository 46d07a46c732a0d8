//! Registry configuration and per-load options

use serde::{Deserialize, Serialize};

/// Result channel capacity used when nothing else is configured
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Configuration for a [`Hubs`](crate::Hubs) registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubsConfig {
    /// Capacity of each new hub's async result channel.
    /// Zero is treated as one.
    pub channel_capacity: usize,
}

impl Default for HubsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Options for a single `load_plugin_with` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Channel capacity for the hub, only used when the hub is created
    /// by this load
    pub capacity: Option<usize>,
}

impl LoadOptions {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubsConfig::default();
        assert_eq!(config.channel_capacity, 100);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: HubsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, HubsConfig::default());

        let config: HubsConfig = serde_json::from_str(r#"{"channel_capacity": 8}"#).unwrap();
        assert_eq!(config.channel_capacity, 8);
    }

    #[test]
    fn test_load_options_builder() {
        assert_eq!(LoadOptions::default().capacity, None);
        assert_eq!(LoadOptions::default().capacity(4).capacity, Some(4));
    }
}
