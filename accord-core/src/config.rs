use serde::{Deserialize, Serialize};

/// Messenger settings. Hosts usually keep these as JSON next to their own
/// settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Display name announced in outgoing contact updates.
    pub display_name: String,
    /// ENS name announced in outgoing contact updates.
    pub ens_name: String,
    /// Ask the transport to resend outbound messages until delivered.
    pub resend_automatically: bool,
    /// Re-announce our contact state when a peer's view is stale.
    pub send_back_state_enabled: bool,
    /// Entries kept by the processed-message replay cache.
    pub replay_cache_capacity: usize,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        MessengerConfig {
            display_name: String::new(),
            ens_name: String::new(),
            resend_automatically: true,
            send_back_state_enabled: true,
            replay_cache_capacity: 10_000,
        }
    }
}

impl MessengerConfig {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_json() {
        let config = MessengerConfig {
            display_name: "alice".to_string(),
            ..MessengerConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(MessengerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = MessengerConfig::from_json(r#"{"send_back_state_enabled": false}"#).unwrap();
        assert!(!config.send_back_state_enabled);
        assert!(config.resend_automatically);
        assert_eq!(config.replay_cache_capacity, 10_000);
    }
}
