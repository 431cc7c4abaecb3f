use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Identity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Bound into every decryption commitment so a commitment computed by
    /// another deployment never verifies here.
    pub system_identity: String,
    pub genesis_owner: Identity,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub initial_providers: Vec<Identity>,
}

const fn default_cooldown_seconds() -> u64 {
    60
}

impl EngineConfig {
    pub fn new(system_identity: impl Into<String>, genesis_owner: Identity) -> Self {
        Self {
            system_identity: system_identity.into(),
            genesis_owner,
            cooldown_seconds: default_cooldown_seconds(),
            initial_providers: Vec::new(),
        }
    }

    pub fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    pub fn with_provider(mut self, provider: Identity) -> Self {
        self.initial_providers.push(provider);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_identity.trim().is_empty() {
            return Err(ConfigError::Validation(
                "system-identity must not be empty".into(),
            ));
        }
        if self.genesis_owner.as_str().trim().is_empty() {
            return Err(ConfigError::Validation(
                "genesis-owner must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn sample() -> Self {
        Self::new("negotiation-node/devnet", Identity::new("did:negotiation:owner"))
            .with_provider(Identity::new("did:negotiation:provider-a"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cooldown_when_omitted() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"system-identity": "sys", "genesis-owner": "owner"}"#,
        )
        .unwrap();
        assert_eq!(config.cooldown_seconds, 60);
        assert!(config.initial_providers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_blank_identity() {
        let config = EngineConfig::new(" ", Identity::new("owner"));
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
