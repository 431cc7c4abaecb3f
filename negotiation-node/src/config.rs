use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use negotiation_core::{EngineConfig, Identity};
use serde::Deserialize;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
    #[error(transparent)]
    Engine(#[from] negotiation_core::ConfigError),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub engine: EngineConfig,
    pub backend: BackendSection,
    pub oracle: OracleSection,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BackendSection {
    /// 32-byte hex seed for the reference masked-additive backend.
    pub key_seed: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct OracleSection {
    /// 32-byte hex key the reference oracle signs results with.
    pub proof_key: String,
    #[serde(default = "default_first_request_id")]
    pub first_request_id: u64,
}

const fn default_first_request_id() -> u64 {
    1
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.backend_seed()?;
        self.oracle_proof_key()?;
        Ok(())
    }

    pub fn backend_seed(&self) -> Result<[u8; 32], ConfigError> {
        decode_key("backend.key-seed", &self.backend.key_seed)
    }

    pub fn oracle_proof_key(&self) -> Result<[u8; 32], ConfigError> {
        decode_key("oracle.proof-key", &self.oracle.proof_key)
    }

    pub fn sample() -> Self {
        Self {
            engine: EngineConfig::sample().with_provider(Identity::new("did:negotiation:provider-b")),
            backend: BackendSection {
                key_seed: "11".repeat(32),
            },
            oracle: OracleSection {
                proof_key: "22".repeat(32),
                first_request_id: default_first_request_id(),
            },
        }
    }
}

fn decode_key(field: &str, value: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|err| ConfigError::Validation(format!("{field} is not valid hex: {err}")))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        ConfigError::Validation(format!("{field} must be 32 bytes, got {}", bytes.len()))
    })
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let parsed: Result<Config, String> = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| err.to_string()),
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| err.to_string())
        }
    };
    parsed.map_err(|details| ConfigError::Parse { format, details })
}

pub fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_valid() {
        let config = Config::sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend_seed().unwrap(), [0x11; 32]);
        assert_eq!(config.engine.initial_providers.len(), 2);
    }

    #[test]
    fn rejects_short_keys() {
        let mut config = Config::sample();
        config.oracle.proof_key = "abcd".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn surfaces_engine_validation() {
        let mut config = Config::sample();
        config.engine.system_identity.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Engine(_))));
    }

    #[test]
    fn parses_toml_config() {
        let contents = r#"
            [engine]
            system-identity = "negotiation-node/test"
            genesis-owner = "did:owner"
            cooldown-seconds = 5
            initial-providers = ["did:p1", "did:p2"]

            [backend]
            key-seed = "0x0101010101010101010101010101010101010101010101010101010101010101"

            [oracle]
            proof-key = "0202020202020202020202020202020202020202020202020202020202020202"
            first-request-id = 7
        "#;

        let config = parse_config(contents, ConfigFormat::Toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.cooldown_seconds, 5);
        assert_eq!(config.engine.initial_providers.len(), 2);
        assert_eq!(config.oracle.first_request_id, 7);
    }

    #[test]
    fn parses_yaml_config() {
        let contents = r#"
            engine:
              system-identity: negotiation-node/yaml
              genesis-owner: did:owner
            backend:
              key-seed: "0303030303030303030303030303030303030303030303030303030303030303"
            oracle:
              proof-key: "0404040404040404040404040404040404040404040404040404040404040404"
        "#;
        let config = parse_config(contents, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.engine.cooldown_seconds, 60);
        assert_eq!(config.oracle.first_request_id, 1);
        assert_eq!(config.oracle_proof_key().unwrap(), [0x04; 32]);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            resolve_format(Path::new("node.yml"), ConfigFormat::Auto),
            ConfigFormat::Yaml
        );
        assert_eq!(
            resolve_format(Path::new("node.conf"), ConfigFormat::Auto),
            ConfigFormat::Toml
        );
        assert_eq!(
            resolve_format(Path::new("node.toml"), ConfigFormat::Yaml),
            ConfigFormat::Yaml
        );
    }
}
