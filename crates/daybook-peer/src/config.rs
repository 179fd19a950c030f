use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "DAYBOOK_PEER_BIND_ADDR", "127.0.0.1:4617");
        if !bind_addr.contains(':') {
            return Err(ConfigError::Invalid(
                "DAYBOOK_PEER_BIND_ADDR must be host:port".to_string(),
            ));
        }

        let db_path = PathBuf::from(value_or_default(&lookup, "DAYBOOK_DB_PATH", "daybook.db"));

        Ok(Self { bind_addr, db_path })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn config_defaults_apply_without_env() {
        let map: HashMap<&str, &str> = HashMap::new();
        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:4617");
        assert_eq!(config.db_path, PathBuf::from("daybook.db"));
    }

    #[test]
    fn config_rejects_bind_addr_without_port() {
        let mut map = HashMap::new();
        map.insert("DAYBOOK_PEER_BIND_ADDR", "localhost");
        let result = AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()));
        assert!(result.is_err());
    }
}
