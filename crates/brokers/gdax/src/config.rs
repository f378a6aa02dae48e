use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::error;

/// Production REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.pro.coinbase.com";
/// Production websocket feed.
pub const DEFAULT_WS_URL: &str = "wss://ws-feed.pro.coinbase.com";

/// Errors raised while loading the key/uri file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(String),
    #[error("Missing config entry: {0}")]
    Missing(String),
}

/// API keys and endpoints, loaded from a TOML file:
///
/// ```toml
/// [keys]
/// key = "..."
/// secret = "..."
/// passphrase = "..."
///
/// [uris]
/// api = "https://api.pro.coinbase.com"
/// wsapi = "wss://ws-feed.pro.coinbase.com"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GdaxConfig {
    pub keys: Keys,
    pub uris: Uris,
    #[serde(default)]
    pub client: ClientSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Keys {
    pub key: String,
    pub secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uris {
    pub api: String,
    pub wsapi: String,
}

impl Default for Uris {
    fn default() -> Self {
        Self {
            api: DEFAULT_API_URL.to_string(),
            wsapi: DEFAULT_WS_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Timeout for REST requests, in seconds.
    pub timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl GdaxConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(text).map_err(|e| {
            error!("Failed to parse config: {}", e);
            ConfigError::Parse(e.to_string())
        })?;

        for (section, keys) in [
            ("keys", &["key", "secret", "passphrase"][..]),
            ("uris", &["api", "wsapi"][..]),
        ] {
            let section_table = table.get(section).ok_or_else(|| {
                error!(section, "Missing config section");
                ConfigError::Missing(format!("[{}]", section))
            })?;
            for key in keys {
                if section_table.get(key).is_none() {
                    error!(section, key, "Missing config key");
                    return Err(ConfigError::Missing(format!("{}.{}", section, key)));
                }
            }
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[keys]
key = "abc"
secret = "c2VjcmV0"
passphrase = "pass"

[uris]
api = "https://api-public.sandbox.pro.coinbase.com"
wsapi = "wss://ws-feed-public.sandbox.pro.coinbase.com"
"#;

    #[test]
    fn test_parse_config() {
        let cfg = GdaxConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.keys.key, "abc");
        assert_eq!(cfg.uris.api, "https://api-public.sandbox.pro.coinbase.com");
        assert_eq!(cfg.client.timeout_secs, 10);
    }

    #[test]
    fn test_missing_key_is_named() {
        let text = SAMPLE.replace("passphrase = \"pass\"\n", "");
        match GdaxConfig::from_toml(&text) {
            Err(ConfigError::Missing(what)) => assert_eq!(what, "keys.passphrase"),
            other => panic!("Expected missing key, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_section_is_named() {
        let text = "[keys]\nkey = \"a\"\nsecret = \"b\"\npassphrase = \"c\"\n";
        match GdaxConfig::from_toml(text) {
            Err(ConfigError::Missing(what)) => assert_eq!(what, "[uris]"),
            other => panic!("Expected missing section, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cfg = GdaxConfig::from_toml(SAMPLE).unwrap();
        let out = format!("{:?}", cfg);
        assert!(!out.contains("c2VjcmV0"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gdax.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert!(GdaxConfig::from_path(&path).is_ok());
        assert!(matches!(
            GdaxConfig::from_path(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
