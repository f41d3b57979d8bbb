use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use grid_core::{GridError, GridSize, DEFAULT_GRID_SIZE};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Upstash {
        url: String,
        token: String,
        timeout: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub grid_size: GridSize,
    pub store: StoreConfig,
    /// `*` or a comma-separated origin list.
    pub cors_allowed_origins: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not valid: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error(transparent)]
    GridSize(#[from] GridError),
    #[error("UPSTASH_REDIS_REST_URL and UPSTASH_REDIS_REST_TOKEN must be set together")]
    IncompleteStore,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            grid_size: GridSize::default(),
            store: StoreConfig::Memory,
            cors_allowed_origins: "*".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host: IpAddr = parse_or(var("HOST"), "HOST", DEFAULT_HOST.parse().ok())?;
        let port: u16 = parse_or(var("PORT"), "PORT", Some(DEFAULT_PORT))?;
        let side: usize = parse_or(var("GRID_SIZE"), "GRID_SIZE", Some(DEFAULT_GRID_SIZE))?;
        let timeout_secs: u64 = parse_or(
            var("STORE_TIMEOUT_SECS"),
            "STORE_TIMEOUT_SECS",
            Some(DEFAULT_STORE_TIMEOUT_SECS),
        )?;

        let store = match (var("UPSTASH_REDIS_REST_URL"), var("UPSTASH_REDIS_REST_TOKEN")) {
            (Some(url), Some(token)) => StoreConfig::Upstash {
                url,
                token,
                timeout: Duration::from_secs(timeout_secs),
            },
            (None, None) => StoreConfig::Memory,
            _ => return Err(ConfigError::IncompleteStore),
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            grid_size: GridSize::new(side)?,
            store,
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|| "*".to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => default.ok_or(ConfigError::Invalid {
            name,
            value: String::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_memory_store_on_port_4000() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:4000".parse().unwrap());
        assert_eq!(config.grid_size.side(), 10);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.cors_allowed_origins, "*");
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("GRID_SIZE", "20"),
            ("UPSTASH_REDIS_REST_URL", "https://db.upstash.io"),
            ("UPSTASH_REDIS_REST_TOKEN", "secret"),
            ("STORE_TIMEOUT_SECS", "2"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.grid_size.side(), 20);
        assert_eq!(
            config.store,
            StoreConfig::Upstash {
                url: "https://db.upstash.io".into(),
                token: "secret".into(),
                timeout: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config_from(&[("PORT", "http")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
        assert!(matches!(
            config_from(&[("GRID_SIZE", "0")]),
            Err(ConfigError::GridSize(_))
        ));
        assert!(matches!(
            config_from(&[("UPSTASH_REDIS_REST_URL", "https://db.upstash.io")]),
            Err(ConfigError::IncompleteStore)
        ));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = config_from(&[("PORT", "  "), ("UPSTASH_REDIS_REST_TOKEN", "")]).unwrap();
        assert_eq!(config.bind_addr.port(), 4000);
        assert_eq!(config.store, StoreConfig::Memory);
    }
}
