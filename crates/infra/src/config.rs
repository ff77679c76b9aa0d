//! Configuration loading and representation.
//!
//! Everything comes from environment variables; there are no config files.

use std::net::SocketAddr;

use thiserror::Error;

use gestio_inventory::StockPolicy;

pub const ALLOW_NEGATIVE_STOCK: &str = "GESTIO_ALLOW_NEGATIVE_STOCK";
pub const NUMBERING_RETRIES: &str = "GESTIO_NUMBERING_RETRIES";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS: &str = "GESTIO_DB_MAX_CONNECTIONS";
pub const BIND_ADDR: &str = "GESTIO_BIND_ADDR";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Outbound postings may drive a warehouse below zero.
    pub allow_negative_stock: bool,
    /// How many times a write that lost its document number is retried with
    /// a fresh one.
    pub numbering_retries: u32,
    /// Selects the Postgres store when present.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_negative_stock: true,
            numbering_retries: 3,
            database_url: None,
            db_max_connections: 10,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let allow_negative_stock = match value(ALLOW_NEGATIVE_STOCK) {
            None => defaults.allow_negative_stock,
            Some(raw) => parse_bool(ALLOW_NEGATIVE_STOCK, &raw)?,
        };
        let numbering_retries = match value(NUMBERING_RETRIES) {
            None => defaults.numbering_retries,
            Some(raw) => raw.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: NUMBERING_RETRIES,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        };
        let db_max_connections = match value(DB_MAX_CONNECTIONS) {
            None => defaults.db_max_connections,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: DB_MAX_CONNECTIONS,
                        value: raw,
                        reason: "expected a positive integer".into(),
                    });
                }
            },
        };
        let bind_addr = match value(BIND_ADDR) {
            None => defaults.bind_addr,
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: BIND_ADDR,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        };

        Ok(Self {
            allow_negative_stock,
            numbering_retries,
            database_url: value(DATABASE_URL),
            db_max_connections,
            bind_addr,
        })
    }

    pub fn stock_policy(&self) -> StockPolicy {
        StockPolicy {
            allow_negative: self.allow_negative_stock,
        }
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.stock_policy().allow_negative);
    }

    #[test]
    fn reads_every_key() {
        let config = load(&[
            (ALLOW_NEGATIVE_STOCK, "false"),
            (NUMBERING_RETRIES, "5"),
            (DATABASE_URL, "postgres://localhost/gestio"),
            (DB_MAX_CONNECTIONS, "4"),
            (BIND_ADDR, "127.0.0.1:9000"),
        ])
        .unwrap();
        assert!(!config.allow_negative_stock);
        assert_eq!(config.numbering_retries, 5);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/gestio"));
        assert_eq!(config.db_max_connections, 4);
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(load(&[(ALLOW_NEGATIVE_STOCK, "maybe")]).is_err());
        assert!(load(&[(DB_MAX_CONNECTIONS, "0")]).is_err());
        let err = load(&[(BIND_ADDR, "nowhere")]).unwrap_err();
        assert!(err.to_string().contains(BIND_ADDR));
    }
}
