//! Process configuration, read from the environment once at startup.

use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is required: {reason}")]
    Missing { var: &'static str, reason: &'static str },

    #[error("invalid value for {var} ('{value}'): {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub store: StoreConfig,
    /// Attempts per command when another writer got to the stream first.
    pub dispatch_retry_attempts: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: "BIND_ADDR",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let jwt_secret = match lookup("JWT_SECRET") {
            Some(secret) if !secret.trim().is_empty() => secret,
            _ => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let persistent = match lookup("USE_PERSISTENT_STORES") {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
                var: "USE_PERSISTENT_STORES",
                value: raw.clone(),
                reason: "expected true/false".to_string(),
            })?,
        };

        let store = if persistent {
            let database_url = lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::Missing {
                    var: "DATABASE_URL",
                    reason: "USE_PERSISTENT_STORES is enabled",
                })?;
            StoreConfig::Postgres { database_url }
        } else {
            StoreConfig::InMemory
        };

        let dispatch_retry_attempts = match lookup("DISPATCH_RETRY_ATTEMPTS") {
            None => DEFAULT_RETRY_ATTEMPTS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "DISPATCH_RETRY_ATTEMPTS",
                        value: raw,
                        reason: "expected a positive integer".to_string(),
                    });
                }
            },
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            store,
            dispatch_retry_attempts,
        })
    }

    /// In-memory stores on an ephemeral localhost port.
    pub fn for_tests(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: jwt_secret.into(),
            store: StoreConfig::InMemory,
            dispatch_retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_to_in_memory_dev_setup() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(cfg.store, StoreConfig::InMemory);
        assert_eq!(cfg.dispatch_retry_attempts, 3);
    }

    #[test]
    fn persistent_mode_requires_a_database_url() {
        assert_eq!(
            load(&[("USE_PERSISTENT_STORES", "true")]),
            Err(ConfigError::Missing {
                var: "DATABASE_URL",
                reason: "USE_PERSISTENT_STORES is enabled",
            })
        );

        let cfg = load(&[("USE_PERSISTENT_STORES", "TRUE"), ("DATABASE_URL", "postgres://localhost/tiles")]).unwrap();
        assert_eq!(
            cfg.store,
            StoreConfig::Postgres {
                database_url: "postgres://localhost/tiles".to_string()
            }
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(load(&[("BIND_ADDR", "nowhere")]), Err(ConfigError::Invalid { var: "BIND_ADDR", .. })));
        assert!(matches!(
            load(&[("USE_PERSISTENT_STORES", "maybe")]),
            Err(ConfigError::Invalid { var: "USE_PERSISTENT_STORES", .. })
        ));
        assert!(matches!(
            load(&[("DISPATCH_RETRY_ATTEMPTS", "0")]),
            Err(ConfigError::Invalid { var: "DISPATCH_RETRY_ATTEMPTS", .. })
        ));
    }
}
