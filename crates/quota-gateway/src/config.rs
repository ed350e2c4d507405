use quota_ledger::LedgerConfig;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Gateway server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ledger: LedgerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ledger: LedgerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads `QUOTA_HOST`, `QUOTA_PORT`, `QUOTA_CYCLE_DAYS`,
    /// `QUOTA_DEFAULT_PLAN` and `QUOTA_RESERVATION_TTL_SECS`. Call `dotenvy::dotenv()` first to
    /// pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("QUOTA_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("QUOTA_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::Invalid {
                name: "QUOTA_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(days) = lookup("QUOTA_CYCLE_DAYS") {
            config.ledger.cycle_days = match days.parse::<i64>() {
                Ok(d) if d > 0 => d,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "QUOTA_CYCLE_DAYS",
                        value: days,
                    })
                }
            };
        }
        if let Some(ttl) = lookup("QUOTA_RESERVATION_TTL_SECS") {
            config.ledger.reservation_ttl_secs = match ttl.parse::<i64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "QUOTA_RESERVATION_TTL_SECS",
                        value: ttl,
                    })
                }
            };
        }
        if let Some(plan) = lookup("QUOTA_DEFAULT_PLAN") {
            if plan.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    name: "QUOTA_DEFAULT_PLAN",
                    value: plan,
                });
            }
            config.ledger.default_plan_id = plan;
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                name: "QUOTA_HOST",
                value: self.host.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.ledger.cycle_days, 30);
        assert_eq!(config.ledger.default_plan_id, "free");
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("QUOTA_HOST", "127.0.0.1"),
            ("QUOTA_PORT", "9090"),
            ("QUOTA_CYCLE_DAYS", "7"),
            ("QUOTA_DEFAULT_PLAN", "starter"),
            ("QUOTA_RESERVATION_TTL_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9090");
        assert_eq!(config.ledger.cycle_days, 7);
        assert_eq!(config.ledger.default_plan_id, "starter");
        assert_eq!(config.ledger.reservation_ttl_secs, 120);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("QUOTA_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "QUOTA_PORT", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("QUOTA_CYCLE_DAYS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "QUOTA_CYCLE_DAYS", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("QUOTA_RESERVATION_TTL_SECS", "-5")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "QUOTA_RESERVATION_TTL_SECS",
                ..
            }
        ));

        let config = ServerConfig::from_lookup(lookup(&[("QUOTA_HOST", "not a host")])).unwrap();
        assert!(config.socket_addr().is_err());
    }
}
