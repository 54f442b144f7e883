//! API configuration, read once from the environment

use thiserror::Error;

use pediu_checkout::MAX_IDEMPOTENCY_TTL_HOURS;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_IDEMPOTENCY_TTL_HOURS: u64 = 24;
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: String,
    /// Bearer secret for the cron endpoint; the endpoint refuses every
    /// request when unset
    pub cron_secret: Option<String>,
    pub idempotency_ttl_hours: u64,
    pub allowed_origins: Vec<String>,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let idempotency_ttl_hours = match lookup("IDEMPOTENCY_TTL_HOURS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|hours| (1..=MAX_IDEMPOTENCY_TTL_HOURS).contains(hours))
                .ok_or(ConfigError::Invalid {
                    name: "IDEMPOTENCY_TTL_HOURS",
                    value: raw,
                })?,
            None => DEFAULT_IDEMPOTENCY_TTL_HOURS,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            cron_secret: lookup("CRON_SECRET").filter(|v| !v.is_empty()),
            idempotency_ttl_hours,
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            run_migrations: lookup("RUN_MIGRATIONS")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/pediu"),
            ("JWT_SECRET", "secret"),
        ])
        .unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.idempotency_ttl_hours, 24);
        assert_eq!(config.cron_secret, None);
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_missing_required() {
        let err = config_from(&[("DATABASE_URL", "postgres://localhost/pediu")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn test_invalid_ttl() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/pediu"),
            ("JWT_SECRET", "secret"),
            ("IDEMPOTENCY_TTL_HOURS", "a day"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "IDEMPOTENCY_TTL_HOURS", .. }));
    }

    #[test]
    fn test_ttl_out_of_range() {
        for raw in ["0", "100000000", "18446744073709551615"] {
            let err = config_from(&[
                ("DATABASE_URL", "postgres://localhost/pediu"),
                ("JWT_SECRET", "secret"),
                ("IDEMPOTENCY_TTL_HOURS", raw),
            ])
            .unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { name: "IDEMPOTENCY_TTL_HOURS", .. }),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/pediu"),
            ("JWT_SECRET", "secret"),
            ("CRON_SECRET", "cron"),
            ("IDEMPOTENCY_TTL_HOURS", "48"),
            ("ALLOWED_ORIGINS", "https://painel.pediu.app, "),
            ("RUN_MIGRATIONS", "true"),
        ])
        .unwrap();
        assert_eq!(config.cron_secret.as_deref(), Some("cron"));
        assert_eq!(config.idempotency_ttl_hours, 48);
        assert_eq!(config.allowed_origins, vec!["https://painel.pediu.app"]);
        assert!(config.run_migrations);
    }
}
