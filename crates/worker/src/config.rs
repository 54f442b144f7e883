//! Worker configuration

use thiserror::Error;

use pediu_checkout::MAX_IDEMPOTENCY_TTL_HOURS;

/// Daily at 03:05 UTC, after the day's invoices have come due
const DEFAULT_SWEEP_SCHEDULE: &str = "0 5 3 * * *";
const DEFAULT_PURGE_SCHEDULE: &str = "0 0 * * * *";
const DEFAULT_INVARIANTS_SCHEDULE: &str = "0 30 4 * * *";
const DEFAULT_IDEMPOTENCY_TTL_HOURS: u64 = 24;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Cron expressions use the six-field format (seconds first)
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub sweep_schedule: String,
    pub purge_schedule: String,
    pub invariants_schedule: String,
    pub idempotency_ttl_hours: u64,
    pub run_migrations: bool,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let schedule = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
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
            database_url,
            sweep_schedule: schedule("SWEEP_SCHEDULE", DEFAULT_SWEEP_SCHEDULE),
            purge_schedule: schedule("IDEMPOTENCY_PURGE_SCHEDULE", DEFAULT_PURGE_SCHEDULE),
            invariants_schedule: schedule("INVARIANTS_SCHEDULE", DEFAULT_INVARIANTS_SCHEDULE),
            idempotency_ttl_hours,
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

    fn config_from(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DATABASE_URL", "postgres://localhost/pediu")]).unwrap();
        assert_eq!(config.sweep_schedule, DEFAULT_SWEEP_SCHEDULE);
        assert_eq!(config.purge_schedule, "0 0 * * * *");
        assert_eq!(config.idempotency_ttl_hours, 24);
        assert!(!config.run_migrations);
    }

    #[test]
    fn test_database_url_required() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/pediu"),
            ("SWEEP_SCHEDULE", "0 0 6 * * *"),
            ("IDEMPOTENCY_TTL_HOURS", "72"),
            ("RUN_MIGRATIONS", "1"),
        ])
        .unwrap();
        assert_eq!(config.sweep_schedule, "0 0 6 * * *");
        assert_eq!(config.idempotency_ttl_hours, 72);
        assert!(config.run_migrations);

        assert!(config_from(&[
            ("DATABASE_URL", "postgres://localhost/pediu"),
            ("IDEMPOTENCY_TTL_HOURS", "-1"),
        ])
        .is_err());
    }

    #[test]
    fn test_idempotency_ttl_out_of_range() {
        for raw in ["0", "100000000", "18446744073709551615"] {
            let result = config_from(&[
                ("DATABASE_URL", "postgres://localhost/pediu"),
                ("IDEMPOTENCY_TTL_HOURS", raw),
            ]);
            assert!(
                matches!(
                    result,
                    Err(ConfigError::Invalid {
                        name: "IDEMPOTENCY_TTL_HOURS",
                        ..
                    })
                ),
                "{raw} should be rejected"
            );
        }

        let max = MAX_IDEMPOTENCY_TTL_HOURS.to_string();
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/pediu"),
            ("IDEMPOTENCY_TTL_HOURS", max.as_str()),
        ])
        .unwrap();
        assert_eq!(config.idempotency_ttl_hours, MAX_IDEMPOTENCY_TTL_HOURS);
    }
}
