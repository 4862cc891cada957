//! Service configuration
//!
//! Loaded from `BILLING_`-prefixed environment variables (and a `.env` file
//! when present). Nested billing settings use a double underscore, e.g.
//! `BILLING_BILLING__MAX_RETRY_ATTEMPTS=5`.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;

use core_kernel::{Currency, Timezone};
use domain_billing::{BillingError, BillingPolicy};
use infra_db::DatabaseConfig;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    /// Minimum level when `RUST_LOG` is not set
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
    /// Seconds between scheduled billing runs
    pub run_interval_secs: u64,
    /// Run once immediately at startup
    pub run_on_startup: bool,
    pub gateway_base_url: String,
    pub gateway_api_key: String,
    pub gateway_timeout_secs: u64,
    /// Directory with SQL migrations applied at startup; empty to skip
    pub migrations_dir: String,
    pub billing: BillingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/perdiem".to_string(),
            database_max_connections: 5,
            log_level: "info".to_string(),
            log_json: false,
            run_interval_secs: 24 * 60 * 60,
            run_on_startup: false,
            gateway_base_url: "http://localhost:9090".to_string(),
            gateway_api_key: String::new(),
            gateway_timeout_secs: 30,
            migrations_dir: infra_db::DEFAULT_MIGRATIONS_DIR.to_string(),
            billing: BillingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("BILLING")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone()).max_connections(self.database_max_connections)
    }

    pub fn run_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.run_interval_secs.max(1))
    }
}

/// Collection policy knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
    pub max_retry_attempts: u32,
    pub retry_interval_hours: i64,
    /// 1 keeps the retry interval fixed
    pub retry_backoff_multiplier: Decimal,
    pub default_per_diem_rate: Decimal,
    /// ISO 4217 code
    pub currency: String,
    /// IANA zone name used to decide billing days
    pub timezone: String,
    pub dunning_follow_up_hours: i64,
}

impl Default for BillingSettings {
    fn default() -> Self {
        let policy = BillingPolicy::default();
        Self {
            max_retry_attempts: policy.max_retry_attempts,
            retry_interval_hours: policy.retry_interval.num_hours(),
            retry_backoff_multiplier: policy.backoff_multiplier,
            default_per_diem_rate: policy.default_per_diem_rate,
            currency: policy.currency.code().to_string(),
            timezone: policy.timezone.name().to_string(),
            dunning_follow_up_hours: policy.dunning_follow_up.num_hours(),
        }
    }
}

impl BillingSettings {
    /// Builds and validates the engine policy
    pub fn to_policy(&self) -> Result<BillingPolicy, BillingError> {
        let policy = BillingPolicy {
            max_retry_attempts: self.max_retry_attempts,
            retry_interval: Duration::hours(self.retry_interval_hours),
            backoff_multiplier: self.retry_backoff_multiplier,
            default_per_diem_rate: self.default_per_diem_rate,
            currency: self.currency.parse::<Currency>()?,
            timezone: self.timezone.parse::<Timezone>()?,
            dunning_follow_up: Duration::hours(self.dunning_follow_up_hours),
        };
        policy.validate()?;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_settings_match_default_policy() {
        let policy = BillingSettings::default().to_policy().unwrap();
        assert_eq!(policy, BillingPolicy::default());
    }

    #[test]
    fn test_settings_convert_to_policy() {
        let settings = BillingSettings {
            max_retry_attempts: 5,
            retry_interval_hours: 12,
            retry_backoff_multiplier: dec!(2),
            default_per_diem_rate: dec!(30.00),
            currency: "sgd".to_string(),
            timezone: "Asia/Singapore".to_string(),
            dunning_follow_up_hours: 48,
        };

        let policy = settings.to_policy().unwrap();
        assert_eq!(policy.max_retry_attempts, 5);
        assert_eq!(policy.retry_interval, Duration::hours(12));
        assert_eq!(policy.currency, Currency::SGD);
        assert_eq!(policy.timezone.name(), "Asia/Singapore");
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let settings = BillingSettings {
            timezone: "Mars/Olympus".to_string(),
            ..BillingSettings::default()
        };
        assert!(matches!(settings.to_policy(), Err(BillingError::Temporal(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let settings = BillingSettings {
            max_retry_attempts: 0,
            ..BillingSettings::default()
        };
        assert!(matches!(settings.to_policy(), Err(BillingError::InvalidPolicy(_))));
    }

    #[test]
    fn test_server_addr() {
        let config = AppConfig { port: 9000, ..AppConfig::default() };
        assert_eq!(config.server_addr(), "0.0.0.0:9000");
        assert_eq!(config.run_interval(), std::time::Duration::from_secs(86_400));
    }
}
