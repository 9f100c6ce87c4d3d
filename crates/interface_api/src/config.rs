//! API configuration

use serde::Deserialize;

use core_kernel::Timezone;
use domain_billing::{GatewayConfig, LedgerConfig};

/// API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// JWT secret for authentication
    pub jwt_secret: String,
    /// JWT expiration in seconds
    pub jwt_expiration_secs: u64,
    /// Database URL
    pub database_url: String,
    /// Log level
    pub log_level: String,
    /// Clinic timezone; business days follow its calendar
    pub timezone: Timezone,
    pub ledger: LedgerConfig,
    pub gateway: GatewayConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expiration_secs: 3600,
            database_url: "postgres://localhost/clinic_ledger".to_string(),
            log_level: "info".to_string(),
            timezone: Timezone::default(),
            ledger: LedgerConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Loads configuration from the environment
    ///
    /// Variables use the `API_` prefix and `__` for nesting, so
    /// `API_GATEWAY__SECRET_KEY` sets `gateway.secret_key`. Unset values keep
    /// their defaults.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("API")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("ledger.registration_priority_tags")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_local_development() {
        let config = ApiConfig::default();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert!(config.database_url.ends_with("clinic_ledger"));
        assert!(config.ledger.validate().is_ok());
        assert_eq!(config.gateway.timeout_secs, 10);
    }
}
