//! Application configuration

use std::env;

use pamdes_billing::BillingSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,
    pub cors_allowed_origins: Vec<String>,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub statement_timeout_ms: u64,

    // Billing (Tripay, credential encryption, default fees)
    pub billing: BillingSettings,
}

/// Keys that must never protect stored gateway credentials
const INSECURE_KEYS: &[&str] = &[
    "0000000000000000000000000000000000000000000000000000000000000000",
    "1111111111111111111111111111111111111111111111111111111111111111",
    "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
];

fn validate_encryption_key(key: &str) -> Result<(), ConfigError> {
    if key.len() != 64 {
        return Err(ConfigError::InvalidEncryptionKey(
            "CREDENTIALS_ENCRYPTION_KEY must be exactly 64 hex characters (32 bytes)",
        ));
    }
    if INSECURE_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::InsecureEncryptionKey(
            "CREDENTIALS_ENCRYPTION_KEY is using a known insecure default value",
        ));
    }
    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidEncryptionKey(
            "CREDENTIALS_ENCRYPTION_KEY must contain only hexadecimal characters (0-9, a-f, A-F)",
        ));
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let billing =
            BillingSettings::from_env().map_err(|e| ConfigError::Billing(e.to_string()))?;
        if let Some(key) = &billing.credentials_key {
            validate_encryption_key(key)?;
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            statement_timeout_ms: env::var("DATABASE_STATEMENT_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000),

            billing,
        })
    }

    /// Where the customer lands after a QRIS checkout, unless the request names one
    pub fn default_return_url(&self) -> String {
        format!("{}/payments/return", self.public_url.trim_end_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid credentials encryption key: {0}")]
    InvalidEncryptionKey(&'static str),
    #[error("Insecure credentials encryption key: {0}")]
    InsecureEncryptionKey(&'static str),
    #[error("Invalid billing configuration: {0}")]
    Billing(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn cleanup_config() {
        for key in [
            "DATABASE_URL",
            "CREDENTIALS_ENCRYPTION_KEY",
            "CORS_ALLOWED_ORIGINS",
            "PUBLIC_URL",
            "TRIPAY_MODE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_encryption_key_validation() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");

        // No key at all is fine: villages then use the platform credentials
        assert!(Config::from_env().unwrap().billing.credentials_key.is_none());

        env::set_var(
            "CREDENTIALS_ENCRYPTION_KEY",
            "0000000000000000000000000000000000000000000000000000000000000000",
        );
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InsecureEncryptionKey(_))
        ));

        env::set_var("CREDENTIALS_ENCRYPTION_KEY", "abc123");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidEncryptionKey(_))
        ));

        env::set_var(
            "CREDENTIALS_ENCRYPTION_KEY",
            "xyz123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd",
        );
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidEncryptionKey(_))
        ));

        env::set_var(
            "CREDENTIALS_ENCRYPTION_KEY",
            "a1b2c3d4e5f6789012345678901234567890abcdef1234567890abcdef123456",
        );
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.billing.credentials_key.as_deref(),
            Some("a1b2c3d4e5f6789012345678901234567890abcdef1234567890abcdef123456")
        );

        cleanup_config();
    }

    #[test]
    fn test_server_settings() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("PUBLIC_URL", "https://air.desa.id/");
        env::set_var("CORS_ALLOWED_ORIGINS", "https://air.desa.id, ,https://admin.desa.id");

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://air.desa.id", "https://admin.desa.id"]
        );
        assert_eq!(config.default_return_url(), "https://air.desa.id/payments/return");

        env::set_var("TRIPAY_MODE", "staging");
        assert!(matches!(Config::from_env(), Err(ConfigError::Billing(_))));

        cleanup_config();
    }
}
