//! Billing settings read from the environment

use std::env;

use crate::calculator::{VillageFees, DEFAULT_ADMIN_FEE, DEFAULT_MAINTENANCE_FEE};
use crate::error::{BillingError, BillingResult};
use crate::gateway::TripayConfig;

#[derive(Clone)]
pub struct BillingSettings {
    pub tripay: TripayConfig,
    /// 64 hex characters; required only when villages store their own credentials
    pub credentials_key: Option<String>,
    pub default_fees: VillageFees,
}

impl std::fmt::Debug for BillingSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingSettings")
            .field("tripay", &self.tripay)
            .field("credentials_key", &self.credentials_key.as_ref().map(|_| "<redacted>"))
            .field("default_fees", &self.default_fees)
            .finish()
    }
}

fn fee_var(key: &str, default: i64) -> BillingResult<i64> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let fee: i64 = raw
                .trim()
                .parse()
                .map_err(|_| BillingError::Config(format!("{} must be an integer", key)))?;
            if fee < 0 {
                return Err(BillingError::Config(format!("{} must not be negative", key)));
            }
            Ok(fee)
        }
        _ => Ok(default),
    }
}

impl BillingSettings {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            tripay: TripayConfig::from_env()?,
            credentials_key: env::var("CREDENTIALS_ENCRYPTION_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            default_fees: VillageFees {
                admin_fee: fee_var("DEFAULT_ADMIN_FEE", DEFAULT_ADMIN_FEE)?,
                maintenance_fee: fee_var("DEFAULT_MAINTENANCE_FEE", DEFAULT_MAINTENANCE_FEE)?,
            },
        })
    }
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            tripay: TripayConfig::default(),
            credentials_key: None,
            default_fees: VillageFees::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_fee_defaults_and_overrides() {
        env::remove_var("DEFAULT_ADMIN_FEE");
        env::set_var("DEFAULT_MAINTENANCE_FEE", "2500");

        let settings = BillingSettings::from_env().unwrap();
        assert_eq!(settings.default_fees.admin_fee, DEFAULT_ADMIN_FEE);
        assert_eq!(settings.default_fees.maintenance_fee, 2500);

        env::set_var("DEFAULT_ADMIN_FEE", "-1");
        assert!(matches!(
            BillingSettings::from_env(),
            Err(BillingError::Config(_))
        ));

        env::set_var("DEFAULT_ADMIN_FEE", "lima ribu");
        assert!(BillingSettings::from_env().is_err());

        env::remove_var("DEFAULT_ADMIN_FEE");
        env::remove_var("DEFAULT_MAINTENANCE_FEE");
    }
}
