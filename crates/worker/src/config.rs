//! Worker configuration

use std::env;

/// Every five minutes
pub const DEFAULT_EXPIRY_SWEEP_CRON: &str = "0 */5 * * * *";
/// Daily at 00:05
pub const DEFAULT_OVERDUE_SWEEP_CRON: &str = "0 5 0 * * *";
/// Hourly
pub const DEFAULT_INVARIANT_CHECK_CRON: &str = "0 0 * * * *";

/// Cron expressions use the six-field form with seconds
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub expiry_sweep_cron: String,
    pub overdue_sweep_cron: String,
    /// Empty disables the invariant report
    pub invariant_check_cron: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("{0} must have six fields (sec min hour day month weekday), got {1:?}")]
    InvalidCron(&'static str, String),
}

fn cron_var(key: &'static str, default: &str) -> Result<String, WorkerConfigError> {
    let expr = env::var(key).unwrap_or_else(|_| default.to_string());
    let expr = expr.trim().to_string();
    if expr.split_whitespace().count() != 6 {
        return Err(WorkerConfigError::InvalidCron(key, expr));
    }
    Ok(expr)
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerConfigError> {
        let invariant_check_cron = match env::var("INVARIANT_CHECK_CRON") {
            Ok(v) if v.trim().is_empty() => None,
            _ => Some(cron_var("INVARIANT_CHECK_CRON", DEFAULT_INVARIANT_CHECK_CRON)?),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| WorkerConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            expiry_sweep_cron: cron_var("EXPIRY_SWEEP_CRON", DEFAULT_EXPIRY_SWEEP_CRON)?,
            overdue_sweep_cron: cron_var("OVERDUE_SWEEP_CRON", DEFAULT_OVERDUE_SWEEP_CRON)?,
            invariant_check_cron,
        })
    }
}
