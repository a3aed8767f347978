//! Shared application state

use std::sync::Arc;

use pamdes_billing::BillingService;
use sqlx::PgPool;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool, billing: BillingService) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            billing: Arc::new(billing),
        }
    }
}
