// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![allow(clippy::too_many_arguments)] // checkout entry points carry tenant, actor and gateway context

//! PAMDes Billing Module
//!
//! Water billing for village utilities.
//!
//! ## Features
//!
//! - **Tariff ranges**: Progressive per-village usage tiers kept contiguous under edits
//! - **Calculator**: Tiered water charge plus administration and maintenance fees
//! - **Bills**: Issue bills from meter readings, overdue sweep, manual collection
//! - **Checkout**: Tripay QRIS payments for one bill or a bundle of bills
//! - **Reconciliation**: Callback, status poll and expiry handling for payments
//! - **Invariants**: Read-only consistency checks

pub mod bills;
pub mod bundle;
pub mod calculator;
pub mod checkout;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod invariants;
pub mod payments;
pub mod reconciler;
pub mod tariff;

// Bills
pub use bills::{Bill, BillService};

// Bundles
pub use bundle::{select_bills_for_bundle, BundleCoordinator};

// Calculator
pub use calculator::{
    compute_bill, compute_water_charge, BillAmounts, BillingCalculator, TierCharge, VillageFees,
    WaterCharge,
};

// Checkout
pub use checkout::{CheckoutResponse, CheckoutService};

// Config
pub use config::BillingSettings;

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{
    ActorType, BillingEvent, BillingEventBuilder, BillingEventLogger, BillingEventType,
};

// Gateway
pub use gateway::{
    CallbackPayload, CredentialResolver, CredentialStore, CustomerInfo, GatewayMode,
    GatewayStatus, PaymentGateway, TripayClient, TripayConfig, TripayCredentials,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Payments
pub use payments::{Payment, PaymentLine, PaymentRepository};

// Reconciler
pub use reconciler::{decide, PaymentReconciler, ReconcileOutcome, StatusReport, Transition};

// Tariffs
pub use tariff::{RangeEdit, TariffRangeService, TariffTable, TariffTier, TierWrite};

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub tariffs: TariffRangeService,
    pub calculator: BillingCalculator,
    pub bills: BillService,
    pub payments: PaymentRepository,
    pub credentials: CredentialResolver,
    pub checkout: CheckoutService,
    pub bundles: BundleCoordinator,
    pub reconciler: PaymentReconciler,
    pub invariants: InvariantChecker,
    pub events: BillingEventLogger,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Self::new(BillingSettings::from_env()?, pool)
    }

    /// Create a billing service talking to Tripay over HTTP
    pub fn new(settings: BillingSettings, pool: PgPool) -> BillingResult<Self> {
        let client = TripayClient::new(&settings.tripay)?;
        Self::with_gateway(settings, pool, Arc::new(client))
    }

    /// Create a billing service with an explicit gateway implementation
    pub fn with_gateway(
        settings: BillingSettings,
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
    ) -> BillingResult<Self> {
        let store = settings
            .credentials_key
            .as_deref()
            .map(CredentialStore::from_hex_key)
            .transpose()?;

        let platform = settings.tripay.default_credentials();
        if platform.is_none() {
            tracing::warn!("Tripay platform credentials not configured - only villages with their own credentials can take QRIS payments");
        }

        let credentials = CredentialResolver::new(pool.clone(), store, platform);
        let calculator = BillingCalculator::new(pool.clone()).with_default_fees(settings.default_fees);
        let checkout = CheckoutService::new(
            pool.clone(),
            gateway.clone(),
            credentials.clone(),
            settings.tripay.expiry(),
        );

        Ok(Self {
            tariffs: TariffRangeService::new(pool.clone()),
            bills: BillService::new(pool.clone(), calculator.clone()),
            calculator,
            payments: PaymentRepository::new(pool.clone()),
            bundles: BundleCoordinator::new(checkout.clone()),
            checkout,
            reconciler: PaymentReconciler::new(pool.clone(), gateway, credentials.clone()),
            credentials,
            invariants: InvariantChecker::new(pool.clone()),
            events: BillingEventLogger::new(pool),
        })
    }
}
