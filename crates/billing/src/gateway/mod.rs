//! Tripay payment gateway adapter
//!
//! Services talk to the gateway through the [`PaymentGateway`] trait so the
//! checkout and reconciliation flows can run against a fake in tests.
//! [`client::TripayClient`] is the HTTP implementation.

pub mod client;
pub mod credentials;
pub mod reference;
pub mod signature;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::BillingResult;

pub use client::{TripayClient, TripayConfig};
pub use credentials::{CredentialResolver, CredentialStore};

/// Tripay QRIS channel code
pub const QRIS_METHOD: &str = "QRIS";

/// Tripay environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    Sandbox,
    Production,
}

impl GatewayMode {
    pub fn base_url(&self) -> &'static str {
        match self {
            GatewayMode::Sandbox => "https://tripay.co.id/api-sandbox/",
            GatewayMode::Production => "https://tripay.co.id/api/",
        }
    }
}

impl std::str::FromStr for GatewayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            _ => Err(format!("Invalid Tripay mode: {}", s)),
        }
    }
}

/// Credentials used for one gateway call
#[derive(Clone)]
pub struct TripayCredentials {
    pub api_key: String,
    pub private_key: String,
    pub merchant_code: String,
    pub mode: GatewayMode,
}

// Keys stay out of logs
impl std::fmt::Debug for TripayCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripayCredentials")
            .field("merchant_code", &self.merchant_code)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub sku: String,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

/// A transaction to open at the gateway
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub merchant_ref: String,
    pub amount: i64,
    pub customer: CustomerInfo,
    pub items: Vec<OrderItem>,
    pub return_url: Option<String>,
    pub expires_at: OffsetDateTime,
}

/// Transaction as reported by the gateway
#[derive(Debug, Clone)]
pub struct GatewayTransaction {
    pub reference: String,
    pub merchant_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub status: GatewayStatus,
    pub amount: Option<i64>,
    pub expires_at: Option<OffsetDateTime>,
    /// Response payload as received, stored with the payment
    pub raw: serde_json::Value,
}

/// Transaction status reported by Tripay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Paid,
    Unpaid,
    Pending,
    Expired,
    Failed,
    Cancelled,
    Refund,
    Unknown(String),
}

impl GatewayStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PAID" => Self::Paid,
            "UNPAID" => Self::Unpaid,
            "PENDING" => Self::Pending,
            "EXPIRED" => Self::Expired,
            "FAILED" => Self::Failed,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            "REFUND" | "REFUNDED" => Self::Refund,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl std::fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "PAID"),
            Self::Unpaid => write!(f, "UNPAID"),
            Self::Pending => write!(f, "PENDING"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Refund => write!(f, "REFUND"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Callback body posted by Tripay
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackPayload {
    pub merchant_ref: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub total_amount: Option<i64>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub paid_at: Option<i64>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl CallbackPayload {
    pub fn gateway_status(&self) -> GatewayStatus {
        GatewayStatus::parse(&self.status)
    }

    /// Amount the gateway claims, preferring `total_amount`
    pub fn reported_amount(&self) -> Option<i64> {
        self.total_amount.or(self.amount)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a transaction and return its checkout details
    async fn create_transaction(
        &self,
        credentials: &TripayCredentials,
        request: &TransactionRequest,
    ) -> BillingResult<GatewayTransaction>;

    /// Read the current state of a transaction by gateway reference
    async fn transaction_detail(
        &self,
        credentials: &TripayCredentials,
        reference: &str,
    ) -> BillingResult<GatewayTransaction>;
}
