//! Tripay HTTP client

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

use super::signature::transaction_signature;
use super::{
    GatewayMode, GatewayStatus, GatewayTransaction, OrderItem, PaymentGateway,
    TransactionRequest, TripayCredentials, QRIS_METHOD,
};

/// Attempts for a status poll, transport errors only
const MAX_RETRIES: usize = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default lifetime of a QRIS checkout
pub const DEFAULT_EXPIRY_MINUTES: i64 = 60;

/// Gateway configuration read from the environment
#[derive(Clone)]
pub struct TripayConfig {
    pub api_key: Option<String>,
    pub private_key: Option<String>,
    pub merchant_code: Option<String>,
    pub mode: GatewayMode,
    /// Overrides the mode's base URL
    pub base_url: Option<String>,
    pub expiry_minutes: i64,
}

impl std::fmt::Debug for TripayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripayConfig")
            .field("merchant_code", &self.merchant_code)
            .field("mode", &self.mode)
            .field("base_url", &self.base_url)
            .field("expiry_minutes", &self.expiry_minutes)
            .finish_non_exhaustive()
    }
}

impl Default for TripayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            private_key: None,
            merchant_code: None,
            mode: GatewayMode::Sandbox,
            base_url: None,
            expiry_minutes: DEFAULT_EXPIRY_MINUTES,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl TripayConfig {
    pub fn from_env() -> BillingResult<Self> {
        let mode = match non_empty_var("TRIPAY_MODE") {
            Some(raw) => raw.parse().map_err(BillingError::Config)?,
            None => GatewayMode::Sandbox,
        };

        let expiry_minutes = env::var("PAYMENT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| DEFAULT_EXPIRY_MINUTES.to_string())
            .parse()
            .unwrap_or(DEFAULT_EXPIRY_MINUTES);
        if expiry_minutes <= 0 {
            return Err(BillingError::Config(
                "PAYMENT_EXPIRY_MINUTES must be positive".to_string(),
            ));
        }

        Ok(Self {
            api_key: non_empty_var("TRIPAY_API_KEY"),
            private_key: non_empty_var("TRIPAY_PRIVATE_KEY"),
            merchant_code: non_empty_var("TRIPAY_MERCHANT_CODE"),
            mode,
            base_url: non_empty_var("TRIPAY_BASE_URL"),
            expiry_minutes,
        })
    }

    /// Platform-wide credentials, if all three keys are configured
    pub fn default_credentials(&self) -> Option<TripayCredentials> {
        match (&self.api_key, &self.private_key, &self.merchant_code) {
            (Some(api_key), Some(private_key), Some(merchant_code)) => Some(TripayCredentials {
                api_key: api_key.clone(),
                private_key: private_key.clone(),
                merchant_code: merchant_code.clone(),
                mode: self.mode,
            }),
            _ => None,
        }
    }

    pub fn expiry(&self) -> time::Duration {
        time::Duration::minutes(self.expiry_minutes)
    }
}

#[derive(Debug, Serialize)]
struct CreateTransactionBody<'a> {
    method: &'static str,
    merchant_ref: &'a str,
    amount: i64,
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
    order_items: &'a [OrderItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
    expired_time: i64,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    reference: String,
    #[serde(default)]
    merchant_ref: Option<String>,
    #[serde(default)]
    checkout_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
    #[serde(default)]
    expired_time: Option<i64>,
}

/// Tripay REST client
#[derive(Clone)]
pub struct TripayClient {
    client: Client,
    base_url_override: Option<String>,
}

impl TripayClient {
    pub fn new(config: &TripayConfig) -> BillingResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url_override: config.base_url.clone(),
        })
    }

    fn endpoint(&self, mode: GatewayMode, path: &str) -> String {
        let base = self
            .base_url_override
            .as_deref()
            .unwrap_or_else(|| mode.base_url());
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    async fn fetch_detail(
        &self,
        credentials: &TripayCredentials,
        reference: &str,
    ) -> BillingResult<GatewayTransaction> {
        let response = self
            .client
            .get(self.endpoint(credentials.mode, "transaction/detail"))
            .bearer_auth(&credentials.api_key)
            .query(&[("reference", reference)])
            .send()
            .await?;

        let body = response_json(response).await?;
        into_transaction(body)
    }
}

async fn response_json(response: reqwest::Response) -> BillingResult<serde_json::Value> {
    let status = response.status();
    let body = response.text().await?;

    let envelope: Envelope = serde_json::from_str(&body).map_err(|e| {
        BillingError::Gateway(format!("unreadable Tripay response ({}): {}", status, e))
    })?;

    if !status.is_success() || !envelope.success {
        let message = envelope
            .message
            .unwrap_or_else(|| format!("HTTP {}", status));
        tracing::warn!(status = %status, message = %message, "Tripay rejected request");
        return Err(BillingError::Gateway(message));
    }

    envelope
        .data
        .ok_or_else(|| BillingError::Gateway("Tripay response without data".to_string()))
}

fn into_transaction(raw: serde_json::Value) -> BillingResult<GatewayTransaction> {
    let data: TransactionData = serde_json::from_value(raw.clone())
        .map_err(|e| BillingError::Gateway(format!("unexpected Tripay data: {}", e)))?;

    let expires_at = data
        .expired_time
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

    Ok(GatewayTransaction {
        reference: data.reference,
        merchant_ref: data.merchant_ref,
        checkout_url: data.checkout_url,
        status: GatewayStatus::parse(data.status.as_deref().unwrap_or("UNPAID")),
        amount: data.amount,
        expires_at,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for TripayClient {
    async fn create_transaction(
        &self,
        credentials: &TripayCredentials,
        request: &TransactionRequest,
    ) -> BillingResult<GatewayTransaction> {
        let signature = transaction_signature(
            &credentials.private_key,
            &credentials.merchant_code,
            &request.merchant_ref,
            request.amount,
        )?;

        let body = CreateTransactionBody {
            method: QRIS_METHOD,
            merchant_ref: &request.merchant_ref,
            amount: request.amount,
            customer_name: &request.customer.name,
            customer_email: &request.customer.email,
            customer_phone: &request.customer.phone,
            order_items: &request.items,
            return_url: request.return_url.as_deref(),
            expired_time: request.expires_at.unix_timestamp(),
            signature,
        };

        let response = self
            .client
            .post(self.endpoint(credentials.mode, "transaction/create"))
            .bearer_auth(&credentials.api_key)
            .json(&body)
            .send()
            .await?;

        let raw = response_json(response).await?;
        let transaction = into_transaction(raw)?;

        tracing::info!(
            merchant_ref = %request.merchant_ref,
            reference = %transaction.reference,
            amount = request.amount,
            "Tripay transaction created"
        );

        Ok(transaction)
    }

    async fn transaction_detail(
        &self,
        credentials: &TripayCredentials,
        reference: &str,
    ) -> BillingResult<GatewayTransaction> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.fetch_detail(credentials, reference).await;
            match &result {
                // Only transport failures are retried
                Err(BillingError::Transport(e)) => {
                    tracing::debug!(reference = %reference, error = %e, "Transient error - will retry");
                    Err(result)
                }
                _ => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }
}
