//! QRIS checkout for bills
//!
//! A checkout is opened in two steps. First a pending payment is committed
//! together with the bills' `transaction_ref`, so that a callback arriving at
//! any time can be matched. Then the gateway is called outside the
//! transaction. If the gateway refuses, the pending payment is discarded and
//! the bills are free again.

use std::sync::Arc;

use pamdes_shared::{BillingPeriod, Customer, PaymentMethod};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::bills::{self, Bill};
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::gateway::{
    reference, CredentialResolver, CustomerInfo, OrderItem, PaymentGateway, TransactionRequest,
    TripayCredentials,
};
use crate::payments::{self, NewPayment, Payment, PaymentLine};

/// What the portal needs to show the QR code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub merchant_ref: String,
    pub gateway_reference: String,
    pub checkout_url: Option<String>,
    pub amount: i64,
    pub expires_at: Option<OffsetDateTime>,
    pub bundle_reference: Option<String>,
    pub bill_ids: Vec<Uuid>,
}

/// Contact details sent to the gateway.
///
/// The customer row is always checked; `provided` only replaces the contact
/// details on file.
pub(crate) async fn customer_info(
    tx: &mut Transaction<'_, Postgres>,
    village_id: Uuid,
    customer_id: Uuid,
    provided: Option<CustomerInfo>,
) -> BillingResult<CustomerInfo> {
    let contact = sqlx::query_as::<_, Customer>(
        r#"
        SELECT id, village_id, customer_code, name, email, phone, is_active
        FROM customers
        WHERE id = $1 AND village_id = $2
        "#,
    )
    .bind(customer_id)
    .bind(village_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| BillingError::NotFound(format!("customer {}", customer_id)))?;

    if !contact.is_active {
        return Err(BillingError::Validation(format!(
            "customer {} is inactive",
            contact.customer_code
        )));
    }

    if let Some(info) = provided {
        return Ok(info);
    }

    match (contact.email, contact.phone) {
        (Some(email), Some(phone)) => Ok(CustomerInfo {
            name: contact.name,
            email,
            phone,
        }),
        _ => Err(BillingError::Validation(
            "customer email and phone are required for QRIS payments".to_string(),
        )),
    }
}

pub(crate) async fn period_year_month(
    tx: &mut Transaction<'_, Postgres>,
    billing_period_id: Uuid,
) -> BillingResult<String> {
    let period = sqlx::query_as::<_, BillingPeriod>(
        "SELECT id, village_id, year, month, due_date FROM billing_periods WHERE id = $1",
    )
    .bind(billing_period_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| BillingError::NotFound(format!("billing period {}", billing_period_id)))?;
    Ok(period.year_month())
}

pub(crate) fn order_item(bill: &Bill, year_month: &str) -> OrderItem {
    let short = bill.id.simple().to_string();
    OrderItem {
        sku: format!("BILL-{}", &short[..8]),
        name: format!("Tagihan air {}", year_month),
        price: bill.total_amount,
        quantity: 1,
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    credentials: CredentialResolver,
    events: BillingEventLogger,
    expiry: time::Duration,
}

impl CheckoutService {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        credentials: CredentialResolver,
        expiry: time::Duration,
    ) -> Self {
        Self {
            events: BillingEventLogger::new(pool.clone()),
            pool,
            gateway,
            credentials,
            expiry,
        }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn expiry(&self) -> time::Duration {
        self.expiry
    }

    pub(crate) async fn credentials_for(&self, village_id: Uuid) -> BillingResult<TripayCredentials> {
        self.credentials.resolve_credentials(village_id).await
    }

    /// Start a QRIS payment for a single bill.
    pub async fn create_payment(
        &self,
        village_id: Uuid,
        bill_id: Uuid,
        customer: Option<CustomerInfo>,
        return_url: Option<String>,
        actor_id: Option<Uuid>,
    ) -> BillingResult<CheckoutResponse> {
        let credentials = self.credentials_for(village_id).await?;
        let now = OffsetDateTime::now_utc();
        let expires_at = now + self.expiry;

        let mut tx = self.pool.begin().await?;
        let bill = bills::lock_bill(&mut tx, village_id, bill_id).await?;

        if !bill.status.is_payable() {
            return Err(BillingError::Conflict(format!("bill {} is already paid", bill_id)));
        }
        if bill.has_outstanding_transaction() {
            return Err(BillingError::AlreadyPending(bill_id.to_string()));
        }

        let code = bills::village_code(&mut tx, village_id).await?;
        let year_month = period_year_month(&mut tx, bill.billing_period_id).await?;
        let customer = customer_info(&mut tx, village_id, bill.customer_id, customer).await?;
        let merchant_ref = reference::bill_merchant_ref(&code, &year_month, bill.id, now);

        let payment = payments::insert_pending(
            &mut tx,
            &NewPayment {
                village_id,
                customer_id: bill.customer_id,
                method: PaymentMethod::Qris,
                merchant_ref: merchant_ref.clone(),
                bundle_reference: None,
                collector_id: None,
                expires_at: Some(expires_at),
                lines: vec![PaymentLine {
                    bill_id: bill.id,
                    amount: bill.total_amount,
                }],
            },
        )
        .await?;
        tx.commit().await?;

        let request = TransactionRequest {
            merchant_ref,
            amount: payment.total_amount,
            customer,
            items: vec![order_item(&bill, &year_month)],
            return_url,
            expires_at,
        };

        self.submit(&credentials, payment, request, vec![bill.id], actor_id)
            .await
    }

    /// Send an already committed pending payment to the gateway.
    ///
    /// On failure the pending payment is discarded before the error is returned.
    pub(crate) async fn submit(
        &self,
        credentials: &TripayCredentials,
        payment: Payment,
        request: TransactionRequest,
        bill_ids: Vec<Uuid>,
        actor_id: Option<Uuid>,
    ) -> BillingResult<CheckoutResponse> {
        let transaction = match self.gateway.create_transaction(credentials, &request).await {
            Ok(transaction) => transaction,
            Err(e) => {
                if e.is_gateway_failure() {
                    tracing::warn!(
                        village_id = %payment.village_id,
                        merchant_ref = %payment.merchant_ref,
                        error = %e,
                        "Gateway refused transaction, releasing bills"
                    );
                } else {
                    tracing::error!(
                        village_id = %payment.village_id,
                        merchant_ref = %payment.merchant_ref,
                        error = %e,
                        "Payment submission failed, releasing bills"
                    );
                }

                if let Err(cleanup) = payments::discard_pending(&self.pool, &payment).await {
                    // Bills stay referenced until the expiry sweep closes the payment
                    tracing::error!(
                        merchant_ref = %payment.merchant_ref,
                        error = %cleanup,
                        "Failed to discard pending payment"
                    );
                }

                self.events
                    .record(
                        BillingEventBuilder::new(
                            payment.village_id,
                            BillingEventType::PaymentCreateFailed,
                        )
                        .merchant_ref(payment.merchant_ref.clone())
                        .data(serde_json::json!({
                            "error": e.to_string(),
                            "bill_ids": bill_ids,
                            "amount": payment.total_amount,
                        }))
                        .actor_opt(actor_id, ActorType::Customer),
                    )
                    .await;

                return Err(e);
            }
        };

        let payment = payments::attach_gateway_transaction(&self.pool, payment.id, &transaction).await?;

        tracing::info!(
            village_id = %payment.village_id,
            payment_id = %payment.id,
            merchant_ref = %payment.merchant_ref,
            reference = %transaction.reference,
            amount = payment.total_amount,
            bills = bill_ids.len(),
            "Payment opened"
        );

        self.events
            .record(
                BillingEventBuilder::new(payment.village_id, BillingEventType::PaymentCreated)
                    .payment(payment.id)
                    .merchant_ref(payment.merchant_ref.clone())
                    .data(serde_json::json!({
                        "gateway_reference": transaction.reference,
                        "amount": payment.total_amount,
                        "bill_ids": bill_ids,
                        "bundle_reference": payment.bundle_reference,
                    }))
                    .actor_opt(actor_id, ActorType::Customer),
            )
            .await;

        Ok(CheckoutResponse {
            payment_id: payment.id,
            merchant_ref: payment.merchant_ref,
            gateway_reference: transaction.reference,
            checkout_url: payment.checkout_url,
            amount: payment.total_amount,
            expires_at: payment.expires_at,
            bundle_reference: payment.bundle_reference,
            bill_ids,
        })
    }
}
