//! Payment reconciliation
//!
//! Gateway callbacks, manual status polls and the expiry sweep all end up in
//! [`PaymentReconciler::apply_status`], which locks the payment row, asks
//! [`decide`] what to do, and applies the bill effects in the same
//! transaction. Repeated or out-of-order notifications are no-ops once the
//! payment is terminal.

use std::sync::Arc;

use pamdes_shared::PaymentStatus;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::gateway::{
    signature, CallbackPayload, CredentialResolver, GatewayStatus, PaymentGateway,
};
use crate::payments::{self, Payment, PaymentRepository};

/// Upper bound on payments expired per sweep
const EXPIRY_BATCH: i64 = 500;

/// What a gateway status means for a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    MarkCompleted,
    StillWaiting,
    MarkExpired,
    MarkFailed,
    /// Status not understood, nothing changes
    Ignore,
    /// Payment already settled, nothing changes
    AlreadyTerminal,
}

pub fn decide(current: PaymentStatus, gateway: &GatewayStatus) -> Transition {
    if let GatewayStatus::Unknown(_) = gateway {
        return Transition::Ignore;
    }
    if current.is_terminal() {
        return Transition::AlreadyTerminal;
    }

    match gateway {
        GatewayStatus::Paid => Transition::MarkCompleted,
        GatewayStatus::Unpaid | GatewayStatus::Pending => Transition::StillWaiting,
        GatewayStatus::Expired => Transition::MarkExpired,
        GatewayStatus::Failed | GatewayStatus::Cancelled | GatewayStatus::Refund => {
            Transition::MarkFailed
        }
        GatewayStatus::Unknown(_) => Transition::Ignore,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub payment_id: Uuid,
    pub merchant_ref: String,
    pub transition: Transition,
    /// Payment status after the transition
    pub status: PaymentStatus,
    pub bill_ids: Vec<Uuid>,
}

/// A gateway status observation to apply to one payment
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: GatewayStatus,
    pub gateway_reference: Option<String>,
    pub amount: Option<i64>,
    pub paid_at: Option<OffsetDateTime>,
    /// Who delivered the observation
    pub source: ActorType,
}

impl From<&CallbackPayload> for StatusReport {
    fn from(payload: &CallbackPayload) -> Self {
        Self {
            status: payload.gateway_status(),
            gateway_reference: payload.reference.clone(),
            amount: payload.reported_amount(),
            paid_at: payload
                .paid_at
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
            source: ActorType::Gateway,
        }
    }
}

#[derive(Clone)]
pub struct PaymentReconciler {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    credentials: CredentialResolver,
    payments: PaymentRepository,
    events: BillingEventLogger,
}

impl PaymentReconciler {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        credentials: CredentialResolver,
    ) -> Self {
        Self {
            payments: PaymentRepository::new(pool.clone()),
            events: BillingEventLogger::new(pool.clone()),
            pool,
            gateway,
            credentials,
        }
    }

    /// Payment for a merchant ref, falling back to a bill's outstanding reference
    async fn locate(&self, merchant_ref: &str) -> BillingResult<Payment> {
        if let Some(payment) = self.payments.find_by_merchant_ref(merchant_ref).await? {
            return Ok(payment);
        }
        if let Some(payment) = self.payments.find_pending_via_bill_ref(merchant_ref).await? {
            return Ok(payment);
        }

        tracing::warn!(
            merchant_ref = %merchant_ref,
            "Gateway notification for unknown reference"
        );
        Err(BillingError::NotFound(format!("payment {}", merchant_ref)))
    }

    /// Authenticate and apply a raw Tripay callback.
    pub async fn handle_callback(
        &self,
        raw_body: &[u8],
        header_signature: Option<&str>,
    ) -> BillingResult<ReconcileOutcome> {
        let payload: CallbackPayload = serde_json::from_slice(raw_body)
            .map_err(|e| BillingError::Validation(format!("malformed callback: {}", e)))?;

        let payment = self.locate(&payload.merchant_ref).await?;
        let credentials = self.credentials.resolve_credentials(payment.village_id).await?;

        if let Err(e) = signature::verify_callback(
            &credentials.private_key,
            &credentials.merchant_code,
            &payload,
            raw_body,
            header_signature,
        ) {
            self.events
                .record(
                    BillingEventBuilder::new(payment.village_id, BillingEventType::CallbackRejected)
                        .payment(payment.id)
                        .merchant_ref(payload.merchant_ref.clone())
                        .data(serde_json::json!({ "status": payload.status }))
                        .actor_type(ActorType::Gateway),
                )
                .await;
            return Err(e);
        }

        self.apply_callback(&payment, &payload).await
    }

    /// Apply an authenticated callback to its payment
    pub async fn apply_callback(
        &self,
        payment: &Payment,
        payload: &CallbackPayload,
    ) -> BillingResult<ReconcileOutcome> {
        self.apply_status(payment.id, StatusReport::from(payload)).await
    }

    /// Poll the gateway for a payment and apply what it reports.
    pub async fn sync_status(
        &self,
        village_id: Uuid,
        merchant_ref: &str,
    ) -> BillingResult<ReconcileOutcome> {
        let payment = self
            .locate(merchant_ref)
            .await
            .and_then(|p| {
                if p.village_id == village_id {
                    Ok(p)
                } else {
                    Err(BillingError::NotFound(format!("payment {}", merchant_ref)))
                }
            })?;

        let reference = payment.gateway_reference.clone().ok_or_else(|| {
            BillingError::Conflict(format!(
                "payment {} has no gateway transaction",
                payment.merchant_ref
            ))
        })?;

        let credentials = self.credentials.resolve_credentials(village_id).await?;
        let detail = self
            .gateway
            .transaction_detail(&credentials, &reference)
            .await?;

        tracing::info!(
            merchant_ref = %payment.merchant_ref,
            reference = %reference,
            gateway_status = %detail.status,
            "Gateway status polled"
        );

        self.apply_status(
            payment.id,
            StatusReport {
                status: detail.status,
                gateway_reference: Some(detail.reference),
                amount: detail.amount,
                paid_at: None,
                source: ActorType::Gateway,
            },
        )
        .await
    }

    /// Lock the payment, decide, and apply the transition atomically.
    pub async fn apply_status(
        &self,
        payment_id: Uuid,
        report: StatusReport,
    ) -> BillingResult<ReconcileOutcome> {
        let mut tx = self.pool.begin().await?;
        let payment = payments::lock_payment(&mut tx, payment_id).await?;
        let transition = decide(payment.status, &report.status);

        if let Some(amount) = report.amount {
            if amount != payment.total_amount {
                tracing::warn!(
                    merchant_ref = %payment.merchant_ref,
                    expected = payment.total_amount,
                    reported = amount,
                    "Gateway amount differs from payment total"
                );
            }
        }

        let (status, bill_ids) = match transition {
            Transition::MarkCompleted => {
                let paid_at = report.paid_at.unwrap_or_else(OffsetDateTime::now_utc);
                let bills = payments::complete(
                    &mut tx,
                    &payment,
                    report.gateway_reference.as_deref(),
                    paid_at,
                )
                .await?;
                (PaymentStatus::Completed, bills)
            }
            Transition::MarkExpired => {
                let bills = payments::close_unpaid(&mut tx, &payment, PaymentStatus::Expired).await?;
                (PaymentStatus::Expired, bills)
            }
            Transition::MarkFailed => {
                let bills = payments::close_unpaid(&mut tx, &payment, PaymentStatus::Failed).await?;
                (PaymentStatus::Failed, bills)
            }
            Transition::StillWaiting | Transition::Ignore | Transition::AlreadyTerminal => {
                (payment.status, Vec::new())
            }
        };
        tx.commit().await?;

        let outcome = ReconcileOutcome {
            payment_id: payment.id,
            merchant_ref: payment.merchant_ref.clone(),
            transition,
            status,
            bill_ids,
        };
        self.report(&payment, &report, &outcome).await;

        Ok(outcome)
    }

    async fn report(&self, payment: &Payment, report: &StatusReport, outcome: &ReconcileOutcome) {
        let event_type = match outcome.transition {
            Transition::MarkCompleted => BillingEventType::PaymentCompleted,
            Transition::MarkExpired => BillingEventType::PaymentExpired,
            Transition::MarkFailed => BillingEventType::PaymentFailed,
            Transition::Ignore => {
                tracing::warn!(
                    merchant_ref = %payment.merchant_ref,
                    gateway_status = %report.status,
                    "Unknown gateway status ignored"
                );
                BillingEventType::CallbackUnknownStatus
            }
            Transition::AlreadyTerminal
                if report.status == GatewayStatus::Paid
                    && payment.status != PaymentStatus::Completed =>
            {
                tracing::error!(
                    merchant_ref = %payment.merchant_ref,
                    payment_status = %payment.status,
                    "Gateway reports PAID for a closed payment, manual review needed"
                );
                BillingEventType::LatePaymentOnTerminal
            }
            Transition::AlreadyTerminal => {
                tracing::debug!(
                    merchant_ref = %payment.merchant_ref,
                    gateway_status = %report.status,
                    "Notification for settled payment ignored"
                );
                return;
            }
            Transition::StillWaiting => return,
        };

        if matches!(
            outcome.transition,
            Transition::MarkCompleted | Transition::MarkExpired | Transition::MarkFailed
        ) {
            tracing::info!(
                village_id = %payment.village_id,
                payment_id = %payment.id,
                merchant_ref = %payment.merchant_ref,
                status = %outcome.status,
                bills = outcome.bill_ids.len(),
                bundle = payment.is_bundle(),
                "Payment reconciled"
            );
        }

        self.events
            .record(
                BillingEventBuilder::new(payment.village_id, event_type)
                    .payment(payment.id)
                    .merchant_ref(payment.merchant_ref.clone())
                    .data(serde_json::json!({
                        "gateway_status": report.status.to_string(),
                        "gateway_reference": report.gateway_reference,
                        "reported_amount": report.amount,
                        "bill_ids": outcome.bill_ids,
                        "bundle_reference": payment.bundle_reference,
                    }))
                    .actor_type(report.source),
            )
            .await;
    }

    /// Expire pending payments whose checkout window has passed. Returns the count.
    pub async fn expire_stale(&self, now: OffsetDateTime) -> BillingResult<usize> {
        let stale = self.payments.stale_pending(now, EXPIRY_BATCH).await?;
        let mut expired = 0;

        for payment in stale {
            let result = self
                .apply_status(
                    payment.id,
                    StatusReport {
                        status: GatewayStatus::Expired,
                        gateway_reference: None,
                        amount: None,
                        paid_at: None,
                        source: ActorType::System,
                    },
                )
                .await;

            match result {
                Ok(outcome) if outcome.transition == Transition::MarkExpired => expired += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(
                    merchant_ref = %payment.merchant_ref,
                    error = %e,
                    "Failed to expire payment"
                ),
            }
        }

        if expired > 0 {
            tracing::info!(count = expired, "Stale payments expired");
        }
        Ok(expired)
    }
}
