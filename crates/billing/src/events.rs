//! Billing Events Module
//!
//! Append-only billing event log. Every tariff edit, bill state change and
//! gateway callback outcome is recorded here so that a village admin can answer
//! "why is this bill paid?" and so that desyncs with the gateway can be traced.
//! The same rows serve as the notification log read by other parts of the system.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Tariff table
    TariffRangeCreated,
    TariffRangeUpdated,
    TariffRangeDeleted,

    // Bills
    BillGenerated,
    BillsMarkedOverdue,
    BillPaidManually,

    // Gateway payments
    PaymentCreated,
    PaymentCreateFailed,
    PaymentCompleted,
    PaymentExpired,
    PaymentFailed,

    // Village settings
    GatewayCredentialsUpdated,

    // Callback anomalies
    CallbackRejected,
    CallbackUnknownStatus,
    LatePaymentOnTerminal,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::TariffRangeCreated => "TARIFF_RANGE_CREATED",
            BillingEventType::TariffRangeUpdated => "TARIFF_RANGE_UPDATED",
            BillingEventType::TariffRangeDeleted => "TARIFF_RANGE_DELETED",
            BillingEventType::BillGenerated => "BILL_GENERATED",
            BillingEventType::BillsMarkedOverdue => "BILLS_MARKED_OVERDUE",
            BillingEventType::BillPaidManually => "BILL_PAID_MANUALLY",
            BillingEventType::PaymentCreated => "PAYMENT_CREATED",
            BillingEventType::PaymentCreateFailed => "PAYMENT_CREATE_FAILED",
            BillingEventType::PaymentCompleted => "PAYMENT_COMPLETED",
            BillingEventType::PaymentExpired => "PAYMENT_EXPIRED",
            BillingEventType::PaymentFailed => "PAYMENT_FAILED",
            BillingEventType::GatewayCredentialsUpdated => "GATEWAY_CREDENTIALS_UPDATED",
            BillingEventType::CallbackRejected => "CALLBACK_REJECTED",
            BillingEventType::CallbackUnknownStatus => "CALLBACK_UNKNOWN_STATUS",
            BillingEventType::LatePaymentOnTerminal => "LATE_PAYMENT_ON_TERMINAL",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// Customer through the portal
    Customer,
    /// Village or super admin, or a collector
    Admin,
    /// Scheduled sweeps
    System,
    /// Tripay callback or status poll
    Gateway,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::Customer => write!(f, "customer"),
            ActorType::Admin => write!(f, "admin"),
            ActorType::System => write!(f, "system"),
            ActorType::Gateway => write!(f, "gateway"),
        }
    }
}

/// A billing event record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BillingEvent {
    pub id: Uuid,
    pub village_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub bill_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub merchant_ref: Option<String>,
    pub actor_id: Option<Uuid>,
    pub actor_type: String,
    pub created_at: OffsetDateTime,
}

/// Builder for creating billing events
pub struct BillingEventBuilder {
    village_id: Uuid,
    event_type: BillingEventType,
    event_data: serde_json::Value,
    bill_id: Option<Uuid>,
    payment_id: Option<Uuid>,
    merchant_ref: Option<String>,
    actor_id: Option<Uuid>,
    actor_type: ActorType,
}

impl BillingEventBuilder {
    pub fn new(village_id: Uuid, event_type: BillingEventType) -> Self {
        Self {
            village_id,
            event_type,
            event_data: serde_json::json!({}),
            bill_id: None,
            payment_id: None,
            merchant_ref: None,
            actor_id: None,
            actor_type: ActorType::System,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn bill(mut self, bill_id: Uuid) -> Self {
        self.bill_id = Some(bill_id);
        self
    }

    pub fn payment(mut self, payment_id: Uuid) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn merchant_ref(mut self, merchant_ref: impl Into<String>) -> Self {
        self.merchant_ref = Some(merchant_ref.into());
        self
    }

    /// Set the actor with an optional user ID
    pub fn actor_opt(mut self, actor_id: Option<Uuid>, actor_type: ActorType) -> Self {
        self.actor_id = actor_id;
        self.actor_type = actor_type;
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }
}

/// Service for logging and querying billing events
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Log a billing event
    pub async fn log_event(&self, builder: BillingEventBuilder) -> BillingResult<Uuid> {
        let event_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_events (
                village_id,
                event_type,
                event_data,
                bill_id,
                payment_id,
                merchant_ref,
                actor_id,
                actor_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(builder.village_id)
        .bind(builder.event_type.to_string())
        .bind(&builder.event_data)
        .bind(builder.bill_id)
        .bind(builder.payment_id)
        .bind(&builder.merchant_ref)
        .bind(builder.actor_id)
        .bind(builder.actor_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(event_id.0)
    }

    /// Log an event after the state change already committed.
    ///
    /// The audit row must never roll back a committed transition, so a failure
    /// here is logged and swallowed.
    pub async fn record(&self, builder: BillingEventBuilder) {
        let event_type = builder.event_type;
        let village_id = builder.village_id;
        if let Err(e) = self.log_event(builder).await {
            tracing::warn!(
                village_id = %village_id,
                event_type = %event_type,
                error = %e,
                "Failed to write billing event"
            );
        }
    }

    /// Get recent events for a village
    pub async fn get_events_for_village(
        &self,
        village_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, village_id, event_type, event_data, bill_id, payment_id,
                   merchant_ref, actor_id, actor_type, created_at
            FROM billing_events
            WHERE village_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(village_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Get the event trail of one gateway transaction
    pub async fn get_events_for_merchant_ref(
        &self,
        merchant_ref: &str,
    ) -> BillingResult<Vec<BillingEvent>> {
        let events: Vec<BillingEvent> = sqlx::query_as(
            r#"
            SELECT id, village_id, event_type, event_data, bill_id, payment_id,
                   merchant_ref, actor_id, actor_type, created_at
            FROM billing_events
            WHERE merchant_ref = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(merchant_ref)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
