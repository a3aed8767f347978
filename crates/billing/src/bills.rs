//! Water bills
//!
//! Bills are issued once per water-usage record. Status moves from `unpaid`
//! to `overdue` through the overdue sweep, and to `paid` only through a
//! completed payment (gateway or manual collection).

use pamdes_shared::{BillStatus, PaymentMethod, WaterUsage};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::calculator::BillingCalculator;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEventBuilder, BillingEventLogger, BillingEventType};
use crate::gateway::reference;
use crate::payments::{self, NewPayment, Payment, PaymentLine};

pub(crate) const BILL_COLUMNS: &str = r#"
    id, village_id, customer_id, usage_id, billing_period_id, tariff_id, water_charge,
    admin_fee, maintenance_fee, total_amount, charge_breakdown, status, due_date,
    payment_date, transaction_ref, created_at, updated_at
"#;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bill {
    pub id: Uuid,
    pub village_id: Uuid,
    pub customer_id: Uuid,
    pub usage_id: Uuid,
    pub billing_period_id: Uuid,
    pub tariff_id: Option<Uuid>,
    pub water_charge: i64,
    pub admin_fee: i64,
    pub maintenance_fee: i64,
    pub total_amount: i64,
    pub charge_breakdown: serde_json::Value,
    pub status: BillStatus,
    pub due_date: Date,
    pub payment_date: Option<OffsetDateTime>,
    /// Merchant ref of the outstanding gateway transaction
    pub transaction_ref: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Bill {
    pub fn has_outstanding_transaction(&self) -> bool {
        self.transaction_ref.is_some()
    }

    pub fn is_past_due(&self, today: Date) -> bool {
        self.due_date < today
    }
}

#[derive(sqlx::FromRow)]
struct UsageContext {
    #[sqlx(flatten)]
    reading: WaterUsage,
    village_id: Uuid,
    due_date: Date,
}

/// Lock one bill of a village for the rest of the transaction
pub(crate) async fn lock_bill(
    tx: &mut Transaction<'_, Postgres>,
    village_id: Uuid,
    bill_id: Uuid,
) -> BillingResult<Bill> {
    sqlx::query_as::<_, Bill>(&format!(
        "SELECT {} FROM bills WHERE id = $1 AND village_id = $2 FOR UPDATE",
        BILL_COLUMNS
    ))
    .bind(bill_id)
    .bind(village_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))
}

pub(crate) async fn village_code(
    tx: &mut Transaction<'_, Postgres>,
    village_id: Uuid,
) -> BillingResult<String> {
    let row: Option<(String,)> = sqlx::query_as("SELECT code FROM villages WHERE id = $1")
        .bind(village_id)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(|(code,)| code)
        .ok_or_else(|| BillingError::NotFound(format!("village {}", village_id)))
}

#[derive(Clone)]
pub struct BillService {
    pool: PgPool,
    calculator: BillingCalculator,
    events: BillingEventLogger,
}

impl BillService {
    pub fn new(pool: PgPool, calculator: BillingCalculator) -> Self {
        Self {
            events: BillingEventLogger::new(pool.clone()),
            calculator,
            pool,
        }
    }

    pub async fn get(&self, village_id: Uuid, bill_id: Uuid) -> BillingResult<Bill> {
        sqlx::query_as::<_, Bill>(&format!(
            "SELECT {} FROM bills WHERE id = $1 AND village_id = $2",
            BILL_COLUMNS
        ))
        .bind(bill_id)
        .bind(village_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))
    }

    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        status: Option<BillStatus>,
    ) -> BillingResult<Vec<Bill>> {
        let bills = sqlx::query_as::<_, Bill>(&format!(
            r#"
            SELECT {} FROM bills
            WHERE customer_id = $1 AND ($2::VARCHAR IS NULL OR status = $2)
            ORDER BY due_date DESC
            "#,
            BILL_COLUMNS
        ))
        .bind(customer_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(bills)
    }

    /// Issue the bill for a water-usage record.
    ///
    /// A usage has at most one bill; calling again returns the existing one.
    pub async fn generate_for_usage(
        &self,
        village_id: Uuid,
        usage_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> BillingResult<Bill> {
        if let Some(existing) = self.find_by_usage(usage_id).await? {
            if existing.village_id != village_id {
                return Err(BillingError::NotFound(format!("water usage {}", usage_id)));
            }
            return Ok(existing);
        }

        let usage = sqlx::query_as::<_, UsageContext>(
            r#"
            SELECT u.id, u.customer_id, u.billing_period_id, u.initial_meter,
                   u.final_meter, u.total_usage_m3, c.village_id, p.due_date
            FROM water_usages u
            JOIN customers c ON c.id = u.customer_id
            JOIN billing_periods p ON p.id = u.billing_period_id
            WHERE u.id = $1
            "#,
        )
        .bind(usage_id)
        .fetch_optional(&self.pool)
        .await?
        .filter(|u| u.village_id == village_id)
        .ok_or_else(|| BillingError::NotFound(format!("water usage {}", usage_id)))?;
        usage.reading.validate()?;

        let amounts = self
            .calculator
            .calculate(village_id, usage.reading.total_usage_m3)
            .await?;

        let breakdown = serde_json::to_value(&amounts.breakdown)
            .map_err(|e| BillingError::Internal(format!("breakdown serialization: {}", e)))?;

        let inserted = sqlx::query_as::<_, Bill>(&format!(
            r#"
            INSERT INTO bills (
                village_id, customer_id, usage_id, billing_period_id, tariff_id,
                water_charge, admin_fee, maintenance_fee, total_amount, charge_breakdown,
                status, due_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (usage_id) DO NOTHING
            RETURNING {}
            "#,
            BILL_COLUMNS
        ))
        .bind(village_id)
        .bind(usage.reading.customer_id)
        .bind(usage_id)
        .bind(usage.reading.billing_period_id)
        .bind(amounts.top_tier())
        .bind(amounts.water_charge)
        .bind(amounts.admin_fee)
        .bind(amounts.maintenance_fee)
        .bind(amounts.total_amount)
        .bind(breakdown)
        .bind(BillStatus::Unpaid)
        .bind(usage.due_date)
        .fetch_optional(&self.pool)
        .await?;

        let Some(bill) = inserted else {
            // Lost a race with a concurrent generation for the same usage
            return self
                .find_by_usage(usage_id)
                .await?
                .ok_or_else(|| BillingError::Internal("bill vanished after conflict".to_string()));
        };

        tracing::info!(
            village_id = %village_id,
            bill_id = %bill.id,
            usage_m3 = usage.reading.total_usage_m3,
            total_amount = bill.total_amount,
            "Bill generated"
        );

        self.events
            .record(
                BillingEventBuilder::new(village_id, BillingEventType::BillGenerated)
                    .bill(bill.id)
                    .data(serde_json::json!({
                        "usage_id": usage_id,
                        "usage_m3": usage.reading.total_usage_m3,
                        "water_charge": bill.water_charge,
                        "admin_fee": bill.admin_fee,
                        "maintenance_fee": bill.maintenance_fee,
                        "total_amount": bill.total_amount,
                    }))
                    .actor_opt(actor_id, ActorType::Admin),
            )
            .await;

        Ok(bill)
    }

    async fn find_by_usage(&self, usage_id: Uuid) -> BillingResult<Option<Bill>> {
        let bill = sqlx::query_as::<_, Bill>(&format!(
            "SELECT {} FROM bills WHERE usage_id = $1",
            BILL_COLUMNS
        ))
        .bind(usage_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bill)
    }

    /// Move unpaid bills past their due date to overdue. Returns the count.
    pub async fn mark_overdue(&self, now: OffsetDateTime) -> BillingResult<u64> {
        let today = now.date();

        let updated: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE bills
            SET status = $1, updated_at = NOW()
            WHERE status = $2 AND due_date < $3
            RETURNING village_id
            "#,
        )
        .bind(BillStatus::Overdue)
        .bind(BillStatus::Unpaid)
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut per_village: std::collections::BTreeMap<Uuid, u64> = Default::default();
        for (village_id,) in &updated {
            *per_village.entry(*village_id).or_default() += 1;
        }

        for (village_id, count) in per_village {
            self.events
                .record(
                    BillingEventBuilder::new(village_id, BillingEventType::BillsMarkedOverdue)
                        .data(serde_json::json!({ "count": count, "as_of": today.to_string() })),
                )
                .await;
        }

        let total = updated.len() as u64;
        if total > 0 {
            tracing::info!(count = total, as_of = %today, "Bills marked overdue");
        }
        Ok(total)
    }

    /// Record a cash or transfer collection for one bill.
    pub async fn mark_as_paid_manually(
        &self,
        village_id: Uuid,
        bill_id: Uuid,
        collector_id: Uuid,
        method: PaymentMethod,
    ) -> BillingResult<(Bill, Payment)> {
        if method == PaymentMethod::Qris {
            return Err(BillingError::Validation(
                "QRIS payments are settled by the gateway".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let bill = lock_bill(&mut tx, village_id, bill_id).await?;

        if !bill.status.is_payable() {
            return Err(BillingError::Conflict(format!("bill {} is already paid", bill_id)));
        }
        if bill.has_outstanding_transaction() {
            return Err(BillingError::AlreadyPending(bill_id.to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let code = village_code(&mut tx, village_id).await?;
        let merchant_ref = reference::manual_reference(&code, now);

        let payment = payments::insert_completed(
            &mut tx,
            &NewPayment {
                village_id,
                customer_id: bill.customer_id,
                method,
                merchant_ref: merchant_ref.clone(),
                bundle_reference: None,
                collector_id: Some(collector_id),
                expires_at: None,
                lines: vec![PaymentLine {
                    bill_id,
                    amount: bill.total_amount,
                }],
            },
            now,
        )
        .await?;

        let bill = lock_bill(&mut tx, village_id, bill_id).await?;
        tx.commit().await?;

        tracing::info!(
            village_id = %village_id,
            bill_id = %bill_id,
            payment_id = %payment.id,
            method = %method,
            amount = payment.total_amount,
            "Bill paid manually"
        );

        self.events
            .record(
                BillingEventBuilder::new(village_id, BillingEventType::BillPaidManually)
                    .bill(bill_id)
                    .payment(payment.id)
                    .merchant_ref(merchant_ref)
                    .data(serde_json::json!({
                        "method": method.to_string(),
                        "amount": payment.total_amount,
                    }))
                    .actor_opt(Some(collector_id), ActorType::Admin),
            )
            .await;

        Ok((bill, payment))
    }
}
