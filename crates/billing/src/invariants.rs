//! Billing consistency checks
//!
//! Read-only SQL checks over tariffs, bills and payments. The worker runs them
//! on a schedule and logs every violation; they never repair anything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::tariff::{TariffTable, TariffTier};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub village_ids: Vec<Uuid>,
    pub description: String,
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Customers may be charged the wrong amount
    Critical,
    /// Bill and payment state disagree
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct BillTotalRow {
    id: Uuid,
    village_id: Uuid,
    water_charge: i64,
    admin_fee: i64,
    maintenance_fee: i64,
    total_amount: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MultiplePendingRow {
    bill_id: Uuid,
    village_id: Uuid,
    pending_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentBillRow {
    payment_id: Uuid,
    merchant_ref: String,
    village_id: Uuid,
    bill_id: Uuid,
    bill_status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct DanglingRefRow {
    bill_id: Uuid,
    village_id: Uuid,
    transaction_ref: String,
}

#[derive(Debug, sqlx::FromRow)]
struct AmountMismatchRow {
    payment_id: Uuid,
    village_id: Uuid,
    merchant_ref: String,
    total_amount: i64,
    lines_total: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnbackedPaidRow {
    bill_id: Uuid,
    village_id: Uuid,
}

/// Group partition problems per village
fn partition_violations(tiers: Vec<TariffTier>) -> Vec<InvariantViolation> {
    let mut by_village: BTreeMap<Uuid, Vec<TariffTier>> = BTreeMap::new();
    for tier in tiers {
        by_village.entry(tier.village_id).or_default().push(tier);
    }

    by_village
        .into_iter()
        .filter_map(|(village_id, tiers)| {
            let count = tiers.len();
            let problems = TariffTable::new(village_id, tiers).partition_problems();
            if problems.is_empty() {
                return None;
            }
            Some(InvariantViolation {
                invariant: "tariff_partition".to_string(),
                village_ids: vec![village_id],
                description: format!(
                    "Tariff ranges do not partition [0, inf): {}",
                    problems.join("; ")
                ),
                context: serde_json::json!({ "ranges": count, "problems": problems }),
                severity: ViolationSeverity::Critical,
            })
        })
        .collect()
}

pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in Self::available_checks() {
            violations.extend(self.run_check(name).await?);
        }

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Each village's tiers start at 0, are contiguous, and end unbounded
    async fn check_tariff_partition(&self) -> BillingResult<Vec<InvariantViolation>> {
        let tiers = sqlx::query_as::<_, TariffTier>(
            r#"
            SELECT id, village_id, usage_min, usage_max, price_per_m3, is_active
            FROM water_tariffs
            ORDER BY village_id, usage_min
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(partition_violations(tiers))
    }

    async fn check_bill_totals(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<BillTotalRow> = sqlx::query_as(
            r#"
            SELECT id, village_id, water_charge, admin_fee, maintenance_fee, total_amount
            FROM bills
            WHERE total_amount <> water_charge + admin_fee + maintenance_fee
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "bill_total_matches_parts".to_string(),
                village_ids: vec![row.village_id],
                description: format!("Bill {} total does not equal its parts", row.id),
                context: serde_json::json!({
                    "bill_id": row.id,
                    "water_charge": row.water_charge,
                    "admin_fee": row.admin_fee,
                    "maintenance_fee": row.maintenance_fee,
                    "total_amount": row.total_amount,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    async fn check_single_pending_payment(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultiplePendingRow> = sqlx::query_as(
            r#"
            SELECT bp.bill_id, b.village_id, COUNT(*) AS pending_count
            FROM bill_payment bp
            JOIN payments p ON p.id = bp.payment_id
            JOIN bills b ON b.id = bp.bill_id
            WHERE p.status = 'pending'
            GROUP BY bp.bill_id, b.village_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_pending_payment".to_string(),
                village_ids: vec![row.village_id],
                description: format!(
                    "Bill {} is part of {} pending payments (expected at most 1)",
                    row.bill_id, row.pending_count
                ),
                context: serde_json::json!({
                    "bill_id": row.bill_id,
                    "pending_count": row.pending_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    async fn check_completed_payments_paid(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaymentBillRow> = sqlx::query_as(
            r#"
            SELECT p.id AS payment_id, p.merchant_ref, p.village_id,
                   b.id AS bill_id, b.status AS bill_status
            FROM payments p
            JOIN bill_payment bp ON bp.payment_id = p.id
            JOIN bills b ON b.id = bp.bill_id
            WHERE p.status = 'completed' AND b.status <> 'paid'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_payment_bills_paid".to_string(),
                village_ids: vec![row.village_id],
                description: format!(
                    "Payment {} is completed but bill {} is {}",
                    row.merchant_ref, row.bill_id, row.bill_status
                ),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "bill_id": row.bill_id,
                    "bill_status": row.bill_status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// An unpaid bill's transaction_ref must point at a pending payment
    async fn check_transaction_refs(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DanglingRefRow> = sqlx::query_as(
            r#"
            SELECT b.id AS bill_id, b.village_id, b.transaction_ref
            FROM bills b
            WHERE b.transaction_ref IS NOT NULL
              AND b.status <> 'paid'
              AND NOT EXISTS (
                SELECT 1
                FROM payments p
                JOIN bill_payment bp ON bp.payment_id = p.id
                WHERE bp.bill_id = b.id
                  AND p.merchant_ref = b.transaction_ref
                  AND p.status = 'pending'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "transaction_ref_has_pending_payment".to_string(),
                village_ids: vec![row.village_id],
                description: format!(
                    "Bill {} references {} but no pending payment matches",
                    row.bill_id, row.transaction_ref
                ),
                context: serde_json::json!({
                    "bill_id": row.bill_id,
                    "transaction_ref": row.transaction_ref,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    async fn check_payment_line_totals(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<AmountMismatchRow> = sqlx::query_as(
            r#"
            SELECT p.id AS payment_id, p.village_id, p.merchant_ref, p.total_amount,
                   SUM(bp.amount)::BIGINT AS lines_total
            FROM payments p
            LEFT JOIN bill_payment bp ON bp.payment_id = p.id
            GROUP BY p.id, p.village_id, p.merchant_ref, p.total_amount
            HAVING COALESCE(SUM(bp.amount), 0) <> p.total_amount
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "payment_lines_match_total".to_string(),
                village_ids: vec![row.village_id],
                description: format!(
                    "Payment {} total {} differs from its bill lines",
                    row.merchant_ref, row.total_amount
                ),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "total_amount": row.total_amount,
                    "lines_total": row.lines_total,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    async fn check_paid_bills_backed(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnbackedPaidRow> = sqlx::query_as(
            r#"
            SELECT b.id AS bill_id, b.village_id
            FROM bills b
            WHERE b.status = 'paid'
              AND NOT EXISTS (
                SELECT 1
                FROM bill_payment bp
                JOIN payments p ON p.id = bp.payment_id
                WHERE bp.bill_id = b.id AND p.status = 'completed'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_bill_has_completed_payment".to_string(),
                village_ids: vec![row.village_id],
                description: format!("Bill {} is paid without a completed payment", row.bill_id),
                context: serde_json::json!({ "bill_id": row.bill_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "tariff_partition" => self.check_tariff_partition().await,
            "bill_total_matches_parts" => self.check_bill_totals().await,
            "single_pending_payment" => self.check_single_pending_payment().await,
            "completed_payment_bills_paid" => self.check_completed_payments_paid().await,
            "transaction_ref_has_pending_payment" => self.check_transaction_refs().await,
            "payment_lines_match_total" => self.check_payment_line_totals().await,
            "paid_bill_has_completed_payment" => self.check_paid_bills_backed().await,
            _ => Ok(vec![]),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "tariff_partition",
            "bill_total_matches_parts",
            "single_pending_payment",
            "completed_payment_bills_paid",
            "transaction_ref_has_pending_payment",
            "payment_lines_match_total",
            "paid_bill_has_completed_payment",
        ]
    }
}
