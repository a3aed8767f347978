//! Payment rows and the bill/payment pivot
//!
//! A payment covers one or more bills through `bill_payment`. While a payment
//! is pending, each member bill carries the payment's merchant ref in
//! `transaction_ref` and its pivot row is flagged `is_pending`; the partial
//! unique index on that flag keeps a bill in at most one pending payment.
//!
//! The helpers taking a transaction are the only writers of payment state.

use pamdes_shared::{BillStatus, PaymentMethod, PaymentStatus};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::GatewayTransaction;

pub(crate) const PAYMENT_COLUMNS: &str = r#"
    id, village_id, customer_id, total_amount, payment_method, status, merchant_ref,
    gateway_reference, checkout_url, collector_id, bundle_reference, expires_at, paid_at,
    gateway_metadata, created_at, updated_at
"#;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub village_id: Uuid,
    pub customer_id: Uuid,
    pub total_amount: i64,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub merchant_ref: String,
    pub gateway_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub collector_id: Option<Uuid>,
    /// Set when the payment was opened as a bundle
    pub bundle_reference: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub paid_at: Option<OffsetDateTime>,
    pub gateway_metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Payment {
    pub fn is_bundle(&self) -> bool {
        self.bundle_reference.is_some()
    }
}

/// One bill's share of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentLine {
    pub bill_id: Uuid,
    pub amount: i64,
}

/// Payment to insert
#[derive(Debug, Clone)]
pub(crate) struct NewPayment {
    pub village_id: Uuid,
    pub customer_id: Uuid,
    pub method: PaymentMethod,
    pub merchant_ref: String,
    pub bundle_reference: Option<String>,
    pub collector_id: Option<Uuid>,
    pub expires_at: Option<OffsetDateTime>,
    pub lines: Vec<PaymentLine>,
}

impl NewPayment {
    fn total(&self) -> BillingResult<i64> {
        self.lines.iter().try_fold(0i64, |acc, line| {
            acc.checked_add(line.amount)
                .ok_or_else(|| BillingError::Validation("payment total overflows".to_string()))
        })
    }

    fn bill_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|l| l.bill_id).collect()
    }
}

async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewPayment,
    status: PaymentStatus,
    paid_at: Option<OffsetDateTime>,
) -> BillingResult<Payment> {
    if new.lines.is_empty() {
        return Err(BillingError::Validation("payment has no bills".to_string()));
    }
    let total = new.total()?;

    let payment = sqlx::query_as::<_, Payment>(&format!(
        r#"
        INSERT INTO payments (
            village_id, customer_id, total_amount, payment_method, status, merchant_ref,
            collector_id, bundle_reference, expires_at, paid_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(new.village_id)
    .bind(new.customer_id)
    .bind(total)
    .bind(new.method)
    .bind(status)
    .bind(&new.merchant_ref)
    .bind(new.collector_id)
    .bind(&new.bundle_reference)
    .bind(new.expires_at)
    .bind(paid_at)
    .fetch_one(&mut **tx)
    .await?;

    let is_pending = status == PaymentStatus::Pending;
    for line in &new.lines {
        sqlx::query(
            r#"
            INSERT INTO bill_payment (bill_id, payment_id, amount, is_pending)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(line.bill_id)
        .bind(payment.id)
        .bind(line.amount)
        .bind(is_pending)
        .execute(&mut **tx)
        .await
        .map_err(|e| match BillingError::from(e) {
            BillingError::Conflict(_) => BillingError::AlreadyPending(line.bill_id.to_string()),
            other => other,
        })?;
    }

    Ok(payment)
}

/// Open a pending payment and reference it from every member bill.
pub(crate) async fn insert_pending(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewPayment,
) -> BillingResult<Payment> {
    let payment = insert_payment(tx, new, PaymentStatus::Pending, None).await?;

    sqlx::query(
        r#"
        UPDATE bills
        SET transaction_ref = $1, updated_at = NOW()
        WHERE id = ANY($2)
        "#,
    )
    .bind(&payment.merchant_ref)
    .bind(new.bill_ids())
    .execute(&mut **tx)
    .await?;

    Ok(payment)
}

/// Record an already-collected payment (cash or transfer) and mark its bills paid.
pub(crate) async fn insert_completed(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewPayment,
    paid_at: OffsetDateTime,
) -> BillingResult<Payment> {
    let payment = insert_payment(tx, new, PaymentStatus::Completed, Some(paid_at)).await?;
    mark_bills_paid(tx, &new.bill_ids(), paid_at).await?;
    Ok(payment)
}

async fn mark_bills_paid(
    tx: &mut Transaction<'_, Postgres>,
    bill_ids: &[Uuid],
    paid_at: OffsetDateTime,
) -> BillingResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE bills
        SET status = $1, payment_date = $2, updated_at = NOW()
        WHERE id = ANY($3) AND status <> $1
        "#,
    )
    .bind(BillStatus::Paid)
    .bind(paid_at)
    .bind(bill_ids)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

/// Lock a payment row for a state transition
pub(crate) async fn lock_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> BillingResult<Payment> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| BillingError::NotFound(format!("payment {}", payment_id)))
}

pub(crate) async fn payment_lines(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> BillingResult<Vec<PaymentLine>> {
    let lines = sqlx::query_as::<_, PaymentLine>(
        "SELECT bill_id, amount FROM bill_payment WHERE payment_id = $1 ORDER BY bill_id",
    )
    .bind(payment_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(lines)
}

async fn release_pivot(tx: &mut Transaction<'_, Postgres>, payment_id: Uuid) -> BillingResult<()> {
    sqlx::query("UPDATE bill_payment SET is_pending = FALSE WHERE payment_id = $1")
        .bind(payment_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Complete a locked pending payment: payment and every member bill become paid.
/// Returns the member bill ids.
pub(crate) async fn complete(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
    gateway_reference: Option<&str>,
    paid_at: OffsetDateTime,
) -> BillingResult<Vec<Uuid>> {
    sqlx::query(
        r#"
        UPDATE payments
        SET status = $2,
            paid_at = $3,
            gateway_reference = COALESCE($4, gateway_reference),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(payment.id)
    .bind(PaymentStatus::Completed)
    .bind(paid_at)
    .bind(gateway_reference)
    .execute(&mut **tx)
    .await?;

    let bill_ids: Vec<Uuid> = payment_lines(tx, payment.id)
        .await?
        .into_iter()
        .map(|l| l.bill_id)
        .collect();

    mark_bills_paid(tx, &bill_ids, paid_at).await?;
    release_pivot(tx, payment.id).await?;

    Ok(bill_ids)
}

/// Close a locked pending payment without collecting it (expired or failed).
/// Member bills keep their status and lose the outstanding reference.
pub(crate) async fn close_unpaid(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
    status: PaymentStatus,
) -> BillingResult<Vec<Uuid>> {
    if !matches!(status, PaymentStatus::Expired | PaymentStatus::Failed) {
        return Err(BillingError::Internal(format!(
            "cannot close payment as {}",
            status
        )));
    }

    sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(payment.id)
        .bind(status)
        .execute(&mut **tx)
        .await?;

    let bill_ids: Vec<Uuid> = payment_lines(tx, payment.id)
        .await?
        .into_iter()
        .map(|l| l.bill_id)
        .collect();

    clear_bill_refs(tx, &bill_ids, &payment.merchant_ref).await?;
    release_pivot(tx, payment.id).await?;

    Ok(bill_ids)
}

async fn clear_bill_refs(
    tx: &mut Transaction<'_, Postgres>,
    bill_ids: &[Uuid],
    merchant_ref: &str,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        UPDATE bills
        SET transaction_ref = NULL, updated_at = NOW()
        WHERE id = ANY($1) AND transaction_ref = $2
        "#,
    )
    .bind(bill_ids)
    .bind(merchant_ref)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Store the gateway's answer on a freshly opened payment
pub(crate) async fn attach_gateway_transaction(
    pool: &PgPool,
    payment_id: Uuid,
    transaction: &GatewayTransaction,
) -> BillingResult<Payment> {
    let payment = sqlx::query_as::<_, Payment>(&format!(
        r#"
        UPDATE payments
        SET gateway_reference = $2,
            checkout_url = $3,
            expires_at = COALESCE($4, expires_at),
            gateway_metadata = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    ))
    .bind(payment_id)
    .bind(&transaction.reference)
    .bind(&transaction.checkout_url)
    .bind(transaction.expires_at)
    .bind(&transaction.raw)
    .fetch_one(pool)
    .await?;

    Ok(payment)
}

/// Undo [`insert_pending`] after the gateway refused the transaction.
///
/// Only a payment still pending with no gateway reference is removed; if a
/// callback already moved it, it is left alone.
pub(crate) async fn discard_pending(pool: &PgPool, payment: &Payment) -> BillingResult<bool> {
    let mut tx = pool.begin().await?;

    let current = lock_payment(&mut tx, payment.id).await?;
    if current.status != PaymentStatus::Pending || current.gateway_reference.is_some() {
        tx.rollback().await?;
        return Ok(false);
    }

    let bill_ids: Vec<Uuid> = payment_lines(&mut tx, payment.id)
        .await?
        .into_iter()
        .map(|l| l.bill_id)
        .collect();
    clear_bill_refs(&mut tx, &bill_ids, &payment.merchant_ref).await?;

    // bill_payment rows cascade
    sqlx::query("DELETE FROM payments WHERE id = $1")
        .bind(payment.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        merchant_ref = %payment.merchant_ref,
        bills = bill_ids.len(),
        "Pending payment discarded after gateway failure"
    );

    Ok(true)
}

/// Read access to payments
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, payment_id: Uuid) -> BillingResult<Payment> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("payment {}", payment_id)))
    }

    pub async fn find_by_merchant_ref(&self, merchant_ref: &str) -> BillingResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE merchant_ref = $1",
            PAYMENT_COLUMNS
        ))
        .bind(merchant_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    /// Pending payment whose merchant ref is recorded on a bill
    pub async fn find_pending_via_bill_ref(
        &self,
        transaction_ref: &str,
    ) -> BillingResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {} FROM payments
            WHERE status = 'pending'
              AND id IN (
                SELECT bp.payment_id
                FROM bill_payment bp
                JOIN bills b ON b.id = bp.bill_id
                WHERE b.transaction_ref = $1 AND bp.is_pending
              )
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(transaction_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    pub async fn lines(&self, payment_id: Uuid) -> BillingResult<Vec<PaymentLine>> {
        let lines = sqlx::query_as::<_, PaymentLine>(
            "SELECT bill_id, amount FROM bill_payment WHERE payment_id = $1 ORDER BY bill_id",
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE customer_id = $1 ORDER BY created_at DESC LIMIT $2",
            PAYMENT_COLUMNS
        ))
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Pending payments past their expiry
    pub async fn stale_pending(&self, now: OffsetDateTime, limit: i64) -> BillingResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {} FROM payments
            WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }
}
