//! Bundle payments: several bills of one customer settled by one QRIS transaction

use std::collections::BTreeSet;

use pamdes_shared::PaymentMethod;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::bills::{self, Bill, BILL_COLUMNS};
use crate::checkout::{self, CheckoutResponse, CheckoutService};
use crate::error::{BillingError, BillingResult};
use crate::gateway::{reference, CustomerInfo, TransactionRequest};
use crate::payments::{self, NewPayment, PaymentLine};

/// Deduplicate requested bill ids, in lock order
fn normalize_request(bill_ids: &[Uuid]) -> BillingResult<Vec<Uuid>> {
    let unique: BTreeSet<Uuid> = bill_ids.iter().copied().collect();
    if unique.is_empty() {
        return Err(BillingError::Validation("no bills selected".to_string()));
    }
    Ok(unique.into_iter().collect())
}

/// Lock and return every requested bill, or fail without locking any.
///
/// A bill qualifies when it belongs to the customer in the village, is unpaid
/// or overdue, and is not part of a pending payment.
pub async fn select_bills_for_bundle(
    tx: &mut Transaction<'_, Postgres>,
    village_id: Uuid,
    customer_id: Uuid,
    bill_ids: &[Uuid],
) -> BillingResult<Vec<Bill>> {
    let requested = normalize_request(bill_ids)?;

    let bills = sqlx::query_as::<_, Bill>(&format!(
        r#"
        SELECT {} FROM bills
        WHERE id = ANY($1)
          AND village_id = $2
          AND customer_id = $3
          AND status IN ('unpaid', 'overdue')
          AND transaction_ref IS NULL
          AND NOT EXISTS (
            SELECT 1 FROM bill_payment bp WHERE bp.bill_id = bills.id AND bp.is_pending
          )
        ORDER BY id
        FOR UPDATE
        "#,
        BILL_COLUMNS
    ))
    .bind(&requested)
    .bind(village_id)
    .bind(customer_id)
    .fetch_all(&mut **tx)
    .await?;

    if bills.len() == requested.len() {
        return Ok(bills);
    }

    let found: BTreeSet<Uuid> = bills.iter().map(|b| b.id).collect();
    let missing: Vec<Uuid> = requested
        .into_iter()
        .filter(|id| !found.contains(id))
        .collect();

    let pending: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM bills
        WHERE id = ANY($1)
          AND village_id = $2
          AND customer_id = $3
          AND status IN ('unpaid', 'overdue')
          AND (
            transaction_ref IS NOT NULL
            OR EXISTS (SELECT 1 FROM bill_payment bp WHERE bp.bill_id = bills.id AND bp.is_pending)
          )
        LIMIT 1
        "#,
    )
    .bind(&missing)
    .bind(village_id)
    .bind(customer_id)
    .fetch_optional(&mut **tx)
    .await?;

    tracing::info!(
        village_id = %village_id,
        customer_id = %customer_id,
        missing = ?missing,
        "Bundle selection rejected"
    );

    match pending {
        Some((bill_id,)) => Err(BillingError::AlreadyPending(bill_id.to_string())),
        None => Err(BillingError::Validation(format!(
            "bills not payable by this customer: {}",
            missing
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

#[derive(Clone)]
pub struct BundleCoordinator {
    checkout: CheckoutService,
}

impl BundleCoordinator {
    pub fn new(checkout: CheckoutService) -> Self {
        Self { checkout }
    }

    /// Open one QRIS transaction for several bills of a customer.
    pub async fn create_bundle(
        &self,
        village_id: Uuid,
        customer_id: Uuid,
        bill_ids: &[Uuid],
        customer: Option<CustomerInfo>,
        return_url: Option<String>,
        actor_id: Option<Uuid>,
    ) -> BillingResult<CheckoutResponse> {
        let credentials = self.checkout.credentials_for(village_id).await?;
        let now = OffsetDateTime::now_utc();
        let expires_at = now + self.checkout.expiry();

        let mut tx = self.checkout.pool().begin().await?;
        let bills = select_bills_for_bundle(&mut tx, village_id, customer_id, bill_ids).await?;

        let code = bills::village_code(&mut tx, village_id).await?;
        let customer = checkout::customer_info(&mut tx, village_id, customer_id, customer).await?;
        let bundle_reference = reference::bundle_reference(&code, now);

        let mut items = Vec::with_capacity(bills.len());
        for bill in &bills {
            let year_month = checkout::period_year_month(&mut tx, bill.billing_period_id).await?;
            items.push(checkout::order_item(bill, &year_month));
        }

        let payment = payments::insert_pending(
            &mut tx,
            &NewPayment {
                village_id,
                customer_id,
                method: PaymentMethod::Qris,
                merchant_ref: bundle_reference.clone(),
                bundle_reference: Some(bundle_reference.clone()),
                collector_id: None,
                expires_at: Some(expires_at),
                lines: bills
                    .iter()
                    .map(|b| PaymentLine {
                        bill_id: b.id,
                        amount: b.total_amount,
                    })
                    .collect(),
            },
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            village_id = %village_id,
            customer_id = %customer_id,
            bundle_reference = %bundle_reference,
            bills = bills.len(),
            amount = payment.total_amount,
            "Bundle payment pending"
        );

        let request = TransactionRequest {
            merchant_ref: bundle_reference,
            amount: payment.total_amount,
            customer,
            items,
            return_url,
            expires_at,
        };

        let bill_ids = bills.iter().map(|b| b.id).collect();
        self.checkout
            .submit(&credentials, payment, request, bill_ids, actor_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_rejected() {
        assert!(matches!(
            normalize_request(&[]),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicates_collapse_and_sort() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(normalize_request(&[b, a, b, a]).unwrap(), vec![a, b]);
    }
}
