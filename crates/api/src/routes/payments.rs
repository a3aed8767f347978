//! QRIS payment routes: single bill, bundle, status poll

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use pamdes_billing::{BillingEvent, CheckoutResponse, CustomerInfo, Payment, ReconcileOutcome};
use pamdes_shared::{Action, Resource};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    actor::Actor,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct PayBillRequest {
    /// Overrides the contact details on file
    pub customer: Option<CustomerInfo>,
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBundleRequest {
    pub bill_ids: Vec<Uuid>,
    pub customer: Option<CustomerInfo>,
    pub return_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    pub limit: Option<i64>,
}

/// Open a QRIS payment for one bill
pub async fn pay_bill(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, bill_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<PayBillRequest>>,
) -> ApiResult<(StatusCode, Json<CheckoutResponse>)> {
    actor.authorize(village_id, Action::Pay, Resource::Bill)?;
    let bill = state.billing.bills.get(village_id, bill_id).await?;
    actor.ensure_customer(bill.customer_id)?;

    let req = body.map(|Json(r)| r).unwrap_or_default();
    let return_url = req
        .return_url
        .unwrap_or_else(|| state.config.default_return_url());

    let checkout = state
        .billing
        .checkout
        .create_payment(village_id, bill_id, req.customer, Some(return_url), Some(actor.id))
        .await?;
    Ok((StatusCode::CREATED, Json(checkout)))
}

/// Open one QRIS payment covering several of a customer's bills
pub async fn create_bundle(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, customer_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CreateBundleRequest>,
) -> ApiResult<(StatusCode, Json<CheckoutResponse>)> {
    actor.authorize(village_id, Action::Pay, Resource::Payment)?;
    actor.ensure_customer(customer_id)?;

    if req.bill_ids.is_empty() {
        return Err(ApiError::Validation("bill_ids must not be empty".to_string()));
    }

    let return_url = req
        .return_url
        .unwrap_or_else(|| state.config.default_return_url());

    let checkout = state
        .billing
        .bundles
        .create_bundle(
            village_id,
            customer_id,
            &req.bill_ids,
            req.customer,
            Some(return_url),
            Some(actor.id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(checkout)))
}

/// Ask the gateway for a payment's status and apply it
pub async fn sync_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, merchant_ref)): Path<(Uuid, String)>,
) -> ApiResult<Json<ReconcileOutcome>> {
    actor.authorize(village_id, Action::Reconcile, Resource::Payment)?;
    let outcome = state
        .billing
        .reconciler
        .sync_status(village_id, &merchant_ref)
        .await?;
    Ok(Json(outcome))
}

/// Event trail of one gateway transaction
pub async fn payment_events(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, merchant_ref)): Path<(Uuid, String)>,
) -> ApiResult<Json<Vec<BillingEvent>>> {
    actor.authorize(village_id, Action::View, Resource::Payment)?;
    let payment = state
        .billing
        .payments
        .find_by_merchant_ref(&merchant_ref)
        .await?
        .filter(|p| p.village_id == village_id)
        .ok_or(ApiError::NotFound)?;
    actor.ensure_customer(payment.customer_id)?;

    let events = state
        .billing
        .events
        .get_events_for_merchant_ref(&payment.merchant_ref)
        .await?;
    Ok(Json(events))
}

/// A customer's payments, newest first
pub async fn list_customer_payments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, customer_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<PaymentListQuery>,
) -> ApiResult<Json<Vec<Payment>>> {
    actor.authorize(village_id, Action::View, Resource::Payment)?;
    actor.ensure_customer(customer_id)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let payments = state
        .billing
        .payments
        .list_for_customer(customer_id, limit)
        .await?
        .into_iter()
        .filter(|p| p.village_id == village_id)
        .collect();
    Ok(Json(payments))
}
