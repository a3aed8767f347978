//! Bill routes: issue, read, list, manual collection

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use pamdes_billing::{Bill, Payment};
use pamdes_shared::{Action, BillStatus, PaymentMethod, Resource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    actor::Actor,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct BillListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkPaidRequest {
    /// `cash` or `transfer`
    pub method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct MarkPaidResponse {
    pub bill: Bill,
    pub payment: Payment,
}

/// Issue the bill for a meter reading (idempotent per reading)
pub async fn generate_bill(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, usage_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<(StatusCode, Json<Bill>)> {
    actor.authorize(village_id, Action::Create, Resource::Bill)?;
    let bill = state
        .billing
        .bills
        .generate_for_usage(village_id, usage_id, Some(actor.id))
        .await?;
    Ok((StatusCode::CREATED, Json(bill)))
}

pub async fn get_bill(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, bill_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Bill>> {
    actor.authorize(village_id, Action::View, Resource::Bill)?;
    let bill = state.billing.bills.get(village_id, bill_id).await?;
    actor.ensure_customer(bill.customer_id)?;
    Ok(Json(bill))
}

/// A customer's bills, newest first, optionally filtered by status
pub async fn list_customer_bills(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, customer_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<BillListQuery>,
) -> ApiResult<Json<Vec<Bill>>> {
    actor.authorize(village_id, Action::View, Resource::Bill)?;
    actor.ensure_customer(customer_id)?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<BillStatus>)
        .transpose()
        .map_err(ApiError::Validation)?;

    let bills = state
        .billing
        .bills
        .list_for_customer(customer_id, status)
        .await?
        .into_iter()
        .filter(|b| b.village_id == village_id)
        .collect();
    Ok(Json(bills))
}

/// Record a cash or transfer collection by the acting collector
pub async fn mark_paid(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, bill_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<MarkPaidRequest>,
) -> ApiResult<Json<MarkPaidResponse>> {
    actor.authorize(village_id, Action::Collect, Resource::Bill)?;
    let (bill, payment) = state
        .billing
        .bills
        .mark_as_paid_manually(village_id, bill_id, actor.id, req.method)
        .await?;
    Ok(Json(MarkPaidResponse { bill, payment }))
}
