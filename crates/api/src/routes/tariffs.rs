//! Tariff range routes and the water charge preview

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use pamdes_billing::{BillAmounts, RangeEdit, TariffTier};
use pamdes_shared::{Action, Resource};
use serde::Deserialize;
use uuid::Uuid;

use crate::{actor::Actor, error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateRangeRequest {
    pub usage_min: i32,
    pub price_per_m3: i64,
}

/// Only the fields being changed are sent
#[derive(Debug, Deserialize)]
pub struct UpdateRangeRequest {
    pub usage_max: Option<i32>,
    pub usage_min: Option<i32>,
    pub price_per_m3: Option<i64>,
}

impl From<UpdateRangeRequest> for RangeEdit {
    fn from(req: UpdateRangeRequest) -> Self {
        RangeEdit {
            new_max: req.usage_max,
            new_min: req.usage_min,
            new_price: req.price_per_m3,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub usage_m3: i32,
}

/// List a village's tariff ranges in usage order
pub async fn list_tariffs(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(village_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TariffTier>>> {
    actor.authorize(village_id, Action::View, Resource::Tariff)?;
    let tiers = state.billing.tariffs.list_ranges(village_id).await?;
    Ok(Json(tiers))
}

pub async fn create_tariff(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(village_id): Path<Uuid>,
    Json(req): Json<CreateRangeRequest>,
) -> ApiResult<(StatusCode, Json<TariffTier>)> {
    actor.authorize(village_id, Action::Create, Resource::Tariff)?;
    let tier = state
        .billing
        .tariffs
        .create_range(village_id, req.usage_min, req.price_per_m3, Some(actor.id))
        .await?;
    Ok((StatusCode::CREATED, Json(tier)))
}

pub async fn update_tariff(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, tier_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateRangeRequest>,
) -> ApiResult<Json<TariffTier>> {
    actor.authorize(village_id, Action::Update, Resource::Tariff)?;
    let tier = state
        .billing
        .tariffs
        .update_range(village_id, tier_id, req.into(), Some(actor.id))
        .await?;
    Ok(Json(tier))
}

/// Delete a range; the neighbours are stitched together
pub async fn delete_tariff(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((village_id, tier_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<TariffTier>> {
    actor.authorize(village_id, Action::Delete, Resource::Tariff)?;
    let removed = state
        .billing
        .tariffs
        .delete_range(village_id, tier_id, Some(actor.id))
        .await?;
    Ok(Json(removed))
}

/// What a reading would cost with the current tariff and fees
pub async fn preview_water_charge(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(village_id): Path<Uuid>,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<Json<BillAmounts>> {
    actor.authorize(village_id, Action::View, Resource::Tariff)?;
    let amounts = state
        .billing
        .calculator
        .calculate(village_id, req.usage_m3)
        .await?;
    Ok(Json(amounts))
}
