//! Village gateway settings

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use pamdes_billing::{
    ActorType, BillingEventBuilder, BillingEventType, GatewayMode, TripayCredentials,
};
use pamdes_shared::{Action, Resource};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    actor::Actor,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct GatewaySettingsRequest {
    pub merchant_code: String,
    pub api_key: String,
    pub private_key: String,
    #[serde(default = "default_mode")]
    pub mode: GatewayMode,
}

fn default_mode() -> GatewayMode {
    GatewayMode::Sandbox
}

/// Store the village's own Tripay merchant account
pub async fn put_gateway_settings(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(village_id): Path<Uuid>,
    Json(req): Json<GatewaySettingsRequest>,
) -> ApiResult<StatusCode> {
    actor.authorize(village_id, Action::Update, Resource::GatewaySettings)?;

    if [&req.merchant_code, &req.api_key, &req.private_key]
        .iter()
        .any(|v| v.trim().is_empty())
    {
        return Err(ApiError::Validation(
            "merchant_code, api_key and private_key are required".to_string(),
        ));
    }

    let credentials = TripayCredentials {
        api_key: req.api_key.trim().to_string(),
        private_key: req.private_key.trim().to_string(),
        merchant_code: req.merchant_code.trim().to_string(),
        mode: req.mode,
    };

    state
        .billing
        .credentials
        .store_credentials(village_id, &credentials)
        .await?;

    state
        .billing
        .events
        .record(
            BillingEventBuilder::new(village_id, BillingEventType::GatewayCredentialsUpdated)
                .data(serde_json::json!({
                    "merchant_code": credentials.merchant_code,
                    "mode": credentials.mode,
                }))
                .actor_opt(Some(actor.id), ActorType::Admin),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
