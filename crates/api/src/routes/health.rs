//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use pamdes_billing::GatewayMode;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    /// Tripay environment payments are opened against
    pub gateway_mode: GatewayMode,
    /// Whether platform-wide Tripay credentials are configured
    pub platform_gateway: bool,
}

async fn database_ok(state: &AppState) -> bool {
    sqlx::query("SELECT 1").execute(&state.pool).await.is_ok()
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = database_ok(&state).await;
    let tripay = &state.config.billing.tripay;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            database: if healthy { "healthy" } else { "unhealthy" },
            gateway_mode: tripay.mode,
            platform_gateway: tripay.default_credentials().is_some(),
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: the database must answer
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if database_ok(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
