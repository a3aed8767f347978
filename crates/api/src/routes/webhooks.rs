//! Tripay callback endpoint
//!
//! Tripay expects `{"success": bool}` in every response, so this route does not
//! use the API error body.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use pamdes_billing::BillingError;
use serde_json::{json, Value};

use crate::state::AppState;

pub const CALLBACK_SIGNATURE_HEADER: &str = "x-callback-signature";
pub const CALLBACK_EVENT_HEADER: &str = "x-callback-event";

fn failure(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "message": message })))
}

pub async fn tripay_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    tracing::info!(body_len = body.len(), "Tripay callback received");

    if let Some(event) = headers
        .get(CALLBACK_EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        if event != "payment_status" {
            tracing::info!(event = %event, "Ignoring Tripay callback event");
            return (StatusCode::OK, Json(json!({ "success": true })));
        }
    }

    let signature = headers
        .get(CALLBACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.billing.reconciler.handle_callback(&body, signature).await {
        Ok(outcome) => {
            tracing::info!(
                merchant_ref = %outcome.merchant_ref,
                transition = ?outcome.transition,
                status = %outcome.status,
                "Tripay callback processed"
            );
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        Err(BillingError::SignatureInvalid) => {
            tracing::warn!("Tripay callback signature verification failed");
            failure(StatusCode::BAD_REQUEST, "Invalid signature")
        }
        Err(BillingError::Validation(msg)) => {
            tracing::warn!(error = %msg, "Malformed Tripay callback");
            failure(StatusCode::BAD_REQUEST, "Malformed callback")
        }
        Err(BillingError::NotFound(_)) => failure(StatusCode::NOT_FOUND, "Unknown merchant_ref"),
        Err(e) => {
            tracing::error!(error = %e, "Tripay callback handling failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Callback processing failed")
        }
    }
}
