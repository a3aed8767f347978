//! API routes

pub mod bills;
pub mod health;
pub mod payments;
pub mod settings;
pub mod tariffs;
pub mod webhooks;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    actor::{require_actor, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER, ACTOR_VILLAGE_HEADER},
    state::AppState,
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ACTOR_ID_HEADER),
            HeaderName::from_static(ACTOR_ROLE_HEADER),
            HeaderName::from_static(ACTOR_VILLAGE_HEADER),
        ])
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Gateway callbacks authenticate by signature, not actor headers
    let webhook_routes = Router::new().route("/webhooks/tripay", post(webhooks::tripay_callback));

    // Village-scoped routes (actor required) - under /api/v1
    let village_routes = Router::new()
        // Tariff ranges
        .route(
            "/villages/:village_id/tariffs",
            get(tariffs::list_tariffs).post(tariffs::create_tariff),
        )
        .route(
            "/villages/:village_id/tariffs/:tier_id",
            patch(tariffs::update_tariff).delete(tariffs::delete_tariff),
        )
        .route(
            "/villages/:village_id/water-charge/preview",
            post(tariffs::preview_water_charge),
        )
        // Bills
        .route(
            "/villages/:village_id/usages/:usage_id/bill",
            post(bills::generate_bill),
        )
        .route("/villages/:village_id/bills/:bill_id", get(bills::get_bill))
        .route(
            "/villages/:village_id/bills/:bill_id/mark-paid",
            post(bills::mark_paid),
        )
        .route(
            "/villages/:village_id/customers/:customer_id/bills",
            get(bills::list_customer_bills),
        )
        // Payments
        .route(
            "/villages/:village_id/bills/:bill_id/pay",
            post(payments::pay_bill),
        )
        .route(
            "/villages/:village_id/customers/:customer_id/bundles",
            post(payments::create_bundle),
        )
        .route(
            "/villages/:village_id/payments/:merchant_ref/sync",
            post(payments::sync_payment),
        )
        .route(
            "/villages/:village_id/customers/:customer_id/payments",
            get(payments::list_customer_payments),
        )
        .route(
            "/villages/:village_id/payments/:merchant_ref/events",
            get(payments::payment_events),
        )
        // Village settings
        .route(
            "/villages/:village_id/gateway-settings",
            put(settings::put_gateway_settings),
        )
        .route_layer(middleware::from_fn(require_actor));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .nest("/api/v1", village_routes)
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
