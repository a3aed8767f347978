use anyhow::Context;
use pamdes_api::{create_router, AppState, Config};
use pamdes_billing::BillingService;
use pamdes_shared::{create_migration_pool, create_pool, run_migrations, PoolSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pamdes_api=debug,pamdes_billing=debug,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    let migration_pool = create_migration_pool(&config.database_url).await?;
    run_migrations(&migration_pool)
        .await
        .context("Failed to run migrations")?;
    migration_pool.close().await;

    let pool = create_pool(
        &config.database_url,
        &PoolSettings {
            max_connections: config.database_max_connections,
            statement_timeout_ms: config.statement_timeout_ms,
            ..PoolSettings::default()
        },
    )
    .await
    .context("Failed to connect to database")?;

    let billing = BillingService::new(config.billing.clone(), pool.clone())?;
    let bind_address = config.bind_address.clone();

    tracing::info!(
        gateway_mode = ?config.billing.tripay.mode,
        encrypted_village_credentials = config.billing.credentials_key.is_some(),
        "Billing configured"
    );

    let app = create_router(AppState::new(config, pool, billing));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "PAMDes API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
