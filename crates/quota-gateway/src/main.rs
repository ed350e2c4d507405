use color_eyre::eyre;
use quota_gateway::{create_app, AppState, ServerConfig};
use quota_ledger::{InMemoryFileUsage, InMemoryPlanStore, InMemoryStorage, QuotaLedger};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,quota_gateway=debug,quota_ledger=debug")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = config.socket_addr()?;

    let plans = InMemoryPlanStore::with_defaults();
    let ledger = Arc::new(QuotaLedger::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(plans),
        Arc::new(InMemoryFileUsage::new()),
        config.ledger.clone(),
    ));

    let plans = ledger.list_plans().await?;
    if !plans
        .iter()
        .any(|p| p.plan_id == config.ledger.default_plan_id)
    {
        eyre::bail!(
            "default plan '{}' is not in the catalog",
            config.ledger.default_plan_id
        );
    }
    info!(
        plans = plans.len(),
        cycle_days = config.ledger.cycle_days,
        default_plan = %config.ledger.default_plan_id,
        "Ledger initialized"
    );

    let app = create_app(AppState::new(ledger));

    info!("Quota gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
