use dotenvy::dotenv;
use referral_ledger::{
    api::{self, AppState},
    config::{database, settings},
    core::reconcile,
    errors::Result,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load application settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    info!(
        bind = %settings.server.bind_address,
        reward = settings.rewards.referral_reward_amount,
        "Settings loaded"
    );

    // 4. Connect and create tables
    let db = database::create_connection()
        .await
        .inspect(|_| info!("Database connected"))
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Heal anything a previous crash left half-done
    match reconcile::reconcile_pending_rewards(&db).await {
        Ok(report) if !report.completed.is_empty() => {
            warn!(completed = ?report.completed, "Finished partially applied rewards");
        }
        Ok(_) => {}
        Err(e) => error!("Reward reconciliation failed: {}", e),
    }
    if let Err(e) = reconcile::audit_all_accounts(&db).await {
        error!("Balance audit failed: {}", e);
    }

    // 6. Serve the HTTP API
    let listener = TcpListener::bind(&settings.server.bind_address)
        .await
        .inspect_err(|e| error!("Failed to bind {}: {}", settings.server.bind_address, e))?;
    api::serve(listener, AppState::new(db, settings)).await
}
