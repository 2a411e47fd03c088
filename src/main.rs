//! atomic_ledger - operations tool
//!
//! `atomic_ledger migrate` applies the schema, `atomic_ledger check`
//! verifies connectivity and that the ledger tables exist.

use atomic_ledger::{db, logging, Config};

const USAGE: &str = "usage: atomic_ledger <migrate|check>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    logging::init_tracing(config.log_format);

    let command = std::env::args().nth(1).unwrap_or_else(|| "check".to_string());

    tracing::info!(environment = %config.environment, "Connecting to database...");
    let pool = db::connect(&config).await?;
    db::verify_connection(&pool).await?;

    let outcome = match command.as_str() {
        "migrate" => db::run_migrations(&pool).await.map_err(anyhow::Error::from),
        "check" => {
            if db::check_schema(&pool).await? {
                tracing::info!("Database schema is complete");
                Ok(())
            } else {
                Err(anyhow::anyhow!("Database schema incomplete. Run `atomic_ledger migrate`."))
            }
        }
        other => Err(anyhow::anyhow!("unknown command '{}'\n{}", other, USAGE)),
    };

    pool.close().await;
    tracing::info!("Database connections closed");

    outcome
}
