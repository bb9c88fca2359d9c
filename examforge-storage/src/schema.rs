//! Schema migrations for the study store.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

/// Applies every pending migration under `migrations/`.
pub async fn migrate(db: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(db).await?;
    info!("Database migrations completed");
    Ok(())
}
