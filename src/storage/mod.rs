//! Data services over PostgreSQL
//!
//! Each submodule is a thin service over one table family. All functions take
//! an executor (`&PgPool` or an open transaction) so callers control
//! transaction scope; the agent loop opens one transaction per outer
//! iteration (see `agent`).

use crate::config::CoreConfig;
use crate::error::{EngineError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

pub mod artifact;
pub mod learning_space;
pub mod message;
pub mod sandbox_log;
pub mod session;
pub mod skill;
pub mod task;
pub mod tool;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Open the shared connection pool.
pub async fn connect(config: &CoreConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_pool_size)
        .connect(&config.database_url)
        .await?;
    info!(pool_size = config.database_pool_size, "database pool ready");
    Ok(pool)
}

/// Apply pending migrations. Idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| EngineError::retryable(format!("migration failed: {e}")))?;
    Ok(())
}
