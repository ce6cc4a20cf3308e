use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::error::Result;

/// Open the pool used by `PgStore`. Vote writes hold a row lock for the
/// length of one short transaction, so the pool stays small.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Apply the ranking schema (posts, comments, per-target vote tables, karma,
/// saved and hidden items).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}
