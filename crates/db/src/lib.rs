//! Persistence for notifications, preferences, analytics, and alert rules.
//!
//! - [`repositories`]: PostgreSQL access via `sqlx`, one unit struct per
//!   table.
//! - [`store`]: the async traits the engine depends on, with [`PgStore`]
//!   wiring them to the repositories.
//! - [`memory`]: an in-process [`MemoryStore`] implementing the same
//!   traits.

use sqlx::postgres::PgPoolOptions;

pub mod error;
pub mod memory;
pub mod models;
pub mod repositories;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{AlertRuleStore, AnalyticsStore, NotificationStore, PgStore, PreferenceStore};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations under `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
