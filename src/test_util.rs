//! Shared helpers for in-crate tests.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::AppState;

/// Fresh in-memory database with migrations applied. A single connection
/// keeps every query on the same memory database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

pub async fn test_state() -> Arc<AppState> {
    Arc::new(AppState {
        db: memory_pool().await,
        config: Config::default(),
    })
}
