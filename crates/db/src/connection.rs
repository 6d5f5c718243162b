use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use penny_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Open a pool per the application's database section.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(
        &config.url,
        config.max_connections,
        config.timeout_secs,
        config.busy_timeout_ms,
    )
    .await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
    busy_timeout_ms: u64,
) -> Result<DbPool, sqlx::Error> {
    let busy_timeout_ms = busy_timeout_ms.max(1);
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            // foreign_keys and busy_timeout are session-scoped, so every
            // pooled connection has to set them itself.
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}
