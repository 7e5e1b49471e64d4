use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use approvey_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect_with_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    // An in-memory database lives and dies with its connection; keep exactly one.
    let max_connections =
        if database_url.contains(":memory:") { 1 } else { max_connections.max(1) };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use approvey_core::config::DatabaseConfig;

    use super::connect_with_config;

    #[tokio::test]
    async fn memory_database_is_pinned_to_one_connection() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_owned(),
            max_connections: 8,
            timeout_secs: 5,
        };
        let pool = connect_with_config(&config).await.expect("connect");

        assert_eq!(pool.options().get_max_connections(), 1);
    }
}
