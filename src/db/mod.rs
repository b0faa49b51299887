pub mod media_files;

pub use media_files::{
    FileStatus, MediaFileRecord, MediaFileRepository, MediaType, NewMediaFile,
};

use std::path::Path;
use std::time::Instant;

use sqlx::sqlite::SqliteConnectOptions;
use tokio::time::sleep;

pub type DbPool = sqlx::SqlitePool;

/// Ensure the parent directory of the database path exists.
/// No-op for in-memory or empty paths.
fn ensure_database_parent_dir(opts: &SqliteConnectOptions) -> anyhow::Result<()> {
    let path = opts.get_filename();
    if path.as_os_str().is_empty() || path == Path::new(":memory:") {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("Failed to create database directory {:?}: {}", parent, e)
            })?;
        }
    }
    Ok(())
}

/// Connect to the database with retries. Creates the database file and parent
/// directory if they do not exist (for file-based SQLite URLs).
pub async fn connect_with_retry(
    url: &str,
    timeout: std::time::Duration,
) -> anyhow::Result<DbPool> {
    let opts = url
        .parse::<SqliteConnectOptions>()
        .map_err(|e| anyhow::anyhow!("Invalid database URL: {}", e))?;
    ensure_database_parent_dir(&opts)?;
    let opts = opts.create_if_missing(true);

    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match DbPool::connect_with(opts.clone()).await {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                if start.elapsed() >= timeout {
                    anyhow::bail!(
                        "Database connection failed after {:?} (attempt {}): {}",
                        timeout,
                        attempt,
                        e
                    );
                }
                tracing::warn!(attempt, error = %e, "Database not ready, retrying in 1s");
                sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Create the media_files table and its indices if they are missing.
pub async fn init_schema(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            inode INTEGER NOT NULL,
            original_filepath TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            tmdb_id INTEGER,
            media_type TEXT,
            llm_guess TEXT,
            processed_data TEXT,
            new_filepath TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (device_id, inode)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_files_status ON media_files (status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_files_created_at ON media_files (created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_files_original_filename \
         ON media_files (original_filename)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
