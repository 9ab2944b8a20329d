//! The shared SQLite database holding the cross-repo index and the job
//! queue. Both processes connect through here so the schema is migrated
//! exactly once per deployment.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("opening shared database at {}", path.display()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running database migrations")?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A fresh migrated database under a temp dir, for store tests.
    pub(crate) async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        connect(&dir.path().join("xrepo.db")).await.unwrap()
    }
}
