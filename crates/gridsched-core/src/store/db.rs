//! SQLite-backed store: connection, migrations, and timestamp helpers.
//!
//! Queries live next to their concern (`transfers`, `shares`, `optimizer`,
//! `heartbeat`); `source` maps them onto [`DataSource`](super::DataSource).

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// `$XDG_STATE_HOME/gridsched/gridsched.db`; the directory is created if missing.
pub fn default_db_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("gridsched")?;
    Ok(xdg_dirs.place_state_file("gridsched.db")?)
}

/// Handle to the shared SQLite database.
///
/// Defaults to `~/.local/state/gridsched/gridsched.db`. Every node of a grid
/// must point at the same file.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        Self::open_at(default_db_path()?).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // - `transfers.state` is one of submitted/active/finished/failed.
        // - `source_se`/`dest_se` hold normalised endpoints so link queries
        //   never re-parse URLs.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                vo TEXT NOT NULL,
                activity TEXT NOT NULL DEFAULT 'default',
                source_se TEXT NOT NULL,
                dest_se TEXT NOT NULL,
                source_url TEXT NOT NULL,
                dest_url TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 3,
                state TEXT NOT NULL,
                reason TEXT,
                node TEXT,
                retries INTEGER NOT NULL DEFAULT 0,
                submitted_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS transfers_link_state
            ON transfers (source_se, dest_se, state);
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS share_config (
                source_se TEXT NOT NULL,
                dest_se TEXT NOT NULL,
                vo TEXT NOT NULL,
                weight REAL NOT NULL,
                PRIMARY KEY (source_se, dest_se, vo)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_shares (
                vo TEXT NOT NULL,
                activity TEXT NOT NULL,
                weight REAL NOT NULL,
                PRIMARY KEY (vo, activity)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_config (
                source_se TEXT NOT NULL,
                dest_se TEXT NOT NULL,
                max_active INTEGER NOT NULL,
                PRIMARY KEY (source_se, dest_se)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS endpoint_limits (
                endpoint TEXT PRIMARY KEY,
                egress INTEGER NOT NULL,
                ingress INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS optimizer (
                source_se TEXT NOT NULL,
                dest_se TEXT NOT NULL,
                streams INTEGER NOT NULL,
                ema REAL NOT NULL DEFAULT 0,
                decided_at INTEGER NOT NULL,
                stable INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (source_se, dest_se)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS heartbeats (
                node TEXT PRIMARY KEY,
                beat_at INTEGER NOT NULL,
                drain INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS loop_passes (
                node TEXT NOT NULL,
                loop_name TEXT NOT NULL,
                passed_at INTEGER NOT NULL,
                PRIMARY KEY (node, loop_name)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<SqliteStore> {
    // Single connection to avoid the pool handing back a different empty DB.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store = SqliteStore { pool };
    store.migrate().await?;
    Ok(store)
}
