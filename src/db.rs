use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::RunQueryDsl;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AdminError, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Shared handle injected into every repository: owns the pool and the
/// per-connection setup.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: String,
}

impl Database {
    pub async fn open(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| AdminError::Runtime(e.to_string()))?;
        tracing::info!(db_path = sqlite_path, "Opened admin database");
        Ok(Self {
            pool,
            path: sqlite_path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AdminError::Database(e.to_string()))?;
        diesel::sql_query("PRAGMA busy_timeout = 5000")
            .execute(&mut conn)
            .await?;
        diesel::sql_query("PRAGMA foreign_keys = ON")
            .execute(&mut conn)
            .await?;
        Ok(conn)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| AdminError::Runtime(e.to_string()))?;
        }
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| AdminError::Database(e.to_string()))?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| AdminError::Database(e.to_string()))?;
        for version in applied {
            tracing::info!(%version, "Applied migration");
        }
        Ok::<_, AdminError>(())
    })
    .await
    .map_err(|e| AdminError::Runtime(e.to_string()))??;
    Ok(())
}

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn encode_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a JSON text column. Corrupt or missing data falls back to `default`
/// so one bad row never takes a listing down.
pub fn decode_json(raw: Option<&str>, default: Value) -> Value {
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).unwrap_or_else(|err| {
            tracing::warn!("Discarding malformed JSON column value: {}", err);
            default
        }),
        _ => default,
    }
}

pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Envelope metadata; serialised in the envelope's own camelCase style.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, limit: u32, total: i64) -> Self {
        let limit = limit.max(1);
        let total_pages = ((total.max(0) as u64).div_ceil(limit as u64)) as u32;
        Self {
            items,
            pagination: Pagination {
                page,
                limit,
                total,
                total_pages,
            },
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn opens_database_and_runs_migrations_twice() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("nested").join("admin.db");
        let db_path = db_path.to_string_lossy().to_string();

        let db = Database::open(&db_path).await.expect("first open");
        db.ping().await.expect("ping");
        drop(db);

        let db = Database::open(&db_path).await.expect("second open");
        db.ping().await.expect("ping after reopen");
    }

    #[test]
    fn page_counts_total_pages() {
        let page = Page::new(vec![1, 2, 3], 1, 3, 7);
        assert_eq!(page.pagination.total_pages, 3);
        let empty: Page<i32> = Page::new(Vec::new(), 1, 20, 0);
        assert_eq!(empty.pagination.total_pages, 0);
    }

    #[test]
    fn decode_json_falls_back_on_garbage() {
        assert_eq!(decode_json(Some("[1,2]"), json!([])), json!([1, 2]));
        assert_eq!(decode_json(Some("{oops"), json!({})), json!({}));
        assert_eq!(decode_json(None, json!([])), json!([]));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" 50%_off "), "%50\\%\\_off%");
    }
}
