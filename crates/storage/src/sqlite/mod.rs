use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection};

use super::KeyValueStore;
use super::error::{
    CreateSqliteDirectorySnafu, EmptyKeySnafu, InvariantViolationSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageResult,
};

pub const DEFAULT_STORAGE_DB_FILE_NAME: &str = "storage.db";

/// SQLite-backed key-value store.
///
/// Every call opens its own connection on a worker thread, so the store can be
/// used from sync UI code and from inside a tokio runtime alike.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    database_url: String,
}

impl SqliteKeyValueStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // Bootstrap pool only; later calls open their own connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let migrated = sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            });
        pool.close().await;
        migrated?;

        tracing::debug!(database_url = %database_url, "opened sqlite key-value store");
        Ok(Self { database_url })
    }

    /// Opens the store from sync code by driving `open` on a throwaway runtime.
    pub fn open_blocking(database_location: &str) -> StorageResult<Self> {
        let database_location = database_location.to_string();
        run_on_worker("sqlite-open-blocking", move || async move {
            Self::open(&database_location).await
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, Op, F>(&self, stage: &'static str, op: Op) -> StorageResult<T>
    where
        T: Send + 'static,
        Op: FnOnce() -> F + Send + 'static,
        F: Future<Output = StorageResult<T>>,
    {
        run_on_worker(stage, op)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        self.run_db_call("kv-get", move || async move {
            let mut connection = connect_store_connection(&database_url, "kv-get-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut connection)
                .await
                .context(SqliteQuerySnafu { stage: "kv-get" })
        })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "kv-set" });

        let database_url = self.database_url.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.run_db_call("kv-set", move || async move {
            let mut connection = connect_store_connection(&database_url, "kv-set-connect").await?;
            sqlx::query(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_timestamp_seconds())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu { stage: "kv-set" })?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        self.run_db_call("kv-remove", move || async move {
            let mut connection =
                connect_store_connection(&database_url, "kv-remove-connect").await?;
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(key)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu { stage: "kv-remove" })?;
            Ok(())
        })
    }
}

fn run_on_worker<T, Op, F>(stage: &'static str, op: Op) -> StorageResult<T>
where
    T: Send + 'static,
    Op: FnOnce() -> F + Send + 'static,
    F: Future<Output = StorageResult<T>>,
{
    // Store traits are sync, so each call executes on a dedicated worker thread
    // with its own current-thread runtime to avoid nested-runtime blocking panics.
    // The future is built on that thread and never has to cross it.
    let worker = std::thread::Builder::new()
        .name(format!("sqlite-store-{stage}"))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context(SqliteRuntimeInitSnafu {
                    stage: "sqlite-store-runtime-build",
                })?;
            runtime.block_on(op())
        })
        .context(SqliteThreadSpawnSnafu {
            stage: "sqlite-store-spawn-worker",
        })?;

    match worker.join() {
        Ok(result) => result,
        Err(_) => InvariantViolationSnafu {
            stage,
            details: "sqlite storage worker thread panicked".to_string(),
        }
        .fail(),
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    ensure!(
        database_location != ":memory:",
        InvariantViolationSnafu {
            stage: "sqlite-open-validate-location",
            details: "in-memory sqlite does not survive per-call connections".to_string(),
        }
    );

    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}
