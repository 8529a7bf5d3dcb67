//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use review_history_core::{
    config::{FileConfig, SqlConfig},
    ConnectionMode, FileStorage, InMemoryStorage, LibsqlStorage, PostgresStorage, ReviewOutcome,
    ReviewSnapshot, StorageBackend, StorageConfig, StorageMode,
};
use std::sync::Arc;
use tempfile::TempDir;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

/// Snapshot stamped `minutes` after [`base_time`]
pub fn snapshot(repo: &str, pr: u64, minutes: i64, outcome: ReviewOutcome) -> ReviewSnapshot {
    ReviewSnapshot::new(repo, pr, format!("Improve request parsing {}", pr), "alice", outcome)
        .with_timestamp(base_time() + Duration::minutes(minutes))
        .with_review_text("Parsing looks correct; consider more tests.")
}

/// Unique repository name so runs against shared databases never collide
pub fn unique_repo(prefix: &str) -> String {
    format!("{}/{}", prefix, uuid::Uuid::new_v4())
}

/// Local libSQL storage on a temporary file
///
/// libSQL's `:memory:` databases are per connection, so tests use a file.
pub async fn create_test_libsql_storage() -> (LibsqlStorage, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("reviews.db");
    let storage = LibsqlStorage::new(ConnectionMode::Local(path.to_string_lossy().into_owned()))
        .await
        .expect("Failed to create test storage");
    storage
        .initialize()
        .await
        .expect("Failed to initialize test storage");
    (storage, dir)
}

/// PostgreSQL storage when REVIEW_HISTORY_TEST_DATABASE_URL is set
pub async fn create_test_postgres_storage() -> Option<PostgresStorage> {
    let url = std::env::var("REVIEW_HISTORY_TEST_DATABASE_URL").ok()?;
    let mut config = StorageConfig::default();
    config.relational.pooled_url = Some(url);
    let storage = PostgresStorage::connect(&config.relational)
        .await
        .expect("REVIEW_HISTORY_TEST_DATABASE_URL is set but unreachable");
    storage
        .initialize()
        .await
        .expect("Failed to migrate test database");
    Some(storage)
}

/// Every backend available in this environment, with the temp dirs
/// keeping their files alive
pub async fn all_backends() -> (Vec<Arc<dyn StorageBackend>>, Vec<TempDir>) {
    let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();
    let mut dirs = Vec::new();

    let file_dir = TempDir::new().expect("Failed to create temp dir");
    let file = FileStorage::at_path(file_dir.path().join("reviews.json"));
    file.initialize().await.expect("Failed to initialize file storage");
    backends.push(Arc::new(file));
    dirs.push(file_dir);

    let (libsql, libsql_dir) = create_test_libsql_storage().await;
    backends.push(Arc::new(libsql));
    dirs.push(libsql_dir);

    backends.push(Arc::new(InMemoryStorage::new()));

    if let Some(postgres) = create_test_postgres_storage().await {
        backends.push(Arc::new(postgres));
    }

    (backends, dirs)
}

/// Configuration rooted in `dir`
pub fn test_config(dir: &TempDir, mode: StorageMode) -> StorageConfig {
    StorageConfig {
        mode,
        file: FileConfig {
            path: dir.path().join(".review-history/reviews.json"),
            ..FileConfig::default()
        },
        sql: SqlConfig {
            path: dir
                .path()
                .join(".review-history/reviews.db")
                .to_string_lossy()
                .into_owned(),
            ..SqlConfig::default()
        },
        ..StorageConfig::default()
    }
}
