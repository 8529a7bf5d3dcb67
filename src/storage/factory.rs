//! Storage backend selection
//!
//! [`create_storage`] never fails. The configured backend is tried first;
//! any error degrades to the File backend, and if the File backend cannot
//! initialize either, to a process-local in-memory store so the review run
//! still completes.

use crate::config::{StorageConfig, StorageMode};
use crate::error::{ReviewHistoryError, Result};
use crate::storage::file::FileStorage;
use crate::storage::libsql::{ConnectionMode, LibsqlStorage};
use crate::storage::memory::InMemoryStorage;
use crate::storage::migration::{migrate_file_history, MigrationReport};
use crate::storage::postgres::PostgresStorage;
use crate::storage::{BackendKind, StorageBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// The backend chosen for this process
pub struct StorageSelection {
    pub backend: Arc<dyn StorageBackend>,
    pub kind: BackendKind,
    /// Why the configured backend was not used
    pub fallback_reason: Option<String>,
    /// Set when a File document was found and migrated
    pub migration: Option<MigrationReport>,
}

impl StorageSelection {
    fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            kind: backend.kind(),
            backend,
            fallback_reason: None,
            migration: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

impl std::fmt::Debug for StorageSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSelection")
            .field("kind", &self.kind)
            .field("fallback_reason", &self.fallback_reason)
            .field("migration", &self.migration)
            .finish()
    }
}

/// Resolve the active backend from configuration
pub async fn create_storage(config: &StorageConfig) -> StorageSelection {
    let fallback_reason = match try_configured_backend(config).await {
        Ok(Some(selection)) => return selection,
        Ok(None) => None,
        Err(e) => {
            warn!(
                "Storage mode {:?} unavailable, falling back to file storage: {}",
                config.mode, e
            );
            Some(e.to_string())
        }
    };

    let file = FileStorage::new(&config.file);
    match file.initialize().await {
        Ok(()) => {
            info!("Using file storage at {}", file.path().display());
            let mut selection = StorageSelection::new(Arc::new(file));
            selection.fallback_reason = fallback_reason;
            selection
        }
        Err(e) => {
            warn!(
                "File storage unavailable, keeping history in memory for this run: {}",
                e
            );
            let reason = match fallback_reason {
                Some(earlier) => format!("{}; {}", earlier, e),
                None => e.to_string(),
            };
            let mut selection = StorageSelection::new(Arc::new(InMemoryStorage::with_review_cap(
                config.file.max_reviews_per_repository.max(1),
            )));
            selection.fallback_reason = Some(reason);
            selection
        }
    }
}

/// `Ok(None)` when the File backend was requested
async fn try_configured_backend(config: &StorageConfig) -> Result<Option<StorageSelection>> {
    let backend: Arc<dyn StorageBackend> = match config.mode {
        StorageMode::File => return Ok(None),
        StorageMode::LocalSql => Arc::new(open_local_sql(config).await?),
        StorageMode::SyncedSql => {
            if config.sql.has_remote() {
                let path = local_sql_path(config)?;
                ensure_writable_parent(Path::new(&path)).await?;
                let mode = ConnectionMode::EmbeddedReplica {
                    path,
                    url: required(&config.sql.url, "sql.url")?,
                    token: required(&config.sql.auth_token, "sql.auth_token")?,
                };
                Arc::new(LibsqlStorage::new(mode).await?.with_sync_timeout(config.sql.sync_timeout()))
            } else {
                info!("Synced SQL requested without remote credentials, using local database only");
                Arc::new(open_local_sql(config).await?)
            }
        }
        StorageMode::RemoteSql => {
            let mode = ConnectionMode::Remote {
                url: required(&config.sql.url, "sql.url")?,
                token: required(&config.sql.auth_token, "sql.auth_token")?,
            };
            Arc::new(LibsqlStorage::new(mode).await?)
        }
        StorageMode::Relational => {
            if !config.relational.is_configured() {
                return Err(ReviewHistoryError::StorageUnavailable(
                    "Relational mode requires a database URL".to_string(),
                ));
            }
            Arc::new(PostgresStorage::connect(&config.relational).await?)
        }
    };

    backend.initialize().await?;

    let mut selection = StorageSelection::new(backend);
    selection.migration = migrate_if_present(&config.file.path, selection.backend.as_ref()).await;
    info!("Using {} storage", selection.kind);
    Ok(Some(selection))
}

async fn open_local_sql(config: &StorageConfig) -> Result<LibsqlStorage> {
    let mode = ConnectionMode::from_connection_string(&config.sql.path, None)?;
    if let Some(path) = mode.local_path() {
        ensure_writable_parent(Path::new(path)).await?;
    }
    LibsqlStorage::new(mode).await
}

fn local_sql_path(config: &StorageConfig) -> Result<String> {
    match ConnectionMode::from_connection_string(&config.sql.path, None)? {
        ConnectionMode::Local(path) => Ok(path),
        _ => Err(ReviewHistoryError::InvalidOperation(format!(
            "Replica mode needs a local database file, got '{}'",
            config.sql.path
        ))),
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    crate::config::non_empty(value)
        .map(str::to_string)
        .ok_or_else(|| ReviewHistoryError::StorageUnavailable(format!("{} is not configured", name)))
}

/// Create the parent directory of `path` and prove it accepts writes
pub async fn ensure_writable_parent(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let unavailable = |action: &str, e: std::io::Error| {
        ReviewHistoryError::StorageUnavailable(format!(
            "Cannot {} {}: {}",
            action,
            dir.display(),
            e
        ))
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| unavailable("create", e))?;

    let probe = dir.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| unavailable("write to", e))?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}

/// Migration failures never block the selected backend
async fn migrate_if_present(
    file_path: &Path,
    target: &dyn StorageBackend,
) -> Option<MigrationReport> {
    match migrate_file_history(file_path, target).await {
        Ok(report) if report.found_document() => Some(report),
        Ok(_) => None,
        Err(e) => {
            warn!(
                "Could not migrate file history from {}: {}",
                file_path.display(),
                e
            );
            None
        }
    }
}
