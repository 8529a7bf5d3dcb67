//! Configuration for review-history storage and validation
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. `REVIEW_HISTORY_*` environment variables (`__` separates nested keys,
//!    e.g. `REVIEW_HISTORY_SQL__URL`)
//! 4. Well-known provider variables (`TURSO_DATABASE_URL`, `TURSO_AUTH_TOKEN`,
//!    `DATABASE_URL`, `DIRECT_URL`) for connection settings left unset

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix
const ENV_PREFIX: &str = "REVIEW_HISTORY";

/// Default location of the JSON history document, relative to the working directory
pub const DEFAULT_FILE_PATH: &str = ".review-history/reviews.json";

/// Default location of the local libSQL database file
pub const DEFAULT_SQL_PATH: &str = ".review-history/reviews.db";

/// Which backend the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Flat JSON document
    #[default]
    File,
    /// Local libSQL file, no remote sync
    LocalSql,
    /// Local libSQL file replicated to a remote service
    SyncedSql,
    /// Remote libSQL service, no local file
    RemoteSql,
    /// Pooled PostgreSQL
    Relational,
}

impl std::str::FromStr for StorageMode {
    type Err = crate::error::ReviewHistoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "file" | "json" => Ok(StorageMode::File),
            "local_sql" | "sqlite" | "local" => Ok(StorageMode::LocalSql),
            "synced_sql" | "turso" | "replica" => Ok(StorageMode::SyncedSql),
            "remote_sql" | "remote" => Ok(StorageMode::RemoteSql),
            "relational" | "postgres" | "postgresql" => Ok(StorageMode::Relational),
            other => Err(crate::error::ReviewHistoryError::InvalidOperation(format!(
                "Unknown storage mode: {}",
                other
            ))),
        }
    }
}

/// File backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
    pub max_reviews_per_repository: usize,
    pub max_transitions_per_repository: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_FILE_PATH),
            max_reviews_per_repository: 100,
            max_transitions_per_repository: 500,
        }
    }
}

/// libSQL backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Local database file; also accepts a `file:` connection string
    pub path: String,
    /// Remote service URL (`libsql://` or `https://`)
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub sync_timeout_secs: u64,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SQL_PATH.to_string(),
            url: None,
            auth_token: None,
            sync_timeout_secs: 5,
        }
    }
}

impl SqlConfig {
    /// Remote URL and token are both present and non-empty
    pub fn has_remote(&self) -> bool {
        non_empty(&self.url).is_some() && non_empty(&self.auth_token).is_some()
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs.max(1))
    }
}

/// PostgreSQL backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// Pooled connection string (e.g. a pgbouncer endpoint)
    pub pooled_url: Option<String>,
    /// Direct connection string used for schema operations
    pub direct_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            pooled_url: None,
            direct_url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

impl RelationalConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.pooled_url).is_some()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs.max(1))
    }
}

/// Historical validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// How many recent snapshots feed the analytics
    pub history_limit: usize,
    /// Add tie-breaking jitter to similarity scores
    pub jitter: bool,
    /// Seed for reproducible jitter; random when unset
    pub jitter_seed: Option<u64>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            jitter: true,
            jitter_seed: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub file: FileConfig,
    pub sql: SqlConfig,
    pub relational: RelationalConfig,
    pub validator: ValidatorConfig,
    /// Budget for every storage call made through `HistoryStore`
    pub operation_timeout_secs: Option<u64>,
}

impl StorageConfig {
    /// Load configuration from defaults, an optional file, and the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            debug!("Loading configuration file: {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: StorageConfig = builder.build()?.try_deserialize()?;
        loaded.apply_provider_env();
        Ok(loaded)
    }

    /// Fill unset connection settings from provider-specific variables
    pub fn apply_provider_env(&mut self) {
        if non_empty(&self.sql.url).is_none() {
            self.sql.url = env_non_empty("TURSO_DATABASE_URL");
        }
        if non_empty(&self.sql.auth_token).is_none() {
            self.sql.auth_token = env_non_empty("TURSO_AUTH_TOKEN");
        }
        if non_empty(&self.relational.pooled_url).is_none() {
            self.relational.pooled_url = env_non_empty("DATABASE_URL");
        }
        if non_empty(&self.relational.direct_url).is_none() {
            self.relational.direct_url = env_non_empty("DIRECT_URL");
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.unwrap_or(10).max(1))
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
