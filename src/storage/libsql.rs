//! LibSQL storage backend implementation
//!
//! Stores review snapshots in a local libSQL file, a remote Turso database,
//! or an embedded replica of one. In replica mode every committed write is
//! followed by a sync that pushes local changes upstream; sync failures are
//! logged and never fail the write.

use crate::error::{ReviewHistoryError, Result};
use crate::storage::schema::{parse_sql_statements, LIBSQL_MIGRATIONS, MIGRATIONS_TABLE};
use crate::storage::{BackendKind, StorageBackend};
use crate::types::{
    format_timestamp, parse_timestamp, ApprovalTransition, Effectiveness, IssueCounts,
    ReviewMetrics, ReviewSnapshot, StorageStats,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Builder, Connection, Database, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Columns selected for every snapshot read, in `row_to_snapshot` order
const SNAPSHOT_COLUMNS: &str = "repository, pr_number, timestamp, pr_title, pr_author, \
    files_changed, outcome, review_text, processing_time_ms, issues_high, issues_medium, \
    issues_low, rules_applied, patterns_detected, triggered_by_mention, comment_id, \
    implemented_suggestions, developer_sentiment";

const INSERT_SNAPSHOT: &str = r#"
    INSERT INTO review_snapshots (
        repository, pr_number, timestamp, pr_title, pr_author,
        files_changed, outcome, review_text, processing_time_ms,
        issues_high, issues_medium, issues_low, rules_applied, patterns_detected,
        triggered_by_mention, comment_id, implemented_suggestions, developer_sentiment
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const INSERT_TRANSITION: &str = r#"
    INSERT INTO approval_transitions (
        repository, pr_number, timestamp, from_outcome, to_outcome, trigger_kind
    ) VALUES (?, ?, ?, ?, ?, ?)
"#;

/// Database connection mode
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Local file-based database
    Local(String),
    /// In-memory database (for testing)
    InMemory,
    /// Remote database (Turso Cloud)
    Remote { url: String, token: String },
    /// Embedded replica with sync
    EmbeddedReplica {
        path: String,
        url: String,
        token: String,
    },
}

impl ConnectionMode {
    /// Parse a connection string
    ///
    /// - ":memory:" → InMemory
    /// - "file:<path>" or a bare path → Local
    /// - "libsql://", "https://", "http://" → Remote (requires a token)
    pub fn from_connection_string(connection: &str, token: Option<&str>) -> Result<Self> {
        let connection = connection.trim();
        if connection == ":memory:" {
            return Ok(ConnectionMode::InMemory);
        }
        if let Some(path) = connection.strip_prefix("file:") {
            return Ok(ConnectionMode::Local(path.trim_start_matches("//").to_string()));
        }
        if ["libsql://", "https://", "http://"]
            .iter()
            .any(|scheme| connection.starts_with(scheme))
        {
            let token = token.filter(|t| !t.is_empty()).ok_or_else(|| {
                ReviewHistoryError::StorageUnavailable(format!(
                    "Remote database {} requires an auth token",
                    connection
                ))
            })?;
            return Ok(ConnectionMode::Remote {
                url: connection.to_string(),
                token: token.to_string(),
            });
        }
        Ok(ConnectionMode::Local(connection.to_string()))
    }

    /// Local file backing this mode, if any
    pub fn local_path(&self) -> Option<&str> {
        match self {
            ConnectionMode::Local(path) | ConnectionMode::EmbeddedReplica { path, .. } => {
                Some(path)
            }
            ConnectionMode::InMemory | ConnectionMode::Remote { .. } => None,
        }
    }

    fn backend_kind(&self) -> BackendKind {
        match self {
            ConnectionMode::Local(_) | ConnectionMode::InMemory => BackendKind::LocalSql,
            ConnectionMode::Remote { .. } => BackendKind::RemoteSql,
            ConnectionMode::EmbeddedReplica { .. } => BackendKind::SyncedSql,
        }
    }
}

/// LibSQL storage backend
pub struct LibsqlStorage {
    db: Database,
    conn: Connection,
    mode: ConnectionMode,
    write_lock: Mutex<()>,
    sync_timeout: Duration,
}

impl LibsqlStorage {
    /// Validate an existing local database file before opening it
    ///
    /// A missing file is fine (it will be created); a file without the
    /// SQLite header is reported as unusable.
    fn validate_database_file(db_path: &str) -> Result<()> {
        use std::io::Read;

        let path = std::path::Path::new(db_path);
        if !path.exists() {
            return Ok(());
        }

        let mut header = [0u8; 16];
        let read = std::fs::File::open(path).and_then(|mut file| file.read(&mut header));
        match read {
            // Empty file: SQLite initializes it on first write
            Ok(0) => Ok(()),
            Ok(n) if n == header.len() && &header == b"SQLite format 3\0" => {
                debug!("Database file validation passed: {}", db_path);
                Ok(())
            }
            Ok(_) => Err(ReviewHistoryError::StorageUnavailable(format!(
                "Database file at '{}' is corrupted or not a valid SQLite database",
                db_path
            ))),
            Err(e) => Err(ReviewHistoryError::StorageUnavailable(format!(
                "Cannot read database file at '{}': {}",
                db_path, e
            ))),
        }
    }

    /// Open a database handle for `mode`
    ///
    /// Schema creation happens in [`StorageBackend::initialize`].
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        info!("Connecting to LibSQL database: {}", describe(&mode));

        if let Some(path) = mode.local_path() {
            Self::validate_database_file(path)?;
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ReviewHistoryError::StorageUnavailable(format!(
                            "Failed to create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let built = match &mode {
            ConnectionMode::Local(path) => Builder::new_local(path).build().await,
            ConnectionMode::InMemory => Builder::new_local(":memory:").build().await,
            ConnectionMode::Remote { url, token } => {
                Builder::new_remote(url.clone(), token.clone()).build().await
            }
            ConnectionMode::EmbeddedReplica { path, url, token } => {
                Builder::new_remote_replica(path, url.clone(), token.clone())
                    .build()
                    .await
            }
        };
        let db = built.map_err(|e| {
            ReviewHistoryError::StorageUnavailable(format!("Failed to open database: {}", e))
        })?;

        // One shared connection: in-memory databases are per-connection
        let conn = db.connect().map_err(|e| {
            ReviewHistoryError::StorageUnavailable(format!("Failed to get connection: {}", e))
        })?;

        info!("LibSQL database connection established");

        Ok(Self {
            db,
            conn,
            mode,
            write_lock: Mutex::new(()),
            sync_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn mode(&self) -> &ConnectionMode {
        &self.mode
    }

    /// Run embedded schema migrations that have not been applied yet
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Running database migrations...");

        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        migration_name TEXT PRIMARY KEY,
                        applied_at INTEGER NOT NULL
                    )",
                    MIGRATIONS_TABLE
                ),
                (),
            )
            .await
            .map_err(|e| {
                ReviewHistoryError::Migration(format!("Failed to create migrations table: {}", e))
            })?;

        for (name, sql) in LIBSQL_MIGRATIONS {
            let mut rows = self
                .conn
                .query(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE migration_name = ?",
                        MIGRATIONS_TABLE
                    ),
                    params![*name],
                )
                .await?;
            let already_applied = match rows.next().await? {
                Some(row) => row.get::<i64>(0)?,
                None => 0,
            };
            if already_applied > 0 {
                debug!("Skipping already applied migration: {}", name);
                continue;
            }

            let mut statements: Vec<(String, Vec<Value>)> = parse_sql_statements(sql)
                .into_iter()
                .map(|statement| (statement, Vec::new()))
                .collect();
            statements.push((
                format!(
                    "INSERT INTO {} (migration_name, applied_at) VALUES (?, ?)",
                    MIGRATIONS_TABLE
                ),
                vec![
                    Value::Text(name.to_string()),
                    Value::Integer(Utc::now().timestamp()),
                ],
            ));

            self.run_in_transaction(statements).await.map_err(|e| {
                ReviewHistoryError::Migration(format!("Failed to apply {}: {}", name, e))
            })?;
            info!("Executed migration: {}", name);
        }

        debug!("Database migrations completed");
        Ok(())
    }

    /// Execute statements inside BEGIN/COMMIT, rolling back on any failure
    ///
    /// In replica mode a single sync follows the commit.
    pub async fn run_in_transaction(&self, statements: Vec<(String, Vec<Value>)>) -> Result<()> {
        let guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;

        for (sql, values) in statements {
            if let Err(e) = tx.execute(&sql, values).await {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed after write error: {}", rollback_err);
                }
                return Err(e.into());
            }
        }

        tx.commit().await.map_err(|e| {
            let message = e.to_string();
            if message.contains("locked") || message.contains("busy") {
                ReviewHistoryError::Database(
                    "Transaction failed: database is locked. Another process may be writing."
                        .to_string(),
                )
            } else {
                ReviewHistoryError::Database(format!("Transaction commit failed: {}", message))
            }
        })?;
        drop(guard);

        self.sync_after_write().await;
        Ok(())
    }

    /// Push local changes upstream when running as an embedded replica
    async fn sync_after_write(&self) {
        if !matches!(self.mode, ConnectionMode::EmbeddedReplica { .. }) {
            return;
        }
        match tokio::time::timeout(self.sync_timeout, self.db.sync()).await {
            Ok(Ok(_)) => debug!("Replica synced"),
            Ok(Err(e)) => warn!("Replica sync failed: {}", e),
            Err(_) => warn!("Replica sync timed out after {:?}", self.sync_timeout),
        }
    }

    async fn query_snapshots(&self, sql: &str, values: Vec<Value>) -> Result<Vec<ReviewSnapshot>> {
        let mut rows = self.conn.query(sql, values).await?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next().await? {
            snapshots.push(row_to_snapshot(&row)?);
        }
        Ok(snapshots)
    }
}

fn describe(mode: &ConnectionMode) -> String {
    // Never log tokens
    match mode {
        ConnectionMode::Local(path) => format!("local file {}", path),
        ConnectionMode::InMemory => "in-memory".to_string(),
        ConnectionMode::Remote { url, .. } => format!("remote {}", url),
        ConnectionMode::EmbeddedReplica { path, url, .. } => {
            format!("replica {} of {}", path, url)
        }
    }
}

fn snapshot_values(repository: &str, snapshot: &ReviewSnapshot) -> Vec<Value> {
    let effectiveness = snapshot.effectiveness.unwrap_or_default();
    vec![
        Value::Text(repository.to_string()),
        Value::Integer(snapshot.pr_number as i64),
        Value::Text(format_timestamp(&snapshot.timestamp)),
        Value::Text(snapshot.pr_title.clone()),
        Value::Text(snapshot.pr_author.clone()),
        Value::Integer(i64::from(snapshot.files_changed)),
        Value::Text(snapshot.outcome.as_str().to_string()),
        Value::Text(snapshot.review_text.clone()),
        Value::Integer(snapshot.metrics.processing_time_ms as i64),
        Value::Integer(i64::from(snapshot.metrics.issues.high)),
        Value::Integer(i64::from(snapshot.metrics.issues.medium)),
        Value::Integer(i64::from(snapshot.metrics.issues.low)),
        Value::Integer(i64::from(snapshot.metrics.rules_applied)),
        Value::Integer(i64::from(snapshot.metrics.patterns_detected)),
        Value::Integer(i64::from(snapshot.triggered_by_mention)),
        optional_integer(snapshot.comment_id.map(|id| id as i64)),
        optional_integer(effectiveness.implemented_suggestions.map(i64::from)),
        optional_text(effectiveness.developer_sentiment.map(|s| s.as_str().to_string())),
    ]
}

fn transition_values(repository: &str, transition: &ApprovalTransition) -> Vec<Value> {
    vec![
        Value::Text(repository.to_string()),
        Value::Integer(transition.pr_number as i64),
        Value::Text(format_timestamp(&transition.timestamp)),
        Value::Text(transition.from_outcome.as_str().to_string()),
        Value::Text(transition.to_outcome.as_str().to_string()),
        Value::Text(transition.trigger.as_str().to_string()),
    ]
}

fn optional_integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

/// Convert a libsql row (selected with [`SNAPSHOT_COLUMNS`]) to a snapshot
fn row_to_snapshot(row: &libsql::Row) -> Result<ReviewSnapshot> {
    let timestamp: String = row.get(2)?;
    let outcome: String = row.get(6)?;
    let implemented: Option<i64> = row.get(16)?;
    let sentiment: Option<String> = row.get(17)?;

    let effectiveness = Effectiveness {
        implemented_suggestions: implemented.map(|n| n as u32),
        developer_sentiment: sentiment.map(|s| s.parse()).transpose()?,
    };

    Ok(ReviewSnapshot {
        repository: row.get(0)?,
        pr_number: row.get::<i64>(1)? as u64,
        timestamp: parse_timestamp(&timestamp)?,
        pr_title: row.get(3)?,
        pr_author: row.get(4)?,
        files_changed: row.get::<i64>(5)? as u32,
        outcome: outcome.parse()?,
        review_text: row.get(7)?,
        metrics: ReviewMetrics {
            processing_time_ms: row.get::<i64>(8)? as u64,
            issues: IssueCounts {
                high: row.get::<i64>(9)? as u32,
                medium: row.get::<i64>(10)? as u32,
                low: row.get::<i64>(11)? as u32,
            },
            rules_applied: row.get::<i64>(12)? as u32,
            patterns_detected: row.get::<i64>(13)? as u32,
        },
        triggered_by_mention: row.get::<i64>(14)? != 0,
        comment_id: row.get::<Option<i64>>(15)?.map(|id| id as u64),
        effectiveness: (!effectiveness.is_empty()).then_some(effectiveness),
    })
}

#[async_trait]
impl StorageBackend for LibsqlStorage {
    fn kind(&self) -> BackendKind {
        self.mode.backend_kind()
    }

    async fn initialize(&self) -> Result<()> {
        self.conn.query("SELECT 1", ()).await.map_err(|e| {
            ReviewHistoryError::StorageUnavailable(format!("Database is not reachable: {}", e))
        })?;

        // Pull remote state before touching the schema
        self.sync_after_write().await;

        self.run_migrations().await.map_err(|e| match e {
            ReviewHistoryError::Migration(message) if message.contains("readonly") => {
                ReviewHistoryError::StorageUnavailable(format!(
                    "Database is read-only or lacks write permissions: {}",
                    message
                ))
            }
            other => other,
        })?;

        info!("LibSQL storage ready ({})", self.kind());
        Ok(())
    }

    async fn save_review(&self, repository: &str, snapshot: &ReviewSnapshot) -> Result<()> {
        self.save_review_with_transition(repository, snapshot, None).await
    }

    async fn save_review_with_transition(
        &self,
        repository: &str,
        snapshot: &ReviewSnapshot,
        transition: Option<&ApprovalTransition>,
    ) -> Result<()> {
        debug!("Storing review: {}", snapshot.key_string());

        let mut statements = vec![(
            INSERT_SNAPSHOT.to_string(),
            snapshot_values(repository, snapshot),
        )];
        if let Some(transition) = transition {
            statements.push((
                INSERT_TRANSITION.to_string(),
                transition_values(repository, transition),
            ));
        }

        self.run_in_transaction(statements).await.map_err(|e| match e {
            ReviewHistoryError::AlreadyExists(_) => {
                ReviewHistoryError::AlreadyExists(snapshot.key_string())
            }
            other => other,
        })
    }

    async fn get_review_history(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ReviewSnapshot>> {
        let sql = format!(
            "SELECT {} FROM review_snapshots WHERE repository = ? AND pr_number = ? ORDER BY timestamp ASC, id ASC",
            SNAPSHOT_COLUMNS
        );
        self.query_snapshots(
            &sql,
            vec![
                Value::Text(repository.to_string()),
                Value::Integer(pr_number as i64),
            ],
        )
        .await
    }

    async fn save_approval_transition(
        &self,
        repository: &str,
        transition: &ApprovalTransition,
    ) -> Result<()> {
        self.run_in_transaction(vec![(
            INSERT_TRANSITION.to_string(),
            transition_values(repository, transition),
        )])
        .await
    }

    async fn get_approval_transitions(
        &self,
        repository: &str,
        pr_number: u64,
    ) -> Result<Vec<ApprovalTransition>> {
        let mut rows = self
            .conn
            .query(
                "SELECT pr_number, timestamp, from_outcome, to_outcome, trigger_kind
                 FROM approval_transitions
                 WHERE repository = ? AND pr_number = ?
                 ORDER BY timestamp ASC, id ASC",
                params![repository, pr_number as i64],
            )
            .await?;

        let mut transitions = Vec::new();
        while let Some(row) = rows.next().await? {
            let timestamp: String = row.get(1)?;
            let from_outcome: String = row.get(2)?;
            let to_outcome: String = row.get(3)?;
            let trigger: String = row.get(4)?;
            transitions.push(ApprovalTransition {
                timestamp: parse_timestamp(&timestamp)?,
                repository: repository.to_string(),
                pr_number: row.get::<i64>(0)? as u64,
                from_outcome: from_outcome.parse()?,
                to_outcome: to_outcome.parse()?,
                trigger: trigger.parse()?,
            });
        }
        Ok(transitions)
    }

    async fn get_stats(&self, repository: &str) -> Result<StorageStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp),
                        SUM(CASE WHEN outcome = 'MERGE' THEN 1 ELSE 0 END),
                        AVG(processing_time_ms)
                 FROM review_snapshots WHERE repository = ?",
                params![repository],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(StorageStats::empty(repository));
        };

        let total: i64 = row.get(0)?;
        if total == 0 {
            return Ok(StorageStats::empty(repository));
        }
        let oldest: Option<String> = row.get(1)?;
        let newest: Option<String> = row.get(2)?;
        let approved: Option<i64> = row.get(3)?;
        let average: Option<f64> = row.get(4)?;

        Ok(StorageStats {
            repository: repository.to_string(),
            total_reviews: total as u64,
            oldest_review: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest_review: newest.as_deref().map(parse_timestamp).transpose()?,
            approval_rate: approved.unwrap_or(0) as f64 / total as f64,
            average_processing_ms: average,
        })
    }

    async fn get_all_reviews(
        &self,
        repository: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ReviewSnapshot>> {
        // LIMIT -1 means "no limit" in SQLite
        let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT {} FROM review_snapshots WHERE repository = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
            SNAPSHOT_COLUMNS
        );
        self.query_snapshots(
            &sql,
            vec![Value::Text(repository.to_string()), Value::Integer(limit)],
        )
        .await
    }

    async fn annotate_review(
        &self,
        repository: &str,
        pr_number: u64,
        timestamp: DateTime<Utc>,
        effectiveness: &Effectiveness,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE review_snapshots
                 SET implemented_suggestions = COALESCE(?, implemented_suggestions),
                     developer_sentiment = COALESCE(?, developer_sentiment)
                 WHERE repository = ? AND pr_number = ? AND timestamp = ?",
                vec![
                    optional_integer(effectiveness.implemented_suggestions.map(i64::from)),
                    optional_text(
                        effectiveness
                            .developer_sentiment
                            .map(|s| s.as_str().to_string()),
                    ),
                    Value::Text(repository.to_string()),
                    Value::Integer(pr_number as i64),
                    Value::Text(format_timestamp(&timestamp)),
                ],
            )
            .await?;
        drop(_guard);

        if updated == 0 {
            return Err(ReviewHistoryError::RecordNotFound(format!(
                "{}#{} at {}",
                repository,
                pr_number,
                format_timestamp(&timestamp)
            )));
        }
        self.sync_after_write().await;
        Ok(())
    }

    async fn cleanup(&self, repository: &str, keep_last: usize) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .conn
            .execute(
                "DELETE FROM review_snapshots
                 WHERE repository = ?1 AND id NOT IN (
                     SELECT id FROM review_snapshots
                     WHERE repository = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2
                 )",
                params![repository, keep_last as i64],
            )
            .await?;
        drop(_guard);

        self.sync_after_write().await;
        info!("Cleanup removed {} review(s) from {}", removed, repository);
        Ok(removed as usize)
    }

    async fn health_check(&self) -> bool {
        match self.conn.query("SELECT 1", ()).await {
            Ok(_) => true,
            Err(e) => {
                warn!("LibSQL health check failed: {}", e);
                false
            }
        }
    }
}
