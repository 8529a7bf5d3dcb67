//! Embedded SQL schema for the SQL-capable backends
//!
//! Migrations are applied in order and recorded in `_migrations_applied`,
//! so running them on every start is a no-op once the schema exists.

/// Table recording which migrations have run
pub const MIGRATIONS_TABLE: &str = "_migrations_applied";

/// libSQL migrations: denormalized snapshot rows, three severity columns,
/// timestamps stored as fixed-width RFC 3339 text
pub const LIBSQL_MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema",
        r#"
CREATE TABLE IF NOT EXISTS review_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    pr_number INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    pr_title TEXT NOT NULL,
    pr_author TEXT NOT NULL,
    files_changed INTEGER NOT NULL DEFAULT 0,
    outcome TEXT NOT NULL CHECK(outcome IN (
        'MERGE',
        'DONT_MERGE',
        'MERGE_AFTER_CHANGES',
        'UNKNOWN'
    )),
    review_text TEXT NOT NULL DEFAULT '',
    processing_time_ms INTEGER NOT NULL DEFAULT 0,
    issues_high INTEGER NOT NULL DEFAULT 0,
    issues_medium INTEGER NOT NULL DEFAULT 0,
    issues_low INTEGER NOT NULL DEFAULT 0,
    rules_applied INTEGER NOT NULL DEFAULT 0,
    patterns_detected INTEGER NOT NULL DEFAULT 0,
    triggered_by_mention INTEGER NOT NULL DEFAULT 0,
    comment_id INTEGER,
    UNIQUE (repository, pr_number, timestamp)
);

CREATE TABLE IF NOT EXISTS approval_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    pr_number INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    from_outcome TEXT NOT NULL,
    to_outcome TEXT NOT NULL,
    trigger_kind TEXT NOT NULL CHECK(trigger_kind IN ('REVIEW', 'MENTION', 'COMMIT'))
);
"#,
    ),
    (
        "002_add_indexes",
        r#"
CREATE INDEX IF NOT EXISTS idx_review_snapshots_repo_pr ON review_snapshots(repository, pr_number);
CREATE INDEX IF NOT EXISTS idx_review_snapshots_timestamp ON review_snapshots(timestamp);
CREATE INDEX IF NOT EXISTS idx_approval_transitions_repo_pr ON approval_transitions(repository, pr_number);
CREATE INDEX IF NOT EXISTS idx_approval_transitions_timestamp ON approval_transitions(timestamp);
"#,
    ),
    (
        "003_effectiveness",
        r#"
ALTER TABLE review_snapshots ADD COLUMN implemented_suggestions INTEGER;
ALTER TABLE review_snapshots ADD COLUMN developer_sentiment TEXT;
"#,
    ),
    (
        "004_unique_transitions",
        r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_approval_transitions_identity ON approval_transitions(repository, pr_number, timestamp);
"#,
    ),
];

/// PostgreSQL migrations: same shape, fully typed columns
pub const POSTGRES_MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema",
        r#"
CREATE TABLE IF NOT EXISTS review_snapshots (
    id BIGSERIAL PRIMARY KEY,
    repository TEXT NOT NULL,
    pr_number BIGINT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    pr_title TEXT NOT NULL,
    pr_author TEXT NOT NULL,
    files_changed INTEGER NOT NULL DEFAULT 0,
    outcome TEXT NOT NULL CHECK (outcome IN ('MERGE', 'DONT_MERGE', 'MERGE_AFTER_CHANGES', 'UNKNOWN')),
    review_text TEXT NOT NULL DEFAULT '',
    processing_time_ms BIGINT NOT NULL DEFAULT 0,
    issues_high INTEGER NOT NULL DEFAULT 0,
    issues_medium INTEGER NOT NULL DEFAULT 0,
    issues_low INTEGER NOT NULL DEFAULT 0,
    rules_applied INTEGER NOT NULL DEFAULT 0,
    patterns_detected INTEGER NOT NULL DEFAULT 0,
    triggered_by_mention BOOLEAN NOT NULL DEFAULT FALSE,
    comment_id BIGINT,
    CONSTRAINT review_snapshots_identity UNIQUE (repository, pr_number, timestamp)
);

CREATE TABLE IF NOT EXISTS approval_transitions (
    id BIGSERIAL PRIMARY KEY,
    repository TEXT NOT NULL,
    pr_number BIGINT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    from_outcome TEXT NOT NULL,
    to_outcome TEXT NOT NULL,
    trigger_kind TEXT NOT NULL CHECK (trigger_kind IN ('REVIEW', 'MENTION', 'COMMIT'))
);
"#,
    ),
    (
        "002_add_indexes",
        r#"
CREATE INDEX IF NOT EXISTS idx_review_snapshots_repo_pr ON review_snapshots(repository, pr_number);
CREATE INDEX IF NOT EXISTS idx_review_snapshots_timestamp ON review_snapshots(timestamp);
CREATE INDEX IF NOT EXISTS idx_approval_transitions_repo_pr ON approval_transitions(repository, pr_number);
CREATE INDEX IF NOT EXISTS idx_approval_transitions_timestamp ON approval_transitions(timestamp);
"#,
    ),
    (
        "003_effectiveness",
        r#"
ALTER TABLE review_snapshots ADD COLUMN IF NOT EXISTS implemented_suggestions INTEGER;
ALTER TABLE review_snapshots ADD COLUMN IF NOT EXISTS developer_sentiment TEXT;
"#,
    ),
    (
        "004_unique_transitions",
        r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_approval_transitions_identity ON approval_transitions(repository, pr_number, timestamp);
"#,
    ),
];

/// Split a migration into individual statements
///
/// Skips comment-only and blank lines between statements; a statement ends
/// at a line terminating in `;`.
pub fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();

        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        if trimmed.ends_with(';') {
            statements.push(current.trim().to_string());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiline_statements() {
        let statements = parse_sql_statements(LIBSQL_MIGRATIONS[0].1);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS review_snapshots"));
        assert!(statements[1].ends_with(");"));
    }

    #[test]
    fn test_parse_skips_comments_and_keeps_trailing() {
        let sql = "-- header\n\nSELECT 1;\n-- between\nSELECT 2";
        assert_eq!(parse_sql_statements(sql), vec!["SELECT 1;", "SELECT 2"]);
    }

    #[test]
    fn test_both_dialects_have_same_migration_names() {
        let libsql: Vec<_> = LIBSQL_MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let postgres: Vec<_> = POSTGRES_MIGRATIONS.iter().map(|(name, _)| *name).collect();
        assert_eq!(libsql, postgres);
    }

    #[test]
    fn test_transitions_unique_per_pr_and_timestamp() {
        for migrations in [LIBSQL_MIGRATIONS, POSTGRES_MIGRATIONS] {
            assert!(migrations.iter().any(|(_, sql)| sql.contains(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_approval_transitions_identity ON approval_transitions(repository, pr_number, timestamp)"
            )));
        }
    }

    #[test]
    fn test_indexes_cover_repo_pr_and_timestamp() {
        for (_, sql) in LIBSQL_MIGRATIONS.iter().chain(POSTGRES_MIGRATIONS) {
            if sql.contains("CREATE INDEX") {
                assert!(sql.contains("(repository, pr_number)"));
                assert!(sql.contains("(timestamp)"));
            }
        }
    }
}
