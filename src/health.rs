//! Health diagnostics for the review-history store
//!
//! Checks, in order of severity:
//! - Backend liveness
//! - Fallback from the configured backend
//! - Migration state (unmigrated file document, partial failures, backups)

use crate::config::StorageConfig;
use crate::storage::factory::StorageSelection;
use crate::storage::migration::backup_path_for;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Individual health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, CheckStatus::Pass, message)
    }

    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, CheckStatus::Warn, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, CheckStatus::Fail, message)
    }

    fn with_status(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Overall health check summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: CheckStatus,
    pub checks: Vec<CheckResult>,
    pub summary: HealthStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStats {
    pub total_checks: usize,
    pub passed: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl HealthSummary {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let count = |status: CheckStatus| checks.iter().filter(|c| c.status == status).count();
        let passed = count(CheckStatus::Pass);
        let warnings = count(CheckStatus::Warn);
        let errors = count(CheckStatus::Fail);

        let status = if errors > 0 {
            CheckStatus::Fail
        } else if warnings > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        };

        Self {
            status,
            summary: HealthStats {
                total_checks: checks.len(),
                passed,
                warnings,
                errors,
            },
            checks,
        }
    }
}

/// Run all health checks against the selected backend
pub async fn run_health_checks(selection: &StorageSelection, config: &StorageConfig) -> HealthSummary {
    info!("Running review-history health checks...");

    let mut checks = vec![check_backend(selection, config).await];
    checks.extend(check_fallback(selection, config));
    checks.extend(check_migration_state(selection, config).await);

    HealthSummary::from_checks(checks)
}

async fn check_backend(selection: &StorageSelection, config: &StorageConfig) -> CheckResult {
    debug!("Checking backend liveness...");
    let started = Instant::now();
    let alive = tokio::time::timeout(config.operation_timeout(), selection.backend.health_check())
        .await
        .unwrap_or(false);
    let details = serde_json::json!({
        "backend": selection.kind.to_string(),
        "latency_ms": started.elapsed().as_millis() as u64,
    });

    if alive {
        CheckResult::pass("backend", format!("{} storage is reachable", selection.kind))
            .with_details(details)
    } else {
        CheckResult::fail("backend", format!("{} storage did not respond", selection.kind))
            .with_details(details)
    }
}

fn check_fallback(selection: &StorageSelection, config: &StorageConfig) -> Option<CheckResult> {
    let reason = selection.fallback_reason.as_ref()?;
    Some(
        CheckResult::warn(
            "fallback",
            format!(
                "Configured mode {:?} unavailable, using {} storage",
                config.mode, selection.kind
            ),
        )
        .with_details(serde_json::json!({ "reason": reason })),
    )
}

async fn check_migration_state(selection: &StorageSelection, config: &StorageConfig) -> Vec<CheckResult> {
    debug!("Checking migration state...");
    let mut results = Vec::new();
    let document = &config.file.path;

    if let Some(report) = &selection.migration {
        match report.partial_failure() {
            Some(partial) => results.push(
                CheckResult::warn("migration", partial.to_string())
                    .with_details(serde_json::to_value(report).unwrap_or_default()),
            ),
            None => results.push(CheckResult::pass(
                "migration",
                format!(
                    "Migrated {} review(s) from {}",
                    report.reviews_migrated,
                    report.source.display()
                ),
            )),
        }
    }

    if selection.kind.is_sql() && tokio::fs::try_exists(document).await.unwrap_or(false) {
        results.push(CheckResult::warn(
            "file_history",
            format!(
                "File history at {} has not been migrated; run `review-history migrate`",
                document.display()
            ),
        ));
    }

    let backup = backup_path_for(document);
    if tokio::fs::try_exists(&backup).await.unwrap_or(false) {
        results.push(CheckResult::warn(
            "backup",
            format!(
                "Migration backup {} can be removed once the SQL history is verified",
                backup.display()
            ),
        ));
    }

    results
}

/// Print health summary to the console
pub fn print_health_summary(summary: &HealthSummary, verbose: bool) {
    println!("Review History Health Check");
    println!("---------------------------");

    for check in &summary.checks {
        let status_text = match check.status {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
        };
        println!("[{}] {}", status_text, check.name);

        if verbose || check.status != CheckStatus::Pass {
            println!("   {}", check.message);
            if let (true, Some(details)) = (verbose, &check.details) {
                println!("   Details: {}", details);
            }
        }
    }

    println!();
    println!(
        "Overall: {} ({} passed, {} warnings, {} errors)",
        match summary.status {
            CheckStatus::Pass => "HEALTHY",
            CheckStatus::Warn => "WARNINGS",
            CheckStatus::Fail => "ERRORS",
        },
        summary.summary.passed,
        summary.summary.warnings,
        summary.summary.errors
    );
}
