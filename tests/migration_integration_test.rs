//! File to SQL migration through the public API

mod common;

use common::{create_test_libsql_storage, snapshot, test_config};
use review_history_core::{
    create_storage, migrate_file_history, storage::migration::backup_path_for, ApprovalTransition,
    BackendKind, FileStorage, ReviewOutcome, StorageBackend, StorageMode, TransitionTrigger,
};
use tempfile::TempDir;

const REPOS: [(&str, i64); 3] = [("acme/api", 5), ("acme/web", 3), ("acme/cli", 2)];

async fn seed_file_history(file: &FileStorage) {
    file.initialize().await.unwrap();
    for (repo, count) in REPOS {
        for minutes in 0..count {
            let outcome = if minutes % 2 == 0 {
                ReviewOutcome::Merge
            } else {
                ReviewOutcome::MergeAfterChanges
            };
            file.save_review(repo, &snapshot(repo, minutes as u64 + 1, minutes, outcome))
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_three_repositories_ten_reviews() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reviews.json");
    seed_file_history(&FileStorage::at_path(&path)).await;

    let (target, _db_dir) = create_test_libsql_storage().await;
    let report = migrate_file_history(&path, &target).await.unwrap();
    assert_eq!(report.reviews_attempted, 10);
    assert_eq!(report.reviews_migrated, 10);
    assert_eq!(report.failed, 0);

    let mut total = 0;
    for (repo, count) in REPOS {
        let reviews = target.get_all_reviews(repo, None).await.unwrap();
        assert_eq!(reviews.len() as i64, count);
        total += reviews.len();
    }
    assert_eq!(total, 10);

    assert!(!path.exists());
    assert!(backup_path_for(&path).exists());
}

#[tokio::test]
async fn test_factory_migrates_once_on_first_sql_start() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, StorageMode::LocalSql);
    seed_file_history(&FileStorage::new(&config.file)).await;

    let first = create_storage(&config).await;
    assert_eq!(first.kind, BackendKind::LocalSql);
    let report = first.migration.as_ref().expect("file history should be migrated");
    assert_eq!(report.reviews_migrated, 10);
    drop(first);

    let second = create_storage(&config).await;
    assert!(second.migration.is_none());
    assert_eq!(
        second.backend.get_all_reviews("acme/api", None).await.unwrap().len(),
        5
    );
}

#[tokio::test]
async fn test_file_mode_leaves_document_alone() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, StorageMode::File);
    seed_file_history(&FileStorage::new(&config.file)).await;

    let selection = create_storage(&config).await;
    assert_eq!(selection.kind, BackendKind::File);
    assert!(selection.migration.is_none());
    assert!(config.file.path.exists());
    assert_eq!(selection.backend.get_stats("acme/web").await.unwrap().total_reviews, 3);
}

#[tokio::test]
async fn test_repeated_migration_keeps_one_copy_of_each_transition() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reviews.json");
    let file = FileStorage::at_path(&path);
    seed_file_history(&file).await;
    file.save_approval_transition(
        "acme/api",
        &ApprovalTransition {
            timestamp: common::base_time() + chrono::Duration::minutes(1),
            repository: "acme/api".to_string(),
            pr_number: 2,
            from_outcome: ReviewOutcome::Merge,
            to_outcome: ReviewOutcome::MergeAfterChanges,
            trigger: TransitionTrigger::Commit,
        },
    )
    .await
    .unwrap();

    let (target, _db_dir) = create_test_libsql_storage().await;
    migrate_file_history(&path, &target).await.unwrap();
    std::fs::rename(backup_path_for(&path), &path).unwrap();

    let again = migrate_file_history(&path, &target).await.unwrap();
    assert_eq!(again.reviews_already_present, 10);
    assert_eq!(again.transitions_already_present, 1);
    assert_eq!(again.failed, 0);
    assert_eq!(target.get_approval_transitions("acme/api", 2).await.unwrap().len(), 1);
}
