//! End-to-end verification runs against the mock litestream.

use std::path::Path;
use std::time::Duration;

use replicheck_core::{
    BackupComparator, Divergence, Flags, Measure, SENTINEL_TABLE, Severity, ToolCommand,
    VerificationConfig, VerificationEngine, VerificationJob, VerificationOutcome,
    VerificationStrategy, VerifyError, backup_path_for, restore_to_timestamped_copy,
};
use replicheck_testing::{MockReplicationTool, RestoreBehavior, TestDatabase};

fn engine(
    behavior: RestoreBehavior,
    strategy: VerificationStrategy,
) -> VerificationEngine<MockReplicationTool> {
    let options = VerificationConfig {
        replication_wait: Duration::ZERO,
        strategy,
        command_timeout: None,
    };
    VerificationEngine::new(MockReplicationTool::new().with_restore(behavior), options)
}

fn all_behaviors() -> Vec<RestoreBehavior> {
    vec![
        RestoreBehavior::CopySource,
        RestoreBehavior::CopyWithoutSentinel,
        RestoreBehavior::EmptyFile,
        RestoreBehavior::NoArtifact,
        RestoreBehavior::Error("cannot restore".to_string()),
        RestoreBehavior::CopyWithLeftover,
    ]
}

#[test]
fn test_sentinel_removed_on_every_outcome() {
    for strategy in [VerificationStrategy::Sentinel, VerificationStrategy::Diff] {
        for behavior in all_behaviors() {
            let db = TestDatabase::with_tables(&["users"]);
            let _ = engine(behavior.clone(), strategy).verify(db.path(), &Flags::new());

            assert!(db.table_exists(SENTINEL_TABLE), "{behavior:?} {strategy:?}");
            assert_eq!(db.sentinel_rows(), 0, "{behavior:?} {strategy:?}");
        }
    }
}

#[test]
fn test_backup_files_removed_on_every_outcome() {
    for strategy in [VerificationStrategy::Sentinel, VerificationStrategy::Diff] {
        for behavior in all_behaviors() {
            let db = TestDatabase::with_tables(&["users"]);
            let _ = engine(behavior.clone(), strategy).verify(db.path(), &Flags::new());

            assert_eq!(
                db.dir_entries(),
                vec!["test.sqlite3".to_string()],
                "{behavior:?} {strategy:?}"
            );
        }
    }
}

#[test]
fn test_missing_database_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.sqlite3");
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Sentinel);

    let result = engine.verify(&missing, &Flags::new());

    assert!(matches!(result, Err(VerifyError::DatabaseRequired { .. })));
    assert!(!missing.exists());
    assert_eq!(engine.tool().call_count(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_sentinel_found_in_restored_copy() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Sentinel);

    let outcome = engine.verify(db.path(), &Flags::new()).unwrap();
    assert!(matches!(outcome, VerificationOutcome::Consistent { .. }));
}

#[test]
fn test_sentinel_missing_from_restored_copy() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(
        RestoreBehavior::CopyWithoutSentinel,
        VerificationStrategy::Sentinel,
    );

    let error = engine.verify(db.path(), &Flags::new()).unwrap_err();
    assert!(matches!(error, VerifyError::VerificationFailed { .. }));
    assert_eq!(error.severity(), Severity::Consistency);
    assert!(error.is_consistency_failure());
}

#[test]
fn test_empty_restore_is_a_consistency_failure() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(RestoreBehavior::EmptyFile, VerificationStrategy::Sentinel);

    let error = engine.verify(db.path(), &Flags::new()).unwrap_err();
    assert!(matches!(error, VerifyError::VerificationFailed { .. }));
}

#[test]
fn test_restore_without_artifact_is_backup_failure() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(RestoreBehavior::NoArtifact, VerificationStrategy::Sentinel);

    let error = engine.verify(db.path(), &Flags::new()).unwrap_err();
    assert!(matches!(error, VerifyError::BackupFailed { .. }));
    assert_eq!(error.severity(), Severity::Infrastructure);
}

#[test]
fn test_restore_error_record_propagates() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(
        RestoreBehavior::Error("cannot restore".to_string()),
        VerificationStrategy::Sentinel,
    );

    let error = engine.verify(db.path(), &Flags::new()).unwrap_err();
    assert!(matches!(error, VerifyError::CommandFailed { .. }));
    assert!(error.to_string().contains("cannot restore"), "{error}");
    assert!(error.to_string().starts_with("Failed to execute `"), "{error}");
    assert_eq!(error.severity(), Severity::Infrastructure);
}

#[test]
fn test_verify_twice_reuses_table() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Sentinel);

    engine.verify(db.path(), &Flags::new()).unwrap();
    engine.verify(db.path(), &Flags::new()).unwrap();
    assert_eq!(engine.tool().calls_of(ToolCommand::Restore), 2);
    assert_eq!(db.sentinel_rows(), 0);
}

#[test]
fn test_restore_command_line() {
    let db = TestDatabase::with_tables(&["users"]);
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Sentinel);
    let flags = Flags::new()
        .with("--replica", "s3")
        .with_switch("--if-replica-exists");

    engine.verify(db.path(), &flags).unwrap();

    let history = engine.tool().call_history();
    assert_eq!(history.len(), 1);
    let argv = history[0].argv();
    assert_eq!(argv.len(), 9, "{argv:?}");
    assert_eq!(&argv[..4], ["restore", "--config", "config/litestream.yml", "-o"]);
    assert_eq!(&argv[5..8], ["--replica", "s3", "--if-replica-exists"]);
    assert_eq!(argv[8], db.path().display().to_string());

    let output = Path::new(&argv[4]);
    assert_eq!(output.parent(), Some(db.dir()));
    let name = output.file_name().unwrap().to_str().unwrap();
    let stamp = name
        .strip_prefix("test-")
        .and_then(|rest| rest.strip_suffix(".sqlite3"))
        .unwrap();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()), "{name}");
}

#[test]
fn test_existing_timestamped_copies_survive_failed_restore() {
    let db = TestDatabase::with_tables(&["users"]);
    let now = chrono::Utc::now();
    let kept: Vec<_> = (0..3)
        .map(|offset| backup_path_for(db.path(), now + chrono::Duration::seconds(offset)))
        .collect();
    for path in &kept {
        std::fs::copy(db.path(), path).unwrap();
    }
    let engine = engine(RestoreBehavior::NoArtifact, VerificationStrategy::Sentinel);

    let error = engine.verify(db.path(), &Flags::new()).unwrap_err();

    assert!(matches!(error, VerifyError::BackupFailed { .. }), "{error:?}");
    assert_eq!(error.severity(), Severity::Infrastructure);
    for path in &kept {
        assert!(path.exists(), "{} was removed", path.display());
    }
}

#[test]
fn test_existing_timestamped_copy_is_not_restore_target() {
    let db = TestDatabase::with_tables(&["users"]);
    let kept = backup_path_for(db.path(), chrono::Utc::now());
    std::fs::write(&kept, b"operator copy").unwrap();
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Sentinel);

    let outcome = engine.verify(db.path(), &Flags::new()).unwrap();

    assert!(matches!(outcome, VerificationOutcome::Consistent { .. }));
    assert_eq!(std::fs::read(&kept).unwrap(), b"operator copy");
}

#[test]
fn test_caller_output_flag_cannot_redirect_restore() {
    let db = TestDatabase::with_tables(&["users"]);
    let custom = db.dir().join("custom.sqlite3");
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Sentinel);

    let outcome = engine
        .verify(db.path(), &Flags::new().with("-o", custom.display()))
        .unwrap();

    assert!(matches!(outcome, VerificationOutcome::Consistent { .. }));
    assert!(!custom.exists());
    assert_eq!(db.dir_entries(), vec!["test.sqlite3".to_string()]);

    let argv = engine.tool().call_history()[0].argv();
    assert_eq!(argv.iter().filter(|arg| *arg == "-o").count(), 1);
    assert_eq!(argv[3], "-o");
    assert_ne!(argv[4], custom.display().to_string());
}

#[test]
fn test_diff_of_twenty_kib_database_and_empty_copy() {
    let db = TestDatabase::twenty_kib();
    let restored = db.dir().join("restored.sqlite3");
    std::fs::write(&restored, b"").unwrap();

    let diff = BackupComparator::new().compare(db.path(), &restored).unwrap();

    assert_eq!(diff.tables, Measure { original: 2, restored: 0 });
    assert_eq!(diff.size, Measure { original: 20480, restored: 0 });
    assert_eq!(diff.divergence(), Some(Divergence::MissingTables(2)));
}

#[test]
fn test_diff_strategy_returns_record() {
    let db = TestDatabase::with_tables(&["users", "posts"]);
    let engine = engine(RestoreBehavior::CopySource, VerificationStrategy::Diff);

    match engine.verify(db.path(), &Flags::new()).unwrap() {
        VerificationOutcome::Diff(diff) => {
            assert!(diff.tables.matches());
            assert_eq!(diff.divergence(), None);
        }
        other => panic!("expected a diff, got {other:?}"),
    }
}

#[test]
fn test_diff_strategy_leaves_judgement_to_caller() {
    let db = TestDatabase::with_tables(&["users", "posts"]);
    let engine = engine(RestoreBehavior::EmptyFile, VerificationStrategy::Diff);

    match engine.verify(db.path(), &Flags::new()).unwrap() {
        VerificationOutcome::Diff(diff) => {
            assert_eq!(diff.tables.restored, 0);
            assert_eq!(diff.size.restored, 0);
            assert!(matches!(
                diff.divergence(),
                Some(Divergence::MissingTables(_))
            ));
        }
        other => panic!("expected a diff, got {other:?}"),
    }
}

#[test]
fn test_job_verifies_each_configured_database() {
    let healthy = TestDatabase::with_tables(&["users"]);
    let gone = healthy.dir().join("gone.sqlite3");

    let options = VerificationConfig {
        replication_wait: Duration::ZERO,
        ..VerificationConfig::default()
    };
    let tool = MockReplicationTool::new().with_databases(&[healthy.path(), gone.as_path()]);
    let engine = VerificationEngine::new(tool, options);

    let reports = VerificationJob::new(&engine).run().unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].database, healthy.path());
    assert!(reports[0].is_ok());
    assert_eq!(reports[1].database, gone);
    assert!(matches!(
        reports[1].result,
        Err(VerifyError::DatabaseRequired { .. })
    ));
    assert_eq!(engine.tool().calls_of(ToolCommand::Databases), 1);
    assert_eq!(engine.tool().calls_of(ToolCommand::Restore), 1);
}

#[test]
fn test_restore_to_timestamped_copy_keeps_file() {
    let db = TestDatabase::with_tables(&["users"]);
    let tool = MockReplicationTool::new();

    let backup = restore_to_timestamped_copy(&tool, db.path(), &Flags::new()).unwrap();

    assert!(backup.exists());
    assert_ne!(backup, db.path());
    assert_eq!(db.dir_entries().len(), 2);
}

#[test]
fn test_restore_to_timestamped_copy_without_artifact() {
    let db = TestDatabase::with_tables(&["users"]);
    let tool = MockReplicationTool::new().with_restore(RestoreBehavior::NoArtifact);

    let result = restore_to_timestamped_copy(&tool, db.path(), &Flags::new());
    assert!(matches!(result, Err(VerifyError::BackupFailed { .. })));
}
