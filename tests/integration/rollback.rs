use reforge::core::UpdaterError;
use reforge::relaunch::RollbackOutcome;

use crate::common::Installation;

fn snapshot(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| e.path().display().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn escaping_path_is_rejected_without_touching_files() {
    let install = Installation::new();
    std::fs::create_dir_all(install.backup_dir()).unwrap();
    let service = install.service();
    let before = snapshot(&install.install_dir);

    let escape = install.backup_dir().join("..").join("service");
    let err = service.start_rollback(&escape).unwrap().wait().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpdaterError>(),
        Some(UpdaterError::PathOutsideBackupDir { .. })
    ));
    assert_eq!(snapshot(&install.install_dir), before);
    assert_eq!(install.exit.code(), None);
}

#[tokio::test]
async fn backup_dir_itself_is_rejected() {
    let install = Installation::new();
    std::fs::create_dir_all(install.backup_dir()).unwrap();

    let err = install.service().start_rollback(install.backup_dir()).unwrap().wait().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpdaterError>(),
        Some(UpdaterError::PathOutsideBackupDir { .. })
    ));
}

#[tokio::test]
async fn identical_backup_is_skipped() {
    let install = Installation::new();
    std::fs::create_dir_all(install.backup_dir()).unwrap();
    let copy = install.backup_dir().join("same");
    std::fs::copy(&install.running, &copy).unwrap();

    let outcome = install.service().start_rollback(&copy).unwrap().wait().await.unwrap();

    assert_eq!(outcome, RollbackOutcome::AlreadyCurrent);
    assert_eq!(install.exit.code(), None);
    assert!(copy.exists());
}

#[tokio::test]
async fn different_backup_schedules_swap_and_exits() {
    let install = Installation::new();
    std::fs::create_dir_all(install.backup_dir()).unwrap();
    let older = install.backup_dir().join("older");
    std::fs::write(&older, "older build").unwrap();

    let service = install.service();
    let outcome = service.start_rollback(&older).unwrap().wait().await.unwrap();

    match outcome {
        RollbackOutcome::Scheduled {
            script,
        } => {
            let body = std::fs::read_to_string(script).unwrap();
            assert!(body.contains("pre_rollback_"));
        }
        other => panic!("expected a scheduled rollback, got {other:?}"),
    }
    assert_eq!(install.exit.code(), Some(0));
    // The swap itself happens in the launcher after exit.
    assert_eq!(std::fs::read_to_string(&install.running).unwrap(), "running build");
}
