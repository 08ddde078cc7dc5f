use reforge::core::UpdaterError;
use reforge::relaunch::BackupTag;
use reforge::service::RestartAction;
use reforge::status::UpdaterState;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::{Installation, make_executable};

#[tokio::test]
async fn check_reports_upstream_commits() {
    let install = Installation::new();
    for n in 1..=3 {
        install.fixture.publish(&format!("f{n}.txt"), "x\n", &format!("Upstream {n}")).unwrap();
    }

    let check = install.service().check_for_updates().await.unwrap();

    assert!(check.has_updates);
    assert_eq!(check.commits_behind, 3);
    assert_eq!(check.commits_ahead, 0);
    assert_eq!(check.new_commits.len(), 3);
}

#[cfg(unix)]
#[tokio::test]
async fn update_without_restart_builds_and_schedules_move() {
    let mut install = Installation::new();
    install.fake_toolchain();
    install.fixture.publish("README.md", "# service v2\n", "Update readme").unwrap();

    let service = install.service();
    let report = service.start_update(false).unwrap().wait().await.unwrap();

    assert_eq!(install.local_file("README.md").as_deref(), Some("# service v2\n"));
    assert_eq!(
        std::fs::read_to_string(install.install_dir.join("README.md")).unwrap(),
        "# service v2\n"
    );

    let artifact = &report.build.artifact;
    let built = std::fs::read_to_string(&artifact.executable).unwrap();
    assert_eq!(built, format!("built {}", artifact.commit.clone().unwrap()));
    assert_eq!(service.last_built().as_deref(), Some(artifact.executable.as_path()));

    // The running image is never moved by the backup step.
    assert!(install.running.exists());
    assert!(matches!(report.build.restart, RestartAction::MoveOnExit { script: Some(_) }));
    assert_eq!(install.exit.code(), None);

    let status = service.status();
    assert_eq!(status.state, UpdaterState::Done);
    assert_eq!(status.progress, 100);
    assert!(service.running_operation().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn update_with_restart_runs_hook_and_exits() {
    let mut install = Installation::new();
    install.fake_toolchain();
    install.fixture.publish("notes.txt", "hello\n", "Add notes").unwrap();

    let service = install.service();
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    service.set_pre_restart_hook(Some(Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
        flag.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    })));

    let report = service.start_update(true).unwrap().wait().await.unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert_eq!(install.exit.code(), Some(0));
    match &report.build.restart {
        RestartAction::Restarted {
            script,
        } => {
            let body = std::fs::read_to_string(script).unwrap();
            assert!(body.contains(&report.build.artifact.build_id));
        }
        other => panic!("expected a restart, got {other:?}"),
    }
    assert!(service.status().logs.iter().any(|l| l == "Graceful shutdown completed."));
}

#[cfg(unix)]
#[tokio::test]
async fn failed_build_leaves_error_status() {
    let mut install = Installation::new();
    install.fake_toolchain();
    let broken = install.temp.path().join("bin/broken");
    std::fs::write(
        &broken,
        "#!/bin/sh\nif [ \"$1\" = version ]; then echo broken 1; exit 0; fi\necho 'syntax error' >&2\nexit 2\n",
    )
    .unwrap();
    make_executable(&broken);
    install.config.build.obfuscator = broken.display().to_string();

    let service = install.service();
    let err = service
        .start_build(false, BackupTag::Build)
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    match err.downcast_ref::<UpdaterError>() {
        Some(UpdaterError::BuildFailed {
            output,
        }) => assert!(output.contains("syntax error")),
        other => panic!("expected BuildFailed, got {other:?}"),
    }
    let status = service.status();
    assert_eq!(status.state, UpdaterState::Error);
    assert!(service.last_built().is_none());
    assert_eq!(install.exit.code(), None);
}
