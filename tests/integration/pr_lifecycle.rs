use reforge::core::{ErrorKind, UpdaterError, error_kind};
use reforge::ledger::Ledger;
use reforge::status::UpdaterState;

use crate::common::Installation;

/// Publishes PR 7 touching one new file and registers it with the source.
fn publish_pr7(install: &Installation) -> Vec<String> {
    let hashes = install
        .fixture
        .publish_pr(7, &[
            ("feature.txt", "first\n", "Add feature"),
            ("feature.txt", "second\n", "Refine feature"),
        ])
        .unwrap();
    install.source.add_pr(7, "Add feature", &hashes);
    hashes
}

#[tokio::test]
async fn cherry_pick_then_revert() {
    let install = Installation::new();
    publish_pr7(&install);
    let service = install.service();

    let results = service.start_cherry_pick(vec![7]).unwrap().wait().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success, "{:?}", results[0].error);
    assert_eq!(results[0].applied.len(), 2);
    assert_eq!(install.local_file("feature.txt").as_deref(), Some("second\n"));
    assert_eq!(service.status().current_step, "Cherry-pick finished: 1/1 PR(s) applied");

    let prs = service.list_prs("", 0).await.unwrap();
    assert_eq!(prs.len(), 1);
    assert!(prs[0].applied);
    assert!(prs[0].can_revert);

    let reverted = service.start_revert(7).unwrap().wait().await.unwrap();
    assert_eq!(reverted.reverted.len(), 2);
    assert_eq!(install.local_file("feature.txt"), None);
    assert!(Ledger::new(install.ledger_path()).get(7).unwrap().is_none());

    let prs = service.list_prs("open", 30).await.unwrap();
    assert!(!prs[0].applied);
    assert!(!prs[0].can_revert);
}

#[tokio::test]
async fn reapplying_a_pr_is_a_no_op() {
    let install = Installation::new();
    // Independent files, so every commit re-applies as an empty pick.
    let hashes = install
        .fixture
        .publish_pr(8, &[("a.txt", "a\n", "Add a"), ("b.txt", "b\n", "Add b")])
        .unwrap();
    install.source.add_pr(8, "Add files", &hashes);
    let service = install.service();

    service.start_cherry_pick(vec![8]).unwrap().wait().await.unwrap();
    let recorded = Ledger::new(install.ledger_path()).get(8).unwrap().unwrap();
    let head = install.fixture.local().rev_parse_head().unwrap();

    let again = service.start_cherry_pick(vec![8]).unwrap().wait().await.unwrap();

    assert!(again[0].success);
    assert!(again[0].applied.is_empty());
    assert_eq!(install.fixture.local().rev_parse_head().unwrap(), head);
    assert!(install.fixture.local().status_porcelain().unwrap().trim().is_empty());
    let after = Ledger::new(install.ledger_path()).get(8).unwrap().unwrap();
    assert_eq!(after.commits, recorded.commits);
}

#[tokio::test]
async fn revert_keeps_local_edits() {
    let install = Installation::new();
    publish_pr7(&install);
    let service = install.service();
    service.start_cherry_pick(vec![7]).unwrap().wait().await.unwrap();

    let local = install.fixture.local();
    std::fs::write(local.repo_path().join("README.md"), "# edited locally\n").unwrap();

    service.start_revert(7).unwrap().wait().await.unwrap();

    assert_eq!(install.local_file("README.md").as_deref(), Some("# edited locally\n"));
    assert_eq!(local.stash_count().unwrap(), 0);
}

#[tokio::test]
async fn unknown_pr_cannot_be_reverted() {
    let install = Installation::new();
    let service = install.service();

    let err = service.start_revert(99).unwrap().wait().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpdaterError>(),
        Some(UpdaterError::NoAppliedCommits { number: 99 })
    ));
    assert_eq!(error_kind(&err), ErrorKind::Validation);
    assert_eq!(service.status().state, UpdaterState::Error);
}
