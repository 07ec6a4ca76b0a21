mod common;

use common::{Behavior, Harness, MockBackend, MockClient, TestProject};
use imageflow_build::{BuildOutcome, ErrorKind, PushError, PushResult, RunMode};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_every_target_reaches_every_registry() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &["ghcr", "dockerhub"]);
    let harness = Harness::new(&project, MockBackend::default(), 4);

    let report = harness.orchestrator.run(&manifest, true).await;

    assert_eq!(report.mode, RunMode::Push);
    assert_eq!(report.targets.len(), 2);
    assert_eq!(report.push_result_count(), 4);
    for target in ["api", "worker"] {
        let pushes = &report.targets[target].pushes;
        assert!(pushes["ghcr"].is_success());
        assert!(pushes["dockerhub"].is_success());
    }
    assert_eq!(report.exit_code(), 0);

    // タグは全レジストリで同じ
    let ghcr_tags = harness.client.state("ghcr").tags.lock().unwrap().clone();
    assert_eq!(
        ghcr_tags["acme/api"],
        vec!["1.0.0".to_string(), "latest".to_string()]
    );
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &["ghcr", "dockerhub"]);
    let client = Arc::new(MockClient::default());
    client.configure(
        "dockerhub",
        Behavior {
            transient_failures: HashMap::from([("acme/api".to_string(), 2)]),
            ..Default::default()
        },
    );
    let harness = Harness::with_client(&project, MockBackend::default(), client, 4);

    let report = harness.orchestrator.run(&manifest, true).await;

    match &report.targets["api"].pushes["dockerhub"] {
        PushResult::Pushed { retry_count, .. } => assert_eq!(*retry_count, 2),
        other => panic!("expected Pushed, got {:?}", other),
    }
    assert_eq!(report.targets["api"].pushes["ghcr"].retry_count(), 0);
    assert_eq!(report.targets["worker"].pushes["dockerhub"].retry_count(), 0);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api"], &["quay"]);
    let client = Arc::new(MockClient::default());
    client.configure(
        "quay",
        Behavior {
            always_fail: Some(PushError::transient("502 Bad Gateway")),
            ..Default::default()
        },
    );
    let harness = Harness::with_client(&project, MockBackend::default(), client.clone(), 4);

    let report = harness.orchestrator.run(&manifest, true).await;

    match &report.targets["api"].pushes["quay"] {
        PushResult::Failed {
            kind, retry_count, ..
        } => {
            assert_eq!(*kind, ErrorKind::PushFailed);
            assert_eq!(*retry_count, 2);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(client.state("quay").attempts.load(Ordering::SeqCst), 3);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_rejected_push_is_not_retried() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api"], &["quay"]);
    let client = Arc::new(MockClient::default());
    client.configure(
        "quay",
        Behavior {
            always_fail: Some(PushError::rejected("400 MANIFEST_INVALID")),
            ..Default::default()
        },
    );
    let harness = Harness::with_client(&project, MockBackend::default(), client.clone(), 4);

    let report = harness.orchestrator.run(&manifest, true).await;

    assert_eq!(report.targets["api"].pushes["quay"].retry_count(), 0);
    assert_eq!(client.state("quay").attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_push_transfers_nothing() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api"], &["ghcr"]);
    let harness = Harness::new(&project, MockBackend::default(), 4);

    let first = harness.orchestrator.run(&manifest, true).await;
    let transfers = harness.client.state("ghcr").transfers.load(Ordering::SeqCst);
    let second = harness.orchestrator.run(&manifest, true).await;

    assert_eq!(transfers, 1);
    assert_eq!(
        harness.client.state("ghcr").transfers.load(Ordering::SeqCst),
        transfers
    );
    match &second.targets["api"].pushes["ghcr"] {
        PushResult::Pushed {
            remote_digest,
            already_present,
            ..
        } => {
            assert!(*already_present);
            let BuildOutcome::Succeeded { index_digest, .. } = &first.targets["api"].build else {
                panic!("first build failed");
            };
            assert_eq!(remote_digest, index_digest);
        }
        other => panic!("expected Pushed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_new_tags_are_published_for_an_existing_index() {
    let project = TestProject::new();
    let mut manifest = project.manifest(&["api"], &["ghcr"]);
    let harness = Harness::new(&project, MockBackend::default(), 4);

    let first = harness.orchestrator.run(&manifest, true).await;
    assert_eq!(first.exit_code(), 0);

    manifest.targets[0].tags = vec!["1.0.1".to_string()];
    let second = harness.orchestrator.run(&manifest, true).await;

    assert_eq!(second.exit_code(), 0);
    assert!(matches!(
        &second.targets["api"].pushes["ghcr"],
        PushResult::Pushed {
            already_present: true,
            ..
        }
    ));
    // blob と manifest の転送は初回のみ
    assert_eq!(harness.client.state("ghcr").transfers.load(Ordering::SeqCst), 1);
    let ghcr_tags = harness.client.state("ghcr").tags.lock().unwrap().clone();
    assert_eq!(
        ghcr_tags["acme/api"],
        vec![
            "1.0.0".to_string(),
            "latest".to_string(),
            "1.0.1".to_string()
        ]
    );
}

#[tokio::test]
async fn test_auth_failure_is_isolated_to_its_registry() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &["ghcr", "dockerhub"]);
    let client = Arc::new(MockClient::default());
    client.configure(
        "dockerhub",
        Behavior {
            reject_auth: true,
            ..Default::default()
        },
    );
    let harness = Harness::with_client(&project, MockBackend::default(), client.clone(), 4);

    let report = harness.orchestrator.run(&manifest, true).await;

    for target in ["api", "worker"] {
        let pushes = &report.targets[target].pushes;
        assert!(pushes["ghcr"].is_success());
        match &pushes["dockerhub"] {
            PushResult::Failed { kind, message, .. } => {
                assert_eq!(*kind, ErrorKind::AuthFailed);
                assert!(message.contains("dockerhub"));
            }
            other => panic!("expected AuthFailed, got {:?}", other),
        }
    }
    // 認証は1レジストリにつき1回だけ
    assert_eq!(client.state("dockerhub").handshakes.load(Ordering::SeqCst), 1);
    assert_eq!(client.state("ghcr").handshakes.load(Ordering::SeqCst), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_build_only_produces_no_push_results() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &["ghcr"]);
    let harness = Harness::new(&project, MockBackend::default(), 4);

    let report = harness.orchestrator.run(&manifest, false).await;

    assert_eq!(report.mode, RunMode::BuildOnly);
    assert_eq!(report.push_result_count(), 0);
    assert_eq!(harness.client.total_handshakes(), 0);
    assert!(report.targets.values().all(|t| t.build.is_success()));
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_build_failure_does_not_block_other_targets() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &["ghcr"]);
    let harness = Harness::new(&project, MockBackend::failing("worker"), 4);

    let report = harness.orchestrator.run(&manifest, true).await;

    assert!(report.targets["api"].pushes["ghcr"].is_success());
    match &report.targets["worker"].build {
        BuildOutcome::Failed { kind, message } => {
            assert_eq!(*kind, ErrorKind::BuildFailed);
            assert!(message.contains("exit code 2"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(report.targets["worker"].pushes.is_empty());
    assert_eq!(report.push_result_count(), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_concurrent_builds_respect_limit() {
    let project = TestProject::new();
    let manifest = project.manifest(&["a", "b", "c", "d", "e"], &[]);
    let harness = Harness::new(
        &project,
        MockBackend::with_delay(Duration::from_millis(40)),
        2,
    );

    let report = harness.orchestrator.run(&manifest, false).await;

    assert_eq!(report.exit_code(), 0);
    // 5ターゲット × 2アーキテクチャ
    assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 10);
    let max_active = harness.backend.max_active.load(Ordering::SeqCst);
    assert!(max_active <= 2, "max active builds was {}", max_active);
    assert!(max_active >= 1);
}

#[tokio::test]
async fn test_single_build_slot_serialises_every_arch() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &[]);
    let harness = Harness::new(
        &project,
        MockBackend::with_delay(Duration::from_millis(60)),
        1,
    );

    let report = harness.orchestrator.run(&manifest, false).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 4);
    assert_eq!(harness.backend.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_identical_inputs_give_identical_index_digests() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api"], &[]);

    let first = Harness::new(&project, MockBackend::default(), 2)
        .orchestrator
        .run(&manifest, false)
        .await;
    std::fs::remove_dir_all(project.out_dir()).unwrap();
    let second = Harness::new(&project, MockBackend::default(), 2)
        .orchestrator
        .run(&manifest, false)
        .await;

    assert_eq!(first.targets["api"].build, second.targets["api"].build);
}

#[tokio::test]
async fn test_cancellation_stops_remaining_work() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker", "batch"], &["ghcr"]);
    let harness = Harness::new(
        &project,
        MockBackend::with_delay(Duration::from_millis(100)),
        1,
    );

    let cancel = harness.orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    let report = harness.orchestrator.run(&manifest, true).await;

    for target in report.targets.values() {
        match &target.build {
            BuildOutcome::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::Cancelled),
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }
    assert_eq!(harness.client.state("ghcr").transfers.load(Ordering::SeqCst), 0);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_build_logs_are_written_per_target() {
    let project = TestProject::new();
    let manifest = project.manifest(&["api", "worker"], &[]);
    let logs = project.out_dir().join("logs");
    let harness = Harness::new(&project, MockBackend::default(), 2);
    let orchestrator = harness
        .orchestrator
        .with_logs(imageflow_build::BuildLogs::Directory(logs.clone()));

    orchestrator.run(&manifest, false).await;

    let api = std::fs::read_to_string(logs.join("api.log")).unwrap();
    let worker = std::fs::read_to_string(logs.join("worker.log")).unwrap();
    assert!(api.contains("building api"));
    assert!(!api.contains("building worker"));
    assert!(worker.contains("building worker"));
}
