//! Integration tests for session teardown

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use assert_matches::assert_matches;
use futures_util::FutureExt;
use harness::patterns::TCP_LISTENING;
use harness::{HarnessError, ProcessJanitor, SupervisorState, flavors};

mod common;
use common::{TestFixtures, TestHelpers, WorkerBuilder};

/// Every worker is stopped and the repo root is deleted
#[tokio::test]
async fn test_teardown_stops_everything() {
    // Arrange
    let (_dir, repo_root) = TestHelpers::repo_root();
    let janitor = ProcessJanitor::new(TestHelpers::settings(&repo_root));
    let mut supervisors = Vec::new();
    for name in ["client1", "client2", "injector"] {
        let config = WorkerBuilder::new(name, &repo_root)
            .line(TestFixtures::LISTENING_LINE)
            .pattern(TCP_LISTENING)
            .build();
        supervisors.push(janitor.launch(config).await.unwrap());
    }
    for supervisor in &supervisors {
        TestHelpers::await_event(supervisor, TCP_LISTENING).await.unwrap();
    }
    assert!(repo_root.join("client2").is_dir());

    // Act
    janitor.teardown().await.unwrap();

    // Assert
    for supervisor in &supervisors {
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.exit_status().is_some());
    }
    assert!(janitor.is_empty());
    assert!(!repo_root.exists());
}

/// Failing workers do not prevent the others from being stopped
#[tokio::test]
async fn test_teardown_collects_all_failures() {
    // Arrange
    let (_dir, repo_root) = TestHelpers::repo_root();
    let janitor = ProcessJanitor::new(TestHelpers::settings(&repo_root));

    let aborting = janitor
        .launch(WorkerBuilder::new("aborting", &repo_root).line(TestFixtures::ABORT_LINE).build())
        .await
        .unwrap();
    let healthy = janitor
        .launch(WorkerBuilder::new("healthy", &repo_root).line("ready").pattern("ready").build())
        .await
        .unwrap();
    let crashing = janitor
        .launch(WorkerBuilder::new("crashing", &repo_root).line("bye").exit_code(2).build())
        .await
        .unwrap();

    TestHelpers::await_event(&healthy, "ready").await.unwrap();
    TestHelpers::wait_until("both failures to be captured", || {
        aborting.failure().is_some() && crashing.failure().is_some()
    })
    .await;

    // Act
    let result = janitor.teardown().await;

    // Assert
    match result {
        Err(HarnessError::Teardown { failures }) => {
            let mut names: Vec<&str> = failures.iter().map(|f| f.app_name.as_str()).collect();
            names.sort_unstable();
            assert_eq!(names, vec!["aborting", "crashing"]);
            assert!(failures.iter().all(|f| f.error.is_fatal()));
        }
        other => panic!("expected aggregated teardown failure, got {other:?}"),
    }
    for supervisor in [&aborting, &healthy, &crashing] {
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
    assert!(!repo_root.exists());
}

/// Two live workers cannot share a working directory
#[tokio::test]
async fn test_duplicate_app_name_rejected_until_stopped() {
    let (_dir, repo_root) = TestHelpers::repo_root();
    let janitor = ProcessJanitor::new(TestHelpers::settings(&repo_root));

    let first = janitor
        .launch(WorkerBuilder::new("client1", &repo_root).build())
        .await
        .unwrap();
    let result = janitor.supervise(WorkerBuilder::new("client1", &repo_root).build());
    assert_matches!(result, Err(HarnessError::Config { .. }));

    first.stop().await.unwrap();
    assert!(janitor.supervise(WorkerBuilder::new("client1", &repo_root).build()).is_ok());

    janitor.teardown().await.unwrap();
}

/// The session helper tears down even when the body fails
#[tokio::test]
async fn test_session_always_tears_down() {
    let (_dir, repo_root) = TestHelpers::repo_root();
    let settings = TestHelpers::settings(&repo_root);
    let root = repo_root.clone();

    let (sender, receiver) = tokio::sync::oneshot::channel();
    let result: Result<(), HarnessError> = ProcessJanitor::session(settings, |janitor| async move {
        let supervisor = janitor
            .launch(WorkerBuilder::new("client1", &root).line("ready").pattern("ready").build())
            .await?;
        TestHelpers::await_event(&supervisor, "ready").await?;
        let _ = sender.send(supervisor);
        Err(HarnessError::config("body", "test failure"))
    })
    .await;

    assert_matches!(result, Err(HarnessError::Config { ref field, .. }) if field == "body");
    let supervisor = receiver.await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!repo_root.exists());
}

/// A panicking test body still gets its workers stopped and the repo root removed
#[tokio::test]
async fn test_session_tears_down_after_panic() {
    let (_dir, repo_root) = TestHelpers::repo_root();
    let settings = TestHelpers::settings(&repo_root);
    let root = repo_root.clone();

    let (sender, receiver) = tokio::sync::oneshot::channel();
    let session = ProcessJanitor::session(settings, |janitor| async move {
        let supervisor = janitor
            .launch(WorkerBuilder::new("client1", &root).line("ready").pattern("ready").build())
            .await?;
        TestHelpers::await_event(&supervisor, "ready").await?;
        let _ = sender.send(supervisor.clone());
        assert!(!supervisor.is_running(), "worker is still running");
        Ok(())
    });
    let outcome = AssertUnwindSafe(session).catch_unwind().await;

    assert!(outcome.is_err());
    let supervisor = receiver.await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(supervisor.term_signal_sent());
    assert!(!repo_root.exists());
}

/// Presets wire the worker into the session repo root
#[tokio::test]
async fn test_presets_follow_session_settings() {
    let (_dir, repo_root) = TestHelpers::repo_root();
    let bin_dir = TestFixtures::mock_worker().parent().unwrap().to_path_buf();
    let settings = TestHelpers::settings(&repo_root).with_build_dir(bin_dir.clone());
    let janitor = ProcessJanitor::new(settings.clone());

    let config = flavors::client(&settings, "client1").unwrap().build().unwrap();

    assert_eq!(config.executable(), bin_dir.join("client"));
    let supervisor = janitor.supervise(config).unwrap();
    assert_eq!(supervisor.working_directory(), repo_root.join("client1"));
    janitor.teardown().await.unwrap();
}

/// Dropping a janitor without teardown still kills its workers
#[tokio::test]
async fn test_dropped_janitor_kills_workers() {
    let (_dir, repo_root) = TestHelpers::repo_root();
    let janitor = ProcessJanitor::new(TestHelpers::settings(&repo_root));
    let supervisor = janitor
        .launch(WorkerBuilder::new("orphan", &repo_root).line("ready").pattern("ready").build())
        .await
        .unwrap();
    TestHelpers::await_event(&supervisor, "ready").await.unwrap();

    drop(janitor);

    TestHelpers::wait_until("the orphan to die", || supervisor.exit_status().is_some()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(supervisor.failure().is_none());
}
