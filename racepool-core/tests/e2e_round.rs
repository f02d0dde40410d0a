//! End-to-end round tests against an in-process coordinator
//!
//! Run with: cargo test --test e2e_round

use std::sync::Arc;
use std::time::Duration;

use racepool_core::config::{CoordinatorConfig, TemplateSource};
use racepool_core::error::{PoolError, Result};
use racepool_core::protocol::{BlockTemplate, Solution, WorkAssignment};
use racepool_core::runtime::ShutdownSignal;
use racepool_core::Coordinator;
use tokio::task::JoinHandle;

fn config(expected: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        expected_workers: expected,
        barrier_timeout: Duration::from_secs(1),
        template_source: TemplateSource::External,
        ..Default::default()
    }
}

fn start(config: CoordinatorConfig) -> (Arc<Coordinator>, ShutdownSignal, JoinHandle<Result<()>>) {
    let coordinator = Arc::new(Coordinator::from_config(config));
    let shutdown = ShutdownSignal::new();
    let controller = {
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };
    (coordinator, shutdown, controller)
}

fn template(height: u32) -> BlockTemplate {
    BlockTemplate {
        upper: vec![0x01, 0x02],
        lower: vec![0xff],
        height,
        header: vec![height as u8; 80],
        merkle_skeleton: vec![0u8; 32],
        bits: 0x1d00ffff,
        issuer: "test-issuer".into(),
    }
}

fn spawn_work(coordinator: &Arc<Coordinator>, name: &str) -> JoinHandle<Result<WorkAssignment>> {
    let coordinator = coordinator.clone();
    let name = name.to_string();
    tokio::spawn(async move { coordinator.get_work(&name).await })
}

fn spawn_cancel(
    coordinator: &Arc<Coordinator>,
    name: &str,
    round: u64,
) -> JoinHandle<Result<racepool_core::protocol::CancelNotice>> {
    let coordinator = coordinator.clone();
    let name = name.to_string();
    tokio::spawn(async move { coordinator.get_cancel(&name, Some(round)).await })
}

fn solution(work: &WorkAssignment, who: &str, nonce: u32) -> Solution {
    Solution {
        round: work.round,
        nonce,
        payload: work.coinbase.clone(),
        identity: who.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_worker_round() {
    let (coordinator, shutdown, controller) = start(config(3));
    for name in ["a", "b", "c"] {
        coordinator.login(name, None).unwrap();
    }

    let pending: Vec<_> = ["a", "b", "c"].iter().map(|n| spawn_work(&coordinator, n)).collect();
    coordinator.issue_block(template(100));

    let mut work = Vec::new();
    for handle in pending {
        work.push(handle.await.unwrap().unwrap());
    }

    // Same round, same template, distinct coinbases
    assert!(work.iter().all(|w| w.round == 1 && w.height == 100));
    assert!(work.iter().all(|w| w.header == work[0].header));
    assert_ne!(work[0].coinbase, work[1].coinbase);
    assert_ne!(work[1].coinbase, work[2].coinbase);

    let cancels: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|n| spawn_cancel(&coordinator, n, 1))
        .collect();

    assert!(coordinator.announce(solution(&work[1], "b", 42)));
    assert!(!coordinator.announce(solution(&work[2], "c", 7)));

    for cancel in cancels {
        let notice = cancel.await.unwrap().unwrap();
        assert_eq!(notice.round, 1);
        assert_eq!(notice.winner.as_deref(), Some("b"));
        assert_eq!(notice.issuer, "test-issuer");
    }
    assert!(!coordinator.announce(solution(&work[0], "a", 9)));

    let record = coordinator.await_result("observer").await.unwrap();
    assert_eq!(record.winner, "b");
    assert_eq!(record.winner_id, Some(2));
    assert_eq!(record.solution.nonce, 42);
    assert_eq!(record.template.height, 100);

    // Delivered exactly once
    let again = tokio::time::timeout(Duration::from_secs(30), coordinator.await_result("observer")).await;
    assert!(again.is_err());
    assert_eq!(coordinator.rounds_completed(), 1);

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_degraded_round_evicts_absent_worker() {
    let (coordinator, shutdown, controller) = start(config(3));
    for name in ["a", "b", "c"] {
        coordinator.login(name, None).unwrap();
    }

    let a = spawn_work(&coordinator, "a");
    let b = spawn_work(&coordinator, "b");
    coordinator.issue_block(template(5));

    let work_a = a.await.unwrap().unwrap();
    let work_b = b.await.unwrap().unwrap();
    assert_eq!(work_a.round, work_b.round);

    // c never showed up and had to go
    assert!(!coordinator.registry().contains("c"));
    assert!(coordinator.registry().contains("a"));
    let err = coordinator.get_work("c").await.unwrap_err();
    assert!(matches!(err, PoolError::NotLoggedIn { .. }));
    let again = coordinator.login("c", None).unwrap();
    assert_eq!(again.id, 4);

    // The round still runs with the two that arrived
    let cancels = [spawn_cancel(&coordinator, "a", 1), spawn_cancel(&coordinator, "b", 1)];
    assert!(coordinator.announce(solution(&work_a, "a", 1)));
    for cancel in cancels {
        assert_eq!(cancel.await.unwrap().unwrap().winner.as_deref(), Some("a"));
    }
    assert_eq!(coordinator.await_result("observer").await.unwrap().winner, "a");

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_latest_issued_block_is_mined() {
    let coordinator = Arc::new(Coordinator::from_config(config(1)));
    assert!(!coordinator.issue_block(template(1)).superseded);
    assert!(coordinator.issue_block(template(2)).superseded);

    let shutdown = ShutdownSignal::new();
    let controller = {
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    coordinator.login("a", None).unwrap();
    let work = coordinator.get_work("a").await.unwrap();
    assert_eq!(work.height, 2);

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_empty_rounds_keep_their_template() {
    let (coordinator, shutdown, controller) = start(config(1));
    coordinator.issue_block(template(7));

    // Nobody around for a few barrier timeouts
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(coordinator.current_round().is_some_and(|r| r.number() > 1));

    coordinator.login("late", None).unwrap();
    let work = coordinator.get_work("late").await.unwrap();
    assert_eq!(work.height, 7);
    assert!(work.round > 1);

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_forced_round_has_no_winner() {
    let (coordinator, shutdown, controller) = start(CoordinatorConfig {
        mining_timeout: Some(Duration::from_secs(5)),
        ..config(1)
    });
    coordinator.login("a", None).unwrap();
    coordinator.issue_block(template(3));

    let work = coordinator.get_work("a").await.unwrap();
    let notice = coordinator.get_cancel("a", Some(work.round)).await.unwrap();
    assert_eq!(notice.winner, None);
    assert!(!coordinator.announce(solution(&work, "a", 3)));

    // No record was produced
    let result = tokio::time::timeout(Duration::from_secs(10), coordinator.await_result("o")).await;
    assert!(result.is_err());

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_round_cap_and_buffered_result() {
    let (coordinator, _shutdown, controller) = start(CoordinatorConfig {
        template_source: TemplateSource::Fixed,
        max_rounds: Some(1),
        wait_for_observer: false,
        ..config(1)
    });
    coordinator.login("solo", None).unwrap();
    coordinator.issue_block(template(11));

    let work = coordinator.get_work("solo").await.unwrap();
    let cancel = spawn_cancel(&coordinator, "solo", work.round);
    assert!(coordinator.announce(solution(&work, "solo", 5)));
    cancel.await.unwrap().unwrap();

    // Controller returns on its own after the cap
    controller.await.unwrap().unwrap();

    // A finished round answers cancel waits immediately
    let notice = coordinator.get_cancel("solo", Some(work.round)).await.unwrap();
    assert_eq!(notice.winner.as_deref(), Some("solo"));

    // The buffered record survives the controller
    let record = coordinator.await_result("late-observer").await.unwrap();
    assert_eq!(record.winner, "solo");

    let err = coordinator.get_work("solo").await.unwrap_err();
    assert!(matches!(err, PoolError::ShutdownInProgress));
}

#[tokio::test(start_paused = true)]
async fn test_stale_round_solution_rejected() {
    let (coordinator, shutdown, controller) = start(CoordinatorConfig {
        template_source: TemplateSource::Fixed,
        ..config(1)
    });
    coordinator.login("a", None).unwrap();
    coordinator.issue_block(template(1));

    let first = coordinator.get_work("a").await.unwrap();
    let cancel = spawn_cancel(&coordinator, "a", first.round);
    assert!(coordinator.announce(solution(&first, "a", 1)));
    cancel.await.unwrap().unwrap();
    coordinator.await_result("o").await.unwrap();

    let second = coordinator.get_work("a").await.unwrap();
    assert!(second.round > first.round);
    assert!(!coordinator.announce(solution(&first, "a", 2)));
    assert!(coordinator.announce(solution(&second, "a", 3)));

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_outsider_cannot_fill_exit_quorum() {
    let (coordinator, shutdown, controller) = start(CoordinatorConfig {
        barrier_timeout: Duration::from_secs(10),
        ..config(2)
    });
    coordinator.login("a", None).unwrap();
    coordinator.login("b", None).unwrap();

    let a = spawn_work(&coordinator, "a");
    let b = spawn_work(&coordinator, "b");
    coordinator.issue_block(template(9));
    let work_a = a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let outsider = spawn_cancel(&coordinator, "zzz-not-a-worker", work_a.round);
    let cancel_a = spawn_cancel(&coordinator, "a", work_a.round);
    assert!(coordinator.announce(solution(&work_a, "a", 1)));

    // b has not acknowledged, so the exit barrier stays shut
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!outsider.is_finished());
    assert!(!cancel_a.is_finished());
    let round = coordinator.current_round().unwrap();
    assert_eq!(round.number(), work_a.round);
    assert!(!round.is_finished());

    let cancel_b = spawn_cancel(&coordinator, "b", work_a.round);
    for cancel in [outsider, cancel_a, cancel_b] {
        assert_eq!(cancel.await.unwrap().unwrap().winner.as_deref(), Some("a"));
    }
    assert!(round.is_finished());
    assert_eq!(coordinator.await_result("observer").await.unwrap().winner, "a");

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_wait_on_empty_round_returns() {
    let (coordinator, shutdown, controller) = start(config(1));
    coordinator.issue_block(template(4));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let round = coordinator.current_round().unwrap().number();
    let notice = coordinator.get_cancel("watcher", Some(round)).await.unwrap();
    assert_eq!(notice.round, round);
    assert_eq!(notice.winner, None);

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}
