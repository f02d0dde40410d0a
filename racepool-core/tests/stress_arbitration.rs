//! Stress tests for winner arbitration under concurrent announces
//!
//! Run with: cargo test --release --test stress_arbitration -- --nocapture

use std::sync::Arc;
use std::time::{Duration, Instant};

use racepool_core::config::{CoordinatorConfig, TemplateSource};
use racepool_core::coordinator::{Arbitration, Round};
use racepool_core::protocol::{BlockTemplate, Solution};
use racepool_core::runtime::ShutdownSignal;
use racepool_core::Coordinator;
use tokio::sync::Barrier;

fn solution(round: u64, who: String, nonce: u32) -> Solution {
    Solution {
        round,
        nonce,
        payload: vec![0xab; 16],
        identity: who,
    }
}

/// Racing threads against a single round object
#[test]
fn stress_round_arbitration_threads() {
    let num_threads = 32;
    let round = Arc::new(Round::new(1, Arc::new(BlockTemplate::default())));
    round.begin_mining((0..num_threads).map(|i| format!("w{}", i)).collect());

    let barrier = Arc::new(std::sync::Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let round = round.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                round.arbitrate(solution(1, format!("w{}", i), i as u32), Some(i as u32))
            })
        })
        .collect();

    let outcomes: Vec<Arbitration> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let accepted = outcomes.iter().filter(|o| o.accepted()).count();
    assert_eq!(accepted, 1, "exactly one solution must win");
    assert!(outcomes
        .iter()
        .all(|o| o.accepted() || *o == Arbitration::AlreadyDecided));

    let winner = round.winner().unwrap();
    let record = round.take_win().unwrap();
    assert_eq!(record.winner, winner);
}

/// Fifty workers through a full round with everyone announcing at once
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn stress_concurrent_announces() {
    let num_workers = 50;
    let coordinator = Arc::new(Coordinator::from_config(CoordinatorConfig {
        expected_workers: num_workers,
        max_workers: num_workers,
        barrier_timeout: Duration::from_secs(5),
        template_source: TemplateSource::External,
        ..Default::default()
    }));

    let shutdown = ShutdownSignal::new();
    let controller = {
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run(shutdown).await })
    };

    let names: Vec<String> = (0..num_workers).map(|i| format!("miner-{:02}", i)).collect();
    for name in &names {
        coordinator.login(name, None).unwrap();
    }

    let start = Instant::now();
    let announce_barrier = Arc::new(Barrier::new(num_workers));
    let mut handles = Vec::new();
    for (i, name) in names.iter().cloned().enumerate() {
        let coordinator = coordinator.clone();
        let announce_barrier = announce_barrier.clone();
        handles.push(tokio::spawn(async move {
            let work = coordinator.get_work(&name).await.unwrap();
            announce_barrier.wait().await;

            let accepted = coordinator.announce(solution(work.round, name.clone(), i as u32));
            let notice = coordinator.get_cancel(&name, Some(work.round)).await.unwrap();
            (name, accepted, notice)
        }));
    }

    coordinator.issue_block(BlockTemplate::synthetic(1, "stress"));

    let mut winners = Vec::new();
    let mut notices = Vec::new();
    for handle in handles {
        let (name, accepted, notice) = handle.await.unwrap();
        if accepted {
            winners.push(name);
        }
        notices.push(notice);
    }

    assert_eq!(winners.len(), 1, "exactly one announce must be accepted");
    assert!(notices
        .iter()
        .all(|n| n.winner.as_deref() == Some(winners[0].as_str())));

    let record = coordinator.await_result("stress-observer").await.unwrap();
    assert_eq!(record.winner, winners[0]);

    println!("Concurrent announce stress test:");
    println!("  Workers: {}", num_workers);
    println!("  Round elapsed: {:?}", start.elapsed());

    shutdown.shutdown();
    controller.await.unwrap().unwrap();
}
