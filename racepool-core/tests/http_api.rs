//! HTTP round trips over a loopback listener
//!
//! Run with: cargo test --test http_api

use std::sync::Arc;
use std::time::Duration;

use racepool_core::auth::issue_credential;
use racepool_core::config::{CoordinatorConfig, TemplateSource};
use racepool_core::error::PoolError;
use racepool_core::protocol::{BlockTemplate, Solution};
use racepool_core::runtime::ShutdownSignal;
use racepool_core::worker::{
    ClientConfig, Conductor, ConductorConfig, Miner, MinerConfig, PoolClient,
};
use racepool_core::{server, Coordinator};
use tokio::net::TcpListener;

struct TestPool {
    coordinator: Arc<Coordinator>,
    shutdown: ShutdownSignal,
    base_url: String,
}

impl TestPool {
    async fn start(config: CoordinatorConfig) -> Self {
        let coordinator = Arc::new(Coordinator::from_config(config));
        let shutdown = ShutdownSignal::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        {
            let coordinator = coordinator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { coordinator.run(shutdown).await });
        }
        tokio::spawn(server::serve(listener, coordinator.clone(), shutdown.clone()));

        Self {
            coordinator,
            shutdown,
            base_url,
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            coordinator_addr: self.base_url.clone(),
            ..Default::default()
        }
    }

    fn client(&self) -> PoolClient {
        PoolClient::new(self.client_config()).unwrap()
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

fn config(expected: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        expected_workers: expected,
        barrier_timeout: Duration::from_millis(500),
        template_source: TemplateSource::External,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_login_errors_map_to_variants() {
    let pool = TestPool::start(config(1)).await;
    let client = pool.client();

    assert_eq!(client.login("alice", None).await.unwrap(), 1);
    let err = client.login("alice", None).await.unwrap_err();
    assert!(matches!(err, PoolError::AlreadyLoggedIn { name } if name == "alice"));

    let err = client.get_work("nobody").await.unwrap_err();
    assert!(err.requires_login());

    let status = client.status().await.unwrap();
    assert_eq!(status.workers.len(), 1);
    assert_eq!(status.workers[0].name, "alice");
}

#[tokio::test]
async fn test_keyed_login_over_http() {
    let mut config = config(1);
    config.auth_keys.insert(1, "thekey".into());
    config.auth_keys.insert(2, "anotherthekey".into());
    let pool = TestPool::start(config).await;
    let client = pool.client();

    let err = client.login("anon", None).await.unwrap_err();
    assert!(matches!(err, PoolError::AuthenticationFailed { .. }));

    let forged = issue_credential(2, "thekey", 1_700_000_000);
    assert!(client.login(&forged.token.clone(), Some(forged)).await.is_err());

    let credential = issue_credential(2, "anotherthekey", 1_700_000_000);
    let name = credential.token.clone();
    let err = client.login("borrowed", Some(credential.clone())).await.unwrap_err();
    assert!(matches!(err, PoolError::AuthenticationFailed { .. }));

    assert_eq!(client.login(&name, Some(credential)).await.unwrap(), 1);
    assert_eq!(pool.coordinator.registry().get(&name).unwrap().user, Some(2));
}

#[tokio::test]
async fn test_capacity_reported_as_retryable() {
    let pool = TestPool::start(CoordinatorConfig {
        max_workers: 1,
        ..config(1)
    })
    .await;
    let client = pool.client();

    client.login("first", None).await.unwrap();
    let err = client.login("second", None).await.unwrap_err();
    assert!(matches!(err, PoolError::CapacityReached { limit: 1 }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_full_round_over_http() {
    let pool = TestPool::start(config(1)).await;
    let client = pool.client();
    client.login("solo", None).await.unwrap();

    let observer = {
        let client = pool.client();
        tokio::spawn(async move { client.get_result("observer").await })
    };
    let work = {
        let client = pool.client();
        tokio::spawn(async move { client.get_work("solo").await })
    };
    // Let the work request reach the coordinator before the round opens
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = client
        .issue_block(BlockTemplate::synthetic(21, "http-test"))
        .await
        .unwrap();
    assert!(reply.accepted);

    let work = work.await.unwrap().unwrap();
    assert_eq!(work.height, 21);
    assert_eq!(work.header.len(), 80);

    let solution = Solution {
        round: work.round,
        nonce: 77,
        payload: work.coinbase.clone(),
        identity: "solo".into(),
    };
    assert!(client.announce(solution.clone()).await.unwrap());
    assert!(!client.announce(solution).await.unwrap());

    let notice = client.get_cancel("solo", Some(work.round)).await.unwrap();
    assert_eq!(notice.winner.as_deref(), Some("solo"));
    assert_eq!(notice.issuer, "http-test");

    let record = observer.await.unwrap().unwrap();
    assert_eq!(record.winner, "solo");
    assert_eq!(record.solution.nonce, 77);
    assert_eq!(record.solution.payload, work.coinbase);

    let metrics = reqwest::get(format!("{}/metrics", pool.base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("racepool_rounds_completed_total"));
}

#[tokio::test]
async fn test_miner_and_conductor_drive_rounds() {
    let pool = TestPool::start(config(1)).await;

    let miner = Arc::new(
        Miner::new(MinerConfig {
            client: pool.client_config(),
            name: "dice".into(),
            tosses: 1,
            tick: Duration::from_millis(10),
            login_retry: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap(),
    );
    let miner_shutdown = ShutdownSignal::new();
    let mining = {
        let miner = miner.clone();
        let shutdown = miner_shutdown.clone();
        tokio::spawn(async move { miner.run(shutdown).await })
    };

    let conductor = Conductor::new(ConductorConfig {
        client: pool.client_config(),
        result_timeout: Duration::from_secs(10),
        max_blocks: Some(2),
        ..Default::default()
    })
    .unwrap();

    let records = tokio::time::timeout(Duration::from_secs(30), conductor.run(ShutdownSignal::new()))
        .await
        .expect("conductor stalled")
        .unwrap();

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.winner == "dice"));
    assert!(records[0].round < records[1].round);

    miner_shutdown.shutdown();
    mining.await.unwrap().unwrap();
}
