//! Mutual exclusion under contention
//!
//! Many claimers race over the same queue; every job must be handed out exactly once.

mod common;

use common::*;
use jobflow_core::application::{EnqueueOptions, JobQueueManager};
use jobflow_core::domain::{JobState, JobType, JobTypeConfig};
use jobflow_core::port::handler::mocks::{ScriptedHandler, Step};
use jobflow_core::port::{JobStore, SystemTimeProvider, TimeProvider};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const JOBS: usize = 60;
const CLAIMERS: usize = 6;

async fn race_claims(stores: &Stores) {
    let warm = JobType::cache_warm();
    let manager = JobQueueManager::builder(
        Arc::clone(&stores.jobs),
        Arc::clone(&stores.checkpoints),
    )
    .register(
        Arc::new(ScriptedHandler::succeeding(warm.clone())),
        JobTypeConfig::new(1),
    )
    .build()
    .unwrap();
    for _ in 0..JOBS {
        manager
            .enqueue(&warm, json!({"keys": []}), EnqueueOptions::default())
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..CLAIMERS {
        let store: Arc<dyn JobStore> = Arc::clone(&stores.jobs);
        let warm = warm.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store
                .claim_next(&warm, SystemTimeProvider.now_millis())
                .await
                .unwrap()
            {
                assert_eq!(job.state, JobState::Active);
                assert_eq!(job.attempts, 1);
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id.clone()), "job {} claimed twice", id);
        }
    }
    assert_eq!(seen.len(), JOBS);
    assert_eq!(
        manager.queue_depth(&warm).await.unwrap().active,
        JOBS as i64
    );
}

/// SQLite file with a multi-connection pool
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_claims_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("claims.db").display());
    let stores = sqlite_stores(&url, 8).await;
    race_claims(&stores).await;
}

/// In-memory store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_claims_are_exclusive() {
    let stores = open_stores(Backend::Memory).await;
    race_claims(&stores).await;
}

/// Running pools never exceed their concurrency and run each job once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_concurrency_bound() {
    let stores = open_stores(Backend::Memory).await;
    let warm = JobType::cache_warm();
    let handler = Arc::new(ScriptedHandler::new(
        warm.clone(),
        Step::Sleep(Duration::from_millis(20)),
    ));
    let manager = JobQueueManager::builder(
        Arc::clone(&stores.jobs),
        Arc::clone(&stores.checkpoints),
    )
    .register(
        handler.clone(),
        JobTypeConfig::new(3).with_poll_interval_ms(10),
    )
    .build()
    .unwrap();

    let mut ids = Vec::new();
    for _ in 0..12 {
        ids.push(
            manager
                .enqueue(&warm, json!({"keys": []}), EnqueueOptions::default())
                .await
                .unwrap(),
        );
    }

    let engine = manager.start().await.unwrap();
    for id in &ids {
        let job = tokio::time::timeout(Duration::from_secs(10), manager.wait_for_terminal(id))
            .await
            .expect("job completes")
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
    }
    engine.shutdown().await;

    assert!(handler.max_concurrency() <= 3);
    assert!(handler.max_concurrency() >= 2);
    for id in &ids {
        assert_eq!(handler.calls_for(id).len(), 1);
    }
}
