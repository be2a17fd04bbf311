//! Crash and restart against a SQLite file
//!
//! A "crash" abandons a process's manager mid-job; the restart opens a fresh pool on the same
//! database file and runs recovery before claiming anything.

mod common;

use async_trait::async_trait;
use common::*;
use jobflow_core::application::{EnqueueOptions, JobQueueManager, RecoveryService};
use jobflow_core::domain::{ImportSummary, JobState, JobType, JobTypeConfig};
use jobflow_core::error::Result;
use jobflow_core::port::handler::mocks::{ScriptedHandler, Step};
use jobflow_core::port::record_source::mocks::StaticSourceOpener;
use jobflow_core::port::time_provider::mocks::ManualClock;
use jobflow_core::port::{
    JobHandler, RecordSource, SourceEvent, SourceOpener, SourceSpec, TimeProvider,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SOURCE: &str = "exports/glossary.csv";

/// Source that hangs forever after a fixed number of events, like a process frozen mid-read
struct FreezingSource {
    inner: Box<dyn RecordSource>,
    remaining: usize,
}

#[async_trait]
impl RecordSource for FreezingSource {
    fn headers(&self) -> &[String] {
        self.inner.headers()
    }

    fn total_records(&self) -> Option<u64> {
        self.inner.total_records()
    }

    async fn next(&mut self) -> Result<Option<SourceEvent>> {
        if self.remaining == 0 {
            std::future::pending::<()>().await;
        }
        self.remaining -= 1;
        self.inner.next().await
    }
}

struct FreezingOpener {
    inner: StaticSourceOpener,
    freeze_after: usize,
}

#[async_trait]
impl SourceOpener for FreezingOpener {
    async fn open(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>> {
        Ok(Box::new(FreezingSource {
            inner: self.inner.open(spec).await?,
            remaining: self.freeze_after,
        }))
    }
}

fn fixture(rows: usize) -> StaticSourceOpener {
    let opener = StaticSourceOpener::new();
    opener.insert_rows(SOURCE, &GLOSSARY_HEADERS, as_cells(&glossary_rows(rows)));
    opener
}

struct TempDb {
    _dir: tempfile::TempDir,
    url: String,
}

fn temp_db() -> TempDb {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobflow.db").display());
    TempDb { _dir: dir, url }
}

/// Kill the process after three committed batches; the restarted process finishes the import
/// with every row stored exactly once
#[tokio::test]
async fn test_import_resumes_after_restart() {
    let db = temp_db();
    let clock = Arc::new(ManualClock::new(START_MS));
    let rows = 40;

    let job_id = {
        let stores = sqlite_stores(&db.url, 4).await;
        let opener = Arc::new(FreezingOpener {
            inner: fixture(rows),
            freeze_after: 17,
        });
        let manager = Arc::new(manager(
            &stores,
            clock.clone(),
            vec![(importer(opener, &stores, clock.clone()), import_pool())],
        ));
        let job_id = manager
            .enqueue(
                &JobType::import(),
                import_payload(SOURCE, 5),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let worker = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { process_one(&manager, &JobType::import()).await })
        };

        // Wait for the third batch to land, then abandon the process
        let committed = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(cp) = stores.checkpoints.load(&job_id).await.unwrap() {
                    if cp.last_batch_id == 3 {
                        return cp;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("three batches commit before the source freezes");
        assert_eq!(committed.rows_processed, 15);
        worker.abort();
        job_id
    };

    clock.advance(10);
    let stores = sqlite_stores(&db.url, 4).await;
    let opener = Arc::new(fixture(rows));
    let manager = manager(
        &stores,
        clock.clone(),
        vec![(importer(opener.clone(), &stores, clock.clone()), import_pool())],
    );

    let status = manager.get_status(&job_id).await.unwrap();
    assert_eq!(status.job.state, JobState::Active);
    assert_eq!(status.progress.unwrap().rows_processed, 15);

    let report = manager.recover_orphaned().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert!(process_one(&manager, &JobType::import()).await);

    let job = manager.get_status(&job_id).await.unwrap().job;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(opener.open_count(), 1);

    let summary: ImportSummary = serde_json::from_value(job.result.unwrap()).unwrap();
    assert_eq!(summary.resumed_from, 15);
    assert_eq!(summary.rows_processed, rows as u64);
    assert_eq!(summary.rows_imported, rows as u64);
    assert_eq!(summary.batches_committed, 8);
    assert_eq!(stores.terms.count().await.unwrap(), rows as i64);
}

/// WAITING jobs survive a restart and run in the next process
#[tokio::test]
async fn test_waiting_jobs_are_durable() {
    let db = temp_db();
    let clock = Arc::new(ManualClock::new(START_MS));
    let warm = JobType::cache_warm();

    let job_id = {
        let stores = sqlite_stores(&db.url, 2).await;
        let handler = Arc::new(ScriptedHandler::succeeding(warm.clone()));
        let manager = manager(
            &stores,
            clock.clone(),
            vec![(handler as Arc<dyn JobHandler>, JobTypeConfig::new(1))],
        );
        manager
            .enqueue(
                &warm,
                json!({"keys": ["term:Tensor"]}),
                EnqueueOptions::default().with_priority(5),
            )
            .await
            .unwrap()
    };

    let stores = sqlite_stores(&db.url, 2).await;
    let handler = Arc::new(ScriptedHandler::succeeding(warm.clone()));
    let manager = manager(
        &stores,
        clock,
        vec![(handler.clone() as Arc<dyn JobHandler>, JobTypeConfig::new(1))],
    );
    let job = manager.get_status(&job_id).await.unwrap().job;
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.priority, 5);

    assert_eq!(manager.recover_orphaned().await.unwrap().total(), 0);
    assert!(process_one(&manager, &warm).await);
    assert_eq!(handler.calls_for(&job_id).len(), 1);
}

/// Orphans on their last attempt are dead-lettered; orphans with a pending cancel are cancelled
#[tokio::test]
async fn test_recovery_outcomes() {
    let db = temp_db();
    let clock = Arc::new(ManualClock::new(START_MS));
    let warm = JobType::cache_warm();

    let (last_attempt, cancelling, retryable) = {
        let stores = sqlite_stores(&db.url, 2).await;
        let handler = Arc::new(ScriptedHandler::succeeding(warm.clone()));
        let manager = manager(
            &stores,
            clock.clone(),
            vec![(handler as Arc<dyn JobHandler>, JobTypeConfig::new(3))],
        );

        let mut ids = Vec::new();
        for options in [
            EnqueueOptions::default().with_max_attempts(1),
            EnqueueOptions::default(),
            EnqueueOptions::default(),
        ] {
            ids.push(manager.enqueue(&warm, json!({"keys": []}), options).await.unwrap());
            clock.advance(1);
        }
        // Claimed by a worker that then died
        for _ in 0..3 {
            stores.jobs.claim_next(&warm, clock.now_millis()).await.unwrap().unwrap();
        }
        assert!(stores.jobs.request_cancel(&ids[1], clock.now_millis()).await.unwrap());
        (ids[0].clone(), ids[1].clone(), ids[2].clone())
    };

    clock.advance(10);
    let stores = sqlite_stores(&db.url, 2).await;
    let handler = Arc::new(ScriptedHandler::succeeding(warm.clone()));
    let manager = manager(
        &stores,
        clock,
        vec![(handler as Arc<dyn JobHandler>, JobTypeConfig::new(3))],
    );

    let report = manager.recover_orphaned().await.unwrap();
    assert_eq!(
        (report.requeued, report.dead_lettered, report.cancelled),
        (1, 1, 1)
    );

    let states = [
        (last_attempt, JobState::DeadLetter),
        (cancelling, JobState::Cancelled),
        (retryable.clone(), JobState::Waiting),
    ];
    for (job_id, expected) in states {
        assert_eq!(
            manager.get_status(&job_id).await.unwrap().job.state,
            expected
        );
    }

    assert!(process_one(&manager, &warm).await);
    let job = manager.get_status(&retryable).await.unwrap().job;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
}

/// Jobs started inside the recovery window belong to a live node and are left alone
#[tokio::test]
async fn test_recovery_window_spares_recent_jobs() {
    let db = temp_db();
    let clock = Arc::new(ManualClock::new(START_MS));
    let warm = JobType::cache_warm();
    let stores = sqlite_stores(&db.url, 2).await;
    let handler = Arc::new(ScriptedHandler::succeeding(warm.clone()));
    let manager = manager(
        &stores,
        clock.clone(),
        vec![(handler as Arc<dyn JobHandler>, JobTypeConfig::new(1))],
    );

    let job_id = manager
        .enqueue(&warm, json!({"keys": []}), EnqueueOptions::default())
        .await
        .unwrap();
    stores.jobs.claim_next(&warm, clock.now_millis()).await.unwrap().unwrap();

    let recovery = RecoveryService::new(Arc::clone(&stores.jobs), clock.clone(), Some(60_000));
    clock.advance(30_000);
    assert_eq!(recovery.recover_orphaned_jobs().await.unwrap().total(), 0);

    clock.advance(30_000);
    assert_eq!(recovery.recover_orphaned_jobs().await.unwrap().requeued, 1);
    assert_eq!(
        manager.get_status(&job_id).await.unwrap().job.state,
        JobState::Waiting
    );
}

/// A second process starting on the same database must not take over a job that a live
/// worker is still running
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_process_leaves_live_jobs_alone() {
    let db = temp_db();
    let warm = JobType::cache_warm();
    let handler = Arc::new(ScriptedHandler::new(
        warm.clone(),
        Step::Sleep(Duration::from_millis(1500)),
    ));
    let engine_manager = |stores: &Stores| {
        JobQueueManager::builder(Arc::clone(&stores.jobs), Arc::clone(&stores.checkpoints))
            .register(
                handler.clone() as Arc<dyn JobHandler>,
                JobTypeConfig::new(2).with_poll_interval_ms(10),
            )
            .build()
            .unwrap()
    };

    let first_stores = sqlite_stores(&db.url, 4).await;
    let first = engine_manager(&first_stores);
    let job_id = first
        .enqueue(&warm, json!({"keys": ["term:Tensor"]}), EnqueueOptions::default())
        .await
        .unwrap();
    let first_engine = first.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while first.get_status(&job_id).await.unwrap().job.state != JobState::Active {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first process claims the job");

    let second_stores = sqlite_stores(&db.url, 4).await;
    let second = engine_manager(&second_stores);
    let second_engine = second.start().await.unwrap();
    assert_eq!(
        second.get_status(&job_id).await.unwrap().job.state,
        JobState::Active
    );

    let job = tokio::time::timeout(Duration::from_secs(10), first.wait_for_terminal(&job_id))
        .await
        .expect("job finishes")
        .unwrap();
    second_engine.shutdown().await;
    first_engine.shutdown().await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    assert_eq!(handler.calls_for(&job_id).len(), 1);
    assert_eq!(handler.max_concurrency(), 1);
}

/// A heartbeat keeps a long-running job out of recovery even after its start leaves the window
#[tokio::test]
async fn test_heartbeat_defers_recovery() {
    let db = temp_db();
    let clock = Arc::new(ManualClock::new(START_MS));
    let warm = JobType::cache_warm();
    let stores = sqlite_stores(&db.url, 2).await;
    let handler = Arc::new(ScriptedHandler::succeeding(warm.clone()));
    let manager = manager(
        &stores,
        clock.clone(),
        vec![(handler as Arc<dyn JobHandler>, JobTypeConfig::new(1))],
    );

    let job_id = manager
        .enqueue(&warm, json!({"keys": []}), EnqueueOptions::default())
        .await
        .unwrap();
    stores.jobs.claim_next(&warm, clock.now_millis()).await.unwrap().unwrap();
    let recovery = RecoveryService::new(Arc::clone(&stores.jobs), clock.clone(), Some(60_000));

    clock.advance(50_000);
    assert!(stores.jobs.heartbeat(&job_id, clock.now_millis()).await.unwrap());
    clock.advance(20_000);
    assert_eq!(recovery.recover_orphaned_jobs().await.unwrap().total(), 0);

    clock.advance(41_000);
    assert_eq!(recovery.recover_orphaned_jobs().await.unwrap().requeued, 1);
    assert_eq!(
        manager.get_status(&job_id).await.unwrap().job.state,
        JobState::Waiting
    );
}
