//! Resumable import end to end
//!
//! An import interrupted after committing some batches and then retried must leave exactly the
//! same terms behind as an uninterrupted run, on both storage backends.

mod common;

use common::*;
use jobflow_core::application::{EnqueueOptions, JobQueueManager};
use jobflow_core::domain::{ErrorClass, ImportSummary, JobState, JobType, Term};
use jobflow_core::port::record_source::mocks::StaticSourceOpener;
use jobflow_core::port::time_provider::mocks::ManualClock;
use std::sync::Arc;

const SOURCE: &str = "fixtures/glossary.csv";
const ROWS: usize = 23;
const BATCH: usize = 5;
/// Row 7 is short one cell and must be skipped as malformed
const MALFORMED_ROW: usize = 7;

struct Harness {
    stores: Stores,
    clock: Arc<ManualClock>,
    opener: Arc<StaticSourceOpener>,
    manager: JobQueueManager,
}

fn load_fixture(opener: &StaticSourceOpener, rows: &[[String; 3]]) {
    let mut cells = as_cells(rows);
    cells[MALFORMED_ROW].pop();
    opener.insert_rows(SOURCE, &GLOSSARY_HEADERS, cells);
}

async fn harness(backend: Backend) -> Harness {
    let stores = open_stores(backend).await;
    let clock = Arc::new(ManualClock::new(START_MS));
    let opener = Arc::new(StaticSourceOpener::new());
    load_fixture(&opener, &glossary_rows(ROWS));

    let manager = manager(
        &stores,
        clock.clone(),
        vec![(importer(opener.clone(), &stores, clock.clone()), import_pool())],
    );
    Harness {
        stores,
        clock,
        opener,
        manager,
    }
}

async fn enqueue_import(manager: &JobQueueManager) -> String {
    manager
        .enqueue(
            &JobType::import(),
            import_payload(SOURCE, BATCH),
            EnqueueOptions::default(),
        )
        .await
        .unwrap()
}

async fn stored_terms(stores: &Stores) -> Vec<Option<Term>> {
    let mut terms = Vec::new();
    for row in glossary_rows(ROWS) {
        terms.push(stores.terms.find_by_name(&row[0]).await.unwrap());
    }
    terms
}

/// Import straight through and return the stored terms
async fn uninterrupted(backend: Backend) -> Vec<Option<Term>> {
    let h = harness(backend).await;
    let job_id = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);

    let job = h.manager.get_status(&job_id).await.unwrap().job;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 1);
    stored_terms(&h.stores).await
}

/// First attempt has failed after committing three batches; finish the retry and compare
async fn assert_resumes_like_uninterrupted(h: Harness, job_id: &str, backend: Backend) {
    let status = h.manager.get_status(job_id).await.unwrap();
    assert_eq!(status.job.state, JobState::Waiting);
    assert_eq!(status.job.attempts, 1);
    assert_eq!(status.job.attempt_log[0].class, ErrorClass::Transient);
    let progress = status.progress.expect("checkpoint after three batches");
    assert_eq!(progress.rows_processed, 15);
    assert_eq!(progress.last_batch_id, 3);
    assert_eq!(h.stores.terms.count().await.unwrap(), 14);

    // Backoff keeps it invisible until the first retry delay has passed
    assert!(!process_one(&h.manager, &JobType::import()).await);
    h.clock.advance(1000);
    assert!(process_one(&h.manager, &JobType::import()).await);

    let status = h.manager.get_status(job_id).await.unwrap();
    assert_eq!(status.job.state, JobState::Completed);
    assert_eq!(status.job.attempts, 2);

    let summary: ImportSummary = serde_json::from_value(status.job.result.unwrap()).unwrap();
    assert_eq!(summary.resumed_from, 15);
    assert_eq!(summary.rows_processed, ROWS as u64);
    assert_eq!(summary.rows_imported, ROWS as u64 - 1);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(summary.batches_committed, 5);

    let progress = status.progress.unwrap();
    assert_eq!(progress.total_rows, Some(ROWS as u64));
    assert_eq!(h.stores.terms.count().await.unwrap(), ROWS as i64 - 1);

    let resumed = stored_terms(&h.stores).await;
    assert!(resumed[MALFORMED_ROW].is_none());
    assert_eq!(resumed, uninterrupted(backend).await);
}

async fn resume_after_source_failure(backend: Backend) {
    let h = harness(backend).await;
    // Batch four reads two records, then the source breaks
    h.opener.fail_after(SOURCE, Some(17));
    let job_id = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);

    h.opener.fail_after(SOURCE, None);
    assert_resumes_like_uninterrupted(h, &job_id, backend).await;
}

/// Source read failure mid-import, SQLite backend
#[tokio::test]
async fn test_resume_after_source_failure_sqlite() {
    resume_after_source_failure(Backend::Sqlite).await;
}

/// Source read failure mid-import, in-memory backend
#[tokio::test]
async fn test_resume_after_source_failure_memory() {
    resume_after_source_failure(Backend::Memory).await;
}

/// A failed batch commit writes nothing; the retry resumes after the last committed batch
#[tokio::test]
async fn test_resume_after_failed_commit() {
    let h = harness(Backend::Memory).await;
    h.stores
        .memory
        .as_ref()
        .unwrap()
        .fail_commit_at(4)
        .unwrap();

    let job_id = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);
    assert_resumes_like_uninterrupted(h, &job_id, Backend::Memory).await;
}

/// The source shrank below the checkpoint between attempts: dead-letter, no retry
#[tokio::test]
async fn test_truncated_source_dead_letters() {
    let h = harness(Backend::Sqlite).await;
    h.opener.fail_after(SOURCE, Some(17));
    let job_id = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);

    load_fixture(&h.opener, &glossary_rows(10));
    h.clock.advance(1000);
    assert!(process_one(&h.manager, &JobType::import()).await);

    let job = h.manager.get_status(&job_id).await.unwrap().job;
    assert_eq!(job.state, JobState::DeadLetter);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.attempt_log[1].class, ErrorClass::Consistency);
    assert!(job.last_error.unwrap().contains("checkpoint covers 15"));
    // Nothing past the last good batch was written
    assert_eq!(h.stores.terms.count().await.unwrap(), 14);
}

/// The header row changed between attempts: dead-letter instead of importing shifted columns
#[tokio::test]
async fn test_changed_header_dead_letters() {
    let h = harness(Backend::Memory).await;
    h.opener.fail_after(SOURCE, Some(17));
    let job_id = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);

    let rows = glossary_rows(ROWS);
    h.opener.insert_rows(
        SOURCE,
        &["Term", "Category", "Definition"],
        as_cells(&rows),
    );
    h.clock.advance(1000);
    assert!(process_one(&h.manager, &JobType::import()).await);

    let job = h.manager.get_status(&job_id).await.unwrap().job;
    assert_eq!(job.state, JobState::DeadLetter);
    assert!(job.last_error.unwrap().contains("header"));
    assert_eq!(h.opener.open_count(), 2);
}

/// Re-importing the same source under a new job writes nothing new
#[tokio::test]
async fn test_reimport_counts_unchanged_terms() {
    let h = harness(Backend::Sqlite).await;
    let first = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);
    let second = enqueue_import(&h.manager).await;
    assert!(process_one(&h.manager, &JobType::import()).await);

    for (job_id, imported, unchanged) in [(first, ROWS as u64 - 1, 0), (second, 0, ROWS as u64 - 1)]
    {
        let job = h.manager.get_status(&job_id).await.unwrap().job;
        let summary: ImportSummary = serde_json::from_value(job.result.unwrap()).unwrap();
        assert_eq!(summary.rows_imported, imported);
        assert_eq!(summary.rows_unchanged, unchanged);
    }
    assert_eq!(h.stores.terms.count().await.unwrap(), ROWS as i64 - 1);
}
