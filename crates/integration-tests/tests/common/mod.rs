//! Shared harness for the end-to-end tests
//!
//! Builds either backend behind the port traits so a scenario can run against both.

#![allow(dead_code)]

use jobflow_core::application::{BatchImporter, ImportPayload, JobQueueManager};
use jobflow_core::domain::{ImportConfig, JobType, JobTypeConfig, RetryConfig};
use jobflow_core::port::id_provider::mocks::SequentialIdProvider;
use jobflow_core::port::time_provider::mocks::ManualClock;
use jobflow_core::port::{
    CheckpointStore, JobHandler, JobStore, SourceOpener, TermRepository, TimeProvider,
};
use jobflow_infra_memory::{MemoryCheckpointStore, MemoryJobStore};
use jobflow_infra_sqlite::{
    create_pool, run_migrations, SqliteCheckpointStore, SqliteJobStore, SqliteTermRepository,
};
use std::sync::Arc;

pub const START_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Memory,
}

pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub terms: Arc<dyn TermRepository>,
    /// Set for the in-memory backend, which can inject commit failures
    pub memory: Option<Arc<MemoryCheckpointStore>>,
}

pub async fn open_stores(backend: Backend) -> Stores {
    match backend {
        Backend::Sqlite => sqlite_stores("sqlite::memory:", 1).await,
        Backend::Memory => {
            let imports = Arc::new(MemoryCheckpointStore::new());
            Stores {
                jobs: Arc::new(MemoryJobStore::new()),
                checkpoints: imports.clone(),
                terms: imports.clone(),
                memory: Some(imports),
            }
        }
    }
}

pub async fn sqlite_stores(url: &str, max_connections: u32) -> Stores {
    let pool = create_pool(url, max_connections).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Stores {
        jobs: Arc::new(SqliteJobStore::new(pool.clone())),
        checkpoints: Arc::new(SqliteCheckpointStore::new(pool.clone())),
        terms: Arc::new(SqliteTermRepository::new(pool)),
        memory: None,
    }
}

/// Retries without jitter so visibility times are exact
pub fn exact_retry(max_attempts: i32, base_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms,
        multiplier: 2.0,
        jitter: 0.0,
    }
}

pub fn import_pool() -> JobTypeConfig {
    JobTypeConfig::new(1).with_retry(exact_retry(3, 1000))
}

pub fn importer(
    opener: Arc<dyn SourceOpener>,
    stores: &Stores,
    clock: Arc<dyn TimeProvider>,
) -> Arc<dyn JobHandler> {
    Arc::new(BatchImporter::new(
        opener,
        Arc::clone(&stores.checkpoints),
        clock,
        ImportConfig::default(),
    ))
}

/// Manager on a manual clock with sequential ids
pub fn manager(
    stores: &Stores,
    clock: Arc<ManualClock>,
    handlers: Vec<(Arc<dyn JobHandler>, JobTypeConfig)>,
) -> JobQueueManager {
    let mut builder = JobQueueManager::builder(
        Arc::clone(&stores.jobs),
        Arc::clone(&stores.checkpoints),
    )
    .id_provider(Arc::new(SequentialIdProvider::new("job")))
    .time_provider(clock)
    .recovery_window_ms(0);
    for (handler, config) in handlers {
        builder = builder.register(handler, config);
    }
    builder.build().unwrap()
}

/// Run one claim-and-execute cycle for a type on the calling task
pub async fn process_one(manager: &JobQueueManager, job_type: &JobType) -> bool {
    manager
        .pool(job_type)
        .unwrap()
        .process_next_job()
        .await
        .unwrap()
}

pub fn import_payload(source: &str, batch_size: usize) -> serde_json::Value {
    ImportPayload {
        batch_size: Some(batch_size),
        ..ImportPayload::new(source)
    }
    .to_value()
}

/// Glossary rows: `Term-000`, a definition and a category
pub fn glossary_rows(count: usize) -> Vec<[String; 3]> {
    (0..count)
        .map(|i| {
            [
                format!("Term-{:03}", i),
                format!("Definition of term {}", i),
                format!("Category {}", i % 4),
            ]
        })
        .collect()
}

pub const GLOSSARY_HEADERS: [&str; 3] = ["Term", "Definition", "Category"];

pub fn as_cells(rows: &[[String; 3]]) -> Vec<Vec<&str>> {
    rows.iter()
        .map(|row| row.iter().map(String::as_str).collect())
        .collect()
}
