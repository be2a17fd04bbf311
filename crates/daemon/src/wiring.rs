//! Composition root: stores, handlers and the manager

use crate::settings::{Settings, StorageBackend};
use anyhow::{Context, Result};
use jobflow_core::application::{
    BatchImporter, CacheWarmHandler, GenerationHandler, JobQueueManager, MaintenanceScheduler,
    NotificationHandler,
};
use jobflow_core::domain::JobType;
use jobflow_core::port::{
    CheckpointStore, JobHandler, JobStore, Maintenance, SystemTimeProvider, TermRepository,
    TimeProvider, TracingObserver,
};
use jobflow_infra_fs::FileSourceOpener;
use jobflow_infra_http::HttpOutboundClient;
use jobflow_infra_memory::{MemoryCheckpointStore, MemoryJobStore, MemoryMaintenance};
use jobflow_infra_sqlite::{
    create_pool, run_migrations, SqliteCheckpointStore, SqliteJobStore, SqliteMaintenance,
    SqliteTermRepository,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

struct Stores {
    jobs: Arc<dyn JobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    terms: Arc<dyn TermRepository>,
    maintenance: Arc<dyn Maintenance>,
}

async fn open_stores(settings: &Settings) -> Result<Stores> {
    match settings.storage.backend {
        StorageBackend::Sqlite => {
            let url = settings.storage.expanded_database_url();
            if let Some(parent) = url
                .strip_prefix("sqlite://")
                .and_then(|path| Path::new(path).parent())
                .filter(|dir| !dir.as_os_str().is_empty())
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("cannot create database directory {}", parent.display())
                })?;
            }

            info!(database_url = %url, "Opening SQLite store");
            let pool = create_pool(&url, settings.storage.max_connections)
                .await
                .context("DB pool creation failed")?;
            run_migrations(&pool).await.context("Migration failed")?;

            Ok(Stores {
                jobs: Arc::new(SqliteJobStore::new(pool.clone())),
                checkpoints: Arc::new(SqliteCheckpointStore::new(pool.clone())),
                terms: Arc::new(SqliteTermRepository::new(pool.clone())),
                maintenance: Arc::new(SqliteMaintenance::new(pool)),
            })
        }
        StorageBackend::Memory => {
            info!("Using in-memory store; nothing survives this process");
            let jobs = Arc::new(MemoryJobStore::new());
            let imports = Arc::new(MemoryCheckpointStore::new());
            Ok(Stores {
                jobs: jobs.clone(),
                checkpoints: imports.clone(),
                terms: imports.clone(),
                maintenance: Arc::new(MemoryMaintenance::new(jobs, imports)),
            })
        }
    }
}

/// Everything a command needs
pub struct Engine {
    pub manager: Arc<JobQueueManager>,
    pub maintenance: MaintenanceScheduler,
}

pub async fn build(settings: &Settings) -> Result<Engine> {
    let stores = open_stores(settings).await?;
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let outbound = Arc::new(
        HttpOutboundClient::new(settings.outbound.clone()).context("outbound client")?,
    );

    let handlers: Vec<Arc<dyn JobHandler>> = vec![
        Arc::new(BatchImporter::new(
            Arc::new(FileSourceOpener::new()),
            Arc::clone(&stores.checkpoints),
            Arc::clone(&time_provider),
            settings.import.clone(),
        )),
        Arc::new(NotificationHandler::new(outbound.clone())),
        Arc::new(GenerationHandler::new(
            outbound.clone(),
            Arc::clone(&stores.terms),
        )),
        Arc::new(CacheWarmHandler::new(outbound)),
    ];

    let mut builder = JobQueueManager::builder(
        Arc::clone(&stores.jobs),
        Arc::clone(&stores.checkpoints),
    )
    .time_provider(Arc::clone(&time_provider))
    .observer(Arc::new(TracingObserver));
    if let Some(window_ms) = settings.recovery_window_ms() {
        builder = builder.recovery_window_ms(window_ms);
    }
    for handler in handlers {
        let config = settings.pool(&handler.job_type());
        builder = builder.register(handler, config);
    }
    let manager = Arc::new(builder.build().context("invalid pool configuration")?);

    let maintenance = MaintenanceScheduler::new(
        stores.jobs,
        stores.checkpoints,
        stores.maintenance,
        time_provider,
        manager.job_types(),
        settings.maintenance.clone(),
    );

    Ok(Engine {
        manager,
        maintenance,
    })
}

/// Parse a job type argument against the registered pools
pub fn job_type(manager: &JobQueueManager, name: &str) -> Result<JobType> {
    let job_type = JobType::new(name);
    if manager.pool(&job_type).is_none() {
        let known: Vec<String> = manager.job_types().iter().map(|t| t.to_string()).collect();
        anyhow::bail!("unknown job type '{}' (expected one of: {})", name, known.join(", "));
    }
    Ok(job_type)
}
