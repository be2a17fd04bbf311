// Jobflow Infrastructure - SQLite Adapter
// Implements: JobStore, CheckpointStore, TermRepository, Maintenance

mod checkpoint_store;
mod connection;
mod error;
mod job_store;
mod maintenance_impl;
mod migration;
mod term_repository;

pub use checkpoint_store::SqliteCheckpointStore;
pub use connection::{create_pool, DEFAULT_MAX_CONNECTIONS};
pub use job_store::SqliteJobStore;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use term_repository::SqliteTermRepository;

pub use sqlx::SqlitePool;
