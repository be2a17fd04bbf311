// Jobflow In-Memory Adapters
//
// Same contracts as the SQLite adapter, held behind a mutex. Nothing survives a restart.

mod checkpoint_store;
mod job_store;
mod maintenance;

pub use checkpoint_store::MemoryCheckpointStore;
pub use job_store::MemoryJobStore;
pub use maintenance::MemoryMaintenance;

use jobflow_core::error::AppError;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, AppError> {
    mutex
        .lock()
        .map_err(|_| AppError::Internal("in-memory store lock poisoned".to_string()))
}
