// Per-pool controls: pause flag, wake-up signal, and cancellation tokens of running jobs

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// Pause/resume and wake-up signalling for one worker pool
pub struct PoolControl {
    paused: watch::Sender<bool>,
    wake: Notify,
}

impl PoolControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            wake: Notify::new(),
        }
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
        self.wake();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolves once the pool is not paused
    pub async fn wait_until_resumed(&self) {
        let mut rx = self.paused.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    /// Wake an idle pool (new job enqueued); a wake with nobody idle is kept for the next wait
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn woken(&self) {
        self.wake.notified().await;
    }
}

impl Default for PoolControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation tokens of jobs executing in this process
#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn register(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock().insert(job_id.to_string(), token.clone());
        token
    }

    pub fn remove(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    /// Fire the token of a running job; false if it is not running here
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
