// Event Observer Port + broadcast bus

use crate::domain::JobEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Default buffered events per subscriber before lagging ones drop events
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Receives every job event; must not block
pub trait EventObserver: Send + Sync {
    fn observe(&self, event: &JobEvent);
}

/// Logs lifecycle events through tracing
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn observe(&self, event: &JobEvent) {
        match event {
            JobEvent::DeadLettered {
                job_id,
                job_type,
                attempt,
                error,
            } => warn!(
                job_id = %job_id,
                job_type = %job_type,
                attempt = attempt,
                error = %error,
                "job event: dead_lettered"
            ),
            JobEvent::Stalled {
                job_id,
                job_type,
                budget_secs,
            } => warn!(
                job_id = %job_id,
                job_type = %job_type,
                budget_secs = budget_secs,
                "job event: stalled"
            ),
            other => info!(job_id = %other.job_id(), event = other.name(), "job event"),
        }
    }
}

/// Fire-and-forget fan-out of job events
///
/// Publishing never blocks and never fails: with no subscribers the event is dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    observers: Arc<Vec<Arc<dyn EventObserver>>>,
}

impl EventBus {
    pub fn new(observers: Vec<Arc<dyn EventObserver>>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            observers: Arc::new(observers),
        }
    }

    pub fn publish(&self, event: JobEvent) {
        for observer in self.observers.iter() {
            observer.observe(&event);
        }
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Observer that keeps every event it sees
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<JobEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<JobEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn names_for(&self, job_id: &str) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.job_id() == job_id)
                .map(|e| e.name())
                .collect()
        }
    }

    impl EventObserver for RecordingObserver {
        fn observe(&self, event: &JobEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
