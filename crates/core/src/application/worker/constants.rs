// Worker constants (No magic values)
use std::time::Duration;

/// Sleep duration after a store error before the pool tries again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Upper bound on waiting for in-flight executions at shutdown (30s)
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest sleep while the rate limiter has no token (5ms)
pub const MIN_THROTTLE_SLEEP: Duration = Duration::from_millis(5);

/// How often a running job refreshes its `updated_at` (30s)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How often a started engine rescans for orphaned jobs (60s)
pub const RECOVERY_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default recovery window for orphaned jobs (5 minutes)
pub const DEFAULT_RECOVERY_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Error recorded on jobs recovered after their final attempt
pub const ORPHANED_FINAL_ATTEMPT_ERROR: &str = "orphaned after final attempt";

/// Error recorded on jobs requeued by recovery
pub const ORPHANED_REQUEUE_ERROR: &str = "orphaned by process restart";
