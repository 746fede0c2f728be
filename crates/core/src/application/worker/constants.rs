// Worker constants (no magic values)
use std::time::Duration;

/// Default polling interval of the processing loop (5s)
pub const DEFAULT_PROCESS_EVERY: Duration = Duration::from_secs(5);

/// Default number of jobs of one name running at once
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default number of jobs of one name locked at once (0 = unlimited)
pub const DEFAULT_LOCK_LIMIT: usize = 0;

/// Default lease before a claim counts as stale (10 minutes)
pub const DEFAULT_LOCK_LIFETIME_MS: i64 = 10 * 60 * 1000;

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// How long shutdown waits for in-flight handlers (5s)
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered events per subscriber before it starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timezone used when a job has no `repeat_timezone`
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Reason recorded when a claim finds an overrun execution
pub const TIMEOUT_FAIL_REASON: &str = "Timeout";

/// Upper bound on candidates skipped by a weekday `skip_days` list
pub const MAX_SKIP_DAY_ATTEMPTS: usize = 8;
