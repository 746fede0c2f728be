// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4, assigned by the store)
pub type JobId = String;

/// Epoch milliseconds
pub type Timestamp = i64;

/// Priority (higher number = claimed first)
pub type Priority = i32;

/// Job Kind
///
/// `Single` jobs are upserted by name, so at most one record per name exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Normal,
    Single,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Normal => write!(f, "normal"),
            JobKind::Single => write!(f, "single"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(JobKind::Normal),
            "single" => Ok(JobKind::Single),
            other => Err(DomainError::InvalidKind(other.to_string())),
        }
    }
}

/// Named priorities accepted by [`parse_priority`]
pub const PRIORITY_LOWEST: Priority = -20;
pub const PRIORITY_LOW: Priority = -10;
pub const PRIORITY_NORMAL: Priority = 0;
pub const PRIORITY_HIGH: Priority = 10;
pub const PRIORITY_HIGHEST: Priority = 20;

/// Parse a priority given either by name ("high") or as a number ("15")
pub fn parse_priority(value: &str) -> Result<Priority> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lowest" => Ok(PRIORITY_LOWEST),
        "low" => Ok(PRIORITY_LOW),
        "normal" => Ok(PRIORITY_NORMAL),
        "high" => Ok(PRIORITY_HIGH),
        "highest" => Ok(PRIORITY_HIGHEST),
        other => other
            .parse::<Priority>()
            .map_err(|_| DomainError::InvalidPriority(value.to_string())),
    }
}

/// Job Payload (JSON serializable)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Options attached to a `unique` key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueOpts {
    /// Never overwrite an existing record with the same key
    pub insert_only: bool,
}

/// Options for [`Job::apply_repeat_options`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepeatOptions {
    pub timezone: Option<String>,
    /// Start counting from now instead of running immediately
    pub skip_immediate: bool,
    pub start_date: Option<Timestamp>,
    pub end_date: Option<Timestamp>,
    pub skip_days: Option<String>,
}

/// Job Record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    // Identity
    pub id: Option<JobId>,
    pub kind: JobKind,
    pub name: String,

    // Claim eligibility
    pub disabled: bool,
    pub next_run_at: Option<Timestamp>,
    pub locked_at: Option<Timestamp>,
    pub priority: Priority,

    pub data: JobPayload,
    pub unique: Option<serde_json::Value>,
    pub unique_opts: Option<UniqueOpts>,

    // Recurrence
    pub repeat_interval: Option<String>,
    pub repeat_at: Option<String>,
    pub repeat_timezone: Option<String>,
    pub start_date: Option<Timestamp>,
    pub end_date: Option<Timestamp>,
    pub skip_days: Option<String>,

    // Execution bracket
    pub last_run_at: Option<Timestamp>,
    pub last_finished_at: Option<Timestamp>,

    // Failure bookkeeping
    pub fail_reason: Option<String>,
    pub fail_count: i32,
    pub failed_at: Option<Timestamp>,

    pub last_modified_by: Option<String>,
    pub should_save_result: bool,
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Create an unsaved job that is due at `now`
    pub fn new(name: impl Into<String>, data: JobPayload, now: Timestamp) -> Self {
        Self {
            id: None,
            kind: JobKind::Normal,
            name: name.into(),
            disabled: false,
            next_run_at: Some(now),
            locked_at: None,
            priority: PRIORITY_NORMAL,
            data,
            unique: None,
            unique_opts: None,
            repeat_interval: None,
            repeat_at: None,
            repeat_timezone: None,
            start_date: None,
            end_date: None,
            skip_days: None,
            last_run_at: None,
            last_finished_at: None,
            fail_reason: None,
            fail_count: 0,
            failed_at: None,
            last_modified_by: None,
            should_save_result: false,
            result: None,
        }
    }

    /// Job carries a recurrence and will be rescheduled after each run
    pub fn is_repeating(&self) -> bool {
        self.repeat_interval.is_some() || self.repeat_at.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Set the next run time (also revives a terminal job)
    pub fn schedule(&mut self, when: Timestamp) {
        self.next_run_at = Some(when);
    }

    /// Record a failure. Does not release the lock.
    pub fn fail(&mut self, reason: impl Into<String>, now: Timestamp) {
        self.fail_reason = Some(reason.into());
        self.fail_count += 1;
        self.failed_at = Some(now);
        self.last_finished_at = Some(now);
    }

    /// Mark execution start
    pub fn start(&mut self, now: Timestamp) {
        self.last_run_at = Some(now);
    }

    /// Mark normal completion, keeping the handler output when requested
    pub fn complete(&mut self, now: Timestamp, result: Option<serde_json::Value>) {
        self.last_finished_at = Some(now);
        if self.should_save_result {
            if let Some(value) = result {
                self.result = Some(value);
            }
        }
    }

    pub fn release(&mut self) {
        self.locked_at = None;
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn enable(&mut self) {
        self.disabled = false;
    }

    pub fn set_unique(&mut self, unique: serde_json::Value, opts: Option<UniqueOpts>) {
        self.unique = Some(unique);
        self.unique_opts = opts;
    }

    /// Canonical text of the `unique` key (object keys are sorted by serde_json)
    pub fn unique_key(&self) -> Option<String> {
        self.unique.as_ref().map(|value| value.to_string())
    }

    pub fn is_insert_only(&self) -> bool {
        self.unique_opts.map(|o| o.insert_only).unwrap_or(false)
    }

    /// Install a repeat interval and its window. Next run is computed by the caller.
    pub fn apply_repeat_options(&mut self, interval: impl Into<String>, options: &RepeatOptions) {
        self.repeat_interval = Some(interval.into());
        self.repeat_timezone = options.timezone.clone();
        self.start_date = options.start_date;
        self.end_date = options.end_date;
        self.skip_days = options.skip_days.clone();
    }

    /// Stale-execution check applied right after a claim.
    ///
    /// True when the previous run started more than `lock_lifetime_ms` ago
    /// without this overrun having been recorded as a failure. Repeating jobs
    /// additionally need their next run still ahead and their last finish to
    /// be no later than their last failure; an absent operand makes either of
    /// those comparisons false.
    pub fn is_stale_execution(&self, lock_lifetime_ms: i64, now: Timestamp) -> bool {
        let Some(last_run_at) = self.last_run_at else {
            return false;
        };
        if last_run_at + lock_lifetime_ms > now {
            return false;
        }

        let overrun_unrecorded = match self.failed_at {
            None => true,
            Some(failed_at) => failed_at < last_run_at,
        };
        if !overrun_unrecorded {
            return false;
        }

        if !self.is_repeating() {
            return true;
        }

        let next_run_ahead = matches!(self.next_run_at, Some(next) if now <= next);
        let finished_by_failure = matches!(
            (self.last_finished_at, self.failed_at),
            (Some(finished), Some(failed)) if finished <= failed
        );
        next_run_ahead && finished_by_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    fn job() -> Job {
        Job::new("send-email", JobPayload::new(serde_json::json!({})), 0)
    }

    #[test]
    fn test_new_job_is_due_and_unlocked() {
        let job = Job::new("report", JobPayload::default(), 1_000);
        assert_eq!(job.next_run_at, Some(1_000));
        assert!(!job.is_locked());
        assert!(!job.disabled);
        assert_eq!(job.kind, JobKind::Normal);
        assert!(job.id.is_none());
    }

    #[test]
    fn test_fail_sets_bookkeeping_but_keeps_lock() {
        let mut job = job();
        job.locked_at = Some(5);
        job.fail("boom", 10);
        job.fail("boom again", 20);

        assert_eq!(job.fail_reason.as_deref(), Some("boom again"));
        assert_eq!(job.fail_count, 2);
        assert_eq!(job.failed_at, Some(20));
        assert_eq!(job.last_finished_at, Some(20));
        assert_eq!(job.locked_at, Some(5));
    }

    #[test]
    fn test_complete_saves_result_only_when_requested() {
        let mut job = job();
        job.complete(10, Some(serde_json::json!({"sent": 3})));
        assert!(job.result.is_none());
        assert_eq!(job.last_finished_at, Some(10));

        job.should_save_result = true;
        job.complete(20, Some(serde_json::json!({"sent": 3})));
        assert_eq!(job.result, Some(serde_json::json!({"sent": 3})));
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority("highest").unwrap(), 20);
        assert_eq!(parse_priority("Low").unwrap(), -10);
        assert_eq!(parse_priority("7").unwrap(), 7);
        assert!(parse_priority("urgent").is_err());
    }

    #[test]
    fn test_kind_round_trips_through_text() {
        assert_eq!("single".parse::<JobKind>().unwrap(), JobKind::Single);
        assert_eq!(JobKind::Single.to_string(), "single");
        assert!("batch".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_unique_key_is_canonical() {
        let mut a = job();
        a.set_unique(serde_json::json!({"b": 1, "a": 2}), None);
        let mut b = job();
        b.set_unique(serde_json::json!({"a": 2, "b": 1}), None);
        assert_eq!(a.unique_key(), b.unique_key());
        assert!(!a.is_insert_only());
    }

    #[test]
    fn test_stale_execution_non_repeating() {
        let now = 100 * MINUTE;
        let mut job = job();
        job.last_run_at = Some(now - 60 * MINUTE);

        assert!(job.is_stale_execution(30 * MINUTE, now));
        // Lease not yet expired
        assert!(!job.is_stale_execution(90 * MINUTE, now));
    }

    #[test]
    fn test_stale_execution_never_ran() {
        assert!(!job().is_stale_execution(MINUTE, 100 * MINUTE));
    }

    #[test]
    fn test_stale_execution_already_recorded() {
        let now = 100 * MINUTE;
        let mut job = job();
        job.last_run_at = Some(now - 60 * MINUTE);
        job.failed_at = Some(now - 50 * MINUTE);
        assert!(!job.is_stale_execution(30 * MINUTE, now));

        // Failure belongs to an earlier run
        job.failed_at = Some(now - 70 * MINUTE);
        assert!(job.is_stale_execution(30 * MINUTE, now));
    }

    #[test]
    fn test_stale_execution_repeating_needs_prior_failure() {
        let now = 100 * MINUTE;
        let mut job = job();
        job.repeat_interval = Some("1 hour".to_string());
        job.last_run_at = Some(now - 60 * MINUTE);
        job.next_run_at = Some(now + 10 * MINUTE);

        // Neither last_finished_at nor failed_at present
        assert!(!job.is_stale_execution(30 * MINUTE, now));

        // Only last_finished_at present
        job.last_finished_at = Some(now - 59 * MINUTE);
        assert!(!job.is_stale_execution(30 * MINUTE, now));

        // Only failed_at present, from an earlier run
        job.last_finished_at = None;
        job.failed_at = Some(now - 120 * MINUTE);
        assert!(!job.is_stale_execution(30 * MINUTE, now));

        // Previous run ended in failure, current run never finished
        job.failed_at = Some(now - 120 * MINUTE);
        job.last_finished_at = Some(now - 120 * MINUTE);
        assert!(job.is_stale_execution(30 * MINUTE, now));

        // Next run already due
        job.next_run_at = Some(now - MINUTE);
        assert!(!job.is_stale_execution(30 * MINUTE, now));

        // Next run absent
        job.next_run_at = None;
        assert!(!job.is_stale_execution(30 * MINUTE, now));
    }

    #[test]
    fn test_apply_repeat_options() {
        let mut job = job();
        let options = RepeatOptions {
            timezone: Some("Europe/Berlin".to_string()),
            skip_immediate: false,
            start_date: Some(5),
            end_date: Some(50),
            skip_days: Some("sat,sun".to_string()),
        };
        job.apply_repeat_options("1 hour", &options);

        assert!(job.is_repeating());
        assert_eq!(job.repeat_interval.as_deref(), Some("1 hour"));
        assert_eq!(job.repeat_timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(job.start_date, Some(5));
        assert_eq!(job.end_date, Some(50));
        assert_eq!(job.skip_days.as_deref(), Some("sat,sun"));
    }
}
