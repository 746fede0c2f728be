// Claim protocol
//
// One atomic find-and-lock against the store, followed by the stale
// execution check on the record it returned.

use crate::application::events::EventKind;
use crate::application::scheduler::SchedulerContext;
use crate::application::worker::constants::TIMEOUT_FAIL_REASON;
use crate::domain::{Job, JobDefinition, Timestamp};
use crate::error::Result;
use crate::port::ClaimQuery;
use tracing::{debug, warn};

/// Claim the next eligible job of `definition.name`
///
/// Unlocked jobs due by `scan_horizon` and jobs whose lock is older than the
/// definition's lock lifetime are eligible. A claimed job whose previous run
/// overran its lease without being recorded is failed with "Timeout",
/// unlocked and withheld: the caller sees `None`.
pub(crate) async fn find_and_lock_next_job(
    ctx: &SchedulerContext,
    definition: &JobDefinition,
    scan_horizon: Timestamp,
) -> Result<Option<Job>> {
    let now = ctx.time.now_millis();
    let query = ClaimQuery {
        name: &definition.name,
        now,
        scan_horizon,
        lock_deadline: now - definition.lock_lifetime_ms,
        order: &ctx.config.claim_order,
    };

    let Some(mut job) = ctx.repo.claim_next(&query).await? else {
        return Ok(None);
    };

    if job.is_stale_execution(definition.lock_lifetime_ms, now) {
        job.fail(TIMEOUT_FAIL_REASON, now);
        job.release();
        job.last_modified_by = ctx.config.name.clone();
        let job = ctx.repo.update(&job).await?;

        warn!(
            job_id = ?job.id,
            job_name = %job.name,
            last_run_at = ?job.last_run_at,
            lock_lifetime_ms = %definition.lock_lifetime_ms,
            "Job exceeded its lock lifetime, marked as failed"
        );
        ctx.events
            .emit(EventKind::Fail, &job, Some(TIMEOUT_FAIL_REASON));
        return Ok(None);
    }

    debug!(job_id = ?job.id, job_name = %job.name, "Job claimed");
    Ok(Some(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{harness, START};
    use crate::domain::{Job, JobPayload};
    use crate::port::JobRepository;

    const MINUTE: i64 = 60_000;

    fn definition() -> JobDefinition {
        JobDefinition::new("sync").with_lock_lifetime_ms(10 * MINUTE)
    }

    #[tokio::test]
    async fn test_claims_due_job_and_locks_it() {
        let h = harness();
        h.repo
            .insert(&Job::new("sync", JobPayload::default(), START))
            .await
            .unwrap();

        let claimed = find_and_lock_next_job(&h.ctx(), &definition(), START)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.locked_at, Some(START));

        // Locked and fresh: nobody else gets it
        let again = find_and_lock_next_job(&h.ctx(), &definition(), START)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_scan_horizon_includes_soon_due_jobs() {
        let h = harness();
        h.repo
            .insert(&Job::new("sync", JobPayload::default(), START + MINUTE))
            .await
            .unwrap();

        assert!(find_and_lock_next_job(&h.ctx(), &definition(), START)
            .await
            .unwrap()
            .is_none());
        assert!(find_and_lock_next_job(&h.ctx(), &definition(), START + MINUTE)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_priority_then_next_run_order() {
        let h = harness();
        let mut low = Job::new("sync", JobPayload::default(), START - 2 * MINUTE);
        low.priority = -10;
        let mut high_late = Job::new("sync", JobPayload::default(), START);
        high_late.priority = 10;
        let mut high_early = Job::new("sync", JobPayload::default(), START - MINUTE);
        high_early.priority = 10;
        let low = h.repo.insert(&low).await.unwrap();
        let high_late = h.repo.insert(&high_late).await.unwrap();
        let high_early = h.repo.insert(&high_early).await.unwrap();

        let mut order = Vec::new();
        while let Some(job) = find_and_lock_next_job(&h.ctx(), &definition(), START)
            .await
            .unwrap()
        {
            order.push(job.id);
        }
        assert_eq!(order, vec![high_early.id, high_late.id, low.id]);
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimable() {
        let h = harness();
        let mut job = Job::new("sync", JobPayload::default(), START - 20 * MINUTE);
        job.locked_at = Some(START - 15 * MINUTE);
        h.repo.insert(&job).await.unwrap();

        let claimed = find_and_lock_next_job(&h.ctx(), &definition(), START)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.locked_at, Some(START));
    }

    #[tokio::test]
    async fn test_overrun_execution_is_failed_with_timeout() {
        let h = harness();
        let mut events = h.scheduler.subscribe();
        let mut job = Job::new("sync", JobPayload::default(), START - 30 * MINUTE);
        job.locked_at = Some(START - 30 * MINUTE);
        job.last_run_at = Some(START - 30 * MINUTE);
        let stored = h.repo.insert(&job).await.unwrap();

        let claimed = find_and_lock_next_job(&h.ctx(), &definition(), START)
            .await
            .unwrap();
        assert!(claimed.is_none());

        let stored = h.repo.find_by_id(stored.id.as_ref().unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.fail_reason.as_deref(), Some("Timeout"));
        assert_eq!(stored.fail_count, 1);
        assert_eq!(stored.failed_at, Some(START));
        assert_eq!(stored.locked_at, None);

        let generic = events.recv().await.unwrap();
        let scoped = events.recv().await.unwrap();
        assert_eq!(generic.topic, "fail");
        assert_eq!(scoped.topic, "fail:sync");
    }

    #[tokio::test]
    async fn test_disabled_job_is_never_claimed() {
        let h = harness();
        let mut job = Job::new("sync", JobPayload::default(), START - MINUTE);
        job.disable();
        h.repo.insert(&job).await.unwrap();

        assert!(find_and_lock_next_job(&h.ctx(), &definition(), START + MINUTE)
            .await
            .unwrap()
            .is_none());
    }
}
