// Job lifecycle
//
// A JobHandle is a job record bound to the scheduler that owns it. Pure
// field mutations live on `domain::Job`; everything here may touch the store
// or publish events.

use crate::application::events::EventKind;
use crate::application::next_run;
use crate::application::scheduler::SchedulerContext;
use crate::domain::{Job, JobId, JobKind, Priority, RepeatOptions, Timestamp, UniqueOpts};
use crate::error::{AppError, Result};
use crate::port::{HandlerError, JobContext, JobRepository, LeaseKeeper, TimeProvider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct LeaseState {
    id: Option<JobId>,
    locked_at: Option<Timestamp>,
    lost: bool,
}

/// Ownership of a claimed job, renewed by compare-and-set on `locked_at`
pub(crate) struct Lease {
    repo: Arc<dyn JobRepository>,
    time: Arc<dyn TimeProvider>,
    state: Mutex<LeaseState>,
}

impl Lease {
    fn new(repo: Arc<dyn JobRepository>, time: Arc<dyn TimeProvider>, job: &Job) -> Self {
        Self {
            repo,
            time,
            state: Mutex::new(LeaseState {
                id: job.id.clone(),
                locked_at: job.locked_at,
                lost: false,
            }),
        }
    }

    /// Remember what the store last returned for this job
    async fn observe(&self, job: &Job) {
        let mut state = self.state.lock().await;
        state.id = job.id.clone();
        state.locked_at = job.locked_at;
    }

    async fn is_lost(&self) -> bool {
        self.state.lock().await.lost
    }
}

#[async_trait]
impl LeaseKeeper for Lease {
    async fn renew(&self) -> Result<Timestamp> {
        let mut state = self.state.lock().await;
        let id = state
            .id
            .clone()
            .ok_or_else(|| AppError::InvalidState("job has not been saved".to_string()))?;

        let now = self.time.now_millis();
        if !self.repo.touch(&id, state.locked_at, now).await? {
            state.lost = true;
            warn!(job_id = %id, "Lease lost, job was reclaimed by another poller");
            return Err(AppError::LeaseLost(id));
        }
        state.locked_at = Some(now);
        Ok(now)
    }
}

/// A job bound to its scheduler
pub struct JobHandle {
    ctx: Arc<SchedulerContext>,
    attrs: Job,
    lease: Arc<Lease>,
    running: Arc<AtomicBool>,
}

impl JobHandle {
    pub(crate) fn new(ctx: Arc<SchedulerContext>, attrs: Job) -> Self {
        let lease = Arc::new(Lease::new(
            Arc::clone(&ctx.repo),
            Arc::clone(&ctx.time),
            &attrs,
        ));
        Self {
            ctx,
            attrs,
            lease,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn attrs(&self) -> &Job {
        &self.attrs
    }

    pub fn into_job(self) -> Job {
        self.attrs
    }

    pub fn id(&self) -> Option<&JobId> {
        self.attrs.id.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.attrs.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn now(&self) -> Timestamp {
        self.ctx.time.now_millis()
    }

    pub fn schedule(&mut self, when: Timestamp) -> &mut Self {
        self.attrs.schedule(when);
        self
    }

    pub fn priority(&mut self, priority: Priority) -> &mut Self {
        self.attrs.priority = priority;
        self
    }

    pub fn set_kind(&mut self, kind: JobKind) -> &mut Self {
        self.attrs.kind = kind;
        self
    }

    pub fn unique(&mut self, unique: serde_json::Value, opts: Option<UniqueOpts>) -> &mut Self {
        self.attrs.set_unique(unique, opts);
        self
    }

    pub fn set_should_save_result(&mut self, should_save_result: bool) -> &mut Self {
        self.attrs.should_save_result = should_save_result;
        self
    }

    /// Repeat on a human interval or cron expression
    ///
    /// With `skip_immediate` the first run is one interval from now instead
    /// of now.
    pub fn repeat_every(&mut self, interval: &str, options: &RepeatOptions) -> &mut Self {
        self.attrs.apply_repeat_options(interval, options);
        if options.skip_immediate {
            self.attrs.last_run_at = Some(self.now());
            self.compute_next_run_at();
            self.attrs.last_run_at = None;
        } else {
            self.compute_next_run_at();
        }
        self
    }

    /// Repeat daily at a local time of day ("3:30pm")
    pub fn repeat_at(&mut self, time_of_day: impl Into<String>) -> &mut Self {
        self.attrs.repeat_at = Some(time_of_day.into());
        self
    }

    /// Recompute `next_run_at`. An invalid recurrence fails the job and
    /// leaves it unscheduled.
    pub fn compute_next_run_at(&mut self) -> &mut Self {
        let now = self.now();
        match next_run::compute_next_run_at(
            &self.attrs,
            now,
            self.ctx.recurrence.as_ref(),
            &self.ctx.config.default_timezone,
        ) {
            Ok(next_run_at) => self.attrs.next_run_at = next_run_at,
            Err(e) => {
                warn!(job_name = %self.attrs.name, error = %e, "Failed to compute next run");
                self.attrs.next_run_at = None;
                self.attrs.fail(e.to_string(), now);
            }
        }
        self
    }

    /// Record a failure without releasing the lock
    pub fn fail(&mut self, reason: impl Into<String>) -> &mut Self {
        let reason = reason.into();
        let now = self.now();
        warn!(
            job_id = ?self.attrs.id,
            job_name = %self.attrs.name,
            reason = %reason,
            "Job failed"
        );
        self.attrs.fail(reason, now);
        self
    }

    /// Persist with the upsert rule matching the job's shape
    pub async fn save(&mut self) -> Result<()> {
        self.attrs.last_modified_by = self.ctx.config.name.clone();
        let stored = self.ctx.repo.save(&self.attrs, self.now()).await?;
        self.lease.observe(&stored).await;
        self.attrs = stored;
        Ok(())
    }

    /// Extend the lease on a job being worked on
    pub async fn touch(&mut self) -> Result<Timestamp> {
        let now = self.lease.renew().await?;
        self.attrs.locked_at = Some(now);
        Ok(now)
    }

    pub async fn remove(&self) -> Result<u64> {
        match &self.attrs.id {
            Some(id) => self.ctx.repo.remove(id).await,
            None => Ok(0),
        }
    }

    pub async fn disable(&mut self) -> Result<()> {
        self.attrs.disable();
        self.save().await
    }

    pub async fn enable(&mut self) -> Result<()> {
        self.attrs.enable();
        self.save().await
    }

    /// Execute the job once
    ///
    /// The next run is computed and persisted before the handler starts, so
    /// a crash mid-run still leaves a recurring job scheduled. Handler
    /// failures are recorded on the job, not returned; only store errors
    /// propagate.
    pub async fn run(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        let started = self.now();
        self.attrs.start(started);
        self.compute_next_run_at();
        self.save().await?;

        info!(
            job_id = ?self.attrs.id,
            job_name = %self.attrs.name,
            next_run_at = ?self.attrs.next_run_at,
            "Job started"
        );
        self.ctx.events.emit(EventKind::Start, &self.attrs, None);

        let outcome = self.invoke_handler().await;
        let finished = self.now();

        match outcome {
            Ok(result) => {
                self.attrs.complete(finished, result);
                info!(
                    job_id = ?self.attrs.id,
                    job_name = %self.attrs.name,
                    duration_ms = %(finished - started),
                    "Job succeeded"
                );
                self.ctx.events.emit(EventKind::Success, &self.attrs, None);
            }
            Err(e) => {
                let reason = e.to_string();
                self.fail(reason.clone());
                self.ctx.events.emit(EventKind::Fail, &self.attrs, Some(&reason));
            }
        }
        self.ctx.events.emit(EventKind::Complete, &self.attrs, None);

        self.attrs.release();
        if self.lease.is_lost().await {
            // Another poller owns the record now
            warn!(job_id = ?self.attrs.id, "Skipping final save of reclaimed job");
            return Ok(());
        }
        self.save().await
    }

    async fn invoke_handler(&self) -> std::result::Result<Option<serde_json::Value>, HandlerError> {
        let Some(registration) = self.ctx.registration(&self.attrs.name).await else {
            return Err(HandlerError::Undefined(self.attrs.name.clone()));
        };

        let lease: Arc<dyn LeaseKeeper> = self.lease.clone();
        let job_ctx = JobContext::new(
            self.attrs.clone(),
            lease,
            registration.definition.lock_lifetime_ms,
        );
        let handler = registration.handler;

        debug!(job_id = ?self.attrs.id, "Invoking handler");
        // Spawned so a panicking handler fails the job instead of the poller
        match tokio::spawn(async move { handler.handle(job_ctx).await }).await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let message = panic_message(join_err);
                error!(job_id = ?self.attrs.id, panic_msg = %message, "Handler panicked");
                Err(HandlerError::Panicked(message))
            }
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("attrs", &self.attrs)
            .field("running", &self.is_running())
            .finish()
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
