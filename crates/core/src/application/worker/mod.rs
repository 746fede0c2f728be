// Worker - processing loop for one job name

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::claim;
use crate::application::lifecycle::JobHandle;
use crate::application::scheduler::SchedulerContext;
use crate::domain::{Job, JobDefinition, JobId};
use crate::error::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Decrements the locked-job count when a claimed job is done with
struct SlotGuard(Arc<AtomicUsize>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Polls the store for one job name and runs what it claims
pub struct Worker {
    ctx: Arc<SchedulerContext>,
    definition: JobDefinition,
    /// Jobs claimed and not yet finished
    locked: Arc<AtomicUsize>,
    /// Jobs claimed and not yet started
    pending: Arc<Mutex<HashSet<JobId>>>,
}

impl Worker {
    pub(crate) fn new(ctx: Arc<SchedulerContext>, definition: JobDefinition) -> Self {
        Self {
            ctx,
            definition,
            locked: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.definition.name
    }

    /// Most jobs this worker holds locked at once
    fn capacity(&self) -> usize {
        match self.definition.lock_limit {
            0 => self.definition.concurrency,
            limit => limit.min(self.definition.concurrency),
        }
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(job_name = %self.definition.name, "Worker started");
        let mut tasks = JoinSet::new();

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let pause = match self.fill(&mut tasks, &shutdown).await {
                Ok(claimed) => {
                    if claimed > 0 {
                        debug!(job_name = %self.definition.name, claimed = %claimed, "Jobs claimed");
                    }
                    self.ctx.config.process_every
                }
                Err(e) => {
                    error!(job_name = %self.definition.name, error = %e, "Worker error");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(job_name = %self.definition.name, error = %e, "Job task aborted");
                }
            }

            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => {
                    info!(job_name = %self.definition.name, "Worker interrupted during idle");
                    break;
                }
            }
        }

        self.stop(tasks).await;
        info!(job_name = %self.definition.name, "Worker stopped");
        Ok(())
    }

    /// Claim until the store is drained or capacity is reached
    async fn fill(&self, tasks: &mut JoinSet<()>, shutdown: &ShutdownToken) -> Result<usize> {
        let scan_horizon = self.ctx.time.now_millis() + self.ctx.config.process_every_ms();
        let mut claimed = 0;

        while !shutdown.is_shutdown() && self.locked.load(Ordering::SeqCst) < self.capacity() {
            let Some(job) =
                claim::find_and_lock_next_job(&self.ctx, &self.definition, scan_horizon).await?
            else {
                break;
            };
            let Some(id) = job.id.clone() else {
                warn!(job_name = %job.name, "Claimed job without id, skipping");
                continue;
            };

            self.locked.fetch_add(1, Ordering::SeqCst);
            lock_pending(&self.pending).insert(id.clone());
            claimed += 1;

            let task = JobTask {
                ctx: Arc::clone(&self.ctx),
                lock_lifetime_ms: self.definition.lock_lifetime_ms,
                pending: Arc::clone(&self.pending),
                slot: SlotGuard(Arc::clone(&self.locked)),
            };
            let shutdown = shutdown.clone();
            tasks.spawn(async move { task.execute(id, job, shutdown).await });
        }

        Ok(claimed)
    }

    /// Release claimed-but-unstarted jobs, then wait for running ones
    async fn stop(&self, mut tasks: JoinSet<()>) {
        let ids: Vec<JobId> = lock_pending(&self.pending).drain().collect();
        if !ids.is_empty() {
            match self.ctx.repo.unlock(&ids).await {
                Ok(unlocked) => {
                    info!(job_name = %self.definition.name, unlocked = %unlocked, "Released unstarted jobs")
                }
                Err(e) => {
                    error!(job_name = %self.definition.name, error = %e, "Failed to release unstarted jobs")
                }
            }
        }

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(job_name = %self.definition.name, error = %e, "Job task aborted");
                }
            }
        };
        if timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(
                job_name = %self.definition.name,
                "Jobs still running at shutdown, their locks will expire"
            );
        }
    }
}

fn lock_pending(pending: &Mutex<HashSet<JobId>>) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One claimed job on its way to the handler
struct JobTask {
    ctx: Arc<SchedulerContext>,
    lock_lifetime_ms: i64,
    pending: Arc<Mutex<HashSet<JobId>>>,
    slot: SlotGuard,
}

impl JobTask {
    async fn execute(self, id: JobId, job: Job, mut shutdown: ShutdownToken) {
        let _slot = self.slot;

        // Due after its lease ends: hand it back instead of holding the slot
        if let (Some(due), Some(locked_at)) = (job.next_run_at, job.locked_at) {
            if due > locked_at + self.lock_lifetime_ms {
                if lock_pending(&self.pending).remove(&id) {
                    release_early(&self.ctx, &id, &job.name, due).await;
                }
                return;
            }
        }

        let wait_ms = job
            .next_run_at
            .map(|due| due - self.ctx.time.now_millis())
            .unwrap_or(0);
        if wait_ms > 0 {
            tokio::select! {
                _ = sleep(Duration::from_millis(wait_ms as u64)) => {},
                _ = shutdown.wait() => return,
            }
        }

        // Whoever removes the id owns the job; stop() may have released it
        if !lock_pending(&self.pending).remove(&id) {
            return;
        }

        let now = self.ctx.time.now_millis();
        if let Some(locked_at) = job.locked_at {
            if locked_at + self.lock_lifetime_ms < now {
                warn!(job_id = %id, job_name = %job.name, "Lock expired before start, skipping");
                return;
            }
        }

        let mut handle = JobHandle::new(self.ctx, job);
        if let Err(e) = handle.run().await {
            error!(job_id = %id, error = %e, "Job run failed to persist");
        }
    }
}

async fn release_early(ctx: &SchedulerContext, id: &JobId, job_name: &str, due: i64) {
    match ctx.repo.unlock(std::slice::from_ref(id)).await {
        Ok(_) => {
            debug!(job_id = %id, job_name = %job_name, next_run_at = %due, "Next run beyond lock lifetime, released")
        }
        Err(e) => {
            error!(job_id = %id, job_name = %job_name, error = %e, "Failed to release job")
        }
    }
}
