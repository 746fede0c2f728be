// Scheduler - application entry point
//
// Owns the store, the job definitions, the calendar and the clock, and
// hands out JobHandles bound to them.

use crate::application::claim;
use crate::application::config::SchedulerConfig;
use crate::application::events::{EventBus, EventSubscription};
use crate::application::lifecycle::JobHandle;
use crate::application::worker::constants::EVENT_CHANNEL_CAPACITY;
use crate::application::worker::{ShutdownToken, Worker};
use crate::domain::{Job, JobDefinition, JobKind, JobPayload, RepeatOptions, Timestamp};
use crate::error::Result;
use crate::port::{JobHandler, JobRepository, RecurrenceProvider, TimeProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

/// A defined job name and the handler that runs it
#[derive(Clone)]
pub(crate) struct Registration {
    pub definition: JobDefinition,
    pub handler: Arc<dyn JobHandler>,
}

/// Everything a JobHandle, the claim protocol and a Worker share
pub(crate) struct SchedulerContext {
    pub repo: Arc<dyn JobRepository>,
    pub recurrence: Arc<dyn RecurrenceProvider>,
    pub time: Arc<dyn TimeProvider>,
    pub events: EventBus,
    pub config: SchedulerConfig,
    definitions: RwLock<HashMap<String, Registration>>,
}

impl SchedulerContext {
    pub async fn registration(&self, name: &str) -> Option<Registration> {
        self.definitions.read().await.get(name).cloned()
    }

    /// Registered definition, or one built from configuration defaults
    pub async fn definition(&self, name: &str) -> JobDefinition {
        match self.registration(name).await {
            Some(registration) => registration.definition,
            None => self.config.definition(name),
        }
    }
}

pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        recurrence: Arc<dyn RecurrenceProvider>,
        time: Arc<dyn TimeProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(SchedulerContext {
                repo,
                recurrence,
                time,
                events: EventBus::new(EVENT_CHANNEL_CAPACITY),
                config,
                definitions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.ctx.config
    }

    /// Register the handler for a job name (replaces an earlier definition)
    pub async fn define(
        &self,
        definition: JobDefinition,
        handler: Arc<dyn JobHandler>,
    ) -> Result<()> {
        definition.validate()?;
        info!(
            job_name = %definition.name,
            concurrency = %definition.concurrency,
            lock_limit = %definition.lock_limit,
            lock_lifetime_ms = %definition.lock_lifetime_ms,
            "Job defined"
        );
        self.ctx.definitions.write().await.insert(
            definition.name.clone(),
            Registration {
                definition,
                handler,
            },
        );
        Ok(())
    }

    pub async fn definitions(&self) -> Vec<JobDefinition> {
        self.ctx
            .definitions
            .read()
            .await
            .values()
            .map(|r| r.definition.clone())
            .collect()
    }

    /// Unsaved job due now, carrying its definition's priority and result policy
    pub async fn create(&self, name: &str, data: serde_json::Value) -> JobHandle {
        let mut job = Job::new(name, JobPayload::new(data), self.ctx.time.now_millis());
        if let Some(registration) = self.ctx.registration(name).await {
            job.priority = registration.definition.priority;
            job.should_save_result = registration.definition.should_save_result;
        }
        JobHandle::new(Arc::clone(&self.ctx), job)
    }

    /// Create and save a job that runs as soon as possible
    pub async fn now(&self, name: &str, data: serde_json::Value) -> Result<JobHandle> {
        let mut job = self.create(name, data).await;
        job.save().await?;
        Ok(job)
    }

    /// Create and save a job that runs at `when`
    pub async fn schedule(
        &self,
        when: Timestamp,
        name: &str,
        data: serde_json::Value,
    ) -> Result<JobHandle> {
        let mut job = self.create(name, data).await;
        job.schedule(when);
        job.save().await?;
        Ok(job)
    }

    /// Create or update the single recurring job for `name`
    pub async fn every(
        &self,
        interval: &str,
        name: &str,
        data: serde_json::Value,
        options: RepeatOptions,
    ) -> Result<JobHandle> {
        let mut job = self.create(name, data).await;
        job.set_kind(JobKind::Single).repeat_every(interval, &options);
        job.save().await?;
        Ok(job)
    }

    pub async fn jobs(&self, name: &str) -> Result<Vec<JobHandle>> {
        let jobs = self.ctx.repo.find_by_name(name).await?;
        Ok(jobs
            .into_iter()
            .map(|job| JobHandle::new(Arc::clone(&self.ctx), job))
            .collect())
    }

    pub async fn count(&self, name: &str) -> Result<i64> {
        self.ctx.repo.count_by_name(name).await
    }

    /// Delete every job with this name
    pub async fn cancel(&self, name: &str) -> Result<u64> {
        let removed = self.ctx.repo.remove_by_name(name).await?;
        info!(job_name = %name, removed = %removed, "Jobs cancelled");
        Ok(removed)
    }

    pub async fn disable_by_name(&self, name: &str) -> Result<u64> {
        self.ctx.repo.set_disabled_by_name(name, true).await
    }

    pub async fn enable_by_name(&self, name: &str) -> Result<u64> {
        self.ctx.repo.set_disabled_by_name(name, false).await
    }

    /// Delete jobs whose name has no definition
    pub async fn purge(&self) -> Result<u64> {
        let names: Vec<String> = self.ctx.definitions.read().await.keys().cloned().collect();
        let removed = self.ctx.repo.remove_except_names(&names).await?;
        info!(removed = %removed, "Purged jobs without a definition");
        Ok(removed)
    }

    /// Claim one job of `name` that is due now
    pub async fn claim_next(&self, name: &str) -> Result<Option<JobHandle>> {
        let definition = self.ctx.definition(name).await;
        let now = self.ctx.time.now_millis();
        let claimed = claim::find_and_lock_next_job(&self.ctx, &definition, now).await?;
        Ok(claimed.map(|job| JobHandle::new(Arc::clone(&self.ctx), job)))
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.ctx.events.subscribe()
    }

    pub fn subscribe_topic(&self, topic: impl Into<String>) -> EventSubscription {
        self.ctx.events.subscribe_topic(topic)
    }

    /// Spawn one processing loop per defined job name
    pub async fn start(&self, shutdown: ShutdownToken) -> Vec<JoinHandle<Result<()>>> {
        let definitions = self.definitions().await;
        info!(
            workers = %definitions.len(),
            process_every_ms = %self.ctx.config.process_every_ms(),
            "Scheduler starting"
        );
        definitions
            .into_iter()
            .map(|definition| {
                let worker = Worker::new(Arc::clone(&self.ctx), definition);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> Arc<SchedulerContext> {
        Arc::clone(&self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{harness, START};
    use crate::domain::UniqueOpts;
    use crate::port::job_handler::mocks::MockJobHandler;
    use serde_json::json;

    const MINUTE: i64 = 60_000;

    #[tokio::test]
    async fn test_define_rejects_invalid_definition() {
        let h = harness();
        let result = h
            .scheduler
            .define(
                JobDefinition::new("bad").with_concurrency(0),
                Arc::new(MockJobHandler::new_success()),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_uses_definition_defaults() {
        let h = harness();
        h.scheduler
            .define(
                JobDefinition::new("report")
                    .with_priority(10)
                    .with_should_save_result(true),
                Arc::new(MockJobHandler::new_success()),
            )
            .await
            .unwrap();

        let job = h.scheduler.create("report", json!({"x": 1})).await;
        assert_eq!(job.attrs().priority, 10);
        assert!(job.attrs().should_save_result);
        assert_eq!(job.attrs().next_run_at, Some(START));
        assert!(job.id().is_none());
    }

    #[tokio::test]
    async fn test_schedule_sets_next_run() {
        let h = harness();
        let job = h
            .scheduler
            .schedule(START + 5 * MINUTE, "later", json!({}))
            .await
            .unwrap();
        assert_eq!(job.attrs().next_run_at, Some(START + 5 * MINUTE));
        assert!(h.scheduler.claim_next("later").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_every_keeps_one_record_per_name() {
        let h = harness();
        h.scheduler
            .every("5 minutes", "heartbeat", json!({"v": 1}), RepeatOptions::default())
            .await
            .unwrap();
        let second = h
            .scheduler
            .every("10 minutes", "heartbeat", json!({"v": 2}), RepeatOptions::default())
            .await
            .unwrap();

        assert_eq!(h.scheduler.count("heartbeat").await.unwrap(), 1);
        assert_eq!(second.attrs().repeat_interval.as_deref(), Some("10 minutes"));
        assert_eq!(second.attrs().data.as_value(), &json!({"v": 2}));
        assert_eq!(second.attrs().kind, JobKind::Single);
    }

    #[tokio::test]
    async fn test_unique_insert_only_keeps_first() {
        let h = harness();
        let mut first = h.scheduler.create("mail", json!({"to": "a"})).await;
        first.unique(json!({"to": "a"}), Some(UniqueOpts { insert_only: true }));
        first.save().await.unwrap();

        let mut second = h.scheduler.create("mail", json!({"to": "b"})).await;
        second.unique(json!({"to": "a"}), Some(UniqueOpts { insert_only: true }));
        second.save().await.unwrap();

        let jobs = h.scheduler.jobs("mail").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].attrs().data.as_value(), &json!({"to": "a"}));
        assert_eq!(second.id(), first.id());
    }

    #[tokio::test]
    async fn test_cancel_disable_enable_by_name() {
        let h = harness();
        h.scheduler.now("a", json!({})).await.unwrap();
        h.scheduler.now("a", json!({})).await.unwrap();
        h.scheduler.now("b", json!({})).await.unwrap();

        assert_eq!(h.scheduler.disable_by_name("a").await.unwrap(), 2);
        assert!(h.scheduler.claim_next("a").await.unwrap().is_none());
        assert_eq!(h.scheduler.enable_by_name("a").await.unwrap(), 2);
        assert!(h.scheduler.claim_next("a").await.unwrap().is_some());

        assert_eq!(h.scheduler.cancel("a").await.unwrap(), 2);
        assert_eq!(h.scheduler.count("a").await.unwrap(), 0);
        assert_eq!(h.scheduler.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_undefined_names() {
        let h = harness();
        h.scheduler
            .define(JobDefinition::new("known"), Arc::new(MockJobHandler::new_success()))
            .await
            .unwrap();
        h.scheduler.now("known", json!({})).await.unwrap();
        h.scheduler.now("orphan", json!({})).await.unwrap();

        assert_eq!(h.scheduler.purge().await.unwrap(), 1);
        assert_eq!(h.scheduler.count("known").await.unwrap(), 1);
        assert_eq!(h.scheduler.count("orphan").await.unwrap(), 0);
    }
}
