// Job Repository Port (Interface)

use crate::domain::{ClaimOrder, Job, JobId, JobKind, Timestamp};
use crate::error::Result;
use async_trait::async_trait;

/// Parameters of one claim attempt
#[derive(Debug, Clone)]
pub struct ClaimQuery<'a> {
    pub name: &'a str,
    /// Value written to `locked_at` on success
    pub now: Timestamp,
    /// Unlocked jobs due at or before this instant are eligible
    pub scan_horizon: Timestamp,
    /// Locked jobs whose lock is at or before this instant are eligible
    pub lock_deadline: Timestamp,
    pub order: &'a ClaimOrder,
}

/// Repository interface for Job persistence
///
/// Every method is a single atomic statement against the store; callers
/// never combine a read and a write to emulate one.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Find one eligible job, set its `locked_at`, return the updated record
    async fn claim_next(&self, query: &ClaimQuery<'_>) -> Result<Option<Job>>;

    /// Insert a new record, assigning its id
    async fn insert(&self, job: &Job) -> Result<Job>;

    /// Overwrite the record with the job's id
    async fn update(&self, job: &Job) -> Result<Job>;

    /// Upsert a `Single` job by name. A `next_run_at` at or before `now`
    /// never replaces the stored one.
    async fn upsert_single(&self, job: &Job, now: Timestamp) -> Result<Job>;

    /// Upsert by (`name`, `unique`), honoring `insert_only`
    async fn upsert_unique(&self, job: &Job) -> Result<Job>;

    /// Renew `locked_at` only if it still equals `expected_locked_at`
    async fn touch(
        &self,
        id: &JobId,
        expected_locked_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<bool>;

    /// Clear `locked_at` on the given jobs
    async fn unlock(&self, ids: &[JobId]) -> Result<u64>;

    async fn remove(&self, id: &JobId) -> Result<u64>;

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    async fn find_by_name(&self, name: &str) -> Result<Vec<Job>>;

    async fn remove_by_name(&self, name: &str) -> Result<u64>;

    /// Delete every job whose name is not listed
    async fn remove_except_names(&self, names: &[String]) -> Result<u64>;

    async fn set_disabled_by_name(&self, name: &str, disabled: bool) -> Result<u64>;

    async fn count_by_name(&self, name: &str) -> Result<i64>;

    /// Persist a job with the upsert rule matching its shape
    ///
    /// - has an id: update by id
    /// - `Single`: upsert by name
    /// - has a `unique` key: upsert by key
    /// - otherwise: insert
    async fn save(&self, job: &Job, now: Timestamp) -> Result<Job> {
        if job.id.is_some() {
            self.update(job).await
        } else if job.kind == JobKind::Single {
            self.upsert_single(job, now).await
        } else if job.unique.is_some() {
            self.upsert_unique(job).await
        } else {
            self.insert(job).await
        }
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::{SortDirection, SortField};
    use crate::error::AppError;
    use crate::port::id_provider::{IdProvider, SequentialIdProvider};
    use std::cmp::Ordering;
    use std::sync::Mutex;

    /// In-memory repository; one mutex makes every method atomic
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<Vec<Job>>,
        ids: SequentialIdProvider,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn all(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().clone()
        }

        fn compare(a: &Job, b: &Job, order: &ClaimOrder) -> Ordering {
            for (field, direction) in order.keys() {
                let ordering = match field {
                    SortField::Priority => a.priority.cmp(&b.priority),
                    SortField::NextRunAt => a.next_run_at.cmp(&b.next_run_at),
                    SortField::LastRunAt => a.last_run_at.cmp(&b.last_run_at),
                    SortField::Name => a.name.cmp(&b.name),
                };
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        }

        fn merge_definition(stored: &mut Job, incoming: &Job) {
            stored.data = incoming.data.clone();
            stored.priority = incoming.priority;
            stored.unique = incoming.unique.clone();
            stored.unique_opts = incoming.unique_opts;
            stored.repeat_interval = incoming.repeat_interval.clone();
            stored.repeat_at = incoming.repeat_at.clone();
            stored.repeat_timezone = incoming.repeat_timezone.clone();
            stored.start_date = incoming.start_date;
            stored.end_date = incoming.end_date;
            stored.skip_days = incoming.skip_days.clone();
            stored.should_save_result = incoming.should_save_result;
            stored.last_modified_by = incoming.last_modified_by.clone();
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn claim_next(&self, query: &ClaimQuery<'_>) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            let candidate = jobs
                .iter_mut()
                .filter(|job| job.name == query.name && !job.disabled)
                .filter(|job| match job.locked_at {
                    None => matches!(job.next_run_at, Some(next) if next <= query.scan_horizon),
                    Some(locked_at) => locked_at <= query.lock_deadline,
                })
                .min_by(|a, b| Self::compare(a, b, query.order));

            Ok(candidate.map(|job| {
                job.locked_at = Some(query.now);
                job.clone()
            }))
        }

        async fn insert(&self, job: &Job) -> Result<Job> {
            let mut stored = job.clone();
            stored.id = Some(self.ids.generate_id());
            self.jobs.lock().unwrap().push(stored.clone());
            Ok(stored)
        }

        async fn update(&self, job: &Job) -> Result<Job> {
            let mut jobs = self.jobs.lock().unwrap();
            let stored = jobs
                .iter_mut()
                .find(|stored| stored.id == job.id)
                .ok_or_else(|| AppError::NotFound(format!("Job {:?} not found", job.id)))?;
            *stored = job.clone();
            Ok(stored.clone())
        }

        async fn upsert_single(&self, job: &Job, now: Timestamp) -> Result<Job> {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(stored) = jobs
                .iter_mut()
                .find(|stored| stored.kind == JobKind::Single && stored.name == job.name)
            {
                Self::merge_definition(stored, job);
                if !matches!(job.next_run_at, Some(next) if next <= now) {
                    stored.next_run_at = job.next_run_at;
                }
                return Ok(stored.clone());
            }
            let mut stored = job.clone();
            stored.id = Some(self.ids.generate_id());
            jobs.push(stored.clone());
            Ok(stored)
        }

        async fn upsert_unique(&self, job: &Job) -> Result<Job> {
            let mut jobs = self.jobs.lock().unwrap();
            let key = job.unique_key();
            if let Some(stored) = jobs.iter_mut().find(|stored| {
                stored.kind != JobKind::Single
                    && stored.name == job.name
                    && stored.unique_key() == key
            }) {
                if !job.is_insert_only() {
                    Self::merge_definition(stored, job);
                    stored.next_run_at = job.next_run_at;
                    stored.disabled = job.disabled;
                }
                return Ok(stored.clone());
            }
            let mut stored = job.clone();
            stored.id = Some(self.ids.generate_id());
            jobs.push(stored.clone());
            Ok(stored)
        }

        async fn touch(
            &self,
            id: &JobId,
            expected_locked_at: Option<Timestamp>,
            now: Timestamp,
        ) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|job| job.id.as_ref() == Some(id)) {
                Some(job) if job.locked_at == expected_locked_at => {
                    job.locked_at = Some(now);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn unlock(&self, ids: &[JobId]) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut count = 0;
            for job in jobs.iter_mut() {
                if job.id.as_ref().is_some_and(|id| ids.contains(id)) {
                    job.locked_at = None;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn remove(&self, id: &JobId) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|job| job.id.as_ref() != Some(id));
            Ok((before - jobs.len()) as u64)
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.iter().find(|job| job.id.as_ref() == Some(id)).cloned())
        }

        async fn find_by_name(&self, name: &str) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.iter().filter(|job| job.name == name).cloned().collect())
        }

        async fn remove_by_name(&self, name: &str) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|job| job.name != name);
            Ok((before - jobs.len()) as u64)
        }

        async fn remove_except_names(&self, names: &[String]) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|job| names.contains(&job.name));
            Ok((before - jobs.len()) as u64)
        }

        async fn set_disabled_by_name(&self, name: &str, disabled: bool) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let mut count = 0;
            for job in jobs.iter_mut().filter(|job| job.name == name) {
                job.disabled = disabled;
                count += 1;
            }
            Ok(count)
        }

        async fn count_by_name(&self, name: &str) -> Result<i64> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.iter().filter(|job| job.name == name).count() as i64)
        }
    }
}
