// SQLite JobRepository Implementation

use async_trait::async_trait;
use lockstep_core::domain::{
    ClaimOrder, Job, JobId, JobKind, JobPayload, SortDirection, SortField, Timestamp, UniqueOpts,
};
use lockstep_core::error::{AppError, Result};
use lockstep_core::port::{ClaimQuery, IdProvider, JobRepository};
use sqlx::query::QueryAs;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{QueryBuilder, SqlitePool};
use std::sync::Arc;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // Extract database-specific error code and message
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => {
                        // UNIQUE constraint failed
                        AppError::Conflict(format!(
                            "Unique constraint violation: {} ({})",
                            db_err.message(),
                            code_str
                        ))
                    }
                    "5" => {
                        // SQLITE_BUSY - database is locked
                        AppError::Database(format!(
                            "Database locked (SQLITE_BUSY): {}",
                            db_err.message()
                        ))
                    }
                    "13" => {
                        // SQLITE_FULL - database or disk is full
                        AppError::Database(format!("Database full: {}", db_err.message()))
                    }
                    _ => {
                        // Other database errors
                        AppError::Database(format!(
                            "Database error [{}]: {}",
                            code_str,
                            db_err.message()
                        ))
                    }
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => {
            // Connection, pool, protocol errors
            AppError::Database(err.to_string())
        }
    }
}

/// Columns in bind order (?1 .. ?24)
const INSERT_JOB: &str = r#"
    INSERT INTO jobs (
        id, kind, name,
        disabled, next_run_at, locked_at, priority,
        data, unique_key, insert_only,
        repeat_interval, repeat_at, repeat_timezone, start_date, end_date, skip_days,
        last_run_at, last_finished_at,
        fail_reason, fail_count, failed_at,
        last_modified_by, should_save_result, result
    ) VALUES (
        ?1, ?2, ?3,
        ?4, ?5, ?6, ?7,
        ?8, ?9, ?10,
        ?11, ?12, ?13, ?14, ?15, ?16,
        ?17, ?18,
        ?19, ?20, ?21,
        ?22, ?23, ?24
    )
"#;

/// Fields an upsert copies from the incoming job onto a stored one
const UPSERT_DEFINITION_FIELDS: &str = r#"
        data = excluded.data,
        priority = excluded.priority,
        unique_key = excluded.unique_key,
        insert_only = excluded.insert_only,
        repeat_interval = excluded.repeat_interval,
        repeat_at = excluded.repeat_at,
        repeat_timezone = excluded.repeat_timezone,
        start_date = excluded.start_date,
        end_date = excluded.end_date,
        skip_days = excluded.skip_days,
        should_save_result = excluded.should_save_result,
        last_modified_by = excluded.last_modified_by
"#;

type JobQuery<'q> = QueryAs<'q, Sqlite, JobRow, SqliteArguments<'q>>;

/// Bind every column of `job` in INSERT_JOB order
fn bind_job<'q>(query: JobQuery<'q>, id: &str, job: &Job) -> Result<JobQuery<'q>> {
    let data = serde_json::to_string(job.data.as_value())?;
    let result = job
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    Ok(query
        .bind(id.to_string())
        .bind(job.kind.to_string())
        .bind(job.name.clone())
        // Claim eligibility
        .bind(job.disabled)
        .bind(job.next_run_at)
        .bind(job.locked_at)
        .bind(job.priority)
        // JSON documents
        .bind(data)
        .bind(job.unique_key())
        .bind(job.unique_opts.map(|opts| opts.insert_only))
        // Recurrence
        .bind(job.repeat_interval.clone())
        .bind(job.repeat_at.clone())
        .bind(job.repeat_timezone.clone())
        .bind(job.start_date)
        .bind(job.end_date)
        .bind(job.skip_days.clone())
        // Execution bracket and failures
        .bind(job.last_run_at)
        .bind(job.last_finished_at)
        .bind(job.fail_reason.clone())
        .bind(job.fail_count)
        .bind(job.failed_at)
        .bind(job.last_modified_by.clone())
        .bind(job.should_save_result)
        .bind(result))
}

fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::Priority => "priority",
        SortField::NextRunAt => "next_run_at",
        SortField::LastRunAt => "last_run_at",
        SortField::Name => "name",
    }
}

/// ORDER BY body built only from whitelisted identifiers, id as tie-break
fn order_by_clause(order: &ClaimOrder) -> String {
    let mut keys: Vec<String> = order
        .keys()
        .iter()
        .map(|(field, direction)| {
            let direction = match direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("{} {}", sort_column(*field), direction)
        })
        .collect();
    keys.push("id ASC".to_string());
    keys.join(", ")
}

pub struct SqliteJobRepository {
    pool: SqlitePool,
    id_provider: Arc<dyn IdProvider>,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool, id_provider: Arc<dyn IdProvider>) -> Self {
        Self { pool, id_provider }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn claim_next(&self, query: &ClaimQuery<'_>) -> Result<Option<Job>> {
        // Single statement: SQLite serializes writers, so the sub-select and
        // the update cannot interleave with another claim
        let sql = format!(
            r#"
            UPDATE jobs
            SET locked_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE name = ?2
                  AND disabled = 0
                  AND (
                      (locked_at IS NULL AND next_run_at <= ?3)
                      OR locked_at <= ?4
                  )
                ORDER BY {}
                LIMIT 1
            )
            RETURNING *
            "#,
            order_by_clause(query.order)
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(query.now)
            .bind(query.name)
            .bind(query.scan_horizon)
            .bind(query.lock_deadline)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(JobRow::into_job))
    }

    async fn insert(&self, job: &Job) -> Result<Job> {
        let id = self.id_provider.generate_id();
        let sql = format!("{} RETURNING *", INSERT_JOB);
        let row = bind_job(sqlx::query_as::<_, JobRow>(&sql), &id, job)?
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(job_id = %id, job_name = %job.name, "Job inserted");
        Ok(row.into_job())
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let id = job
            .id
            .as_deref()
            .ok_or_else(|| AppError::InvalidState("cannot update a job without id".to_string()))?;

        let sql = r#"
            UPDATE jobs SET
                kind = ?2, name = ?3,
                disabled = ?4, next_run_at = ?5, locked_at = ?6, priority = ?7,
                data = ?8, unique_key = ?9, insert_only = ?10,
                repeat_interval = ?11, repeat_at = ?12, repeat_timezone = ?13,
                start_date = ?14, end_date = ?15, skip_days = ?16,
                last_run_at = ?17, last_finished_at = ?18,
                fail_reason = ?19, fail_count = ?20, failed_at = ?21,
                last_modified_by = ?22, should_save_result = ?23, result = ?24
            WHERE id = ?1
            RETURNING *
        "#;
        let row = bind_job(sqlx::query_as::<_, JobRow>(sql), id, job)?
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    async fn upsert_single(&self, job: &Job, now: Timestamp) -> Result<Job> {
        let id = self.id_provider.generate_id();
        // A next run at or before now never replaces the stored one
        let sql = format!(
            r#"{}
            ON CONFLICT(name) WHERE kind = 'single' DO UPDATE SET
                {},
                next_run_at = CASE
                    WHEN excluded.next_run_at IS NOT NULL AND excluded.next_run_at <= ?25
                        THEN jobs.next_run_at
                    ELSE excluded.next_run_at
                END
            RETURNING *
            "#,
            INSERT_JOB, UPSERT_DEFINITION_FIELDS
        );

        let row = bind_job(sqlx::query_as::<_, JobRow>(&sql), &id, job)?
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(job_name = %job.name, job_id = %row.id, "Single job upserted");
        Ok(row.into_job())
    }

    async fn upsert_unique(&self, job: &Job) -> Result<Job> {
        let id = self.id_provider.generate_id();
        let on_conflict = if job.is_insert_only() {
            // No-op update so RETURNING still yields the stored row
            "name = jobs.name".to_string()
        } else {
            format!(
                "{}, next_run_at = excluded.next_run_at, disabled = excluded.disabled",
                UPSERT_DEFINITION_FIELDS
            )
        };
        let sql = format!(
            r#"{}
            ON CONFLICT(name, unique_key) WHERE unique_key IS NOT NULL AND kind <> 'single'
            DO UPDATE SET {}
            RETURNING *
            "#,
            INSERT_JOB, on_conflict
        );

        let row = bind_job(sqlx::query_as::<_, JobRow>(&sql), &id, job)?
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(job_name = %job.name, job_id = %row.id, "Unique job upserted");
        Ok(row.into_job())
    }

    async fn touch(
        &self,
        id: &JobId,
        expected_locked_at: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET locked_at = ?1 WHERE id = ?2 AND locked_at IS ?3")
            .bind(now)
            .bind(id)
            .bind(expected_locked_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn unlock(&self, ids: &[JobId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE jobs SET locked_at = NULL WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn remove(&self, id: &JobId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(JobRow::into_job))
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE name = ? ORDER BY next_run_at ASC, id ASC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    async fn remove_by_name(&self, name: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn remove_except_names(&self, names: &[String]) -> Result<u64> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM jobs");
        if !names.is_empty() {
            builder.push(" WHERE name NOT IN (");
            let mut separated = builder.separated(", ");
            for name in names {
                separated.push_bind(name);
            }
            separated.push_unseparated(")");
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn set_disabled_by_name(&self, name: &str, disabled: bool) -> Result<u64> {
        let result = sqlx::query("UPDATE jobs SET disabled = ? WHERE name = ?")
            .bind(disabled)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count_by_name(&self, name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    kind: String,
    name: String,

    disabled: bool,
    next_run_at: Option<i64>,
    locked_at: Option<i64>,
    priority: i32,

    data: String,
    unique_key: Option<String>,
    insert_only: Option<bool>,

    repeat_interval: Option<String>,
    repeat_at: Option<String>,
    repeat_timezone: Option<String>,
    start_date: Option<i64>,
    end_date: Option<i64>,
    skip_days: Option<String>,

    last_run_at: Option<i64>,
    last_finished_at: Option<i64>,
    fail_reason: Option<String>,
    fail_count: i32,
    failed_at: Option<i64>,

    last_modified_by: Option<String>,
    should_save_result: bool,
    result: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Job {
        let kind = self.kind.parse().unwrap_or(JobKind::Normal);
        let data: serde_json::Value =
            serde_json::from_str(&self.data).unwrap_or(serde_json::json!({}));
        let unique = self
            .unique_key
            .and_then(|s| serde_json::from_str(&s).ok());
        let result = self.result.and_then(|s| serde_json::from_str(&s).ok());

        Job {
            id: Some(self.id),
            kind,
            name: self.name,

            disabled: self.disabled,
            next_run_at: self.next_run_at,
            locked_at: self.locked_at,
            priority: self.priority,

            data: JobPayload::new(data),
            unique,
            unique_opts: self
                .insert_only
                .map(|insert_only| UniqueOpts { insert_only }),

            repeat_interval: self.repeat_interval,
            repeat_at: self.repeat_at,
            repeat_timezone: self.repeat_timezone,
            start_date: self.start_date,
            end_date: self.end_date,
            skip_days: self.skip_days,

            last_run_at: self.last_run_at,
            last_finished_at: self.last_finished_at,
            fail_reason: self.fail_reason,
            fail_count: self.fail_count,
            failed_at: self.failed_at,

            last_modified_by: self.last_modified_by,
            should_save_result: self.should_save_result,
            result,
        }
    }
}
