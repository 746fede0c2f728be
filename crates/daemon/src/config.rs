//! Daemon configuration from `LOCKSTEP_*` environment variables

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use lockstep_core::application::SchedulerConfig;
use lockstep_core::domain::JobDefinition;

const DEFAULT_DB_PATH: &str = "~/.lockstep/jobs.db";
const DEFAULT_ENV_ALLOWLIST: &str = "PATH,HOME,USER";

/// Log output style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// A job name this daemon processes, from `LOCKSTEP_JOBS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub log_format: LogFormat,
    /// Daily rolling log files go here when set
    pub log_dir: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub jobs: Vec<JobSpec>,
    pub env_allowlist: Vec<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("LOCKSTEP_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let db_path = PathBuf::from(shellexpand::tilde(&db_path).into_owned());

        let log_format = match lookup("LOCKSTEP_LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("LOCKSTEP_LOG_FORMAT must be json or pretty, got {}", other),
        };

        let log_dir = lookup("LOCKSTEP_LOG_DIR")
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir).into_owned()));

        let mut scheduler = SchedulerConfig::default();
        if let Some(name) = lookup("LOCKSTEP_NAME") {
            scheduler = scheduler.with_name(name);
        }
        if let Some(ms) = lookup("LOCKSTEP_PROCESS_EVERY_MS") {
            let ms: u64 = parse_number("LOCKSTEP_PROCESS_EVERY_MS", &ms)?;
            scheduler = scheduler.with_process_every(Duration::from_millis(ms));
        }
        if let Some(ms) = lookup("LOCKSTEP_LOCK_LIFETIME_MS") {
            let ms: i64 = parse_number("LOCKSTEP_LOCK_LIFETIME_MS", &ms)?;
            scheduler = scheduler.with_default_lock_lifetime_ms(ms);
        }
        if let Some(tz) = lookup("LOCKSTEP_TIMEZONE") {
            scheduler = scheduler.with_default_timezone(tz);
        }

        let jobs = parse_jobs(&lookup("LOCKSTEP_JOBS").unwrap_or_default())?;

        let env_allowlist = lookup("LOCKSTEP_ENV_ALLOWLIST")
            .unwrap_or_else(|| DEFAULT_ENV_ALLOWLIST.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            db_path,
            log_format,
            log_dir,
            scheduler,
            jobs,
            env_allowlist,
        })
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }

    /// Definitions for every configured job name
    pub fn definitions(&self) -> Vec<JobDefinition> {
        self.jobs
            .iter()
            .map(|spec| {
                let definition = self.scheduler.definition(spec.name.as_str());
                match spec.concurrency {
                    Some(concurrency) => definition.with_concurrency(concurrency),
                    None => definition,
                }
            })
            .collect()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} is not a number: {}", key, value))
}

/// Parse "report,cleanup:2" into job specs
fn parse_jobs(value: &str) -> Result<Vec<JobSpec>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, concurrency)) => {
                let concurrency = parse_number("LOCKSTEP_JOBS concurrency", concurrency)?;
                if name.trim().is_empty() {
                    return Err(anyhow!("LOCKSTEP_JOBS entry without a name: {}", entry));
                }
                Ok(JobSpec {
                    name: name.trim().to_string(),
                    concurrency: Some(concurrency),
                })
            }
            None => Ok(JobSpec {
                name: entry.to_string(),
                concurrency: None,
            }),
        })
        .collect()
}
