// Command handler
// Runs the program named in a job's data as a child process
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use lockstep_core::port::{HandlerError, HandlerResult, JobContext, JobHandler};

/// Execution parameters read from the job's `data`
///
/// ```json
/// { "command": "backup.sh", "args": ["--full"], "env": {"PATH": "/usr/bin"}, "working_dir": "/srv" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
}

fn default_working_dir() -> String {
    ".".to_string()
}

impl CommandSpec {
    pub fn from_data(data: &serde_json::Value) -> Result<Self, HandlerError> {
        serde_json::from_value(data.clone()).map_err(|e| HandlerError::InvalidData(e.to_string()))
    }
}

/// Spawns child processes with an environment allowlist
///
/// The child starts from an empty environment: allowlisted daemon variables
/// are passed through and allowlisted job variables override them. The child
/// is killed when it outlives the job's lock lifetime, so a
/// reclaimed job never has two live processes.
pub struct CommandHandler {
    env_allowlist: Vec<String>,
}

impl CommandHandler {
    /// # Example
    /// ```ignore
    /// let handler = CommandHandler::new(vec!["PATH".to_string(), "HOME".to_string()]);
    /// scheduler.define(definition, Arc::new(handler))?;
    /// ```
    pub fn new(env_allowlist: Vec<String>) -> Self {
        Self { env_allowlist }
    }

    /// Keep only allowlisted variables
    fn filter_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Full environment of the child
    fn child_env(
        &self,
        inherited: impl IntoIterator<Item = (String, String)>,
        job_env: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = inherited
            .into_iter()
            .filter(|(k, _)| self.env_allowlist.contains(k))
            .collect();
        env.extend(self.filter_env(job_env));
        env
    }

    async fn spawn_and_wait(
        &self,
        spec: &CommandSpec,
        timeout_ms: Option<i64>,
    ) -> Result<std::process::Output, HandlerError> {
        let child = Command::new(&spec.command)
            .args(&spec.args)
            .env_clear()
            .envs(self.child_env(std::env::vars(), &spec.env))
            .current_dir(&spec.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HandlerError::Io(format!("failed to spawn {}: {}", spec.command, e)))?;

        match timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms as u64), child.wait_with_output())
                .await
            {
                Ok(output) => output.map_err(|e| HandlerError::Io(e.to_string())),
                Err(_) => Err(HandlerError::Timeout(ms)),
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| HandlerError::Io(e.to_string())),
        }
    }

    /// Successful stdout becomes the job result: JSON when it parses, text otherwise
    fn build_result(output: &std::process::Output) -> HandlerResult {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(HandlerError::Failed(format!(
                "exited with {}: {}",
                code,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            serde_json::from_str(stdout)
                .unwrap_or_else(|_| serde_json::Value::String(stdout.to_string())),
        ))
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn handle(&self, ctx: JobContext) -> HandlerResult {
        let spec = CommandSpec::from_data(ctx.data())?;
        let timeout_ms = Some(ctx.lock_lifetime_ms()).filter(|ms| *ms > 0);
        let job_id = ctx.job().id.clone().unwrap_or_default();

        info!(
            job_id = %job_id,
            job_name = %ctx.job().name,
            command = %spec.command,
            args = ?spec.args,
            working_dir = %spec.working_dir,
            timeout_ms = ?timeout_ms,
            "Starting command"
        );

        let started = Instant::now();
        let output = match self.spawn_and_wait(&spec, timeout_ms).await {
            Ok(output) => output,
            Err(e) => {
                warn!(job_id = %job_id, command = %spec.command, error = %e, "Command did not finish");
                return Err(e);
            }
        };

        info!(
            job_id = %job_id,
            command = %spec.command,
            duration_ms = started.elapsed().as_millis() as u64,
            exit_code = ?output.status.code(),
            "Command completed"
        );

        Self::build_result(&output)
    }
}
