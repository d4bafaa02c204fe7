pub mod command;
pub mod output;
pub mod terminate;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use crate::config::SupervisorConfig;
use crate::models::Profile;
use command::Invocation;
use output::OutputTail;
use terminate::{TerminationOutcome, TerminationPolicy};

/// How long to wait for output readers to drain after the process exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ExecError {
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("path/arguments too long: {len} characters exceeds the limit of {max}")]
    ArgumentsTooLong { len: usize, max: usize },
    #[error("failed to start process after {attempts} attempt(s): {reason}")]
    StartFailed { attempts: u32, reason: String },
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("cancelled by queue stop")]
    Cancelled,
    #[error("process exited with {status}: {output}")]
    NonZeroExit { status: String, output: String },
    #[error("unexpected output: {0}")]
    UnexpectedOutput(String),
    #[error("{cause}; process {pid} could not be confirmed dead")]
    TerminationFailed { pid: u32, cause: String },
    #[error("{0}")]
    Io(String),
}

impl ExecError {
    /// The error to report for an interrupted job once termination has run.
    pub fn after_termination(self, pid: u32, outcome: TerminationOutcome) -> Self {
        match outcome {
            TerminationOutcome::Unconfirmed => ExecError::TerminationFailed {
                pid,
                cause: self.to_string(),
            },
            _ => self,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecSuccess {
    pub detail: String,
    pub elapsed: Duration,
}

/// Runs one job to completion. The queue worker holds exactly one of these.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// `cancel` flips to true when the queue wants the job stopped early.
    async fn execute(
        &self,
        profile: &Profile,
        app_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<ExecSuccess, ExecError>;
}

/// Supervises the external fetch tool: start with retries, bounded wait,
/// escalating termination.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    fn termination_policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            close_grace: self.config.close_grace,
            termination_timeout: self.config.termination_timeout,
        }
    }
}

#[async_trait]
impl JobExecutor for ProcessSupervisor {
    async fn execute(
        &self,
        profile: &Profile,
        app_id: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecSuccess, ExecError> {
        command::validate_executable(&self.config.executable).await?;

        let invocation = Invocation::prepare(&self.config, profile, app_id)?;
        invocation.ensure_working_dir().await?;

        tracing::info!(
            "Starting app {app_id} for profile {}: {}",
            profile.id,
            invocation.display_masked()
        );

        let mut child = invocation
            .spawn_with_retries(self.config.start_attempts, self.config.start_retry_delay)
            .await?;
        let pid = child.id().unwrap_or_default();
        let started = Instant::now();

        let tail = Arc::new(Mutex::new(OutputTail::default()));
        let mut readers = output::capture(&mut child, tail.clone(), invocation.secrets());

        let interrupted = tokio::select! {
            res = child.wait() => match res {
                Ok(status) => Ok(status),
                Err(e) => Err(ExecError::Io(format!("failed waiting on process {pid}: {e}"))),
            },
            _ = tokio::time::sleep(self.config.job_timeout) => {
                Err(ExecError::Timeout(self.config.job_timeout))
            }
            _ = cancelled(&mut cancel) => Err(ExecError::Cancelled),
        };

        let status = match interrupted {
            Ok(status) => status,
            Err(reason) => {
                tracing::warn!("App {app_id} (pid {pid}): {reason}, terminating");
                let outcome = terminate::terminate(&mut child, &self.termination_policy()).await;
                for reader in &readers {
                    reader.abort();
                }
                return Err(reason.after_termination(pid, outcome));
            }
        };

        let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            for reader in &mut readers {
                let _ = reader.await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("Output of pid {pid} still open after exit, dropping readers");
            for reader in &readers {
                reader.abort();
            }
        }

        let tail = tail.lock().await;
        if !status.success() {
            return Err(ExecError::NonZeroExit {
                status: status.to_string(),
                output: tail.last(5),
            });
        }

        let detail = output::classify(&tail).map_err(ExecError::UnexpectedOutput)?;
        let elapsed = started.elapsed();
        tracing::info!("App {app_id} finished in {}s: {detail}", elapsed.as_secs());

        Ok(ExecSuccess { detail, elapsed })
    }
}

/// Resolves once `rx` reads true. A dropped sender means never.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
