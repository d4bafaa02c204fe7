use std::io;
use std::time::Duration;

use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStage {
    /// Ask the process tree to shut down on its own.
    CooperativeClose,
    /// Kill through the child handle.
    ForceKill,
    /// Last resort: the OS kill tool, by process id.
    OsKill,
}

impl TerminationStage {
    fn next(self) -> Option<Self> {
        match self {
            TerminationStage::CooperativeClose => Some(TerminationStage::ForceKill),
            TerminationStage::ForceKill => Some(TerminationStage::OsKill),
            TerminationStage::OsKill => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    AlreadyExited,
    Exited(TerminationStage),
    /// Every stage ran and the process was still not reaped.
    Unconfirmed,
}

impl TerminationOutcome {
    pub fn confirmed(self) -> bool {
        !matches!(self, TerminationOutcome::Unconfirmed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    pub close_grace: Duration,
    pub termination_timeout: Duration,
}

impl TerminationPolicy {
    fn wait_for(&self, stage: TerminationStage) -> Duration {
        match stage {
            TerminationStage::CooperativeClose => self.close_grace,
            TerminationStage::ForceKill | TerminationStage::OsKill => self.termination_timeout,
        }
    }
}

/// Walk the stages until the child is reaped. Failures are logged, never raised.
pub async fn terminate(child: &mut Child, policy: &TerminationPolicy) -> TerminationOutcome {
    terminate_from(child, policy, TerminationStage::CooperativeClose).await
}

/// Like [`terminate`], but skips the stages before `first`.
pub async fn terminate_from(
    child: &mut Child,
    policy: &TerminationPolicy,
    first: TerminationStage,
) -> TerminationOutcome {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::debug!("Process already exited ({status}) before termination");
        return TerminationOutcome::AlreadyExited;
    }

    let Some(pid) = child.id() else {
        return TerminationOutcome::AlreadyExited;
    };

    let mut stage = Some(first);
    while let Some(current) = stage {
        tracing::info!("Terminating pid {pid}: {current:?}");
        if let Err(e) = apply(current, child, pid).await {
            tracing::warn!("{current:?} on pid {pid} failed: {e}");
        }

        match tokio::time::timeout(policy.wait_for(current), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("Pid {pid} exited after {current:?} ({status})");
                return TerminationOutcome::Exited(current);
            }
            Ok(Err(e)) => tracing::warn!("Waiting on pid {pid} failed: {e}"),
            Err(_) => tracing::debug!("Pid {pid} still alive after {current:?}"),
        }
        stage = current.next();
    }

    tracing::error!("Pid {pid} could not be confirmed dead");
    TerminationOutcome::Unconfirmed
}

async fn apply(stage: TerminationStage, child: &mut Child, pid: u32) -> io::Result<()> {
    match stage {
        TerminationStage::CooperativeClose => close(pid).await,
        TerminationStage::ForceKill => {
            #[cfg(unix)]
            {
                if let Err(e) = signal_group(pid, libc::SIGKILL) {
                    tracing::debug!("SIGKILL to group {pid} failed: {e}");
                }
            }
            child.start_kill()
        }
        TerminationStage::OsKill => os_kill(pid).await,
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
async fn close(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGTERM)
}

#[cfg(windows)]
async fn close(pid: u32) -> io::Result<()> {
    let pid = pid.to_string();
    let mut cmd = Command::new("taskkill");
    cmd.args(["/T", "/PID", pid.as_str()]);
    run_kill_tool(&mut cmd).await
}

#[cfg(unix)]
async fn os_kill(pid: u32) -> io::Result<()> {
    let group = format!("-{pid}");
    let pid = pid.to_string();
    let mut cmd = Command::new("kill");
    cmd.args(["-KILL", "--", group.as_str(), pid.as_str()]);
    run_kill_tool(&mut cmd).await
}

#[cfg(windows)]
async fn os_kill(pid: u32) -> io::Result<()> {
    let pid = pid.to_string();
    let mut cmd = Command::new("taskkill");
    cmd.args(["/F", "/T", "/PID", pid.as_str()]);
    run_kill_tool(&mut cmd).await
}

async fn run_kill_tool(cmd: &mut Command) -> io::Result<()> {
    let output = cmd.kill_on_drop(true).output().await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
