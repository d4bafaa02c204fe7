use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::ExecError;
use crate::config::SupervisorConfig;
use crate::models::Profile;

/// Anything smaller is a placeholder or a broken download, not a real binary.
const MIN_BINARY_SIZE: u64 = 1024;

const SCRIPT_EXTENSIONS: &[&str] = &["sh", "bash", "bat", "cmd", "ps1"];

/// Fail fast unless `path` looks like something we can actually run.
pub async fn validate_executable(path: &Path) -> Result<(), ExecError> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ExecError::ExecutableNotFound(format!("{}: {e}", path.display())))?;

    if !meta.is_file() {
        return Err(ExecError::ExecutableNotFound(format!(
            "{} is not a file",
            path.display()
        )));
    }

    let is_script = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)));

    if !is_script && meta.len() < MIN_BINARY_SIZE {
        return Err(ExecError::ExecutableNotFound(format!(
            "{} is only {} bytes, not a usable executable",
            path.display(),
            meta.len()
        )));
    }

    Ok(())
}

/// Tool arguments for updating `app_id` into the profile's install directory.
pub fn build_arguments(profile: &Profile, app_id: &str) -> Vec<String> {
    let mut args = vec![
        "+force_install_dir".to_string(),
        profile.install_directory.display().to_string(),
        "+login".to_string(),
    ];

    if profile.anonymous || profile.username.is_empty() {
        args.push("anonymous".to_string());
    } else {
        args.push(profile.username.clone());
        if !profile.password.is_empty() {
            args.push(profile.password.clone());
        }
    }

    args.push("+app_update".to_string());
    args.push(app_id.to_string());

    // Beta branches belong to the profile's own app, never its dependencies.
    if app_id == profile.app_id
        && let Some(beta) = profile.beta.as_deref().filter(|b| !b.is_empty())
    {
        args.push("-beta".to_string());
        args.push(beta.to_string());
        if let Some(pw) = profile.beta_password.as_deref().filter(|p| !p.is_empty()) {
            args.push("-betapassword".to_string());
            args.push(pw.to_string());
        }
    }

    if profile.validate {
        args.push("validate".to_string());
    }

    args.extend(profile.extra_arguments.split_whitespace().map(str::to_string));
    args.push("+quit".to_string());
    args
}

/// Length of the command line as the OS would see it, quotes included.
pub fn command_len(executable: &Path, args: &[String]) -> usize {
    let quoted = |s: &str| if s.contains(' ') { s.len() + 2 } else { s.len() };
    let exe = executable.display().to_string();
    args.iter()
        .fold(quoted(&exe), |total, arg| total + 1 + quoted(arg))
}

pub fn mask_secrets(line: &str, secrets: &[String]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(line.to_string(), |acc, secret| acc.replace(secret.as_str(), "********"))
}

/// A fully prepared tool invocation.
#[derive(Debug)]
pub struct Invocation {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    secrets: Vec<String>,
}

impl Invocation {
    pub fn prepare(
        config: &SupervisorConfig,
        profile: &Profile,
        app_id: &str,
    ) -> Result<Self, ExecError> {
        let args = build_arguments(profile, app_id);
        let len = command_len(&config.executable, &args);
        if len > config.max_command_len {
            return Err(ExecError::ArgumentsTooLong {
                len,
                max: config.max_command_len,
            });
        }

        Ok(Self {
            executable: config.executable.clone(),
            args,
            working_dir: profile.install_directory.clone(),
            secrets: profile.secrets().into_iter().map(str::to_string).collect(),
        })
    }

    /// Command line safe to log.
    pub fn display_masked(&self) -> String {
        let line = format!("{} {}", self.executable.display(), self.args.join(" "));
        mask_secrets(&line, &self.secrets)
    }

    pub fn secrets(&self) -> &[String] {
        &self.secrets
    }

    pub async fn ensure_working_dir(&self) -> Result<(), ExecError> {
        tokio::fs::create_dir_all(&self.working_dir).await.map_err(|e| {
            ExecError::Io(format!(
                "failed to create install directory {}: {e}",
                self.working_dir.display()
            ))
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so the whole tree can be signalled at once.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Spawn, retrying transient start failures with a linearly growing delay.
    pub async fn spawn_with_retries(
        &self,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Child, ExecError> {
        let attempts = attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.command().spawn() {
                Ok(child) => {
                    if attempt > 1 {
                        tracing::info!("Process started on attempt {attempt}/{attempts}");
                    }
                    return Ok(child);
                }
                Err(e) => {
                    tracing::warn!("Start attempt {attempt}/{attempts} failed: {e}");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(ExecError::StartFailed {
            attempts,
            reason: last_error,
        })
    }
}
