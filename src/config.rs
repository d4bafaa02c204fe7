use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub queue_file: PathBuf,
    pub profiles_file: PathBuf,
    pub history_limit: usize,
    pub autostart: bool,
    pub log_level: String,
    pub supervisor: SupervisorConfig,
}

/// Limits and timings for driving the external fetch tool.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub executable: PathBuf,
    pub job_timeout: Duration,
    pub close_grace: Duration,
    pub termination_timeout: Duration,
    pub start_attempts: u32,
    pub start_retry_delay: Duration,
    pub max_command_len: usize,
}

impl SupervisorConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            job_timeout: Duration::from_secs(2 * 60 * 60),
            close_grace: Duration::from_secs(5),
            termination_timeout: Duration::from_secs(10),
            start_attempts: 3,
            start_retry_delay: Duration::from_secs(2),
            max_command_len: 8000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let executable = PathBuf::from(env_required("STEAMCMD_PATH")?);

        let host: IpAddr = env_or("STEAMQUEUE_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid STEAMQUEUE_HOST: {e}"))?;

        let port: u16 = env_or("STEAMQUEUE_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid STEAMQUEUE_PORT: {e}"))?;

        let data_dir = PathBuf::from(env_or("STEAMQUEUE_DATA_DIR", "./data"));

        let queue_file = std::env::var("STEAMQUEUE_QUEUE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("queue.json"));

        let profiles_file = std::env::var("STEAMQUEUE_PROFILES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("profiles.json"));

        let history_limit: usize = env_parse("STEAMQUEUE_HISTORY_LIMIT", "500")?;

        let autostart = match env_or("STEAMQUEUE_AUTOSTART", "true").to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => return Err(format!("Invalid STEAMQUEUE_AUTOSTART: {other}")),
        };

        let log_level = env_or("STEAMQUEUE_LOG_LEVEL", "info");

        let job_timeout_secs: u64 = env_parse("STEAMQUEUE_JOB_TIMEOUT_SECS", "7200")?;
        if job_timeout_secs == 0 {
            return Err("STEAMQUEUE_JOB_TIMEOUT_SECS must be greater than zero".to_string());
        }

        let supervisor = SupervisorConfig {
            executable,
            job_timeout: Duration::from_secs(job_timeout_secs),
            close_grace: Duration::from_secs(env_parse("STEAMQUEUE_CLOSE_GRACE_SECS", "5")?),
            termination_timeout: Duration::from_secs(env_parse(
                "STEAMQUEUE_TERMINATION_TIMEOUT_SECS",
                "10",
            )?),
            start_attempts: 3,
            start_retry_delay: Duration::from_millis(env_parse(
                "STEAMQUEUE_START_RETRY_DELAY_MS",
                "2000",
            )?),
            max_command_len: env_parse("STEAMQUEUE_MAX_COMMAND_LEN", "8000")?,
        };

        Ok(Config {
            host,
            port,
            data_dir,
            queue_file,
            profiles_file,
            history_limit,
            autostart,
            log_level,
            supervisor,
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
