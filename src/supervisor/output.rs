use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const TAIL_LINES: usize = 200;

const SUCCESS_MARKERS: &[&str] = &["Success! App", "fully installed", "already up to date"];
const ERROR_MARKERS: &[&str] = &["ERROR!", "FAILED", "Login Failure", "Invalid Password"];

/// Last lines of combined stdout/stderr.
#[derive(Debug, Default)]
pub struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    pub fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > TAIL_LINES {
            self.lines.pop_front();
        }
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// The last `n` non-empty lines joined with " | ".
    pub fn last(&self, n: usize) -> String {
        let lines: Vec<&str> = self
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join(" | ")
    }
}

/// Decide success from what the tool printed. Error markers win over success markers.
pub fn classify(tail: &OutputTail) -> Result<String, String> {
    if let Some(line) = tail
        .lines()
        .find(|l| ERROR_MARKERS.iter().any(|m| l.contains(m)))
    {
        return Err(line.trim().to_string());
    }

    tail.lines()
        .rev()
        .find(|l| SUCCESS_MARKERS.iter().any(|m| l.contains(m)))
        .map(|l| l.trim().to_string())
        .ok_or_else(|| {
            let last = tail.last(3);
            if last.is_empty() {
                "no output from process".to_string()
            } else {
                format!("no success message in output: {last}")
            }
        })
}

/// Pump the child's stdout and stderr into `tail`, logging each line.
pub fn capture(child: &mut Child, tail: Arc<Mutex<OutputTail>>, secrets: &[String]) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        handles.push(spawn_reader(out, tail.clone(), secrets.to_vec()));
    }
    if let Some(err) = child.stderr.take() {
        handles.push(spawn_reader(err, tail, secrets.to_vec()));
    }
    handles
}

fn spawn_reader<R>(reader: R, tail: Arc<Mutex<OutputTail>>, secrets: Vec<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = super::command::mask_secrets(&line, &secrets);
            tracing::debug!(target: "steamqueue::tool", "{line}");
            tail.lock().await.push_line(line);
        }
    })
}
