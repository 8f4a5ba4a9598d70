use std::{path::PathBuf, process::Stdio, time::Duration};

use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};

use super::{FlagParams, Operation};
use crate::app::settings::ToolSettings;

const READ_CHUNK: usize = 8 * 1024;

/// Captured run of the external tool. The exit status is recorded but never
/// turned into an error: callers read the streams to judge the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
}

impl JobResult {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub struct JobDispatcher {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    max_capture_bytes: usize,
}

impl JobDispatcher {
    pub fn new(settings: &ToolSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            working_dir: settings.working_dir.clone(),
            timeout: settings.timeout(),
            max_capture_bytes: settings.max_capture_bytes,
        }
    }

    /// Arguments after the program: prefix, subcommand, then `--flag value` pairs.
    pub fn command_args(&self, operation: Operation, params: &FlagParams) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(operation.subcommand().to_string());
        args.extend(params.to_args());
        args
    }

    pub async fn dispatch(&self, operation: Operation, params: &FlagParams) -> JobResult {
        let args = self.command_args(operation, params);
        tracing::info!("Dispatching {operation} with {} parameter(s)", params.len());
        tracing::debug!("Command line: {} {:?}", self.program, args);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                tracing::warn!("Failed to spawn {}: {error}", self.program);
                return JobResult {
                    stderr: format!("failed to spawn {}: {error}", self.program),
                    ..JobResult::default()
                };
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_capture_bytes;
        let run = async {
            tokio::join!(
                child.wait(),
                capture(stdout, limit),
                capture(stderr, limit)
            )
        };

        let (status, stdout, stderr) = match tokio::time::timeout(self.timeout, run).await {
            Ok(finished) => finished,
            Err(_) => {
                let _ = child.start_kill();
                tracing::warn!("{operation} exceeded {:?} timeout; killed", self.timeout);
                return JobResult {
                    stderr: format!(
                        "{operation} exceeded {:?} timeout and was killed",
                        self.timeout
                    ),
                    timed_out: true,
                    ..JobResult::default()
                };
            }
        };

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(error) => {
                tracing::warn!("Failed waiting on {operation}: {error}");
                None
            }
        };
        tracing::info!("{operation} finished with exit code {exit_code:?}");

        JobResult {
            exit_code,
            truncated: stdout.truncated || stderr.truncated,
            stdout: stdout.text,
            stderr: stderr.text,
            timed_out: false,
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    text: String,
    truncated: bool,
}

/// Reads a pipe to the end, keeping at most `limit` bytes and draining the rest
/// so the child never blocks on a full pipe.
async fn capture<R: AsyncRead + Unpin>(pipe: Option<R>, limit: usize) -> Captured {
    let Some(mut pipe) = pipe else {
        return Captured::default();
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = match pipe.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) => {
                tracing::warn!("Failed reading job output: {error}");
                break;
            }
        };
        let room = limit.saturating_sub(kept.len());
        if read > room {
            truncated = true;
        }
        kept.extend_from_slice(&buffer[..read.min(room)]);
    }
    Captured {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
    }
}
