#![forbid(unsafe_code)]

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt as _;
use tokio::process::Command;
use tracing::debug;

/// Everything a finished subprocess left behind. A non-zero `exit_code`
/// with empty streams means the process never ran; `stderr` then carries
/// the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Synthetic result for commands that could not be started.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
        }
    }

    /// Best human-readable failure text: stderr when present, stdout
    /// otherwise. Git writes some fatal errors to stdout.
    #[must_use]
    pub fn error_text(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            err.to_owned()
        }
    }
}

/// Runs external commands. Implementations never return an error; any
/// failure to launch is folded into a synthetic [`CommandOutput`] so
/// callers handle exactly one shape.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> CommandOutput;
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> CommandOutput {
        debug!("run {program} {} in {}", args.join(" "), cwd.display());

        if !cwd.is_dir() {
            return CommandOutput::failure(format!(
                "working directory does not exist: {}",
                cwd.display()
            ));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CommandOutput::failure(format!(
                    "{program} executable not found; ensure it is on PATH"
                ));
            }
            Err(e) => {
                return CommandOutput::failure(format!("failed to start {program}: {e}"));
            }
        };

        // Drain both pipes concurrently before waiting, otherwise a child
        // that fills one pipe buffer blocks forever.
        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return CommandOutput::failure(format!("failed to wait for {program}: {e}"));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        CommandOutput {
            stdout,
            stderr,
            // Death by signal has no code; report it like a launch failure.
            exit_code: status.code().unwrap_or(-1),
        }
    }
}

async fn drain<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
