//! External process execution for tool-backed capabilities
//!
//! Runs a child with stdout and stderr streamed line by line, a wall-clock
//! limit, and graceful-then-forceful termination (SIGTERM, a grace period,
//! then SIGKILL) when the limit is hit.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Number of trailing output lines kept for error reports
const TAIL_LINES: usize = 20;

/// What to run and how long to let it run
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Wall-clock limit
    pub timeout: Duration,
    /// Wait between SIGTERM and SIGKILL
    pub terminate_grace: Duration,
}

impl Invocation {
    /// Build an invocation from an argument vector (`argv[0]` is the program)
    pub fn from_argv(argv: &[String], timeout: Duration, terminate_grace: Duration) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::config("tools", "external command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: None,
            env: Vec::new(),
            timeout,
            terminate_grace,
        })
    }
}

/// How a child process ended
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct ProcessOutcome {
    /// Exit code; `None` when killed by a signal or timed out
    pub code: Option<i32>,
    /// True when the process exited with status zero
    pub success: bool,
    /// True when the wall-clock limit was reached
    pub timed_out: bool,
    /// Last lines of combined stdout/stderr
    pub tail: Vec<String>,
}

impl ProcessOutcome {
    /// The last `n` output lines joined with newlines
    pub fn tail_text(&self, n: usize) -> String {
        let start = self.tail.len().saturating_sub(n);
        self.tail[start..].join("\n")
    }
}

enum Ending {
    Exited(std::process::ExitStatus),
    TimedOut,
}

/// Run a process to completion, handing every output line to `on_line`
///
/// Spawn failures are errors; a non-zero exit or a timeout is reported
/// through the returned [`ProcessOutcome`].
pub async fn run_streaming<F>(invocation: &Invocation, mut on_line: F) -> Result<ProcessOutcome>
where
    F: FnMut(&str) + Send,
{
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|e| {
        Error::ExternalTool(format!("failed to start {}: {}", invocation.program, e))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::ExternalTool("child stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::ExternalTool("child stderr was not captured".to_string()))?;
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    let mut record = |line: String, tail: &mut VecDeque<String>| {
        tracing::debug!(program = %invocation.program, "{}", line);
        on_line(&line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    };

    let deadline = tokio::time::sleep(invocation.timeout);
    tokio::pin!(deadline);
    let mut stdout_open = true;
    let mut stderr_open = true;

    let ending = loop {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => record(line, &mut tail),
                _ => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => record(line, &mut tail),
                _ => stderr_open = false,
            },
            status = child.wait(), if !stdout_open && !stderr_open => {
                break Ending::Exited(status?);
            }
            _ = &mut deadline => break Ending::TimedOut,
        }
    };

    let tail: Vec<String> = tail.into_iter().collect();
    match ending {
        Ending::Exited(status) => Ok(ProcessOutcome {
            code: status.code(),
            success: status.success(),
            timed_out: false,
            tail,
        }),
        Ending::TimedOut => {
            tracing::warn!(
                program = %invocation.program,
                timeout_secs = invocation.timeout.as_secs(),
                "process timed out, terminating"
            );
            terminate(&mut child, invocation.terminate_grace).await;
            Ok(ProcessOutcome {
                code: None,
                success: false,
                timed_out: true,
                tail,
            })
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned and have not yet reaped
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
                return;
            }
            tracing::warn!(pid, "process ignored SIGTERM, killing");
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::error!(error = %e, "failed to kill child process");
    }
}
