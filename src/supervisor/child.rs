//! Spawning, relaying and reaping the supervised process.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::SpawnError;
use crate::telemetry::CHILD_TARGET;

/// Environment variable set in the child so it can detect supervision.
pub const ACTIVE_ENV_VAR: &str = "TSPLUG_ACTIVE";

/// Time between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Upper bound on waiting for output relays after the child is reaped.
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Which pipe a relayed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Lowercase stream name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the child terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitResult {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(i32),
    /// Waiting on the child failed.
    WaitFailed(String),
}

impl ExitResult {
    /// Process exit code for this result: the code itself, or 128+signal.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitResult::Exited(code) => *code,
            ExitResult::Signaled(signal) => 128 + signal,
            ExitResult::WaitFailed(_) => 1,
        }
    }

    /// True for a zero exit code.
    pub fn success(&self) -> bool {
        matches!(self, ExitResult::Exited(0))
    }
}

impl From<ExitStatus> for ExitResult {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitResult::Exited(code),
            (None, Some(signal)) => ExitResult::Signaled(signal),
            (None, None) => ExitResult::WaitFailed(format!("unknown exit status {status}")),
        }
    }
}

impl fmt::Display for ExitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitResult::Exited(code) => write!(f, "exit code {code}"),
            ExitResult::Signaled(signal) => write!(f, "signal {signal}"),
            ExitResult::WaitFailed(message) => write!(f, "wait failed: {message}"),
        }
    }
}

/// Starts the supervised command.
#[derive(Debug, Clone)]
pub struct ChildSupervisor {
    grace: Duration,
    extra_env: Vec<(String, String)>,
}

impl ChildSupervisor {
    /// Supervisor with the default grace period and `TSPLUG_ACTIVE=1`.
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_GRACE_PERIOD,
            extra_env: vec![(ACTIVE_ENV_VAR.to_string(), "1".to_string())],
        }
    }

    /// Override the SIGTERM to SIGKILL grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Add a variable to the child's environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    /// Spawn `argv` and start relaying its output.
    ///
    /// When `cancel` fires the child gets SIGTERM, then SIGKILL after the grace
    /// period.
    pub fn start(
        &self,
        argv: &[String],
        cancel: CancellationToken,
    ) -> Result<ChildHandle, SpawnError> {
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;

        let resolved = which::which(program).map_err(|source| SpawnError::NotFound {
            command: program.clone(),
            source,
        })?;

        let mut child = Command::new(&resolved)
            .args(args)
            .envs(self.extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Spawn {
                command: program.clone(),
                source,
            })?;

        let pid = child.id();
        info!(pid, "Started {}", resolved.display());

        let mut relays = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            relays.push(tokio::spawn(relay_output(
                BufReader::new(stdout),
                OutputStream::Stdout,
                log_line,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            relays.push(tokio::spawn(relay_output(
                BufReader::new(stderr),
                OutputStream::Stderr,
                log_line,
            )));
        }

        let (tx, rx) = oneshot::channel();
        let grace = self.grace;
        tokio::spawn(async move {
            let result = reap(child, cancel, grace).await;
            let _ = tx.send(result);
        });

        Ok(ChildHandle {
            pid,
            result: rx,
            relays,
        })
    }
}

impl Default for ChildSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// A running child. Consumed by [`ChildHandle::wait`].
#[derive(Debug)]
#[must_use = "the child's exit result must be awaited"]
pub struct ChildHandle {
    pid: Option<u32>,
    result: oneshot::Receiver<ExitResult>,
    relays: Vec<JoinHandle<()>>,
}

impl ChildHandle {
    /// OS process id, if the child was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the child to terminate and its output to drain.
    pub async fn wait(self) -> ExitResult {
        let result = self
            .result
            .await
            .unwrap_or_else(|_| ExitResult::WaitFailed("reaper task dropped".to_string()));

        for relay in self.relays {
            if tokio::time::timeout(RELAY_DRAIN_TIMEOUT, relay).await.is_err() {
                debug!("Output relay still open after child exit");
            }
        }

        result
    }
}

async fn reap(mut child: Child, cancel: CancellationToken, grace: Duration) -> ExitResult {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = cancel.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => terminate(&mut child, grace).await,
    };

    match status {
        Ok(status) => ExitResult::from(status),
        Err(e) => {
            error!("Failed to wait for child: {e}");
            ExitResult::WaitFailed(e.to_string())
        }
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        debug!(pid, "Sending SIGTERM to child");
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("SIGTERM failed: {e}");
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Child still running {grace:?} after SIGTERM, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

/// Read `reader` line by line until EOF, passing each line to `emit`.
///
/// Invalid UTF-8 is replaced lossily. A read error ends the relay.
pub async fn relay_output<R, F>(mut reader: R, stream: OutputStream, mut emit: F)
where
    R: AsyncBufRead + Unpin,
    F: FnMut(OutputStream, &str),
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                emit(stream, line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                warn!("Failed to read child {stream}: {e}");
                break;
            }
        }
    }
}

fn log_line(stream: OutputStream, line: &str) {
    info!(target: CHILD_TARGET, stream = stream.as_str(), "{line}");
}
