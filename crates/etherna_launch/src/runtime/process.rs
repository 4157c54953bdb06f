//! Process runner: spawns external commands and exposes their output as line streams

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};

/// How long readers get to flush the last lines once the process has exited
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Process name (for logging)
    pub name: String,
    /// Executable path
    pub executable: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

impl ProcessConfig {
    /// Create a config for `executable` with the given arguments
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// The full command line, for logs and error messages
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.executable.clone()
        } else {
            format!("{} {}", self.executable, self.args.join(" "))
        }
    }
}

/// Event emitted by a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Process exited; `None` when it was killed by a signal
    Exited { code: Option<i32> },
}

/// Collected result of a process that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Cloneable handle that requests termination of a process.
///
/// Only the first request is forwarded; later calls, and calls after the
/// process has already exited, are no-ops.
#[derive(Debug, Clone)]
pub struct Terminator {
    name: Arc<str>,
    requested: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<()>,
    finished: watch::Receiver<bool>,
}

impl Terminator {
    /// Request termination. Returns `true` if this call issued the request.
    pub fn terminate(&self) -> bool {
        if *self.finished.borrow() || self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::debug!("[{}] Termination requested", self.name);
        // The receiver is gone once the process has exited
        let _ = self.tx.send(());
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the process behind this handle has exited
    pub async fn wait_finished(&self) {
        let mut finished = self.finished.clone();
        // A dropped sender means the driver is gone, which counts as finished
        let _ = finished.wait_for(|done| *done).await;
    }
}

/// Driving side of a [`ProcessHandle`].
///
/// Whoever runs the process feeds output lines and the exit code through these
/// channels and listens on `terminate_rx` for termination requests.
#[derive(Debug)]
pub struct ProcessIo {
    pub stdout: mpsc::UnboundedSender<String>,
    pub stderr: mpsc::UnboundedSender<String>,
    pub exit: oneshot::Sender<Option<i32>>,
    pub terminate_rx: mpsc::UnboundedReceiver<()>,
    pub finished: watch::Sender<bool>,
}

/// A spawned process: two output line streams, a one-shot exit notification
/// and a termination handle
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    stdout: mpsc::UnboundedReceiver<String>,
    stderr: mpsc::UnboundedReceiver<String>,
    exit: oneshot::Receiver<Option<i32>>,
    exited: bool,
    terminator: Terminator,
}

impl ProcessHandle {
    /// Create a handle together with the channels that drive it
    pub fn pair(name: impl Into<String>, pid: Option<u32>) -> (Self, ProcessIo) {
        let name = name.into();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = watch::channel(false);

        let terminator = Terminator {
            name: Arc::from(name.as_str()),
            requested: Arc::new(AtomicBool::new(false)),
            tx: terminate_tx,
            finished: finished_rx,
        };

        let handle = Self {
            name,
            pid,
            stdout: stdout_rx,
            stderr: stderr_rx,
            exit: exit_rx,
            exited: false,
            terminator,
        };

        let io = ProcessIo {
            stdout: stdout_tx,
            stderr: stderr_tx,
            exit: exit_tx,
            terminate_rx,
            finished: finished_tx,
        };

        (handle, io)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    /// Request termination of the process (idempotent)
    pub fn terminate(&self) -> bool {
        self.terminator.terminate()
    }

    /// Next output line or the exit notification.
    ///
    /// Lines already buffered are always delivered before the exit event.
    /// Returns `None` once both streams are closed and the exit was reported.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        tokio::select! {
            biased;
            Some(line) = self.stdout.recv() => {
                Some(ProcessEvent::Output { line, is_stderr: false })
            }
            Some(line) = self.stderr.recv() => {
                Some(ProcessEvent::Output { line, is_stderr: true })
            }
            code = &mut self.exit, if !self.exited => {
                self.exited = true;
                Some(ProcessEvent::Exited { code: code.ok().flatten() })
            }
            else => None,
        }
    }

    /// Run the process to completion, collecting its output
    pub async fn wait_with_output(mut self) -> CommandOutput {
        let mut output = CommandOutput::default();
        while let Some(event) = self.next_event().await {
            match event {
                ProcessEvent::Output { line, is_stderr: false } => output.stdout.push(line),
                ProcessEvent::Output { line, is_stderr: true } => output.stderr.push(line),
                ProcessEvent::Exited { code } => output.code = code,
            }
        }
        output
    }
}

/// Something that can start processes.
///
/// Spawning is synchronous so that failures (binary not found, permission
/// denied) surface immediately rather than through the exit notification.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle, ProcessError>;
}

/// Spawns real OS processes on the tokio runtime
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Time between SIGTERM and SIGKILL
    grace_period: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
        }
    }
}

impl ProcessRunner {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }
}

impl ProcessSpawner for ProcessRunner {
    fn spawn(&self, config: &ProcessConfig) -> Result<ProcessHandle, ProcessError> {
        log::debug!("[{}] Spawning: {}", config.name, config.command_line());

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            name: config.name.clone(),
            source,
        })?;

        let pid = child.id();
        let (handle, io) = ProcessHandle::pair(config.name.clone(), pid);
        let ProcessIo {
            stdout,
            stderr,
            exit,
            mut terminate_rx,
            finished,
        } = io;

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(out, stdout)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(err, stderr)));
        }

        let name = config.name.clone();
        let grace_period = self.grace_period;
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Some(()) = terminate_rx.recv() => {
                    send_sigterm(&name, pid);
                    match tokio::time::timeout(grace_period, child.wait()).await {
                        Ok(status) => status,
                        Err(_) => {
                            log::warn!("[{}] Process did not exit gracefully, forcing kill", name);
                            let _ = child.start_kill();
                            child.wait().await
                        }
                    }
                }
            };

            for reader in readers {
                let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
            }

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    log::error!("[{}] Error waiting for process: {}", name, e);
                    None
                }
            };
            let _ = exit.send(code);
            let _ = finished.send(true);
        });

        Ok(handle)
    }
}

/// Forward lines from a pipe into a channel.
///
/// Keeps reading after the receiver is dropped so the child never blocks on
/// a full pipe.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = tx.send(line);
    }
}

#[cfg(unix)]
fn send_sigterm(name: &str, pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            log::debug!("[{}] SIGTERM failed: {}", name, e);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(name: &str, _pid: Option<u32>) {
    // No graceful signal here; the grace timeout escalates to a kill
    log::debug!("[{}] Graceful termination unsupported on this platform", name);
}

/// Errors that can occur with spawned processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
