//! Worker process launch and output capture.
//!
//! The launched child is owned by a monitor task. The rest of the crate
//! talks to it through [`WorkerProcess`]: a kill request channel and a
//! watch signal that settles once with the exit status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::ExecutableCandidate;
use super::readiness::ReadinessTracker;
use crate::log_sink::LogSink;
use crate::{Result, VoiceLabError};

/// How long the monitor waits for output to drain after exit, so a final
/// port line is still observed before readiness is rejected and the last
/// lines are in the log file.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Everything needed to start one worker process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub candidates: Vec<ExecutableCandidate>,
    /// Appended after the chosen candidate's own arguments.
    pub extra_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// How the worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub description: String,
}

impl ExitInfo {
    fn from_wait(result: std::io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => Self {
                code: status.code(),
                description: status.to_string(),
            },
            Err(e) => Self {
                code: None,
                description: format!("wait failed: {}", e),
            },
        }
    }
}

/// Handle to a running (or finished) worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    pid: Option<u32>,
    program: PathBuf,
    readiness: ReadinessTracker,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl WorkerProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    /// One-shot exit signal: `None` while running, then the exit info.
    pub fn exit_signal(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit_rx.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub async fn wait_exit(&self) -> ExitInfo {
        wait_for_exit(self.exit_signal()).await
    }

    /// Ask the monitor to force-terminate the process. Idempotent.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Resolve a watch exit signal to its exit info.
pub async fn wait_for_exit(mut rx: watch::Receiver<Option<ExitInfo>>) -> ExitInfo {
    match rx.wait_for(|e| e.is_some()).await {
        Ok(info) => info.clone().unwrap_or_else(unknown_exit),
        Err(_) => unknown_exit(),
    }
}

fn unknown_exit() -> ExitInfo {
    ExitInfo {
        code: None,
        description: "process monitor ended without an exit status".to_string(),
    }
}

/// Pick the first candidate that resolves to an existing program.
pub fn resolve_executable(candidates: &[ExecutableCandidate]) -> Result<ExecutableCandidate> {
    for candidate in candidates {
        if let Some(program) = resolve_program(&candidate.program) {
            return Ok(ExecutableCandidate {
                program,
                args: candidate.args.clone(),
            });
        }
    }
    Err(VoiceLabError::ExecutableNotFound {
        searched: candidates
            .iter()
            .map(|c| c.program.display().to_string())
            .collect(),
    })
}

fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.is_absolute() || program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Starts worker processes and wires their output into the log sink.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    log: Arc<LogSink>,
}

impl ProcessLauncher {
    pub fn new(log: Arc<LogSink>) -> Self {
        Self { log }
    }

    /// Spawn the worker. Must be called inside a Tokio runtime.
    ///
    /// Every stdout and stderr line goes to the log sink; stdout lines are
    /// also fed to `readiness`, which is rejected if the process exits before
    /// announcing a port.
    pub fn launch(&self, spec: &LaunchSpec, readiness: ReadinessTracker) -> Result<WorkerProcess> {
        let resolved = resolve_executable(&spec.candidates)?;

        let mut cmd = Command::new(&resolved.program);
        cmd.args(&resolved.args)
            .args(&spec.extra_args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            if dir.is_dir() {
                cmd.current_dir(dir);
            } else {
                warn!(
                    target: "process_launcher",
                    dir = %dir.display(),
                    "Working directory missing; using the current directory"
                );
            }
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(
                target: "process_launcher",
                program = %resolved.program.display(),
                error = %e,
                "Failed to spawn worker process"
            );
            if e.kind() == std::io::ErrorKind::NotFound {
                VoiceLabError::ExecutableNotFound {
                    searched: vec![resolved.program.display().to_string()],
                }
            } else {
                VoiceLabError::IoFailure(e)
            }
        })?;

        let pid = child.id();
        info!(
            target: "process_launcher",
            program = %resolved.program.display(),
            args = ?resolved.args,
            extra_args = ?spec.extra_args,
            pid = ?pid,
            "Worker process spawned"
        );

        let (log_tx, pump) = self.log.spawn_pump();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_line_reader(out, log_tx.clone(), Some(readiness.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_line_reader(err, log_tx.clone(), None));
        }
        drop(log_tx);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel::<Option<ExitInfo>>(None);
        let monitor_readiness = readiness.clone();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(target: "process_launcher", error = %e, "Failed to kill worker process");
                    }
                    child.wait().await
                }
            };
            // Flush remaining output to the log before anyone sees the exit.
            let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
                for reader in readers {
                    let _ = reader.await;
                }
                let _ = pump.await;
            })
            .await;
            if drained.is_err() {
                debug!(target: "process_launcher", pid = ?pid, "Output still open after exit; not waiting further");
            }
            let info = ExitInfo::from_wait(status);
            debug!(target: "process_launcher", pid = ?pid, status = %info.description, "Worker process exited");
            monitor_readiness.fail(format!("worker exited ({})", info.description));
            let _ = exit_tx.send(Some(info));
        });

        Ok(WorkerProcess {
            pid,
            program: resolved.program,
            readiness,
            exit_rx,
            kill_tx: Some(kill_tx),
        })
    }
}

fn spawn_line_reader<R>(
    reader: R,
    log_tx: mpsc::UnboundedSender<String>,
    readiness: Option<ReadinessTracker>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    if let Some(tracker) = &readiness {
                        if let Some(port) = tracker.observe_line(&line) {
                            info!(target: "process_launcher", port, "Worker announced port");
                        }
                    }
                    if log_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(target: "process_launcher", error = %e, "Failed to read worker output");
                    break;
                }
            }
        }
    })
}
