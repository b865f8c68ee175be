//! Worker supervision: launch, readiness, crash restart and shutdown.
//!
//! All state transitions and every mutation of the process handle happen
//! under `Inner::core`. Waiting (port, health, shutdown grace) never holds
//! that lock, so `stop()` is never blocked behind a slow probe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::SupervisorConfig;
use super::health::HealthProbe;
use super::launcher::{wait_for_exit, ExitInfo, LaunchSpec, ProcessLauncher, WorkerProcess};
use super::readiness::ReadinessTracker;
use super::shutdown::ShutdownCoordinator;
use super::state::WorkerProcessState;
use crate::log_sink::LogSink;
use crate::port::PortAllocator;
use crate::{Result, VoiceLabError};

/// Fixed delay between an unexpected exit and the automatic relaunch.
/// Not exponential: a worker that keeps crashing is relaunched every second.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

pub fn base_url_for(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Supervises exactly one worker process.
///
/// Construct once at startup and share it (e.g. in an `Arc`) with whatever
/// needs it.
pub struct WorkerSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    log: Arc<LogSink>,
    launcher: ProcessLauncher,
    probe: HealthProbe,
    shutdown: ShutdownCoordinator,
    ports: PortAllocator,
    core: Mutex<Core>,
    state_tx: watch::Sender<WorkerProcessState>,
    launches: AtomicU64,
}

struct Core {
    state: WorkerProcessState,
    /// Bumped on every launch and on stop; background tasks carrying an
    /// older value are stale and must not touch the state.
    generation: u64,
    process: Option<WorkerProcess>,
    readiness: Option<ReadinessTracker>,
    port: Option<u16>,
    restart_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Core {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.restart_task.take() {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let log = Arc::new(LogSink::new(config.log_path.clone())?);
        let (state_tx, _rx) = watch::channel(WorkerProcessState::NotStarted);
        let inner = Inner {
            launcher: ProcessLauncher::new(Arc::clone(&log)),
            probe: HealthProbe::new()?,
            shutdown: ShutdownCoordinator::new(config.shutdown_grace)?,
            ports: PortAllocator::new(config.port_min, config.port_max),
            log,
            config,
            core: Mutex::new(Core {
                state: WorkerProcessState::NotStarted,
                generation: 0,
                process: None,
                readiness: None,
                port: None,
                restart_task: None,
                tasks: Vec::new(),
            }),
            state_tx,
            launches: AtomicU64::new(0),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Current state snapshot.
    pub fn state(&self) -> WorkerProcessState {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<WorkerProcessState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of processes launched since construction.
    pub fn launch_count(&self) -> u64 {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub fn log_path(&self) -> &std::path::Path {
        self.inner.log.path()
    }

    /// Port of the current process, once known.
    pub async fn port(&self) -> Option<u16> {
        self.inner.core.lock().await.port
    }

    pub async fn base_url(&self) -> Option<String> {
        self.port()
            .await
            .map(|port| base_url_for(&self.inner.config.host, port))
    }

    /// Launch the worker unless one is already starting, running or stopping.
    pub async fn start(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if !core.state.can_start() {
            debug!(target: "worker_supervisor", state = %core.state, "start() ignored");
            return Ok(());
        }
        self.inner.launch_locked(&mut core)
    }

    /// Wait until the worker's port is known.
    ///
    /// Rides through a pending crash restart; fails with `Timeout` when the
    /// budget runs out and with `WorkerExitedBeforeReady` if the launch fails.
    pub async fn wait_for_port(&self, timeout: Duration) -> Result<u16> {
        tokio::time::timeout(timeout, self.port_ready())
            .await
            .map_err(|_| {
                VoiceLabError::Timeout(format!(
                    "worker port not known within {} ms",
                    timeout.as_millis()
                ))
            })?
    }

    async fn port_ready(&self) -> Result<u16> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                WorkerProcessState::Ready { port } => return Ok(port),
                WorkerProcessState::Starting => {
                    let tracker = self.inner.core.lock().await.readiness.clone();
                    if let Some(tracker) = tracker {
                        if let Ok(port) = tracker.wait().await {
                            return Ok(port);
                        }
                    }
                }
                WorkerProcessState::Degraded { .. } => {}
                WorkerProcessState::LaunchFailed { reason } => {
                    return Err(VoiceLabError::WorkerExitedBeforeReady(reason));
                }
                other => {
                    return Err(VoiceLabError::InvalidState(format!("worker is {}", other)));
                }
            }
            state_rx
                .changed()
                .await
                .map_err(|_| VoiceLabError::InvalidState("supervisor dropped".into()))?;
        }
    }

    /// Wait for the port, then poll `/health` with whatever budget is left.
    /// Returns `Ok(false)` if the worker never answered in time.
    pub async fn wait_for_health(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let port = self.wait_for_port(timeout).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let base_url = base_url_for(&self.inner.config.host, port);
        Ok(self.inner.probe.wait_until_healthy(&base_url, remaining).await)
    }

    /// Stop the worker and disable automatic restarts.
    ///
    /// Walks `Stopping → Stopped`: best-effort shutdown request, bounded
    /// grace wait, then a forced kill.
    pub async fn stop(&self) -> Result<()> {
        let (process, base_url) = {
            let mut core = self.inner.core.lock().await;
            if !core.state.is_active() {
                debug!(target: "worker_supervisor", state = %core.state, "stop() ignored");
                return Ok(());
            }
            self.inner
                .transition(&mut core, WorkerProcessState::Stopping);
            core.generation += 1;
            core.abort_tasks();
            core.readiness = None;
            let base_url = core
                .port
                .take()
                .map(|port| base_url_for(&self.inner.config.host, port));
            (core.process.take(), base_url)
        };

        self.inner.record("[supervisor] stopping worker");
        if let Some(mut process) = process {
            let exit = self
                .inner
                .shutdown
                .shutdown(&mut process, base_url.as_deref())
                .await;
            self.inner
                .record(&format!("[supervisor] worker stopped ({})", exit.description));
        }

        let mut core = self.inner.core.lock().await;
        self.inner.transition(&mut core, WorkerProcessState::Stopped);
        Ok(())
    }

    /// Append an application-level entry to the worker log.
    pub fn append_log_entry(&self, message: &str) -> Result<()> {
        self.inner.log.append(message)
    }

    /// Last `max_lines` log lines, read fresh from disk.
    pub fn get_log_tail(&self, max_lines: usize) -> Result<Vec<String>> {
        self.inner.log.tail(max_lines)
    }
}

impl Inner {
    fn transition(&self, core: &mut Core, next: WorkerProcessState) {
        info!(target: "worker_supervisor", from = %core.state, to = %next, "Worker state transition");
        core.state = next.clone();
        self.state_tx.send_replace(next);
    }

    fn record(&self, message: &str) {
        if let Err(e) = self.log.append(message) {
            warn!(target: "worker_supervisor", error = %e, "Failed to write worker log entry");
        }
    }

    /// Allocate a port, launch, and spawn the readiness and exit watchers.
    fn launch_locked(self: &Arc<Self>, core: &mut Core) -> Result<()> {
        core.abort_tasks();
        core.generation += 1;
        let generation = core.generation;
        self.transition(core, WorkerProcessState::Starting);

        let allocated = match self.ports.allocate() {
            Ok(port) => port,
            Err(e) => return Err(self.fail_launch(core, e)),
        };

        let readiness = ReadinessTracker::new();
        let spec = LaunchSpec {
            candidates: self.config.candidates.clone(),
            extra_args: self.config.bind_args(allocated),
            working_dir: self.config.working_dir.clone(),
            env: self.config.env.clone(),
        };
        let process = match self.launcher.launch(&spec, readiness.clone()) {
            Ok(process) => process,
            Err(e) => return Err(self.fail_launch(core, e)),
        };

        let launches = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(&format!(
            "[supervisor] launched {} (pid {:?}, port {}, launch #{})",
            process.program().display(),
            process.pid(),
            allocated,
            launches
        ));

        let exit_signal = process.exit_signal();
        core.process = Some(process);
        core.readiness = Some(readiness.clone());
        core.port = None;

        let weak = Arc::downgrade(self);
        core.tasks.push(tokio::spawn(startup(
            weak.clone(),
            generation,
            readiness,
            allocated,
            exit_signal.clone(),
        )));
        core.tasks
            .push(tokio::spawn(watch_exit(weak, generation, exit_signal)));
        Ok(())
    }

    fn fail_launch(&self, core: &mut Core, e: VoiceLabError) -> VoiceLabError {
        error!(target: "worker_supervisor", error = %e, code = e.code(), "Worker launch failed");
        self.record(&format!("[supervisor] launch failed: {}", e));
        self.transition(
            core,
            WorkerProcessState::LaunchFailed {
                reason: e.to_string(),
            },
        );
        e
    }
}

/// Resolve the port (announced, or the allocated one after the announce
/// timeout), then promote to `Ready` once `/health` answers.
async fn startup(
    weak: Weak<Inner>,
    generation: u64,
    readiness: ReadinessTracker,
    allocated: u16,
    exit_signal: watch::Receiver<Option<ExitInfo>>,
) {
    let Some(inner) = weak.upgrade() else { return };
    let announce_timeout = inner.config.announce_timeout;
    let startup_timeout = inner.config.startup_timeout;
    let host = inner.config.host.clone();
    let probe = inner.probe.clone();
    drop(inner);

    let port = match readiness.wait_timeout(announce_timeout).await {
        Ok(port) => port,
        Err(VoiceLabError::Timeout(_)) => {
            if readiness.resolve(allocated) {
                info!(
                    target: "worker_supervisor",
                    port = allocated,
                    "No port announcement; using the allocated port"
                );
            }
            match readiness.port() {
                Some(port) => port,
                None => return,
            }
        }
        // Exited before announcing; the exit watcher records the failure.
        Err(_) => return,
    };

    {
        let Some(inner) = weak.upgrade() else { return };
        let mut core = inner.core.lock().await;
        if core.generation != generation {
            return;
        }
        core.port = Some(port);
    }

    let base_url = base_url_for(&host, port);
    let healthy = tokio::select! {
        ok = probe.wait_until_healthy(&base_url, startup_timeout) => ok,
        _ = wait_for_exit(exit_signal) => return,
    };

    let Some(inner) = weak.upgrade() else { return };
    let mut core = inner.core.lock().await;
    if core.generation != generation || core.state != WorkerProcessState::Starting {
        return;
    }
    if healthy {
        inner.record(&format!("[supervisor] worker ready on port {}", port));
        inner.transition(&mut core, WorkerProcessState::Ready { port });
    } else {
        let last_error = format!(
            "worker did not answer {} within {} ms",
            super::health::HEALTH_PATH,
            startup_timeout.as_millis()
        );
        warn!(target: "worker_supervisor", port, "{}", last_error);
        inner.record(&format!("[supervisor] {}; terminating", last_error));
        inner.transition(&mut core, WorkerProcessState::Degraded { last_error });
        if let Some(process) = core.process.as_mut() {
            process.kill();
        }
    }
}

/// Decide what an exit means: launch failure, or crash followed by a
/// scheduled restart.
async fn watch_exit(
    weak: Weak<Inner>,
    generation: u64,
    exit_signal: watch::Receiver<Option<ExitInfo>>,
) {
    let exit = wait_for_exit(exit_signal).await;

    let Some(inner) = weak.upgrade() else { return };
    let mut core = inner.core.lock().await;
    if core.generation != generation {
        return;
    }
    if matches!(
        core.state,
        WorkerProcessState::Stopping | WorkerProcessState::Stopped
    ) {
        return;
    }

    core.process = None;
    core.port = None;
    let announced = core
        .readiness
        .take()
        .and_then(|tracker| tracker.port())
        .is_some();

    if !announced && core.state == WorkerProcessState::Starting {
        let reason = format!(
            "worker exited before announcing a port ({})",
            exit.description
        );
        error!(target: "worker_supervisor", "{}", reason);
        inner.record(&format!("[supervisor] {}", reason));
        inner.transition(&mut core, WorkerProcessState::LaunchFailed { reason });
        return;
    }

    let last_error = match &core.state {
        WorkerProcessState::Degraded { last_error } => last_error.clone(),
        _ => format!("worker exited unexpectedly ({})", exit.description),
    };
    warn!(
        target: "worker_supervisor",
        error = %last_error,
        delay_ms = RESTART_DELAY.as_millis() as u64,
        "Worker crashed; scheduling restart"
    );
    inner.record(&format!(
        "[supervisor] {}; restarting in {} ms",
        last_error,
        RESTART_DELAY.as_millis()
    ));
    inner.transition(&mut core, WorkerProcessState::Degraded { last_error });

    let weak = Arc::downgrade(&inner);
    core.restart_task = Some(tokio::spawn(async move {
        tokio::time::sleep(RESTART_DELAY).await;
        let Some(inner) = weak.upgrade() else { return };
        let mut core = inner.core.lock().await;
        if core.generation != generation
            || !matches!(core.state, WorkerProcessState::Degraded { .. })
        {
            return;
        }
        // Detach ourselves so the launch below does not abort this task.
        core.restart_task = None;
        info!(target: "worker_supervisor", "Restarting worker");
        if let Err(e) = inner.launch_locked(&mut core) {
            error!(target: "worker_supervisor", error = %e, "Automatic restart failed");
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_uses_host_and_port() {
        assert_eq!(base_url_for("127.0.0.1", 25001), "http://127.0.0.1:25001");
    }
}
