use std::fmt;

/// Lifecycle of the supervised worker process.
///
/// Written only by [`super::WorkerSupervisor`]; everyone else observes it
/// through snapshots or a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerProcessState {
    NotStarted,
    Starting,
    Ready { port: u16 },
    Degraded { last_error: String },
    Stopping,
    Stopped,
    LaunchFailed { reason: String },
}

impl WorkerProcessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, WorkerProcessState::Ready { .. })
    }

    /// States from which an explicit `start()` launches a new process.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            WorkerProcessState::NotStarted
                | WorkerProcessState::Stopped
                | WorkerProcessState::Degraded { .. }
                | WorkerProcessState::LaunchFailed { .. }
        )
    }

    /// States that `stop()` must walk through `Stopping`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkerProcessState::Starting
                | WorkerProcessState::Ready { .. }
                | WorkerProcessState::Degraded { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerProcessState::NotStarted => "not_started",
            WorkerProcessState::Starting => "starting",
            WorkerProcessState::Ready { .. } => "ready",
            WorkerProcessState::Degraded { .. } => "degraded",
            WorkerProcessState::Stopping => "stopping",
            WorkerProcessState::Stopped => "stopped",
            WorkerProcessState::LaunchFailed { .. } => "launch_failed",
        }
    }
}

impl fmt::Display for WorkerProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerProcessState::Ready { port } => write!(f, "ready(port={})", port),
            WorkerProcessState::Degraded { last_error } => write!(f, "degraded({})", last_error),
            WorkerProcessState::LaunchFailed { reason } => write!(f, "launch_failed({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}
