// Worker process lifecycle: launch, readiness, health, shutdown, supervision

pub mod config;
pub mod health;
pub mod launcher;
pub mod readiness;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use config::{ExecutableCandidate, SupervisorConfig};
pub use health::HealthProbe;
pub use launcher::{ExitInfo, LaunchSpec, ProcessLauncher, WorkerProcess};
pub use readiness::{parse_port_line, Readiness, ReadinessTracker};
pub use shutdown::ShutdownCoordinator;
pub use state::WorkerProcessState;
pub use supervisor::{base_url_for, WorkerSupervisor, RESTART_DELAY};
