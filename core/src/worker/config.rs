use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Entry script run by the interpreter fallback.
pub const WORKER_ENTRY_SCRIPT: &str = "worker_main.py";

#[cfg(windows)]
const WORKER_BIN_NAME: &str = "voicelab-worker.exe";
#[cfg(not(windows))]
const WORKER_BIN_NAME: &str = "voicelab-worker";

/// One way of launching the worker: a program plus the arguments that go
/// before `--host`/`--port`.
///
/// `program` is either a path (absolute, or containing a separator) that must
/// exist, or a bare name looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableCandidate {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ExecutableCandidate {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Configuration for [`super::WorkerSupervisor`] loaded from environment variables
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Ordered launch candidates; the first one that resolves wins.
    pub candidates: Vec<ExecutableCandidate>,
    pub working_dir: Option<PathBuf>,
    /// Extra environment for the worker, on top of the inherited one.
    pub env: HashMap<String, String>,
    pub host: String,
    pub port_min: u16,
    pub port_max: u16,
    pub data_dir: PathBuf,
    pub log_path: PathBuf,
    pub cache_dir: PathBuf,
    /// How long to wait for a `WORKER_PORT=` line before trusting the
    /// allocated port.
    pub announce_timeout: Duration,
    /// Health budget once the port is known; exceeding it counts as a crash.
    pub startup_timeout: Duration,
    /// Grace period between the shutdown request and a forced kill.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let data_dir = std::env::var("VOICELAB_DATA_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let install_dir = install_dir();
        let worker_dir = std::env::var("VOICELAB_WORKER_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| install_dir.join("worker"));
        let cache_dir = data_dir.join("cache");

        let mut env = HashMap::new();
        env.insert("HF_HOME".to_string(), cache_dir.display().to_string());
        env.insert(
            "VOICELAB_CACHE_DIR".to_string(),
            cache_dir.display().to_string(),
        );
        env.insert("HF_HUB_DISABLE_TELEMETRY".to_string(), "1".to_string());
        env.insert("DO_NOT_TRACK".to_string(), "1".to_string());
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        Self {
            candidates: default_candidates(&install_dir, &worker_dir),
            working_dir: Some(worker_dir),
            env,
            host: "127.0.0.1".to_string(),
            port_min: env_parse("VOICELAB_PORT_MIN").unwrap_or(20_000),
            port_max: env_parse("VOICELAB_PORT_MAX").unwrap_or(40_000),
            log_path: data_dir.join("logs").join("worker.log"),
            cache_dir,
            data_dir,
            announce_timeout: Duration::from_millis(
                env_parse("VOICELAB_ANNOUNCE_TIMEOUT_MS").unwrap_or(10_000),
            ),
            startup_timeout: Duration::from_millis(
                env_parse("VOICELAB_STARTUP_TIMEOUT_MS").unwrap_or(120_000),
            ),
            shutdown_grace: Duration::from_millis(
                env_parse("VOICELAB_SHUTDOWN_GRACE_MS").unwrap_or(5_000),
            ),
        }
    }
}

impl SupervisorConfig {
    /// Config that launches exactly one candidate and keeps its files under
    /// `data_dir`.
    pub fn for_candidate(candidate: ExecutableCandidate, data_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::default().with_data_dir(data_dir);
        cfg.candidates = vec![candidate];
        cfg.working_dir = None;
        cfg
    }

    /// Move the data dir, and with it the log file and model cache.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        self.log_path = data_dir.join("logs").join("worker.log");
        self.cache_dir = data_dir.join("cache");
        for key in ["HF_HOME", "VOICELAB_CACHE_DIR"] {
            self.env
                .insert(key.to_string(), self.cache_dir.display().to_string());
        }
        self.data_dir = data_dir;
        self
    }

    /// Arguments appended after the candidate's own arguments.
    pub fn bind_args(&self, port: u16) -> Vec<String> {
        vec![
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            port.to_string(),
        ]
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("VoiceLab")
}

/// Directory of the running executable, or the current directory.
fn install_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_candidates(install_dir: &Path, worker_dir: &Path) -> Vec<ExecutableCandidate> {
    let mut candidates = Vec::new();
    if let Ok(bin) = std::env::var("VOICELAB_WORKER_BIN") {
        if !bin.is_empty() {
            candidates.push(ExecutableCandidate::new(bin));
        }
    }
    candidates.push(ExecutableCandidate::new(
        install_dir.join("worker").join(WORKER_BIN_NAME),
    ));
    candidates.push(ExecutableCandidate::new(
        install_dir.join("..").join("worker").join(WORKER_BIN_NAME),
    ));
    let script = worker_dir.join(WORKER_ENTRY_SCRIPT).display().to_string();
    candidates.push(ExecutableCandidate::new("python3").with_args([script.clone()]));
    candidates.push(ExecutableCandidate::new("python").with_args([script]));
    candidates
}
