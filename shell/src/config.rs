use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use voicelab_core::worker::ExecutableCandidate;
use voicelab_core::SupervisorConfig;

/// Overall budget for "worker launched, port known, health answered".
pub const DEFAULT_STARTUP_BUDGET: Duration = Duration::from_secs(30);
/// Log lines attached to a startup failure report.
pub const DEFAULT_LOG_TAIL_LINES: usize = 20;

/// Shell configuration: supervisor settings plus shell-level knobs.
#[derive(Clone, Debug)]
pub struct ShellConfig {
    pub supervisor: SupervisorConfig,
    /// Where synthesized WAV files go.
    pub output_dir: PathBuf,
    pub startup_budget: Duration,
    pub log_tail_lines: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let supervisor = SupervisorConfig::default();
        Self {
            output_dir: supervisor.data_dir.join("outputs"),
            supervisor,
            startup_budget: DEFAULT_STARTUP_BUDGET,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

impl ShellConfig {
    /// Load configuration from a TOML file (path via VOICELAB_CONFIG or ./voicelab.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let path = std::env::var("VOICELAB_CONFIG").unwrap_or_else(|_| "voicelab.toml".into());
        Self::load_from(Path::new(&path))
    }

    /// Like [`Self::load`] with an explicit file. A missing or broken file
    /// leaves the defaults in place.
    pub fn load_from(path: &Path) -> Self {
        let default = Self::default();
        if !path.exists() {
            tracing::info!(target: "shell_config", path = %path.display(), "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<ShellToml>(&s) {
                Ok(t) => {
                    tracing::info!(target: "shell_config", path = %path.display(), "Loaded TOML config");
                    t.overlay(default)
                }
                Err(e) => {
                    tracing::warn!(target: "shell_config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "shell_config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ShellToml {
    pub worker: Option<WorkerToml>,
    pub output: Option<OutputToml>,
    pub startup: Option<StartupToml>,
}

impl ShellToml {
    fn overlay(self, mut base: ShellConfig) -> ShellConfig {
        if let Some(w) = self.worker {
            let old_data_dir = base.supervisor.data_dir.clone();
            w.apply(&mut base.supervisor);
            // Outputs follow a moved data dir unless placed explicitly.
            if base.supervisor.data_dir != old_data_dir {
                base.output_dir = base.supervisor.data_dir.join("outputs");
            }
        }
        if let Some(o) = self.output {
            if let Some(dir) = o.dir {
                base.output_dir = dir;
            }
        }
        if let Some(s) = self.startup {
            if let Some(ms) = s.timeout_ms {
                base.startup_budget = Duration::from_millis(ms);
            }
            if let Some(n) = s.log_tail_lines {
                base.log_tail_lines = n;
            }
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct WorkerToml {
    pub bin: Option<PathBuf>,
    pub args: Option<Vec<String>>, // e.g., ["worker_main.py"] when bin is an interpreter
    pub dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub port_min: Option<u16>,
    pub port_max: Option<u16>,
    pub announce_timeout_ms: Option<u64>,
    pub startup_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub env: Option<HashMap<String, String>>,
}

impl WorkerToml {
    fn apply(self, c: &mut SupervisorConfig) {
        if let Some(d) = self.data_dir {
            *c = c.clone().with_data_dir(d);
        }
        if let Some(bin) = self.bin {
            let args = self.args.unwrap_or_default();
            // An explicit binary goes first; the built-in search stays as fallback.
            c.candidates
                .insert(0, ExecutableCandidate::new(bin).with_args(args));
        }
        if let Some(d) = self.dir {
            c.working_dir = Some(d);
        }
        if let Some(v) = self.port_min {
            c.port_min = v;
        }
        if let Some(v) = self.port_max {
            c.port_max = v;
        }
        if let Some(ms) = self.announce_timeout_ms {
            c.announce_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.startup_timeout_ms {
            c.startup_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.shutdown_grace_ms {
            c.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(env) = self.env {
            c.env.extend(env);
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct OutputToml {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct StartupToml {
    pub timeout_ms: Option<u64>,
    pub log_tail_lines: Option<usize>,
}
