//! User-facing report for a worker that failed to come up.

use std::fmt;
use std::path::PathBuf;

use voicelab_core::VoiceLabError;

/// What to show when startup fails: what happened, what to try, and where
/// the worker log lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    pub title: String,
    pub message: String,
    /// Machine-readable error code, see [`VoiceLabError::code`].
    pub code: &'static str,
    pub log_path: PathBuf,
    pub log_tail: Vec<String>,
}

impl StartupFailure {
    pub fn from_error(err: &VoiceLabError, log_path: PathBuf, log_tail: Vec<String>) -> Self {
        let (title, message) = match err {
            VoiceLabError::ExecutableNotFound { searched } => (
                "Voice worker not found",
                format!(
                    "The voice worker could not be located (tried: {}). Reinstall VoiceLab or point VOICELAB_WORKER_BIN at the worker executable.",
                    searched.join(", ")
                ),
            ),
            VoiceLabError::WorkerExitedBeforeReady(reason) => (
                "Voice worker failed to start",
                format!(
                    "The voice worker exited during startup ({}). The log below usually shows the cause.",
                    reason
                ),
            ),
            VoiceLabError::Timeout(what) => (
                "Voice worker did not respond",
                format!(
                    "The voice worker did not become ready in time ({}). Loading models can be slow on first run; try starting again.",
                    what
                ),
            ),
            other => ("Voice worker startup failed", other.to_string()),
        };
        Self {
            title: title.to_string(),
            message,
            code: err.code(),
            log_path,
            log_tail,
        }
    }
}

impl fmt::Display for StartupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}]", self.title, self.code)?;
        writeln!(f, "{}", self.message)?;
        write!(f, "Log file: {}", self.log_path.display())?;
        if !self.log_tail.is_empty() {
            write!(f, "\nLast {} log lines:", self.log_tail.len())?;
            for line in &self.log_tail {
                write!(f, "\n  {}", line)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for StartupFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_points_at_log_file() {
        let err = VoiceLabError::ExecutableNotFound {
            searched: vec!["/opt/voicelab/worker".into(), "python3".into()],
        };
        let failure = StartupFailure::from_error(
            &err,
            PathBuf::from("/data/logs/worker.log"),
            vec!["2026-01-01T00:00:00.000Z boom".into()],
        );
        assert_eq!(failure.code, "EXECUTABLE_NOT_FOUND");
        let text = failure.to_string();
        assert!(text.contains("VOICELAB_WORKER_BIN"));
        assert!(text.contains("/opt/voicelab/worker, python3"));
        assert!(text.contains("Log file: /data/logs/worker.log"));
        assert!(text.ends_with("  2026-01-01T00:00:00.000Z boom"));
    }

    #[test]
    fn timeout_suggests_retry() {
        let err = VoiceLabError::Timeout("worker port not known within 30000 ms".into());
        let failure = StartupFailure::from_error(&err, PathBuf::from("w.log"), Vec::new());
        assert_eq!(failure.title, "Voice worker did not respond");
        assert!(failure.message.contains("try starting again"));
        assert!(!failure.to_string().contains("Last"));
    }
}
