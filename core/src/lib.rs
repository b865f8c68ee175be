// VoiceLab Core Library
// Worker process supervision and resilient streaming for the desktop shell

pub mod api;
pub mod log_sink;
pub mod port;
pub mod stream;
pub mod telemetry;
pub mod worker;

// Export core types
pub use api::{
    DownloadProgressEvent, DownloadStage, HealthResponse, ModelDownloadResponse, ModelStatus,
    ModelsStatusResponse, PcmAudio, TtsRequest, WorkerApiClient,
};
pub use log_sink::{LogEntry, LogSink};
pub use port::PortAllocator;
pub use stream::{EventSource, HttpEventSource, StreamingEventReader};
pub use worker::{ExecutableCandidate, SupervisorConfig, WorkerProcessState, WorkerSupervisor};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceLabError {
    #[error("Worker executable not found (searched: {})", format_searched(.searched))]
    ExecutableNotFound { searched: Vec<String> },

    #[error("Worker exited before announcing readiness: {0}")]
    WorkerExitedBeforeReady(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Event stream failed: {0}")]
    StreamFailed(String),

    #[error("IO error: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Model download failed: {0}")]
    DownloadFailed(String),
}

impl VoiceLabError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            VoiceLabError::ExecutableNotFound { .. } => "EXECUTABLE_NOT_FOUND",
            VoiceLabError::WorkerExitedBeforeReady(_) => "WORKER_EXITED_BEFORE_READY",
            VoiceLabError::Timeout(_) => "TIMEOUT",
            VoiceLabError::StreamFailed(_) => "STREAM_FAILED",
            VoiceLabError::IoFailure(_) => "IO_FAILURE",
            VoiceLabError::Http(_) => "HTTP_ERROR",
            VoiceLabError::Serialization(_) => "SERIALIZATION_ERROR",
            VoiceLabError::Config(_) => "CONFIG_ERROR",
            VoiceLabError::InvalidState(_) => "INVALID_STATE",
            VoiceLabError::DownloadFailed(_) => "DOWNLOAD_FAILED",
        }
    }
}

impl From<reqwest::Error> for VoiceLabError {
    fn from(e: reqwest::Error) -> Self {
        VoiceLabError::Http(e.to_string())
    }
}

fn format_searched(searched: &[String]) -> String {
    if searched.is_empty() {
        "<none>".to_string()
    } else {
        searched.join(", ")
    }
}

pub type Result<T> = std::result::Result<T, VoiceLabError>;
