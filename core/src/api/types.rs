use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    #[serde(default)]
    pub version: String,
}

/// One row of `GET /models/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub model_id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub size: String,
    /// Same vocabulary as [`DownloadStage`], kept as text so new values
    /// from the worker don't break the listing.
    pub status: String,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ModelsStatusResponse {
    #[serde(default)]
    pub models: Vec<ModelStatus>,
}

impl ModelsStatusResponse {
    pub fn find(&self, model_id: &str) -> Option<&ModelStatus> {
        self.models.iter().find(|m| m.model_id == model_id)
    }
}

/// Body of `POST /models/download`. The worker reads the snake_case key.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModelDownloadRequest<'a> {
    pub model_id: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDownloadResponse {
    pub ok: bool,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStage {
    Pending,
    Downloading,
    Completed,
    /// The worker writes this stage as `error`.
    #[serde(alias = "error")]
    Failed,
}

impl DownloadStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStage::Completed | DownloadStage::Failed)
    }
}

/// One frame of the download progress stream.
///
/// `percent` is only meaningful within one session; after a reconnect the
/// latest frame wins and may report less than an earlier one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgressEvent {
    #[serde(rename = "pct", alias = "percent")]
    pub percent: u8,
    pub stage: DownloadStage,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /tts/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TtsRequest {
    pub voice_id: String,
    pub text: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub model_size: String,
    pub backend: String,
    pub sample_rate: u32,
    pub enable_ssml_lite: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pronunciation_profile_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

impl TtsRequest {
    pub fn new(voice_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            voice_id: voice_id.into(),
            text: text.into(),
            language: "Auto".to_string(),
            style: None,
            model_size: "0.6b".to_string(),
            backend: "auto".to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            enable_ssml_lite: true,
            pronunciation_profile_id: None,
            project_id: None,
        }
    }
}

/// Raw signed 16-bit little-endian samples returned by `/tts/stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}
