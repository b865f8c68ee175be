//! Typed client for the worker's loopback HTTP API.

mod types;

pub use types::{
    DownloadProgressEvent, DownloadStage, HealthResponse, ModelDownloadResponse, ModelStatus,
    ModelsStatusResponse, PcmAudio, TtsRequest, DEFAULT_SAMPLE_RATE,
};

use std::time::Duration;

use futures_core::Stream;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::stream::{HttpEventSource, StreamingEventReader};
use crate::{Result, VoiceLabError};

const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DOWNLOAD_EVENTS_PATH: &str = "/models/download/events";

/// Client bound to one resolved worker base URL.
///
/// Build it only after the supervisor reports the worker ready; it holds no
/// state beyond the URL and a connection pool.
#[derive(Clone, Debug)]
pub struct WorkerApiClient {
    http: Client,
    base_url: String,
}

impl WorkerApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // Model downloads and synthesis can run for minutes, so only the
        // connect phase is bounded.
        let http = Client::builder()
            .connect_timeout(API_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| VoiceLabError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self.http.get(self.url("/health")).send().await?;
        json_body(resp).await
    }

    /// Polling fallback when the progress stream gives up.
    pub async fn models_status(&self) -> Result<ModelsStatusResponse> {
        let resp = self.http.get(self.url("/models/status")).send().await?;
        json_body(resp).await
    }

    /// Blocks until the worker finishes (or skips) the download.
    pub async fn start_model_download(&self, model_id: &str) -> Result<ModelDownloadResponse> {
        debug!(target: "worker_api", model_id, "POST /models/download");
        let resp = self
            .http
            .post(self.url("/models/download"))
            .json(&types::ModelDownloadRequest { model_id })
            .send()
            .await?;
        json_body(resp).await
    }

    fn download_reader(&self, model_id: &str) -> Result<StreamingEventReader> {
        let source =
            HttpEventSource::get(&self.base_url, DOWNLOAD_EVENTS_PATH, &[("model_id", model_id)])?;
        Ok(StreamingEventReader::new(source))
    }

    /// One progress session without reconnects.
    pub fn model_download_events(
        &self,
        model_id: &str,
    ) -> Result<impl Stream<Item = Result<DownloadProgressEvent>> + Send + 'static> {
        Ok(self.download_reader(model_id)?.stream())
    }

    /// Progress frames with the bounded reconnect policy applied.
    pub fn model_download_events_with_retry(
        &self,
        model_id: &str,
    ) -> Result<impl Stream<Item = Result<DownloadProgressEvent>> + Send + 'static> {
        Ok(self.download_reader(model_id)?.stream_with_retry())
    }

    /// Start a download and follow its progress stream concurrently.
    ///
    /// `on_event` sees frames in arrival order. A progress stream that gives
    /// up is logged and does not fail the download. A failed download request
    /// does, and so does a final `Failed` frame, since the worker answers the
    /// request with `ok` either way.
    pub async fn download_model<F>(
        &self,
        model_id: &str,
        mut on_event: F,
    ) -> Result<ModelDownloadResponse>
    where
        F: FnMut(&DownloadProgressEvent) + Send,
    {
        let events = self.model_download_events_with_retry(model_id)?;
        let follow = async move {
            tokio::pin!(events);
            let mut failure = None;
            while let Some(item) = events.next().await {
                match item {
                    Ok(evt) => {
                        on_event(&evt);
                        failure = match evt.stage {
                            DownloadStage::Failed => Some(
                                evt.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                            ),
                            _ => None,
                        };
                        if evt.stage.is_terminal() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "worker_api", error = %e, "Download progress unavailable");
                        break;
                    }
                }
            }
            failure
        };

        let request = self.start_model_download(model_id);
        let (resp, failure) = tokio::join!(request, follow);
        let resp = resp?;
        if let Some(reason) = failure {
            warn!(target: "worker_api", model_id, reason = %reason, "Model download failed");
            return Err(VoiceLabError::DownloadFailed(reason));
        }
        info!(target: "worker_api", model_id, path = %resp.path, "Model download finished");
        Ok(resp)
    }

    /// Synthesize speech and collect the whole PCM body.
    pub async fn synthesize_pcm(&self, request: &TtsRequest) -> Result<PcmAudio> {
        let resp = self
            .http
            .post(self.url("/tts/stream"))
            .json(request)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let sample_rate = header_value(&resp, "x-sample-rate").unwrap_or(request.sample_rate);
        let channels = header_value(&resp, "x-channels").unwrap_or(1);

        let mut bytes = Vec::new();
        let body = resp.bytes_stream();
        tokio::pin!(body);
        while let Some(chunk) = body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        debug!(target: "worker_api", len = bytes.len(), sample_rate, channels, "Received PCM");
        Ok(PcmAudio {
            bytes,
            sample_rate,
            channels,
        })
    }
}

fn header_value<T: std::str::FromStr>(resp: &Response, name: &str) -> Option<T> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

async fn ensure_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().clone();
    let body = resp.text().await.unwrap_or_default();
    Err(VoiceLabError::Http(format!(
        "{} returned {}: {}",
        url.path(),
        status,
        body.trim()
    )))
}

async fn json_body<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let resp = ensure_success(resp).await?;
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
