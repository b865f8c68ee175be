//! Application services shared by the shell's views and commands.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{error, info, warn};
use voicelab_audio::{WaveContainerWriter, WaveFormat};
use voicelab_core::worker::supervisor::base_url_for;
use voicelab_core::{Result, TtsRequest, VoiceLabError, WorkerApiClient, WorkerSupervisor};

use crate::config::ShellConfig;
use crate::failure::StartupFailure;

/// Constructed once at startup and passed to whoever needs the worker.
pub struct ShellServices {
    config: ShellConfig,
    supervisor: Arc<WorkerSupervisor>,
    wav: WaveContainerWriter,
    api: OnceCell<WorkerApiClient>,
}

impl ShellServices {
    pub fn new(config: ShellConfig) -> Result<Self> {
        let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor.clone())?);
        let wav = WaveContainerWriter::new(config.output_dir.clone());
        Ok(Self {
            config,
            supervisor,
            wav,
            api: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    pub fn wav_writer(&self) -> &WaveContainerWriter {
        &self.wav
    }

    /// Start the worker and wait until it answers health checks, then build
    /// the API client. Concurrent callers share one initialization.
    ///
    /// A failed attempt leaves the supervisor as it is (it may still be
    /// restarting the worker); call [`Self::shutdown`] to give up.
    pub async fn initialize(&self) -> std::result::Result<&WorkerApiClient, StartupFailure> {
        self.api
            .get_or_try_init(|| self.bring_up())
            .await
            .map_err(|e| self.startup_failure(&e))
    }

    async fn bring_up(&self) -> Result<WorkerApiClient> {
        let budget = self.config.startup_budget;
        let deadline = Instant::now() + budget;
        info!(target: "shell", budget_ms = budget.as_millis() as u64, "Starting voice worker");

        self.supervisor.start().await?;
        let port = self
            .supervisor
            .wait_for_port(deadline.saturating_duration_since(Instant::now()))
            .await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.supervisor.wait_for_health(remaining).await? {
            return Err(VoiceLabError::Timeout(format!(
                "worker did not answer /health within {} ms",
                budget.as_millis()
            )));
        }

        let base_url = base_url_for(&self.config.supervisor.host, port);
        info!(target: "shell", base_url = %base_url, "Voice worker ready");
        WorkerApiClient::new(base_url)
    }

    fn startup_failure(&self, err: &VoiceLabError) -> StartupFailure {
        error!(target: "shell", error = %err, code = err.code(), "Voice worker startup failed");
        let log_tail = self
            .supervisor
            .get_log_tail(self.config.log_tail_lines)
            .unwrap_or_else(|e| {
                warn!(target: "shell", error = %e, "Could not read worker log");
                Vec::new()
            });
        StartupFailure::from_error(err, self.supervisor.log_path().to_path_buf(), log_tail)
    }

    /// The API client, once [`Self::initialize`] has succeeded.
    pub fn api(&self) -> Result<&WorkerApiClient> {
        self.api
            .get()
            .ok_or_else(|| VoiceLabError::InvalidState("worker not initialized".into()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!(target: "shell", "Shutting down voice worker");
        self.supervisor.stop().await
    }

    /// Synthesize `request` and store it as a WAV file in the output dir.
    pub async fn synthesize_to_file(&self, request: &TtsRequest) -> Result<PathBuf> {
        let pcm = self.api()?.synthesize_pcm(request).await?;
        let format = WaveFormat {
            sample_rate: pcm.sample_rate,
            channels: pcm.channels,
            bits_per_sample: 16,
        };
        self.wav.write_async(pcm.bytes, format).await
    }
}
