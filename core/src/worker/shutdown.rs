//! Graceful-then-forceful worker shutdown.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, warn};

use super::launcher::{ExitInfo, WorkerProcess};
use crate::Result;

pub const SHUTDOWN_PATH: &str = "/shutdown";
pub const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on waiting for the exit status after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    http: Client,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Result<Self> {
        let http = Client::builder().timeout(SHUTDOWN_REQUEST_TIMEOUT).build()?;
        Ok(Self { http, grace })
    }

    /// Best-effort `POST /shutdown`. Every failure is ignored; the return
    /// value only says whether the worker acknowledged with a 2xx.
    pub async fn request_shutdown(&self, base_url: &str) -> bool {
        let url = format!("{}{}", base_url.trim_end_matches('/'), SHUTDOWN_PATH);
        match self.http.post(&url).body(Vec::<u8>::new()).send().await {
            Ok(resp) => {
                debug!(target: "shutdown", status = %resp.status(), "Shutdown request answered");
                resp.status().is_success()
            }
            Err(e) => {
                debug!(target: "shutdown", error = %e, "Shutdown request failed; ignoring");
                false
            }
        }
    }

    /// Ask the worker to exit, wait out the grace period, then kill it.
    pub async fn shutdown(&self, process: &mut WorkerProcess, base_url: Option<&str>) -> ExitInfo {
        if !process.has_exited() {
            if let Some(url) = base_url {
                self.request_shutdown(url).await;
            }
        }

        match tokio::time::timeout(self.grace, process.wait_exit()).await {
            Ok(info) => {
                info!(target: "shutdown", status = %info.description, "Worker exited");
                info
            }
            Err(_) => {
                warn!(
                    target: "shutdown",
                    pid = ?process.pid(),
                    grace_ms = self.grace.as_millis() as u64,
                    "Worker still alive after grace period; killing"
                );
                process.kill();
                match tokio::time::timeout(KILL_WAIT, process.wait_exit()).await {
                    Ok(info) => info,
                    Err(_) => ExitInfo {
                        code: None,
                        description: "killed; exit status not observed".to_string(),
                    },
                }
            }
        }
    }
}
