//! Health polling against the worker's `GET /health`.
//!
//! A bound port does not mean the worker is answering yet (model loading can
//! take a while), so readiness also requires a 200 from this endpoint.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::Result;

pub const HEALTH_PATH: &str = "/health";
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub fn health_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH)
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    http: Client,
}

impl HealthProbe {
    pub fn new() -> Result<Self> {
        let http = Client::builder().timeout(HEALTH_REQUEST_TIMEOUT).build()?;
        Ok(Self { http })
    }

    /// One probe: true only on HTTP 200. Transport errors count as not ready.
    pub async fn check(&self, base_url: &str) -> bool {
        match self.http.get(health_url(base_url)).send().await {
            Ok(resp) => {
                let ok = resp.status() == StatusCode::OK;
                if !ok {
                    debug!(target: "health_probe", status = %resp.status(), "Worker not healthy yet");
                }
                ok
            }
            Err(e) => {
                debug!(target: "health_probe", error = %e, "Health request failed");
                false
            }
        }
    }

    /// Poll every 500 ms until a 200 arrives or `timeout` elapses.
    /// Never errors: running out of time returns `false`.
    pub async fn wait_until_healthy(&self, base_url: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                info!(
                    target: "health_probe",
                    base_url,
                    attempts,
                    timeout_ms = timeout.as_millis() as u64,
                    "Worker did not become healthy in time"
                );
                return false;
            }
            attempts += 1;
            if let Ok(true) = tokio::time::timeout(remaining, self.check(base_url)).await {
                debug!(target: "health_probe", base_url, attempts, "Worker healthy");
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(HEALTH_POLL_INTERVAL.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_url_joins_without_double_slash() {
        assert_eq!(health_url("http://127.0.0.1:25001/"), "http://127.0.0.1:25001/health");
        assert_eq!(health_url("http://127.0.0.1:25001"), "http://127.0.0.1:25001/health");
    }
}
