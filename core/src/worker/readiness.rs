//! Port announcement tracking.
//!
//! The worker prints `WORKER_PORT=<n>` on stdout once it has bound its
//! socket. The first announcement resolves readiness; later ones are ignored.
//! If the process exits first, readiness is rejected instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::{Result, VoiceLabError};

pub const PORT_ANNOUNCEMENT_PREFIX: &str = "WORKER_PORT=";

/// Parse a `WORKER_PORT=<n>` line.
pub fn parse_port_line(line: &str) -> Option<u16> {
    line.trim()
        .strip_prefix(PORT_ANNOUNCEMENT_PREFIX)?
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready(u16),
    Failed(String),
}

/// Single-resolution readiness future shared by the output reader, the
/// supervisor and any number of waiters.
#[derive(Debug, Clone)]
pub struct ReadinessTracker {
    tx: Arc<watch::Sender<Readiness>>,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Readiness::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Feed one stdout line. Returns the port if this line resolved readiness.
    pub fn observe_line(&self, line: &str) -> Option<u16> {
        let port = parse_port_line(line)?;
        self.resolve(port).then_some(port)
    }

    /// Resolve with `port` unless already settled. Returns whether this call won.
    pub fn resolve(&self, port: u16) -> bool {
        self.settle(Readiness::Ready(port))
    }

    /// Reject unless already settled. Returns whether this call won.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.settle(Readiness::Failed(reason.into()))
    }

    fn settle(&self, outcome: Readiness) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == Readiness::Pending {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> Readiness {
        self.tx.borrow().clone()
    }

    pub fn port(&self) -> Option<u16> {
        match *self.tx.borrow() {
            Readiness::Ready(port) => Some(port),
            _ => None,
        }
    }

    /// Wait until settled.
    pub async fn wait(&self) -> Result<u16> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|r| *r != Readiness::Pending)
            .await
            .map_err(|_| VoiceLabError::InvalidState("readiness tracker dropped".into()))?
            .clone();
        match settled {
            Readiness::Ready(port) => Ok(port),
            Readiness::Failed(reason) => Err(VoiceLabError::WorkerExitedBeforeReady(reason)),
            Readiness::Pending => Err(VoiceLabError::InvalidState(
                "readiness settled as pending".into(),
            )),
        }
    }

    /// [`Self::wait`] bounded by `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<u16> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| {
                VoiceLabError::Timeout(format!(
                    "worker port not announced within {} ms",
                    timeout.as_millis()
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_announcement_lines() {
        assert_eq!(parse_port_line("WORKER_PORT=25001"), Some(25001));
        assert_eq!(parse_port_line("  WORKER_PORT=8080\r"), Some(8080));
        assert_eq!(parse_port_line("WORKER_PORT=abc"), None);
        assert_eq!(parse_port_line("WORKER_PORT=0"), None);
        assert_eq!(parse_port_line("INFO: WORKER_PORT=1"), None);
        assert_eq!(parse_port_line("noise"), None);
    }

    #[test]
    fn failure_after_resolution_is_ignored() {
        let tracker = ReadinessTracker::new();
        assert!(tracker.resolve(30_000));
        assert!(!tracker.fail("exited"));
        assert_eq!(tracker.current(), Readiness::Ready(30_000));
    }
}
