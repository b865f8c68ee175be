//! Loopback port selection for the worker process.
//!
//! Ports are probed by binding a throwaway listener and releasing it right
//! away. The port is not reserved afterwards: if the worker loses the race
//! for it, the supervisor's restart path simply allocates a new one.

use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

use rand::Rng;
use tracing::{debug, warn};

use crate::{Result, VoiceLabError};

/// Number of random in-range ports tried before falling back to an
/// OS-assigned ephemeral port.
pub const PORT_ALLOCATION_ATTEMPTS: usize = 20;

/// Upper bound on ports checked by the sequential sweep that follows the
/// random attempts.
pub const PORT_SWEEP_LIMIT: u32 = 2_048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    pub min_port: u16,
    pub max_port: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            min_port: 20_000,
            max_port: 40_000,
        }
    }
}

impl PortAllocator {
    pub fn new(min_port: u16, max_port: u16) -> Self {
        Self { min_port, max_port }
    }

    /// Pick a loopback port that was bindable at the instant of return.
    pub fn allocate(&self) -> Result<u16> {
        allocate(self.min_port, self.max_port)
    }
}

/// Try random ports in `[min_port, max_port]`, then sweep the range from a
/// random offset, then fall back to port 0.
pub fn allocate(min_port: u16, max_port: u16) -> Result<u16> {
    if min_port == 0 || min_port > max_port {
        return Err(VoiceLabError::Config(format!(
            "invalid port range {}..={}",
            min_port, max_port
        )));
    }

    let mut rng = rand::rng();
    for attempt in 0..PORT_ALLOCATION_ATTEMPTS {
        let candidate = rng.random_range(min_port..=max_port);
        if is_bindable(candidate) {
            debug!(target: "port_allocator", port = candidate, attempt, "Allocated port");
            return Ok(candidate);
        }
    }

    let span = u32::from(max_port) - u32::from(min_port) + 1;
    let offset = rng.random_range(0..span);
    for step in 0..span.min(PORT_SWEEP_LIMIT) {
        let candidate = min_port + ((offset + step) % span) as u16;
        if is_bindable(candidate) {
            debug!(target: "port_allocator", port = candidate, step, "Allocated port by sweep");
            return Ok(candidate);
        }
    }

    warn!(
        target: "port_allocator",
        min_port,
        max_port,
        attempts = PORT_ALLOCATION_ATTEMPTS,
        "No free port found in range; asking the OS for an ephemeral port"
    );
    ephemeral_port()
}

/// Whether a listener can currently bind `127.0.0.1:port`.
pub fn is_bindable(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}

fn ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let err = allocate(30_000, 20_000).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn occupied_port_is_not_bindable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_bindable(port));
    }
}
