//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port used by the binary when none is given
pub const DEFAULT_PORT: u16 = 4009;

/// Deadline for the auth line
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Bytes requested per socket read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512;

/// Event queue buffer size
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Runtime settings for a [`Server`](crate::Server)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the acceptor binds to
    pub addr: SocketAddr,
    /// How long a new connection has to send its auth line
    pub auth_timeout: Duration,
    /// Debug mode disables the auth deadline
    pub debug: bool,
    /// Size of each socket read; one read may carry several messages
    pub read_buffer_size: usize,
    /// Capacity of the bounded event queue feeding the event loop
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::with_port(DEFAULT_PORT)
    }
}

impl ServerConfig {
    /// Listen on every interface at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            debug: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Auth deadline in effect, `None` in debug mode
    pub fn effective_auth_timeout(&self) -> Option<Duration> {
        if self.debug {
            None
        } else {
            Some(self.auth_timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), DEFAULT_PORT);
        assert_eq!(config.effective_auth_timeout(), Some(DEFAULT_AUTH_TIMEOUT));
        assert_eq!(config.read_buffer_size, 512);
    }

    #[test]
    fn test_debug_disables_auth_timeout() {
        let config = ServerConfig::with_port(0)
            .with_auth_timeout(Duration::from_millis(100))
            .with_debug(true);
        assert!(config.effective_auth_timeout().is_none());
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let config = ServerConfig::with_port(0)
            .with_read_buffer_size(0)
            .with_event_capacity(0);
        assert_eq!(config.read_buffer_size, 1);
        assert_eq!(config.event_capacity, 1);
    }
}
