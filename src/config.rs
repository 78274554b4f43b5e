//! Configuration for the scheduler driver and master detector.

use std::time::Duration;

use crate::error::{DriverError, DriverResult};
use crate::serialization::SerializationFormat;

/// Default timeout for confirming a coordination service connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default host the driver's inbound endpoint binds to
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// Default capacity of the inbound event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Default upper bound on an inbound frame's payload length
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Configuration for the scheduler driver's transport
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Host the inbound endpoint binds to
    pub bind_host: String,

    /// Port the inbound endpoint binds to; 0 picks an ephemeral port
    pub bind_port: u16,

    /// Wire format for protocol messages
    pub format: SerializationFormat,

    /// Capacity of the inbound event channel
    pub event_capacity: usize,

    /// Largest inbound frame payload accepted before the connection is
    /// dropped
    pub max_frame_len: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: 0,
            format: SerializationFormat::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl DriverConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind host
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Set the bind port
    pub fn bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    /// Set the wire format
    pub fn format(mut self, format: SerializationFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the inbound frame length limit
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

/// Configuration for the master detector's coordination session
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Coordination service hosts, as `host:port` strings
    pub hosts: Vec<String>,

    /// Root path the election nodes live under
    pub base_path: String,

    /// Bounded wait for connection confirmation
    pub connect_timeout: Duration,
}

impl DetectorConfig {
    /// Create a configuration for the given hosts and election root
    pub fn new(hosts: Vec<String>, base_path: impl Into<String>) -> DriverResult<Self> {
        if hosts.is_empty() {
            return Err(DriverError::MissingHosts);
        }
        Ok(DetectorConfig {
            hosts,
            base_path: base_path.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Set the connection confirmation timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
