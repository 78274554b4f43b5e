//! Process address identification for message routing.
//!
//! Every addressable endpoint, including this process and the cluster
//! master, is identified by an `id@host:port` triple.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// A structured `{id, host, port}` endpoint identifier.
///
/// Immutable once constructed. Equality is structural, so two addresses
/// compare equal exactly when all three components match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessAddress {
    /// Logical process name, e.g. `scheduler(1)` or `master`
    pub id: String,

    /// Host name or IP address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl ProcessAddress {
    /// Create a new process address from its components
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        ProcessAddress {
            id: id.into(),
            host: host.into(),
            port,
        }
    }

    /// The `host:port` pair used for socket connections
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for ProcessAddress {
    type Err = DriverError;

    /// Parse the canonical `id@host:port` string form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, rest) = s
            .split_once('@')
            .ok_or_else(|| DriverError::MalformedAddress(s.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| DriverError::MalformedAddress(s.to_string()))?;

        if id.is_empty() || host.is_empty() || port.is_empty() {
            return Err(DriverError::MalformedAddress(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| DriverError::MalformedAddress(s.to_string()))?;

        Ok(ProcessAddress::new(id, host, port))
    }
}

impl fmt::Display for ProcessAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}
