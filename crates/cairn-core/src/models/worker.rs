use serde::{Deserialize, Serialize};

/// A worker node as known to the registry.
///
/// `available_space` is whatever the worker last reported; the master only
/// reads it when choosing where new files go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    pub host_address: String,
    pub port: u16,
    /// Free storage in bytes
    pub available_space: i64,
}

impl Worker {
    pub fn new(id: i64, host_address: impl Into<String>, port: u16, available_space: i64) -> Self {
        Self {
            id,
            host_address: host_address.into(),
            port,
            available_space,
        }
    }

    /// `http://host:port`, bracketing bare IPv6 literals.
    pub fn base_url(&self) -> String {
        if self.host_address.contains(':') && !self.host_address.starts_with('[') {
            format!("http://[{}]:{}", self.host_address, self.port)
        } else {
            format!("http://{}:{}", self.host_address, self.port)
        }
    }
}
