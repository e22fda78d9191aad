//! Cluster role and the coordinator capability.
//!
//! Only the master schedules work onto workers and proxies client requests to
//! them. Components that do either require a [`Coordinator`] at construction,
//! and the only way to obtain one is [`ClusterRole::coordinator`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterRole {
    Master,
    Worker,
}

/// Proof that the current process runs with the master role.
#[derive(Debug, Clone, Copy)]
pub struct Coordinator {
    _private: (),
}

impl ClusterRole {
    pub fn coordinator(self) -> Result<Coordinator, AppError> {
        match self {
            ClusterRole::Master => Ok(Coordinator { _private: () }),
            ClusterRole::Worker => Err(AppError::Internal(
                "worker-role nodes cannot schedule or proxy file operations".to_string(),
            )),
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::Master => f.write_str("master"),
            ClusterRole::Worker => f.write_str("worker"),
        }
    }
}

impl FromStr for ClusterRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "master" => Ok(ClusterRole::Master),
            "worker" => Ok(ClusterRole::Worker),
            other => Err(format!("unknown cluster role '{}'", other)),
        }
    }
}
