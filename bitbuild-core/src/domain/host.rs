//! Build host domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the build host for a job is obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostSpec {
    /// Synthesis runs on the machine driving the pipeline
    Local,
    /// Synthesis runs on a remote machine reached over ssh
    Remote {
        address: String,
        /// Local command that returns the machine to its pool on release
        teardown_command: Option<String>,
    },
}

impl HostSpec {
    pub fn remote(address: impl Into<String>) -> Self {
        HostSpec::Remote {
            address: address.into(),
            teardown_command: None,
        }
    }
}

/// An acquired execution target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostTarget {
    pub address: String,
    pub local: bool,
}

impl HostTarget {
    pub fn localhost() -> Self {
        Self {
            address: "localhost".to_string(),
            local: true,
        }
    }

    pub fn remote(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            local: false,
        }
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}
