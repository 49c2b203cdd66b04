//! CPI configuration
//!
//! Deserialized from the JSON config file the CPI binary is started
//! with: static agent connection parameters (blob store, message bus,
//! NTP) plus the timing knobs of the attach/detach engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

const fn default_pod_ready_timeout_secs() -> u64 {
    180
}

const fn default_post_recreate_delay_secs() -> u64 {
    30
}

const fn default_claim_poll_interval_secs() -> u64 {
    1
}

/// Top-level CPI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpiConfig {
    /// Static agent connection parameters baked into every settings
    /// document
    pub agent: AgentConfig,

    /// Deadline for the recreated pod to report ready during
    /// attach/detach
    #[serde(default = "default_pod_ready_timeout_secs")]
    pub pod_ready_timeout_secs: u64,

    /// Fixed settle delay after a successful recreate, giving the
    /// in-pod agent time to come back up; may be zero
    #[serde(default = "default_post_recreate_delay_secs")]
    pub post_recreate_delay_secs: u64,

    /// Interval between storage-claim phase polls while waiting for a
    /// claim to bind
    #[serde(default = "default_claim_poll_interval_secs")]
    pub claim_poll_interval_secs: u64,
}

/// Agent connection parameters from static configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Blob store connection block, passed through opaquely
    #[serde(default)]
    pub blobstore: Value,

    /// Message bus URL
    pub mbus: String,

    /// NTP server list
    #[serde(default)]
    pub ntp: Vec<String>,
}

impl CpiConfig {
    /// Parse a configuration document from JSON
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Readiness deadline for pod recreation
    pub fn pod_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_ready_timeout_secs)
    }

    /// Post-recreate settle delay
    pub fn post_recreate_delay(&self) -> Duration {
        Duration::from_secs(self.post_recreate_delay_secs)
    }

    /// Claim bind-wait polling interval
    pub fn claim_poll_interval(&self) -> Duration {
        Duration::from_secs(self.claim_poll_interval_secs)
    }
}
