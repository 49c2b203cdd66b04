//! Composite identifiers binding a logical VM or disk to a cluster context
//!
//! Every identifier handed to the director is `context:localID`. The
//! context names a kubeconfig connection profile; the local half is an
//! opaque agent or disk ID. Decoding splits on the first colon, so the
//! local half may itself contain colons while the context may not.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of a VM: a cluster context plus the agent ID of the
/// workload running in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VmId {
    /// Cluster context the VM lives in
    pub context: String,
    /// Agent ID of the VM's workload
    pub agent_id: String,
}

/// Identifier of a disk: a cluster context plus the disk's local ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiskId {
    /// Cluster context the disk lives in
    pub context: String,
    /// Local disk ID
    pub disk_id: String,
}

impl VmId {
    /// Bind an agent ID to a cluster context
    pub fn new(context: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            agent_id: agent_id.into(),
        }
    }
}

impl DiskId {
    /// Bind a disk ID to a cluster context
    pub fn new(context: impl Into<String>, disk_id: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            disk_id: disk_id.into(),
        }
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.agent_id)
    }
}

impl fmt::Display for DiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.disk_id)
    }
}

fn split_cid(kind: &'static str, value: &str) -> Result<(String, String), Error> {
    match value.split_once(':') {
        Some((context, local)) => Ok((context.to_string(), local.to_string())),
        None => Err(Error::MalformedIdentifier {
            kind,
            value: value.to_string(),
        }),
    }
}

impl FromStr for VmId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (context, agent_id) = split_cid("vm", s)?;
        Ok(Self { context, agent_id })
    }
}

impl FromStr for DiskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (context, disk_id) = split_cid("disk", s)?;
        Ok(Self { context, disk_id })
    }
}

impl TryFrom<String> for VmId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl TryFrom<String> for DiskId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

impl From<VmId> for String {
    fn from(id: VmId) -> String {
        id.to_string()
    }
}

impl From<DiskId> for String {
    fn from(id: DiskId) -> String {
        id.to_string()
    }
}
