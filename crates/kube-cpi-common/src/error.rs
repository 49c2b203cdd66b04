//! Error types for the Kubernetes CPI
//!
//! Errors are structured with fields to aid debugging in production.
//! Kubernetes API errors pass through unchanged; the only errors
//! recovered locally are "already exists" on namespace creation and
//! "not found" on deletion, and those are recovered at the call site,
//! not here.

use std::time::Duration;

use thiserror::Error;

/// Main error type for CPI operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error, passed through to the director unchanged
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Cluster client construction failed for a context
    #[error("cluster client unavailable for context {context:?}: {message}")]
    ClientUnavailable {
        /// The context the client was requested for
        context: String,
        /// Description of what failed
        message: String,
    },

    /// An identifier string could not be split into context and local ID
    #[error("malformed {kind} identifier {value:?}: expected \"context:id\"")]
    MalformedIdentifier {
        /// Identifier kind ("vm" or "disk")
        kind: &'static str,
        /// The offending identifier string
        value: String,
    },

    /// VM creation was requested without any network
    #[error("a network is required")]
    MissingNetwork,

    /// VM creation was requested with more than one network
    #[error("multiple networks are not supported ({count} configured)")]
    UnsupportedTopology {
        /// Number of networks in the request
        count: usize,
    },

    /// A resource block named a kind other than cpu or memory
    #[error("{name:?} is not a supported resource kind")]
    UnsupportedResourceKind {
        /// The unsupported kind name
        name: String,
    },

    /// A resource quantity string did not parse
    #[error("invalid quantity {value:?}: {message}")]
    InvalidQuantity {
        /// The offending quantity string
        value: String,
        /// Description of what's invalid
        message: String,
    },

    /// Attach/detach was requested across cluster contexts
    #[error("disk and VM contexts must match: disk {disk_context:?}, vm {vm_context:?}")]
    ContextMismatch {
        /// Context of the VM identifier
        vm_context: String,
        /// Context of the disk identifier
        disk_context: String,
    },

    /// The embedded settings document could not be decoded
    #[error("settings document for agent {agent_id} is corrupt: {message}")]
    CorruptSettings {
        /// Agent whose settings object is corrupt
        agent_id: String,
        /// Decode failure description
        message: String,
    },

    /// The readiness watch delivered an event type other than a modification
    #[error("unexpected pod watch event: {event}")]
    UnexpectedWatchEvent {
        /// The event type that was received
        event: String,
    },

    /// The readiness watch delivered a payload that is not a pod
    #[error("unexpected watch payload: {message}")]
    UnexpectedObjectType {
        /// Description of the unexpected payload
        message: String,
    },

    /// The recreated pod did not become ready before the deadline
    #[error("pod for agent {agent_id} was not ready within {timeout:?}")]
    RecreateTimeout {
        /// Agent whose pod was being recreated
        agent_id: String,
        /// The readiness deadline that elapsed
        timeout: Duration,
    },

    /// Stemcell cloud properties named no container image
    #[error("stemcell cloud properties carry no image reference")]
    MissingStemcellImage,

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create a client-unavailable error for a context
    pub fn client_unavailable(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ClientUnavailable {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a corrupt-settings error for an agent
    pub fn corrupt_settings(agent_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CorruptSettings {
            agent_id: agent_id.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-quantity error
    pub fn invalid_quantity(value: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// True if this is a Kubernetes "not found" API error (HTTP 404)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// True if this is a Kubernetes "already exists" API conflict (HTTP 409)
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }
}
