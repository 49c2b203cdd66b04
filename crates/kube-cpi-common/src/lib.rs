//! Common types for the Kubernetes CPI: identifiers, errors, label
//! taxonomy, the agent settings document, and configuration.

#![deny(missing_docs)]

pub mod agent;
pub mod cid;
pub mod config;
pub mod error;
pub mod labels;

pub use cid::{DiskId, VmId};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The context value resolved to the kubeconfig's current context
pub const DEFAULT_CONTEXT: &str = "";
