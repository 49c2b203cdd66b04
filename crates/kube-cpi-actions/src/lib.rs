//! CPI actions: the compute/storage lifecycle against a cluster
//!
//! Everything the director invokes lives here: VM and disk lifecycle,
//! the attach/detach recreate protocol, metadata tagging, and the
//! stemcell passthrough. Cluster access goes through the
//! [`kube_cpi_cluster::ClusterClient`] seam so every operation is
//! testable against a mocked control plane.

#![deny(missing_docs)]
#![allow(clippy::new_without_default)]

pub mod claims;
pub mod compose;
pub mod disk;
pub mod metadata;
pub mod props;
pub mod stemcell;
pub mod vm;
pub mod volume;

pub use disk::DiskManager;
pub use vm::VmManager;
pub use volume::VolumeManager;
