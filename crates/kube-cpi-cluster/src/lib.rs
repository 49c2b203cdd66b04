//! Cluster control-plane seam for the Kubernetes CPI
//!
//! Exposes the [`ClusterClient`] verb set the CPI core depends on and
//! the context-keyed [`ClientProvider`] factory that builds clients
//! from a kubeconfig.

#![deny(missing_docs)]

pub mod client;
pub mod provider;

pub use client::{ClusterClient, PodWatchStream};
pub use provider::{ClientProvider, KubeClientProvider, KubeClusterClient};

#[cfg(any(test, feature = "mocks"))]
pub use client::MockClusterClient;
#[cfg(any(test, feature = "mocks"))]
pub use provider::MockClientProvider;
