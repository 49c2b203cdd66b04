//! Cluster control-plane client trait
//!
//! The CPI core depends on exactly these verbs, scoped to one context
//! and namespace, for five object kinds: pods, persistent volume
//! claims, config maps, services, and namespaces. The trait allows
//! mocking every Kubernetes interaction in tests while production
//! code goes through a real kube client.
//!
//! Deletes are issued with a zero grace period and propagate "not
//! found" to the caller; the lifecycle orchestrator decides which
//! deletions tolerate it.

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Service};
use kube::core::WatchEvent;

use kube_cpi_common::Result;

/// Stream of raw watch events for pods matching a label selector
pub type PodWatchStream = BoxStream<'static, kube::Result<WatchEvent<Pod>>>;

/// Object CRUD and label-selector list/watch against one cluster
/// context and namespace.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of the cluster context this client is bound to
    fn context(&self) -> String;

    /// Namespace every namespaced operation is scoped to
    fn namespace(&self) -> String;

    /// Get a pod by name
    async fn get_pod(&self, name: &str) -> Result<Pod>;

    /// Create a pod
    async fn create_pod(&self, pod: Pod) -> Result<Pod>;

    /// Delete a pod by name with a zero grace period
    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// List pods matching an exact label selector
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>>;

    /// Open a watch over pods matching a label selector, starting at
    /// the given resource version. Dropping the stream closes the
    /// watch connection.
    async fn watch_pods(&self, label_selector: &str, resource_version: &str)
        -> Result<PodWatchStream>;

    /// Merge-patch a pod (used for metadata/label updates)
    async fn patch_pod(&self, name: &str, patch: serde_json::Value) -> Result<()>;

    /// Get a persistent volume claim by name
    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim>;

    /// Create a persistent volume claim
    async fn create_claim(&self, claim: PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    /// Delete a claim by name with a zero grace period
    async fn delete_claim(&self, name: &str) -> Result<()>;

    /// List claims matching an exact label selector
    async fn list_claims(&self, label_selector: &str) -> Result<Vec<PersistentVolumeClaim>>;

    /// Merge-patch a claim (used for metadata/label updates)
    async fn patch_claim(&self, name: &str, patch: serde_json::Value) -> Result<()>;

    /// Get a config map by name
    async fn get_config_map(&self, name: &str) -> Result<ConfigMap>;

    /// Create a config map
    async fn create_config_map(&self, config_map: ConfigMap) -> Result<ConfigMap>;

    /// Replace a config map with an updated copy
    async fn update_config_map(&self, config_map: ConfigMap) -> Result<ConfigMap>;

    /// Delete a config map by name with a zero grace period
    async fn delete_config_map(&self, name: &str) -> Result<()>;

    /// Create a service
    async fn create_service(&self, service: Service) -> Result<Service>;

    /// List services matching an exact label selector
    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>>;

    /// Delete a service by name with a zero grace period
    async fn delete_service(&self, name: &str) -> Result<()>;

    /// Get this client's namespace object, or None if it does not exist
    async fn get_namespace(&self) -> Result<Option<Namespace>>;

    /// Create this client's namespace
    async fn create_namespace(&self) -> Result<()>;
}
