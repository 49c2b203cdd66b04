//! Context-keyed client factory
//!
//! Every identifier the CPI handles names a cluster context from the
//! kubeconfig. The provider turns a context name into a client bound
//! to that context and its declared namespace. It is an explicit
//! injected capability, not a process-wide singleton, so tests and
//! alternate transports can substitute their own factory.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use kube_cpi_common::{Error, Result, DEFAULT_CONTEXT};

use crate::client::{ClusterClient, PodWatchStream};

/// Factory handing out cluster clients keyed by context name
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ClientProvider: Send + Sync {
    /// Build a client for the named context; the empty context
    /// resolves to the kubeconfig's current context
    async fn new_client(&self, context: &str) -> Result<Arc<dyn ClusterClient>>;

    /// Resolve the connection configuration for the named context
    async fn connection_config(&self, context: &str) -> Result<Config>;
}

/// Kubeconfig-backed provider
#[derive(Clone)]
pub struct KubeClientProvider {
    kubeconfig: Kubeconfig,
}

impl KubeClientProvider {
    /// Build a provider over an already-parsed kubeconfig
    pub fn new(kubeconfig: Kubeconfig) -> Self {
        Self { kubeconfig }
    }

    /// Build a provider from a kubeconfig file on disk
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path.as_ref()).map_err(|e| {
            Error::client_unavailable(
                DEFAULT_CONTEXT,
                format!("failed to read kubeconfig: {}", e),
            )
        })?;
        Ok(Self::new(kubeconfig))
    }

    /// Map the empty context to the kubeconfig's current context
    fn resolve_context(&self, context: &str) -> Result<String> {
        if context != DEFAULT_CONTEXT {
            return Ok(context.to_string());
        }
        self.kubeconfig
            .current_context
            .clone()
            .ok_or_else(|| {
                Error::client_unavailable(context, "kubeconfig has no current context")
            })
    }
}

#[async_trait]
impl ClientProvider for KubeClientProvider {
    async fn new_client(&self, context: &str) -> Result<Arc<dyn ClusterClient>> {
        let context = self.resolve_context(context)?;
        let config = self.connection_config(&context).await?;
        let namespace = config.default_namespace.clone();

        let client = Client::try_from(config).map_err(|e| {
            Error::client_unavailable(&context, format!("failed to build client: {}", e))
        })?;

        debug!(context = %context, namespace = %namespace, "built cluster client");

        Ok(Arc::new(KubeClusterClient {
            client,
            context,
            namespace,
        }))
    }

    async fn connection_config(&self, context: &str) -> Result<Config> {
        let context = self.resolve_context(context)?;
        Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context.clone()),
                ..KubeConfigOptions::default()
            },
        )
        .await
        .map_err(|e| {
            Error::client_unavailable(&context, format!("failed to load context config: {}", e))
        })
    }
}

/// [`ClusterClient`] over a real kube client, scoped to one context
/// and its namespace.
pub struct KubeClusterClient {
    client: Client,
    context: String,
    namespace: String,
}

impl KubeClusterClient {
    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn claims(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

fn immediate_delete() -> DeleteParams {
    DeleteParams::default().grace_period(0)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn context(&self) -> String {
        self.context.clone()
    }

    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    async fn get_pod(&self, name: &str) -> Result<Pod> {
        Ok(self.pods().get(name).await?)
    }

    async fn create_pod(&self, pod: Pod) -> Result<Pod> {
        Ok(self.pods().create(&PostParams::default(), &pod).await?)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods().delete(name, &immediate_delete()).await?;
        Ok(())
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn watch_pods(
        &self,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<PodWatchStream> {
        let stream = self
            .pods()
            .watch(
                &WatchParams::default().labels(label_selector),
                resource_version,
            )
            .await?;
        Ok(stream.boxed())
    }

    async fn patch_pod(&self, name: &str, patch: serde_json::Value) -> Result<()> {
        self.pods()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<PersistentVolumeClaim> {
        Ok(self.claims().get(name).await?)
    }

    async fn create_claim(&self, claim: PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        Ok(self.claims().create(&PostParams::default(), &claim).await?)
    }

    async fn delete_claim(&self, name: &str) -> Result<()> {
        self.claims().delete(name, &immediate_delete()).await?;
        Ok(())
    }

    async fn list_claims(&self, label_selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let list = self
            .claims()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn patch_claim(&self, name: &str, patch: serde_json::Value) -> Result<()> {
        self.claims()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_config_map(&self, name: &str) -> Result<ConfigMap> {
        Ok(self.config_maps().get(name).await?)
    }

    async fn create_config_map(&self, config_map: ConfigMap) -> Result<ConfigMap> {
        Ok(self
            .config_maps()
            .create(&PostParams::default(), &config_map)
            .await?)
    }

    async fn update_config_map(&self, config_map: ConfigMap) -> Result<ConfigMap> {
        let name = config_map
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::serialization("config map has no name"))?;
        Ok(self
            .config_maps()
            .replace(&name, &PostParams::default(), &config_map)
            .await?)
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        self.config_maps().delete(name, &immediate_delete()).await?;
        Ok(())
    }

    async fn create_service(&self, service: Service) -> Result<Service> {
        Ok(self
            .services()
            .create(&PostParams::default(), &service)
            .await?)
    }

    async fn list_services(&self, label_selector: &str) -> Result<Vec<Service>> {
        let list = self
            .services()
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services().delete(name, &immediate_delete()).await?;
        Ok(())
    }

    async fn get_namespace(&self) -> Result<Option<Namespace>> {
        match self.namespaces().get(&self.namespace).await {
            Ok(ns) => Ok(Some(ns)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_namespace(&self) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        self.namespaces().create(&PostParams::default(), &ns).await?;
        Ok(())
    }
}
