//! VM lifecycle: create, delete, existence checks
//!
//! A VM is a pod plus its settings config map, its ephemeral scratch
//! claim, and any services the director asked for, all carrying the
//! owning agent-id label. Creation performs no rollback: a failed
//! create leaves partial objects behind for the director's cleanup
//! pass to collect.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use tracing::{debug, info};

use kube_cpi_common::agent::{Settings, VmSpec, SETTINGS_KEY};
use kube_cpi_common::config::CpiConfig;
use kube_cpi_common::labels::{agent_object_name, agent_selector, AGENT_ID_LABEL};
use kube_cpi_common::{Error, Result, VmId};
use kube_cpi_cluster::ClientProvider;

use crate::claims::{ensure_namespace, wait_until_bound};
use crate::compose;
use crate::props::{Environment, Networks, VmCloudProperties};

/// Orchestrates VM creation and teardown against a cluster context
pub struct VmManager {
    provider: Arc<dyn ClientProvider>,
    config: CpiConfig,
}

impl VmManager {
    /// Build a manager over a client provider and CPI configuration
    pub fn new(provider: Arc<dyn ClientProvider>, config: CpiConfig) -> Self {
        Self { provider, config }
    }

    /// Create a VM for the given agent from a stemcell image.
    ///
    /// All property validation happens before the first mutating
    /// cluster call; after that, failures abort without rollback.
    pub async fn create_vm(
        &self,
        agent_id: &str,
        stemcell_id: &str,
        props: &VmCloudProperties,
        networks: &Networks,
        env: &Environment,
    ) -> Result<VmId> {
        let (_, network) = compose::resolve_network(networks)?;
        let client = self.provider.new_client(&props.context).await?;
        let namespace = client.namespace();

        // Composing the pod up front validates resource quantities
        // before anything is created.
        let pod = compose::build_pod(agent_id, &namespace, stemcell_id, network, &props.resources)?;

        info!(
            agent_id = %agent_id,
            context = %client.context(),
            namespace = %namespace,
            stemcell = %stemcell_id,
            "creating vm"
        );

        ensure_namespace(client.as_ref()).await?;

        let settings = self.build_settings(agent_id, networks, env)?;
        client
            .create_config_map(settings_config_map(agent_id, &namespace, &settings)?)
            .await?;

        for service in compose::build_services(agent_id, &namespace, &props.services) {
            client.create_service(service).await?;
        }

        let claim = compose::build_ephemeral_claim(agent_id, &namespace);
        let claim_name = client
            .create_claim(claim)
            .await?
            .metadata
            .name
            .unwrap_or_else(|| kube_cpi_common::labels::ephemeral_claim_name(agent_id));
        wait_until_bound(client.as_ref(), &claim_name, self.config.claim_poll_interval()).await?;

        client.create_pod(pod).await?;

        let vm_id = VmId::new(client.context(), agent_id);
        info!(vm_id = %vm_id, "vm created");
        Ok(vm_id)
    }

    /// Delete a VM's pod, services, and settings config map.
    ///
    /// Already-gone objects count as deleted; an error deleting one
    /// service stops the cascade so the director retries the whole
    /// operation.
    pub async fn delete_vm(&self, vm_id: &VmId) -> Result<()> {
        let client = self.provider.new_client(&vm_id.context).await?;
        let object_name = agent_object_name(&vm_id.agent_id);

        info!(vm_id = %vm_id, "deleting vm");

        match client.delete_pod(&object_name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(vm_id = %vm_id, "pod already gone");
            }
            Err(err) => return Err(err),
        }

        for service in client
            .list_services(&agent_selector(&vm_id.agent_id))
            .await?
        {
            if let Some(name) = service.metadata.name.as_deref() {
                client.delete_service(name).await?;
            }
        }

        match client.delete_config_map(&object_name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(vm_id = %vm_id, "config map already gone");
            }
            Err(err) => return Err(err),
        }

        Ok(())
    }

    /// Whether any pod carries this VM's agent-id label
    pub async fn has_vm(&self, vm_id: &VmId) -> Result<bool> {
        Ok(self.find_vm(vm_id).await?.is_some())
    }

    /// Find the pod backing a VM, if it exists
    pub async fn find_vm(&self, vm_id: &VmId) -> Result<Option<Pod>> {
        let client = self.provider.new_client(&vm_id.context).await?;
        let mut pods = client.list_pods(&agent_selector(&vm_id.agent_id)).await?;
        Ok(if pods.is_empty() {
            None
        } else {
            Some(pods.remove(0))
        })
    }

    fn build_settings(
        &self,
        agent_id: &str,
        networks: &Networks,
        env: &Environment,
    ) -> Result<Settings> {
        let mut network_values = BTreeMap::new();
        for (name, network) in networks {
            let mut value = serde_json::to_value(network)
                .map_err(|err| Error::serialization(err.to_string()))?;
            if let Value::Object(map) = &mut value {
                map.insert("preconfigured".to_string(), Value::Bool(true));
            }
            network_values.insert(name.clone(), value);
        }

        Ok(Settings {
            blobstore: self.config.agent.blobstore.clone(),
            mbus: self.config.agent.mbus.clone(),
            ntp: self.config.agent.ntp.clone(),
            agent_id: agent_id.to_string(),
            vm: VmSpec {
                name: agent_id.to_string(),
            },
            env: env.clone(),
            networks: network_values,
            ..Settings::default()
        })
    }
}

fn settings_config_map(agent_id: &str, namespace: &str, settings: &Settings) -> Result<ConfigMap> {
    let encoded = settings
        .encode()
        .map_err(|err| Error::serialization(err.to_string()))?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(agent_object_name(agent_id)),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                AGENT_ID_LABEL.to_string(),
                agent_id.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(SETTINGS_KEY.to_string(), encoded)])),
        ..ConfigMap::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Namespace, PersistentVolumeClaimStatus, Service,
    };
    use kube::core::ErrorResponse;
    use kube_cpi_cluster::{ClusterClient, MockClientProvider, MockClusterClient};
    use kube_cpi_common::agent::Settings;
    use serde_json::json;

    fn not_found() -> kube_cpi_common::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        })
        .into()
    }

    fn provider_for(client: MockClusterClient) -> Arc<dyn ClientProvider> {
        let client: Arc<dyn ClusterClient> = Arc::new(client);
        let mut provider = MockClientProvider::new();
        provider
            .expect_new_client()
            .returning(move |_| Ok(client.clone()));
        Arc::new(provider)
    }

    fn config() -> CpiConfig {
        CpiConfig::from_json(
            r#"{"agent": {"blobstore": {"provider": "local"}, "mbus": "nats://10.0.0.2:4222", "ntp": ["pool.ntp.org"]}}"#,
        )
        .unwrap()
    }

    fn bound_claim(name: &str) -> k8s_openapi::api::core::v1::PersistentVolumeClaim {
        k8s_openapi::api::core::v1::PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            status: Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".to_string()),
                ..PersistentVolumeClaimStatus::default()
            }),
            ..k8s_openapi::api::core::v1::PersistentVolumeClaim::default()
        }
    }

    fn base_client() -> MockClusterClient {
        let mut client = MockClusterClient::new();
        client.expect_context().return_const("ctx".to_string());
        client.expect_namespace().return_const("bosh".to_string());
        client
    }

    fn networks() -> Networks {
        serde_json::from_value(json!({"default": {"ip": "10.0.0.5"}})).unwrap()
    }

    #[tokio::test]
    async fn create_vm_builds_all_objects_and_returns_id() {
        let mut client = base_client();
        client
            .expect_get_namespace()
            .returning(|| Ok(Some(Namespace::default())));
        client
            .expect_create_config_map()
            .withf(|cm| {
                let raw = &cm.data.as_ref().unwrap()[SETTINGS_KEY];
                let settings = Settings::decode(raw).unwrap();
                cm.metadata.name.as_deref() == Some("agent-a1")
                    && settings.agent_id == "a1"
                    && settings.vm.name == "a1"
                    && settings.mbus == "nats://10.0.0.2:4222"
                    && settings.networks["default"]["preconfigured"] == json!(true)
                    && settings.disks.persistent.is_empty()
            })
            .times(1)
            .returning(|cm| Ok(cm));
        client
            .expect_create_service()
            .times(1)
            .returning(|svc| Ok(svc));
        client
            .expect_create_claim()
            .withf(|claim| claim.metadata.name.as_deref() == Some("var-vcap-a1"))
            .times(1)
            .returning(|claim| Ok(claim));
        client
            .expect_get_claim()
            .returning(|name| Ok(bound_claim(name)));
        client
            .expect_create_pod()
            .withf(|pod| pod.metadata.name.as_deref() == Some("agent-a1"))
            .times(1)
            .returning(|pod| Ok(pod));

        let props: VmCloudProperties = serde_json::from_value(json!({
            "context": "ctx",
            "services": [{"name": "agent", "type": "NodePort",
                          "ports": [{"name": "mbus", "port": 6868, "node_port": 32068, "protocol": "TCP"}]}]
        }))
        .unwrap();

        let manager = VmManager::new(provider_for(client), config());
        let vm_id = manager
            .create_vm("a1", "registry/stemcell:7", &props, &networks(), &json!({}))
            .await
            .unwrap();

        assert_eq!(vm_id.to_string(), "ctx:a1");
    }

    #[tokio::test]
    async fn create_vm_rejects_bad_resources_before_any_mutation() {
        // No expectations beyond context/namespace: any create call
        // would panic the mock.
        let client = base_client();

        let props: VmCloudProperties = serde_json::from_value(json!({
            "context": "ctx",
            "resources": {"limits": {"memory": "12nuts"}}
        }))
        .unwrap();

        let manager = VmManager::new(provider_for(client), config());
        let err = manager
            .create_vm("a1", "img", &props, &networks(), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity { .. }));
    }

    #[tokio::test]
    async fn create_vm_requires_a_network() {
        let manager = VmManager::new(Arc::new(MockClientProvider::new()), config());
        let err = manager
            .create_vm(
                "a1",
                "img",
                &VmCloudProperties::default(),
                &Networks::new(),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingNetwork));
    }

    #[tokio::test]
    async fn delete_vm_cascades_in_order_and_tolerates_missing() {
        let mut seq = mockall::Sequence::new();
        let mut client = base_client();
        client
            .expect_delete_pod()
            .withf(|name| name == "agent-a1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(not_found()));
        client
            .expect_list_services()
            .withf(|sel| sel == "bosh.cloudfoundry.org/agent-id=a1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(vec![Service {
                    metadata: ObjectMeta {
                        name: Some("agent-svc".to_string()),
                        ..ObjectMeta::default()
                    },
                    ..Service::default()
                }])
            });
        client
            .expect_delete_service()
            .withf(|name| name == "agent-svc")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        client
            .expect_delete_config_map()
            .withf(|name| name == "agent-a1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(not_found()));

        let manager = VmManager::new(provider_for(client), config());
        manager
            .delete_vm(&"ctx:a1".parse().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn has_vm_reflects_label_query() {
        let mut client = base_client();
        client
            .expect_list_pods()
            .withf(|sel| sel == "bosh.cloudfoundry.org/agent-id=a1")
            .returning(|_| Ok(vec![Pod::default()]));

        let manager = VmManager::new(provider_for(client), config());
        assert!(manager.has_vm(&"ctx:a1".parse().unwrap()).await.unwrap());

        let mut client = base_client();
        client.expect_list_pods().returning(|_| Ok(vec![]));
        let manager = VmManager::new(provider_for(client), config());
        assert!(!manager.has_vm(&"ctx:a1".parse().unwrap()).await.unwrap());
    }
}
