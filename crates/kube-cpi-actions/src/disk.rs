//! Persistent disk lifecycle: create, delete, lookups
//!
//! A disk is a persistent volume claim named `disk-<id>` and labeled
//! with its disk ID. Which disks a VM holds is answered from the pod's
//! volume list, cross-checked against the claims' labels, never from
//! name parsing.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use kube_cpi_common::config::CpiConfig;
use kube_cpi_common::labels::{agent_object_name, disk_object_name, disk_selector, DISK_ID_LABEL};
use kube_cpi_common::{DiskId, Result, VmId};
use kube_cpi_cluster::ClientProvider;

use crate::claims::{ensure_namespace, wait_until_bound};
use crate::compose;
use crate::props::DiskCloudProperties;

/// Orchestrates disk claims against a cluster context
pub struct DiskManager {
    provider: Arc<dyn ClientProvider>,
    config: CpiConfig,
}

impl DiskManager {
    /// Build a manager over a client provider and CPI configuration
    pub fn new(provider: Arc<dyn ClientProvider>, config: CpiConfig) -> Self {
        Self { provider, config }
    }

    /// Create a disk of the given size and wait for the claim to bind
    pub async fn create_disk(
        &self,
        size_mib: u64,
        props: &DiskCloudProperties,
    ) -> Result<DiskId> {
        let client = self.provider.new_client(&props.context).await?;
        let disk_id = Uuid::new_v4().to_string();

        info!(
            disk_id = %disk_id,
            context = %client.context(),
            size_mib = size_mib,
            "creating disk"
        );

        ensure_namespace(client.as_ref()).await?;

        let claim = compose::build_disk_claim(&disk_id, &client.namespace(), size_mib)?;
        client.create_claim(claim).await?;
        wait_until_bound(
            client.as_ref(),
            &disk_object_name(&disk_id),
            self.config.claim_poll_interval(),
        )
        .await?;

        Ok(DiskId::new(client.context(), disk_id))
    }

    /// Delete a disk's claim; an already-gone claim counts as deleted
    pub async fn delete_disk(&self, disk_id: &DiskId) -> Result<()> {
        let client = self.provider.new_client(&disk_id.context).await?;

        info!(disk_id = %disk_id, "deleting disk");
        match client
            .delete_claim(&disk_object_name(&disk_id.disk_id))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(disk_id = %disk_id, "claim already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Whether any claim carries this disk's label
    pub async fn has_disk(&self, disk_id: &DiskId) -> Result<bool> {
        let client = self.provider.new_client(&disk_id.context).await?;
        let claims = client
            .list_claims(&disk_selector(&disk_id.disk_id))
            .await?;
        Ok(!claims.is_empty())
    }

    /// List the disks attached to a VM, from its pod's volume list.
    ///
    /// A missing pod means no disks; a volume whose claim has vanished
    /// is skipped rather than failed, since a racing detach is not an
    /// inconsistency worth surfacing.
    pub async fn get_disks(&self, vm_id: &VmId) -> Result<Vec<DiskId>> {
        let client = self.provider.new_client(&vm_id.context).await?;

        let pod = match client.get_pod(&agent_object_name(&vm_id.agent_id)).await {
            Ok(pod) => pod,
            Err(err) if err.is_not_found() => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        let mut disks = Vec::new();
        let volumes = pod
            .spec
            .and_then(|spec| spec.volumes)
            .unwrap_or_default();
        for volume in volumes {
            let Some(claim_source) = volume.persistent_volume_claim else {
                continue;
            };
            let claim = match client.get_claim(&claim_source.claim_name).await {
                Ok(claim) => claim,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            if let Some(id) = claim
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(DISK_ID_LABEL))
            {
                disks.push(DiskId::new(vm_id.context.clone(), id.clone()));
            }
        }
        Ok(disks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Namespace, PersistentVolumeClaim, PersistentVolumeClaimStatus,
        PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::ErrorResponse;
    use kube_cpi_cluster::{ClusterClient, MockClientProvider, MockClusterClient};
    use std::collections::BTreeMap;

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
        CpiConfig::from_json(r#"{"agent": {"blobstore": {}, "mbus": "nats://m:4222", "ntp": []}}"#)
            .unwrap()
    }

    fn base_client() -> MockClusterClient {
        let mut client = MockClusterClient::new();
        client.expect_context().return_const("ctx".to_string());
        client.expect_namespace().return_const("bosh".to_string());
        client
    }

    fn bound_claim() -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            status: Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".to_string()),
                ..PersistentVolumeClaimStatus::default()
            }),
            ..PersistentVolumeClaim::default()
        }
    }

    fn labeled_claim(disk_id: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([(
                    DISK_ID_LABEL.to_string(),
                    disk_id.to_string(),
                )])),
                ..ObjectMeta::default()
            },
            ..PersistentVolumeClaim::default()
        }
    }

    fn pod_with_claims(claim_names: &[&str]) -> Pod {
        Pod {
            spec: Some(PodSpec {
                volumes: Some(
                    claim_names
                        .iter()
                        .map(|name| Volume {
                            name: name.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: name.to_string(),
                                ..PersistentVolumeClaimVolumeSource::default()
                            }),
                            ..Volume::default()
                        })
                        .collect(),
                ),
                ..PodSpec::default()
            }),
            ..Pod::default()
        }
    }

    #[tokio::test]
    async fn create_disk_sizes_and_labels_the_claim() {
        let mut client = base_client();
        client
            .expect_get_namespace()
            .returning(|| Ok(Some(Namespace::default())));
        client
            .expect_create_claim()
            .withf(|claim| {
                let name = claim.metadata.name.as_deref().unwrap();
                let labels = claim.metadata.labels.as_ref().unwrap();
                name.starts_with("disk-")
                    && labels[DISK_ID_LABEL] == name["disk-".len()..]
                    && claim.spec.as_ref().unwrap().resources.as_ref().unwrap()
                        .requests.as_ref().unwrap()["storage"].0
                        == "2048Mi"
            })
            .times(1)
            .returning(|claim| Ok(claim));
        client.expect_get_claim().returning(|_| Ok(bound_claim()));

        let manager = DiskManager::new(provider_for(client), config());
        let disk_id = manager
            .create_disk(2048, &DiskCloudProperties::default())
            .await
            .unwrap();
        assert_eq!(disk_id.context, "ctx");
        assert!(!disk_id.disk_id.is_empty());
    }

    #[tokio::test]
    async fn delete_disk_treats_missing_claim_as_deleted() {
        let mut client = base_client();
        client
            .expect_delete_claim()
            .withf(|name| name == "disk-d1")
            .returning(|_| Err(not_found()));

        let manager = DiskManager::new(provider_for(client), config());
        manager
            .delete_disk(&"ctx:d1".parse().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn has_disk_reflects_label_query() {
        let mut client = base_client();
        client
            .expect_list_claims()
            .withf(|sel| sel == "bosh.cloudfoundry.org/disk-id=d1")
            .returning(|_| Ok(vec![PersistentVolumeClaim::default()]));

        let manager = DiskManager::new(provider_for(client), config());
        assert!(manager.has_disk(&"ctx:d1".parse().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn get_disks_reads_labels_not_names() {
        let mut client = base_client();
        client
            .expect_get_pod()
            .withf(|name| name == "agent-a1")
            .returning(|_| Ok(pod_with_claims(&["var-vcap-a1", "disk-d1", "disk-gone"])));
        client
            .expect_get_claim()
            .returning(|name| match name {
                "var-vcap-a1" => Ok(PersistentVolumeClaim::default()),
                "disk-d1" => Ok(labeled_claim("d1")),
                _ => Err(not_found()),
            });

        let manager = DiskManager::new(provider_for(client), config());
        let disks = manager.get_disks(&"ctx:a1".parse().unwrap()).await.unwrap();
        assert_eq!(disks, vec![DiskId::new("ctx", "d1")]);
    }

    #[tokio::test]
    async fn get_disks_of_missing_vm_is_empty() {
        let mut client = base_client();
        client.expect_get_pod().returning(|_| Err(not_found()));

        let manager = DiskManager::new(provider_for(client), config());
        assert!(manager
            .get_disks(&"ctx:a1".parse().unwrap())
            .await
            .unwrap()
            .is_empty());
    }
}
