//! Disk attach/detach protocol
//!
//! Kubernetes offers no in-place pod mutation for volumes, so both
//! operations rewrite the pod: update the settings document, splice
//! the volume and mount into a copy of the spec, delete the old pod,
//! create the new one, and wait for the agent container to come back.
//! Every step either completes or aborts the whole operation; the
//! director retries attach/detach as a unit.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::WatchEvent;
use tracing::{debug, info};

use kube_cpi_common::agent::{Settings, SETTINGS_KEY};
use kube_cpi_common::config::CpiConfig;
use kube_cpi_common::labels::{agent_object_name, agent_selector, disk_object_name, IP_ADDRESS_ANNOTATION};
use kube_cpi_common::{DiskId, Error, Result, VmId};
use kube_cpi_cluster::{ClientProvider, ClusterClient};

use crate::compose::{self, AGENT_CONTAINER_NAME};

enum Rewire {
    Attach,
    Detach,
}

/// Drives the pod-recreate protocol behind attach and detach
pub struct VolumeManager {
    provider: Arc<dyn ClientProvider>,
    pod_ready_timeout: Duration,
    post_recreate_delay: Duration,
}

impl VolumeManager {
    /// Build a manager with the configured readiness and settle timings
    pub fn new(provider: Arc<dyn ClientProvider>, config: &CpiConfig) -> Self {
        Self {
            provider,
            pod_ready_timeout: config.pod_ready_timeout(),
            post_recreate_delay: config.post_recreate_delay(),
        }
    }

    /// Attach a disk to a VM, recreating its pod with the new mount
    pub async fn attach_disk(&self, vm_id: &VmId, disk_id: &DiskId) -> Result<()> {
        self.rewire(vm_id, disk_id, Rewire::Attach).await
    }

    /// Detach a disk from a VM, recreating its pod without the mount
    pub async fn detach_disk(&self, vm_id: &VmId, disk_id: &DiskId) -> Result<()> {
        self.rewire(vm_id, disk_id, Rewire::Detach).await
    }

    async fn rewire(&self, vm_id: &VmId, disk_id: &DiskId, direction: Rewire) -> Result<()> {
        if vm_id.context != disk_id.context {
            return Err(Error::ContextMismatch {
                vm_context: vm_id.context.clone(),
                disk_context: disk_id.context.clone(),
            });
        }

        let client = self.provider.new_client(&vm_id.context).await?;
        let object_name = agent_object_name(&vm_id.agent_id);

        info!(
            vm_id = %vm_id,
            disk_id = %disk_id,
            attach = matches!(direction, Rewire::Attach),
            "rewiring disk"
        );

        let pod = client.get_pod(&object_name).await?;
        self.update_settings(client.as_ref(), vm_id, disk_id, &direction)
            .await?;

        let mut spec = pod.spec.clone().unwrap_or_default();
        match direction {
            Rewire::Attach => splice_attach(&mut spec, &disk_id.disk_id),
            Rewire::Detach => splice_detach(&mut spec, &disk_id.disk_id),
        }

        let replacement = Pod {
            metadata: carry_metadata(&pod),
            spec: Some(spec),
            status: None,
        };

        client.delete_pod(&object_name).await?;
        let created = client.create_pod(replacement).await?;
        let resource_version = created.metadata.resource_version.unwrap_or_default();

        self.await_agent_ready(client.as_ref(), &vm_id.agent_id, &resource_version)
            .await?;

        // Give the recreated agent time to settle before the director
        // issues its next command.
        tokio::time::sleep(self.post_recreate_delay).await;
        Ok(())
    }

    /// Rewrite the persistent-disk map in the VM's settings document.
    ///
    /// Everything except the mutated map entry round-trips untouched.
    /// A document that fails to decode is fatal: retrying cannot fix
    /// it and guessing at mounts is worse than stopping.
    async fn update_settings(
        &self,
        client: &dyn ClusterClient,
        vm_id: &VmId,
        disk_id: &DiskId,
        direction: &Rewire,
    ) -> Result<()> {
        let object_name = agent_object_name(&vm_id.agent_id);
        let mut config_map = client.get_config_map(&object_name).await?;

        let raw = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(SETTINGS_KEY))
            .ok_or_else(|| {
                Error::corrupt_settings(&vm_id.agent_id, "settings key missing from config map")
            })?;
        let mut settings = Settings::decode(raw)
            .map_err(|err| Error::corrupt_settings(&vm_id.agent_id, err.to_string()))?;

        match direction {
            Rewire::Attach => settings.attach_persistent_disk(
                disk_id.to_string(),
                kube_cpi_common::labels::disk_mount_path(&disk_id.disk_id),
            ),
            Rewire::Detach => settings.detach_persistent_disk(&disk_id.to_string()),
        }

        let encoded = settings
            .encode()
            .map_err(|err| Error::serialization(err.to_string()))?;
        config_map
            .data
            .get_or_insert_with(Default::default)
            .insert(SETTINGS_KEY.to_string(), encoded);
        client.update_config_map(config_map).await?;
        Ok(())
    }

    /// Watch the recreated pod until its agent container runs, or the
    /// deadline fires. The watch stream drops on every exit path.
    async fn await_agent_ready(
        &self,
        client: &dyn ClusterClient,
        agent_id: &str,
        resource_version: &str,
    ) -> Result<()> {
        let mut stream = client
            .watch_pods(&agent_selector(agent_id), resource_version)
            .await?;

        let deadline = tokio::time::sleep(self.pod_ready_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    return Err(Error::RecreateTimeout {
                        agent_id: agent_id.to_string(),
                        timeout: self.pod_ready_timeout,
                    });
                }
                event = stream.next() => match event {
                    Some(Ok(WatchEvent::Modified(pod))) => {
                        if agent_ready(&pod) {
                            debug!(agent_id = %agent_id, "recreated pod is ready");
                            return Ok(());
                        }
                    }
                    Some(Ok(WatchEvent::Error(status))) => {
                        return Err(Error::UnexpectedObjectType {
                            message: status.message,
                        });
                    }
                    Some(Ok(other)) => {
                        return Err(Error::UnexpectedWatchEvent {
                            event: watch_event_name(&other).to_string(),
                        });
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        return Err(Error::UnexpectedWatchEvent {
                            event: "watch stream closed".to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn splice_attach(spec: &mut PodSpec, disk_id: &str) {
    spec.volumes
        .get_or_insert_with(Vec::new)
        .push(compose::disk_volume(disk_id));
    if let Some(container) = spec
        .containers
        .iter_mut()
        .find(|c| c.name == AGENT_CONTAINER_NAME)
    {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(compose::disk_volume_mount(disk_id));
    }
}

fn splice_detach(spec: &mut PodSpec, disk_id: &str) {
    let volume_name = disk_object_name(disk_id);
    if let Some(volumes) = spec.volumes.as_mut() {
        volumes.retain(|volume| volume.name != volume_name);
    }
    for container in &mut spec.containers {
        if let Some(mounts) = container.volume_mounts.as_mut() {
            mounts.retain(|mount| mount.name != volume_name);
        }
    }
}

/// Identity-only metadata for the replacement pod: name, namespace,
/// labels, annotations. A pod that never had the address annotation
/// gets it seeded from the last observed pod IP so the address
/// survives the recreate.
fn carry_metadata(pod: &Pod) -> ObjectMeta {
    let mut annotations = pod.metadata.annotations.clone().unwrap_or_default();
    if !annotations.contains_key(IP_ADDRESS_ANNOTATION) {
        if let Some(ip) = pod
            .status
            .as_ref()
            .and_then(|status| status.pod_ip.clone())
        {
            annotations.insert(IP_ADDRESS_ANNOTATION.to_string(), ip);
        }
    }

    ObjectMeta {
        name: pod.metadata.name.clone(),
        namespace: pod.metadata.namespace.clone(),
        labels: pod.metadata.labels.clone(),
        annotations: (!annotations.is_empty()).then_some(annotations),
        ..ObjectMeta::default()
    }
}

fn agent_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    status
        .container_statuses
        .as_ref()
        .is_some_and(|statuses| {
            statuses.iter().any(|cs| {
                cs.name == AGENT_CONTAINER_NAME
                    && cs.ready
                    && cs.state.as_ref().is_some_and(|s| s.running.is_some())
            })
        })
}

fn watch_event_name(event: &WatchEvent<Pod>) -> &'static str {
    match event {
        WatchEvent::Added(_) => "added",
        WatchEvent::Modified(_) => "modified",
        WatchEvent::Deleted(_) => "deleted",
        WatchEvent::Bookmark(_) => "bookmark",
        WatchEvent::Error(_) => "error",
    }
}
