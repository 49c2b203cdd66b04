//! Shared cluster bookkeeping for the lifecycle operations

use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::debug;

use kube_cpi_common::Result;
use kube_cpi_cluster::ClusterClient;

/// Make sure the client's namespace exists, creating it on first use.
///
/// A concurrent create racing ours is fine: "already exists" means
/// someone else won and the namespace is there.
pub async fn ensure_namespace(client: &dyn ClusterClient) -> Result<()> {
    if client.get_namespace().await?.is_some() {
        return Ok(());
    }

    debug!(namespace = %client.namespace(), "creating namespace");
    match client.create_namespace().await {
        Ok(()) => Ok(()),
        Err(err) if err.is_already_exists() => Ok(()),
        Err(err) => Err(err),
    }
}

/// Poll a claim until the cluster reports it bound to a volume.
///
/// Provisioning time is entirely up to the storage backend, so there
/// is no deadline here; the director applies its own task timeout.
pub async fn wait_until_bound(
    client: &dyn ClusterClient,
    name: &str,
    poll_interval: Duration,
) -> Result<PersistentVolumeClaim> {
    loop {
        let claim = client.get_claim(name).await?;
        let phase = claim
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref());
        if phase == Some("Bound") {
            return Ok(claim);
        }

        debug!(claim = %name, phase = phase.unwrap_or("unknown"), "claim not bound yet");
        tokio::time::sleep(poll_interval).await;
    }
}
