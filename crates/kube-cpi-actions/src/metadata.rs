//! Director tag application
//!
//! Tags become labels under the CPI prefix so `kubectl` users can see
//! deployment/job/index at a glance. Tags that do not survive the
//! label grammar are dropped rather than failing the operation: tags
//! are advisory, the objects they describe are not.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use kube_cpi_common::labels::{
    agent_object_name, disk_object_name, is_valid_label_key, is_valid_label_value,
    namespaced_tag_key,
};
use kube_cpi_common::{DiskId, Result, VmId};
use kube_cpi_cluster::ClientProvider;

/// Apply director tags to a VM's pod as prefixed labels
pub async fn set_vm_metadata(
    provider: &dyn ClientProvider,
    vm_id: &VmId,
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    let client = provider.new_client(&vm_id.context).await?;
    client
        .patch_pod(&agent_object_name(&vm_id.agent_id), labels_patch(tags))
        .await
}

/// Apply director tags to a disk's claim as prefixed labels
pub async fn set_disk_metadata(
    provider: &dyn ClientProvider,
    disk_id: &DiskId,
    tags: &BTreeMap<String, String>,
) -> Result<()> {
    let client = provider.new_client(&disk_id.context).await?;
    client
        .patch_claim(&disk_object_name(&disk_id.disk_id), labels_patch(tags))
        .await
}

/// Merge patch carrying the valid subset of the tags as labels.
///
/// Keys get the prefix and are lowercased; values are applied
/// verbatim. An empty subset still produces the (no-change) patch so
/// a tag-only typo never turns into a hard failure.
fn labels_patch(tags: &BTreeMap<String, String>) -> serde_json::Value {
    let mut labels = BTreeMap::new();
    for (key, value) in tags {
        let label_key = namespaced_tag_key(key);
        if !is_valid_label_key(&label_key) || !is_valid_label_value(value) {
            debug!(tag = %key, "dropping tag that is not a valid label");
            continue;
        }
        labels.insert(label_key, value.clone());
    }

    json!({"metadata": {"labels": labels}})
}
