//! Cloud properties and network blocks as the director sends them
//!
//! These are the typed halves of the JSON arguments attached to each
//! lifecycle verb. Network blocks are mostly opaque: the CPI only
//! reads the static IP, and everything else flows through into the
//! settings document unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Network name to network config, as attached to `create_vm`
pub type Networks = BTreeMap<String, NetworkConfig>;

/// Arbitrary environment passthrough from the director
pub type Environment = Value;

/// One network block; only the static IP is interpreted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Statically assigned address, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Everything else (type, netmask, gateway, dns, cloud
    /// properties), passed through to the agent
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// Cloud properties of `create_vm`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VmCloudProperties {
    /// Cluster context the VM is placed in
    #[serde(default)]
    pub context: String,

    /// Services to expose the workload through
    #[serde(default)]
    pub services: Vec<ServiceDef>,

    /// Engine resource limits and requests
    #[serde(default)]
    pub resources: Resources,
}

/// One service to create alongside the workload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceDef {
    /// Service object name
    pub name: String,

    /// Service type; `NodePort` exposes on nodes, anything else is
    /// cluster-internal
    #[serde(default, rename = "type")]
    pub service_type: String,

    /// Requested cluster-internal address, if any
    #[serde(default)]
    pub cluster_ip: String,

    /// Ports to expose
    #[serde(default)]
    pub ports: Vec<PortDef>,
}

/// One exposed port of a service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortDef {
    /// Port name
    #[serde(default)]
    pub name: String,

    /// Node port, for `NodePort` services
    #[serde(default)]
    pub node_port: i32,

    /// Service port
    pub port: i32,

    /// Protocol (TCP/UDP); empty means the cluster default
    #[serde(default)]
    pub protocol: String,
}

/// Resource limits and requests for the workload container
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resources {
    /// Upper bounds, keyed by resource kind name
    #[serde(default)]
    pub limits: ResourceList,

    /// Scheduling requests, keyed by resource kind name
    #[serde(default)]
    pub requests: ResourceList,
}

/// Open map from resource kind name (`cpu` or `memory`) to a quantity
/// string
pub type ResourceList = BTreeMap<String, String>;

/// Cloud properties of `create_disk`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiskCloudProperties {
    /// Cluster context the disk is placed in
    #[serde(default)]
    pub context: String,
}

/// Cloud properties of `create_stemcell`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StemcellCloudProperties {
    /// Container image reference the stemcell was published as
    pub image: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vm_cloud_properties_deserialize() {
        let props: VmCloudProperties = serde_json::from_value(json!({
            "context": "minikube",
            "services": [{
                "name": "director",
                "type": "NodePort",
                "ports": [{"name": "ssh", "port": 22, "node_port": 32022, "protocol": "TCP"}]
            }],
            "resources": {
                "limits": {"memory": "1Gi", "cpu": "500m"},
                "requests": {"memory": "64Mi", "cpu": "100m"}
            }
        }))
        .unwrap();

        assert_eq!(props.context, "minikube");
        assert_eq!(props.services[0].service_type, "NodePort");
        assert_eq!(props.services[0].ports[0].node_port, 32022);
        assert_eq!(props.resources.limits["memory"], "1Gi");
    }

    #[test]
    fn network_keeps_unknown_fields() {
        let network: NetworkConfig = serde_json::from_value(json!({
            "ip": "10.0.0.5",
            "type": "manual",
            "dns": ["8.8.8.8"]
        }))
        .unwrap();

        assert_eq!(network.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(network.rest["type"], "manual");

        let back = serde_json::to_value(&network).unwrap();
        assert_eq!(back["dns"], json!(["8.8.8.8"]));
    }

    #[test]
    fn empty_cloud_properties_default() {
        let props: VmCloudProperties = serde_json::from_value(json!({})).unwrap();
        assert_eq!(props.context, "");
        assert!(props.services.is_empty());
        assert!(props.resources.limits.is_empty());
    }
}
