//! Pure translation of cloud properties into cluster object specs
//!
//! No I/O happens here: everything takes director-supplied properties
//! and returns fully-formed object specifications for the lifecycle
//! orchestrator to create. Validation errors (network cardinality,
//! resource kinds, quantity strings) surface before any cluster call
//! is made.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, KeyToPath, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements,
    SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use kube_cpi_common::labels::{
    agent_object_name, disk_mount_path, disk_object_name, ephemeral_claim_name, AGENT_ID_LABEL,
    DISK_ID_LABEL, EPHEMERAL_ID_LABEL, IP_ADDRESS_ANNOTATION,
};
use kube_cpi_common::{agent, Error, Result};

use crate::props::{NetworkConfig, Networks, Resources, ServiceDef};

/// Name of the single agent container in every workload pod
pub const AGENT_CONTAINER_NAME: &str = "bosh-job";

/// Name of the settings-document volume; never touched by attach/detach
pub const SETTINGS_VOLUME_NAME: &str = "bosh-config";

/// Name of the ephemeral scratch volume
pub const EPHEMERAL_VOLUME_NAME: &str = "var-vcap";

/// Where the settings document appears inside the container
pub const SETTINGS_MOUNT_PATH: &str = "/var/vcap/bosh/instance_settings.json";

/// Entrypoint of the agent container
const AGENT_COMMAND: &str = "/usr/sbin/runsvdir-start";

/// Size of every VM's ephemeral scratch claim
const EPHEMERAL_CLAIM_SIZE: &str = "3Gi";

/// Resolve the single supported network from the request.
///
/// Exactly one network is supported: zero is an error and so is more
/// than one, since the pod-level IP annotation can only carry a single
/// address.
pub fn resolve_network(networks: &Networks) -> Result<(&str, &NetworkConfig)> {
    let mut iter = networks.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Err(Error::MissingNetwork),
        (Some((name, network)), None) => Ok((name.as_str(), network)),
        (Some(_), Some(_)) => Err(Error::UnsupportedTopology {
            count: networks.len(),
        }),
    }
}

/// Translate a resource block into engine resource requirements.
///
/// Only `cpu` and `memory` kinds are accepted, and every quantity
/// string is validated up front so a bad entry fails the whole
/// translation with no partial application.
pub fn resource_requirements(resources: &Resources) -> Result<ResourceRequirements> {
    Ok(ResourceRequirements {
        limits: resource_list(&resources.limits)?,
        requests: resource_list(&resources.requests)?,
        ..ResourceRequirements::default()
    })
}

fn resource_list(
    list: &BTreeMap<String, String>,
) -> Result<Option<BTreeMap<String, Quantity>>> {
    if list.is_empty() {
        return Ok(None);
    }

    let mut out = BTreeMap::new();
    for (kind, value) in list {
        match kind.as_str() {
            "cpu" | "memory" => {}
            other => {
                return Err(Error::UnsupportedResourceKind {
                    name: other.to_string(),
                })
            }
        }
        validate_quantity(value)?;
        out.insert(kind.clone(), Quantity(value.clone()));
    }
    Ok(Some(out))
}

/// Validate a Kubernetes quantity string: an optional sign, a decimal
/// number, and either a binary/decimal SI suffix or an exponent.
pub fn validate_quantity(value: &str) -> Result<()> {
    let invalid = |msg: &str| Error::invalid_quantity(value, msg);

    let body = value.strip_prefix(['+', '-']).unwrap_or(value);
    let digits_end = body
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(digits_end);

    if number.is_empty() || number == "." {
        return Err(invalid("missing numeric part"));
    }
    if number.matches('.').count() > 1 {
        return Err(invalid("malformed decimal"));
    }

    match suffix {
        "" | "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" | "n" | "u" | "m" | "k" | "M" | "G"
        | "T" | "P" | "E" => Ok(()),
        s if s.starts_with(['e', 'E']) => {
            let exp = s[1..].strip_prefix(['+', '-']).unwrap_or(&s[1..]);
            if !exp.is_empty() && exp.bytes().all(|b| b.is_ascii_digit()) {
                Ok(())
            } else {
                Err(invalid("malformed exponent"))
            }
        }
        _ => Err(invalid("unrecognized suffix")),
    }
}

/// Build the workload pod spec for an agent.
///
/// One privileged root container running the agent from the stemcell
/// image, with the settings document mounted read-only, an ephemeral
/// scratch volume, and the owning-identity label. A static network
/// address becomes the pod's IP annotation.
pub fn build_pod(
    agent_id: &str,
    namespace: &str,
    image: &str,
    network: &NetworkConfig,
    resources: &Resources,
) -> Result<Pod> {
    let mut annotations = BTreeMap::new();
    if let Some(ip) = network.ip.as_deref().filter(|ip| !ip.is_empty()) {
        annotations.insert(IP_ADDRESS_ANNOTATION.to_string(), ip.to_string());
    }

    let object_name = agent_object_name(agent_id);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(object_name.clone()),
            namespace: Some(namespace.to_string()),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            labels: Some(BTreeMap::from([(
                AGENT_ID_LABEL.to_string(),
                agent_id.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            hostname: Some(agent_id.to_string()),
            containers: vec![Container {
                name: AGENT_CONTAINER_NAME.to_string(),
                image: Some(image.to_string()),
                image_pull_policy: Some("Always".to_string()),
                command: Some(vec![AGENT_COMMAND.to_string()]),
                resources: Some(resource_requirements(resources)?),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    run_as_user: Some(0),
                    ..SecurityContext::default()
                }),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: SETTINGS_VOLUME_NAME.to_string(),
                        mount_path: SETTINGS_MOUNT_PATH.to_string(),
                        sub_path: Some("instance_settings.json".to_string()),
                        read_only: Some(true),
                        ..VolumeMount::default()
                    },
                    VolumeMount {
                        name: EPHEMERAL_VOLUME_NAME.to_string(),
                        mount_path: "/var/vcap".to_string(),
                        sub_path: Some("vcap".to_string()),
                        ..VolumeMount::default()
                    },
                ]),
                ..Container::default()
            }],
            volumes: Some(vec![
                Volume {
                    name: SETTINGS_VOLUME_NAME.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: object_name,
                        items: Some(vec![KeyToPath {
                            key: agent::SETTINGS_KEY.to_string(),
                            path: "instance_settings.json".to_string(),
                            ..KeyToPath::default()
                        }]),
                        ..ConfigMapVolumeSource::default()
                    }),
                    ..Volume::default()
                },
                Volume {
                    name: EPHEMERAL_VOLUME_NAME.to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: ephemeral_claim_name(agent_id),
                        ..PersistentVolumeClaimVolumeSource::default()
                    }),
                    ..Volume::default()
                },
            ]),
            ..PodSpec::default()
        }),
        ..Pod::default()
    })
}

/// Build the service objects exposing a workload.
///
/// `NodePort` maps to a node-exposed service; anything else is
/// cluster-internal. The selector is always the owning VM's label.
pub fn build_services(agent_id: &str, namespace: &str, services: &[ServiceDef]) -> Vec<Service> {
    let owner_label = BTreeMap::from([(AGENT_ID_LABEL.to_string(), agent_id.to_string())]);

    services
        .iter()
        .map(|svc| {
            let service_type = if svc.service_type == "NodePort" {
                "NodePort"
            } else {
                "ClusterIP"
            };

            let ports = svc
                .ports
                .iter()
                .map(|port| ServicePort {
                    name: (!port.name.is_empty()).then(|| port.name.clone()),
                    port: port.port,
                    node_port: (port.node_port != 0).then_some(port.node_port),
                    protocol: (!port.protocol.is_empty()).then(|| port.protocol.clone()),
                    ..ServicePort::default()
                })
                .collect();

            Service {
                metadata: ObjectMeta {
                    name: Some(svc.name.clone()),
                    namespace: Some(namespace.to_string()),
                    labels: Some(owner_label.clone()),
                    ..ObjectMeta::default()
                },
                spec: Some(ServiceSpec {
                    type_: Some(service_type.to_string()),
                    cluster_ip: (!svc.cluster_ip.is_empty()).then(|| svc.cluster_ip.clone()),
                    ports: Some(ports),
                    selector: Some(owner_label.clone()),
                    ..ServiceSpec::default()
                }),
                ..Service::default()
            }
        })
        .collect()
}

/// Pod volume backed by a disk's claim, named after the disk object
pub fn disk_volume(disk_id: &str) -> Volume {
    let name = disk_object_name(disk_id);
    Volume {
        name: name.clone(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: name,
            ..PersistentVolumeClaimVolumeSource::default()
        }),
        ..Volume::default()
    }
}

/// Mount for a disk volume at its well-known `/mnt/<id>` path
pub fn disk_volume_mount(disk_id: &str) -> VolumeMount {
    VolumeMount {
        name: disk_object_name(disk_id),
        mount_path: disk_mount_path(disk_id),
        ..VolumeMount::default()
    }
}

/// Build a sized persistent disk claim labeled with its disk ID
pub fn build_disk_claim(disk_id: &str, namespace: &str, size_mib: u64) -> Result<PersistentVolumeClaim> {
    let size = format!("{}Mi", size_mib);
    validate_quantity(&size)?;
    Ok(claim(
        disk_object_name(disk_id),
        namespace,
        DISK_ID_LABEL,
        disk_id,
        size,
    ))
}

/// Build the fixed-size ephemeral scratch claim for a VM
pub fn build_ephemeral_claim(agent_id: &str, namespace: &str) -> PersistentVolumeClaim {
    claim(
        ephemeral_claim_name(agent_id),
        namespace,
        EPHEMERAL_ID_LABEL,
        agent_id,
        EPHEMERAL_CLAIM_SIZE.to_string(),
    )
}

fn claim(
    name: String,
    namespace: &str,
    label_key: &str,
    label_value: &str,
    size: String,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                label_key.to_string(),
                label_value.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}
