//! Label taxonomy, deterministic object names, and selectors
//!
//! Every object the CPI creates carries an owning-identity label, and
//! every lookup, cascading delete, and tag patch is an exact-match
//! selector over these labels. Objects are also named
//! deterministically from their owning ID so that single-object
//! get/delete never needs a list.

/// Label namespace for every CPI-owned label
pub const LABEL_PREFIX: &str = "bosh.cloudfoundry.org";

/// Label key carrying the owning agent ID on pods, config maps, and services
pub const AGENT_ID_LABEL: &str = "bosh.cloudfoundry.org/agent-id";

/// Label key carrying the owning disk ID on persistent disk claims
pub const DISK_ID_LABEL: &str = "bosh.cloudfoundry.org/disk-id";

/// Label key carrying the owning agent ID on ephemeral storage claims
pub const EPHEMERAL_ID_LABEL: &str = "bosh.cloudfoundry.org/var-vcap-id";

/// Annotation key recording the pod's assigned IP address
pub const IP_ADDRESS_ANNOTATION: &str = "bosh.cloudfoundry.org/ip-address";

/// Exact-match selector for objects owned by an agent
pub fn agent_selector(agent_id: &str) -> String {
    format!("{}={}", AGENT_ID_LABEL, agent_id)
}

/// Exact-match selector for claims owned by a disk
pub fn disk_selector(disk_id: &str) -> String {
    format!("{}={}", DISK_ID_LABEL, disk_id)
}

/// Deterministic pod and config map name for an agent
pub fn agent_object_name(agent_id: &str) -> String {
    format!("agent-{}", agent_id)
}

/// Deterministic claim and volume name for a persistent disk
pub fn disk_object_name(disk_id: &str) -> String {
    format!("disk-{}", disk_id)
}

/// Deterministic claim name for a VM's ephemeral storage
pub fn ephemeral_claim_name(agent_id: &str) -> String {
    format!("var-vcap-{}", agent_id)
}

/// Mount path for a persistent disk inside the workload
pub fn disk_mount_path(disk_id: &str) -> String {
    format!("/mnt/{}", disk_id)
}

/// Namespace a user-supplied tag key under the CPI label prefix,
/// lowercased. The result still has to pass [`is_valid_label_key`]
/// before being applied.
pub fn namespaced_tag_key(key: &str) -> String {
    format!("{}/{}", LABEL_PREFIX, key.to_lowercase())
}

fn is_label_body(s: &str) -> bool {
    let bytes = s.as_bytes();
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let alnum = |b: u8| b.is_ascii_alphanumeric();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| alnum(b) || b == b'-' || b == b'_' || b == b'.')
}

/// Validate a (possibly prefixed) label key against the Kubernetes
/// qualified-name rules: an optional DNS-subdomain prefix up to 253
/// characters, a slash, and a name part of at most 63 characters that
/// starts and ends alphanumeric.
pub fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 {
            return false;
        }
        let subdomain_label = |l: &str| {
            let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
            !l.is_empty()
                && l.len() <= 63
                && alnum(l.as_bytes()[0])
                && alnum(l.as_bytes()[l.len() - 1])
                && l.bytes().all(|b| alnum(b) || b == b'-')
        };
        if !prefix.split('.').all(subdomain_label) {
            return false;
        }
    }

    is_label_body(name)
}

/// Validate a label value: empty, or at most 63 characters starting
/// and ending alphanumeric with `-`, `_`, `.` allowed in between.
pub fn is_valid_label_value(value: &str) -> bool {
    value.is_empty() || is_label_body(value)
}
