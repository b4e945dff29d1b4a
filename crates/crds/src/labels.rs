//! Wire constants and naming helpers.
//!
//! Everything here is part of the on-cluster contract: the group/version/kind
//! matcher for infrastructure machines, the labels that map a provisioning job
//! back to its owner, and the deterministic job name.

use sha2::{Digest, Sha256};

/// API group of all infrastructure machine kinds
pub const INFRA_MACHINE_GROUP: &str = "rke-machine.cattle.io";

/// API version of all infrastructure machine kinds
pub const INFRA_MACHINE_VERSION: &str = "v1";

/// Every infrastructure machine kind ends with this suffix
pub const INFRA_MACHINE_KIND_SUFFIX: &str = "Machine";

/// Kind in the infrastructure group that is not provisioned by a driver job
pub const RESERVED_MACHINE_KIND: &str = "CustomMachine";

/// Pod template label carrying the owning infrastructure machine name
pub const INFRA_MACHINE_NAME_LABEL: &str = "rke.cattle.io/infra-machine-name";
/// Pod template label carrying the owning infrastructure machine group
pub const INFRA_MACHINE_GROUP_LABEL: &str = "rke.cattle.io/infra-machine-group";
/// Pod template label carrying the owning infrastructure machine version
pub const INFRA_MACHINE_VERSION_LABEL: &str = "rke.cattle.io/infra-machine-version";
/// Pod template label carrying the owning infrastructure machine kind
pub const INFRA_MACHINE_KIND_LABEL: &str = "rke.cattle.io/infra-machine-kind";

/// Present with value "true" when the machine is an etcd member
pub const ETCD_ROLE_LABEL: &str = "rke.cattle.io/etcd-role";

/// Names the cluster an infrastructure machine belongs to
pub const CAPI_CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Directory inside the provisioning pod where materialized files are mounted
pub const MACHINE_FILES_PATH: &str = "/run/secrets/machine";

/// Kubernetes object name limit
const MAX_NAME_LENGTH: usize = 63;

/// Returns true when group/version/kind identifies a driver-provisioned
/// infrastructure machine.
pub fn is_infra_machine_kind(group: &str, version: &str, kind: &str) -> bool {
    group == INFRA_MACHINE_GROUP
        && version == INFRA_MACHINE_VERSION
        && kind.ends_with(INFRA_MACHINE_KIND_SUFFIX)
        && kind != RESERVED_MACHINE_KIND
}

/// Name of the provisioning job for an infrastructure machine.
///
/// Stable across create and delete cycles of the same machine.
pub fn job_name(infra_machine_name: &str) -> String {
    safe_concat_name(&[infra_machine_name, "machine", "provision"])
}

/// Joins `parts` with `-`, shortening the result to a valid object name.
///
/// Names longer than 63 characters keep their first 56 or 57 characters and
/// gain a 5 character hash suffix of the full name, so distinct long names
/// stay distinct.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LENGTH {
        return full;
    }

    let hash = format!("{:x}", Sha256::digest(full.as_bytes()));
    let chars: Vec<char> = full.chars().collect();

    // The cut may land on a character that cannot end a name segment
    let keep = match chars.get(56) {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => 57,
        _ => 56,
    };
    let prefix: String = chars.iter().take(keep).collect();

    format!("{}-{}", prefix, &hash[..5])
}
