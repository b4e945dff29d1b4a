//! File materializer.
//!
//! Some driver arguments are file contents (SSH keys, cloud configs, CA
//! certificates) while the driver binary expects a path. Those fields are
//! moved out of spec into a secret mounted into the provisioning pod, and
//! spec is rewritten to point at the mounted files.

use crds::MACHINE_FILES_PATH;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// File name every SSH private key is stored under
const SSH_KEY_FILE_NAME: &str = "id_rsa";

/// Spec fields holding SSH private key contents
const SSH_KEY_FIELDS: &[&str] = &["sshKeyContents", "sshKey"];

/// File-valued fields per driver, as (spec field, driver field)
const DRIVER_FILE_FIELDS: &[(&str, &[(&str, &str)])] = &[
    ("amazonec2", &[("sshKeyContents", "sshKeypath"), ("userdata", "userdata")]),
    ("azure", &[("customData", "customData")]),
    ("digitalocean", &[("sshKeyContents", "sshKeyPath"), ("userdata", "userdata")]),
    ("exoscale", &[("sshKey", "sshKey"), ("userdata", "userdata")]),
    ("google", &[("authEncodedJson", "authEncodedJson"), ("userdata", "userdata")]),
    ("linode", &[("authorizedUsers", "authorizedUsers")]),
    ("oci", &[("privateKeyContents", "privateKeyPath")]),
    ("openstack", &[("cacert", "cacert"), ("privateKeyFile", "privateKeyFile"), ("userDataFile", "userDataFile")]),
    ("otc", &[("privateKeyFile", "privateKeyFile")]),
    ("pod", &[("userdata", "userdata")]),
    ("vmwarevsphere", &[("cloudConfig", "cloud-config")]),
];

/// File-valued fields of `driver`, if it declares any
pub fn driver_file_fields(driver: &str) -> Option<&'static [(&'static str, &'static str)]> {
    DRIVER_FILE_FIELDS
        .iter()
        .find(|(name, _)| *name == driver)
        .map(|(_, fields)| *fields)
}

/// Moves file-valued fields of `driver` out of `spec` into a secret.
///
/// Returns `None` when the driver declares no file fields. Otherwise returns
/// an unnamed secret (possibly without data) whose keys are file names under
/// `MACHINE_FILES_PATH`; `spec` then maps each driver field to its file path.
/// String fields that are empty are removed without producing a file.
pub fn materialize_files(driver: &str, spec: &mut Map<String, Value>) -> Option<Secret> {
    let fields = driver_file_fields(driver)?;
    let mut data = BTreeMap::new();

    for (spec_field, driver_field) in fields {
        let Some(Value::String(contents)) = spec.get(*spec_field) else {
            continue;
        };
        let mut contents = contents.clone();
        spec.remove(*spec_field);
        if contents.is_empty() {
            continue;
        }

        let file_name = if SSH_KEY_FIELDS.contains(spec_field) {
            SSH_KEY_FILE_NAME
        } else {
            *driver_field
        };

        if !contents.ends_with('\n') {
            contents.push('\n');
        }

        data.insert(file_name.to_string(), ByteString(contents.into_bytes()));
        spec.insert(
            (*driver_field).to_string(),
            Value::String(format!("{}/{}", MACHINE_FILES_PATH, file_name)),
        );
    }

    Some(Secret {
        data: Some(data),
        ..Default::default()
    })
}
