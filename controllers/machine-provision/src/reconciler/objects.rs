//! Provisioning object builder.
//!
//! Turns an infrastructure machine into the driver invocation (`DriverArgs`)
//! and the child objects that run it: the machine state secret, the driver
//! files secret, the RBAC the job needs and the job itself.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crds::{
    job_name, InfraMachine, ProvisionStatus, INFRA_MACHINE_GROUP_LABEL, INFRA_MACHINE_KIND_LABEL,
    INFRA_MACHINE_NAME_LABEL, INFRA_MACHINE_VERSION_LABEL, MACHINE_FILES_PATH, PROVIDER_ID_FIELD,
};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, PodSpec, PodTemplateSpec, Secret, SecretEnvSource, SecretVolumeSource,
    ServiceAccount, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use provision_client::{OwnedObject, ProvisionClientTrait};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Spec key naming the cloud credential secret
pub const CLOUD_CREDENTIAL_FIELD: &str = "cloudCredentialSecretName";

/// Where the bootstrap secret is mounted in the provisioning pod
const BOOTSTRAP_PATH: &str = "/run/secrets/bootstrap";

/// Key of the bootstrap data inside the bootstrap secret
const BOOTSTRAP_DATA_KEY: &str = "value";

/// Secret type of the machine state secret
const MACHINE_STATE_SECRET_TYPE: &str = "rke.cattle.io/machine-state";

/// Retries of a delete job before it is reported failed
const DELETE_BACKOFF_LIMIT: i32 = 3;

/// Spec keys that are not driver arguments
const RESERVED_FIELDS: &[&str] = &[PROVIDER_ID_FIELD, CLOUD_CREDENTIAL_FIELD];

/// Action a provisioning job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionAction {
    Create,
    Delete,
}

impl ProvisionAction {
    /// Driver command for the action
    pub fn command(&self) -> &'static str {
        match self {
            ProvisionAction::Create => "create",
            ProvisionAction::Delete => "rm",
        }
    }
}

impl fmt::Display for ProvisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionAction::Create => f.write_str("create"),
            ProvisionAction::Delete => f.write_str("delete"),
        }
    }
}

/// Everything needed to invoke the driver for one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverArgs {
    pub action: ProvisionAction,
    pub driver: String,
    /// Command line of the driver binary
    pub args: Vec<String>,
    /// Secret exposed to the driver as environment
    pub env_secret_name: Option<String>,
    /// Bootstrap data secret; `None` until bootstrap is rendered
    pub bootstrap_secret_name: Option<String>,
    /// The action can run without bootstrap data
    pub bootstrap_optional: bool,
    pub backoff_limit: i32,
    /// Status the create path writes back
    pub status: ProvisionStatus,
}

/// Builds driver invocations and the objects that run them
#[async_trait::async_trait]
pub trait ProvisionObjects: Send + Sync {
    /// Driver invocation for `action`, from the materialized `spec`
    async fn driver_args(
        &self,
        client: &dyn ProvisionClientTrait,
        machine: &InfraMachine,
        spec: &Map<String, Value>,
        action: ProvisionAction,
    ) -> Result<DriverArgs, ControllerError>;

    /// Desired child objects. `in_place` omits the job: the machine already
    /// exists and only its supporting objects are kept.
    fn objects(
        &self,
        machine: &InfraMachine,
        args: &DriverArgs,
        files: Option<Secret>,
        in_place: bool,
    ) -> Result<Vec<OwnedObject>, ControllerError>;
}

/// Object builder running the driver image from configuration
#[derive(Debug, Clone)]
pub struct DefaultProvisionObjects {
    image: String,
    image_pull_policy: String,
}

impl DefaultProvisionObjects {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            image: config.image.clone(),
            image_pull_policy: config.image_pull_policy.clone(),
        }
    }
}

/// `instanceType` to `instance-type`
pub(crate) fn to_kebab(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, c) in field.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '_' {
            out.push('-');
        } else {
            out.push(c);
        }
    }
    out
}

/// Driver flags for the spec fields, in key order
pub(crate) fn driver_flags(driver: &str, spec: &Map<String, Value>) -> Vec<String> {
    let mut flags = Vec::new();
    for (key, value) in spec {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let flag = format!("--{}-{}", driver, to_kebab(key));
        match value {
            Value::Null => {}
            Value::Bool(true) => flags.push(flag),
            Value::Bool(false) => {}
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => flags.extend([flag, s.clone()]),
            Value::Number(n) => flags.extend([flag, n.to_string()]),
            Value::Array(items) => {
                for item in items {
                    let item = match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    flags.extend([flag.clone(), item]);
                }
            }
            Value::Object(_) => flags.extend([flag, value.to_string()]),
        }
    }
    flags
}

fn meta(machine: &InfraMachine, name: String, labels: Option<BTreeMap<String, String>>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(machine.namespace().to_string()),
        labels,
        ..Default::default()
    }
}

/// Labels tying a job back to its owning infrastructure machine
pub(crate) fn job_labels(machine: &InfraMachine) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INFRA_MACHINE_NAME_LABEL.to_string(), machine.name().to_string()),
        (INFRA_MACHINE_GROUP_LABEL.to_string(), machine.group().to_string()),
        (INFRA_MACHINE_VERSION_LABEL.to_string(), machine.version().to_string()),
        (INFRA_MACHINE_KIND_LABEL.to_string(), machine.kind.clone()),
    ])
}

pub(crate) fn state_secret_name(machine: &InfraMachine) -> String {
    crds::safe_concat_name(&[machine.name(), "machine", "state"])
}

pub(crate) fn files_secret_name(machine: &InfraMachine) -> String {
    crds::safe_concat_name(&[machine.name(), "machine", "driver", "files"])
}

#[async_trait::async_trait]
impl ProvisionObjects for DefaultProvisionObjects {
    async fn driver_args(
        &self,
        client: &dyn ProvisionClientTrait,
        machine: &InfraMachine,
        spec: &Map<String, Value>,
        action: ProvisionAction,
    ) -> Result<DriverArgs, ControllerError> {
        let namespace = machine.namespace();
        let driver = machine.driver_name();

        let bootstrap_secret_name = match machine.owner_machine_name() {
            Some(owner) => match client.get_machine(namespace, owner).await {
                Ok(capi_machine) => capi_machine.bootstrap_secret_name().map(str::to_string),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        let cloud_credential_secret_name = spec
            .get(CLOUD_CREDENTIAL_FIELD)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        if let Some(secret) = &cloud_credential_secret_name {
            // Surface a missing credential before the driver fails on it
            client.get_secret(namespace, secret).await?;
        }

        let mut args = vec![action.command().to_string(), "--driver".to_string(), driver.clone()];
        if action == ProvisionAction::Create {
            args.extend(driver_flags(&driver, spec));
            if bootstrap_secret_name.is_some() {
                args.push("--custom-install-script".to_string());
                args.push(format!("{}/{}", BOOTSTRAP_PATH, BOOTSTRAP_DATA_KEY));
            }
        } else {
            args.push("-y".to_string());
        }
        args.push(machine.name().to_string());

        Ok(DriverArgs {
            action,
            driver,
            args,
            env_secret_name: cloud_credential_secret_name.clone(),
            bootstrap_secret_name,
            bootstrap_optional: action == ProvisionAction::Delete,
            backoff_limit: match action {
                ProvisionAction::Create => 0,
                ProvisionAction::Delete => DELETE_BACKOFF_LIMIT,
            },
            status: ProvisionStatus {
                job_name: Some(job_name(machine.name())),
                cloud_credential_secret_name,
                ..Default::default()
            },
        })
    }

    fn objects(
        &self,
        machine: &InfraMachine,
        args: &DriverArgs,
        files: Option<Secret>,
        in_place: bool,
    ) -> Result<Vec<OwnedObject>, ControllerError> {
        let name = job_name(machine.name());
        let state_secret = state_secret_name(machine);
        let labels = job_labels(machine);

        let mut objects = vec![OwnedObject::Secret(Secret {
            metadata: meta(machine, state_secret.clone(), None),
            type_: Some(MACHINE_STATE_SECRET_TYPE.to_string()),
            ..Default::default()
        })];

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();

        if let Some(mut files) = files {
            let files_secret = files_secret_name(machine);
            files.metadata = meta(machine, files_secret.clone(), None);
            objects.push(OwnedObject::Secret(files));
            volumes.push(secret_volume("machine-files", &files_secret));
            mounts.push(volume_mount("machine-files", MACHINE_FILES_PATH));
        }

        if let Some(bootstrap) = &args.bootstrap_secret_name {
            volumes.push(secret_volume("bootstrap", bootstrap));
            mounts.push(volume_mount("bootstrap", BOOTSTRAP_PATH));
        }

        objects.push(OwnedObject::ServiceAccount(ServiceAccount {
            metadata: meta(machine, name.clone(), None),
            ..Default::default()
        }));
        objects.push(OwnedObject::Role(Role {
            metadata: meta(machine, name.clone(), None),
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["secrets".to_string()]),
                resource_names: Some(vec![state_secret.clone()]),
                verbs: vec!["get".to_string(), "update".to_string(), "patch".to_string()],
                ..Default::default()
            }]),
        }));
        objects.push(OwnedObject::RoleBinding(RoleBinding {
            metadata: meta(machine, name.clone(), None),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: name.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: name.clone(),
                namespace: Some(machine.namespace().to_string()),
                ..Default::default()
            }]),
        }));

        if in_place {
            return Ok(objects);
        }

        let container = Container {
            name: "machine".to_string(),
            image: Some(self.image.clone()),
            image_pull_policy: Some(self.image_pull_policy.clone()),
            args: Some(args.args.clone()),
            env: Some(vec![
                env_var("MACHINE_STATE_SECRET_NAME", &state_secret),
                env_var("MACHINE_STATE_SECRET_NAMESPACE", machine.namespace()),
            ]),
            env_from: args.env_secret_name.as_ref().map(|secret| {
                vec![EnvFromSource {
                    secret_ref: Some(SecretEnvSource {
                        name: secret.clone(),
                        optional: Some(false),
                    }),
                    ..Default::default()
                }]
            }),
            volume_mounts: Some(mounts).filter(|m| !m.is_empty()),
            ..Default::default()
        };

        objects.push(OwnedObject::Job(Job {
            metadata: meta(machine, name.clone(), Some(labels.clone())),
            spec: Some(JobSpec {
                backoff_limit: Some(args.backoff_limit),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(name),
                        restart_policy: Some("Never".to_string()),
                        containers: vec![container],
                        volumes: Some(volumes).filter(|v| !v.is_empty()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }));

        Ok(objects)
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            default_mode: Some(0o600),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}
