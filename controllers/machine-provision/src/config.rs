//! Controller configuration.
//!
//! Read once at startup from environment variables.

use crate::error::ControllerError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONCURRENCY: u16 = 5;
const DEFAULT_DEBOUNCE_SECS: u64 = 1;
const DEFAULT_ERROR_REQUEUE_SECS: u64 = 60;
const DEFAULT_IMAGE: &str = "rancher/machine:v0.15.0";
const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
const DEFAULT_FIELD_MANAGER: &str = "machine-provision-controller";

/// Runtime configuration of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when `None`
    pub namespace: Option<String>,
    /// Concurrent reconciliations per watched kind
    pub concurrency: u16,
    /// Quiet period before a burst of events is reconciled
    pub debounce: Duration,
    /// Requeue delay after a failed reconciliation
    pub error_requeue: Duration,
    /// Image running the machine driver
    pub image: String,
    pub image_pull_policy: String,
    /// Server-side apply field manager
    pub field_manager: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: DEFAULT_CONCURRENCY,
            debounce: Duration::from_secs(DEFAULT_DEBOUNCE_SECS),
            error_requeue: Duration::from_secs(DEFAULT_ERROR_REQUEUE_SECS),
            image: DEFAULT_IMAGE.to_string(),
            image_pull_policy: DEFAULT_PULL_POLICY.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            concurrency: parse(&non_empty, "RECONCILE_CONCURRENCY", defaults.concurrency)?,
            debounce: Duration::from_secs(parse(&non_empty, "RECONCILE_DEBOUNCE_SECS", DEFAULT_DEBOUNCE_SECS)?),
            error_requeue: Duration::from_secs(parse(&non_empty, "ERROR_REQUEUE_SECS", DEFAULT_ERROR_REQUEUE_SECS)?),
            image: non_empty("MACHINE_PROVISION_IMAGE").unwrap_or(defaults.image),
            image_pull_policy: non_empty("MACHINE_PROVISION_PULL_POLICY").unwrap_or(defaults.image_pull_policy),
            field_manager: non_empty("FIELD_MANAGER").unwrap_or(defaults.field_manager),
        })
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("{} must be a number, got {:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}
