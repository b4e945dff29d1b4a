//! Controller-specific error types.
//!
//! This module defines the errors of the machine provision controller that
//! are not covered by upstream library errors. Any of them returned from a
//! reconcile step is fatal for that pass: it surfaces as a False condition
//! and the object is requeued by the error policy.

use kube::Error as KubeError;
use provision_client::ClientError;
use thiserror::Error;

/// Errors that can occur in the machine provision controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Provision client error
    #[error("{0}")]
    Client(#[from] ClientError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required label is missing
    #[error("Missing label: {0}")]
    MissingLabel(String),

    /// Deletion requested before the create job completed or failed
    #[error("cannot delete machine {0} because create job has not finished")]
    CreateJobNotFinished(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// API discovery failed
    #[error("Discovery failed: {0}")]
    Discovery(String),
}
