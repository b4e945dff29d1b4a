//! Provision client errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster
#[derive(Debug, Error)]
pub enum ClientError {
    /// Kubernetes API error other than not-found or conflict
    #[error("Kubernetes API error: {0}")]
    Kube(kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stale write or ownership clash
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Downstream kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Object is missing data the operation requires
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl ClientError {
    /// True for a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// True for a stale resource version or ownership clash
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => {
                ClientError::NotFound(response.message.clone())
            }
            kube::Error::Api(ref response) if response.code == 409 => {
                ClientError::Conflict(response.message.clone())
            }
            other => ClientError::Kube(other),
        }
    }
}
