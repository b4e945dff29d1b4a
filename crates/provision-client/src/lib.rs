//! Provision Client
//!
//! Everything the machine provision controller needs from the cluster,
//! behind one interface so the reconcilers can be tested without an API
//! server.
//!
//! # Features
//!
//! - **Lookups**: infrastructure machines, jobs, pods, namespaces, logical
//!   machines, clusters and secrets
//! - **Status writes**: optimistic status-subresource writes on
//!   infrastructure machines
//! - **Owned-object apply**: declarative reconciliation of an owner's child
//!   objects with orphan cleanup
//! - **Etcd safe removal**: asks the downstream cluster whether a node has
//!   left etcd membership
//!
//! # Example
//!
//! ```no_run
//! use provision_client::{KubeProvisionClient, ProvisionClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let provision = KubeProvisionClient::new(client, "machine-provision-controller");
//!
//! let job = provision.get_job("fleet-default", "pool1-abc12-machine-provision").await?;
//! # Ok(())
//! # }
//! ```

mod apply;
pub mod client;
mod etcd;
pub mod error;
pub mod owned;
#[path = "trait.rs"]
pub mod provision_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeProvisionClient;
pub use error::ClientError;
pub use owned::*;
pub use provision_trait::ProvisionClientTrait;
#[cfg(feature = "test-util")]
pub use mock::MockProvisionClient;
