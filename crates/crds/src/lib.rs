//! Machine Provision Resource Definitions
//!
//! Typed views of the Kubernetes resources the machine provision controller
//! reads and writes:
//! - `InfraMachine`: the per-driver infrastructure machine (dynamic kind)
//! - `Machine`: the Cluster API machine that owns an infrastructure machine
//! - `Cluster`: the provisioning cluster that owns the machines
//!
//! Also carries the wire constants (group, labels, job naming) shared between
//! the controller and its collaborators.

pub mod condition;
pub mod infra_machine;
pub mod labels;
pub mod machine;
pub mod cluster;

pub use condition::*;
pub use infra_machine::*;
pub use labels::*;
pub use machine::*;
pub use cluster::*;
