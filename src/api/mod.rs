//! Custom resource types for the `dbhub.tas.io/v1alpha1` API group.

pub mod conditions;
pub mod database;
pub mod instance;

pub use conditions::{
    condition_is_true, set_condition, CONDITION_AVAILABLE, CONDITION_CONNECTED, CONDITION_READY,
};
pub use database::{
    CredentialsRef, Database, DatabasePhase, DatabaseSpec, DatabaseStatus, DatabaseType, SslMode,
};
pub use instance::{
    DBHubInstance, DBHubInstanceSpec, DBHubInstanceStatus, DatabaseSelector, DefaultPolicy,
    InstancePhase, ResourceRequirements, TransportType, DEFAULT_IMAGE,
};
