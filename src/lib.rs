//! # DBHub Operator
//!
//! A Kubernetes operator that declaratively manages SQL database
//! connections and the deployment of multi-database DBHub MCP gateway
//! instances.
//!
//! Two custom resources drive it: [`api::Database`] points at an external
//! SQL server with credential indirection through a Secret, and
//! [`api::DBHubInstance`] deploys a gateway over a selector-resolved set
//! of databases. Two cooperating controllers reconcile them: a health
//! reconciler that continuously verifies SQL connectivity, and a gateway
//! reconciler that renders configuration, aggregates credentials, and
//! drives the owned ConfigMap/Secret/Deployment/Service quartet.

pub mod admission;
pub mod api;
pub mod controller;
pub mod dsn;
pub mod error;
pub mod leader;
pub mod metrics;
pub mod ping;
pub mod telemetry;

pub use api::{Database, DBHubInstance};
pub use error::{OperatorError, Result};
