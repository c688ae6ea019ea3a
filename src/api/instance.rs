//! DBHubInstance custom resource definition.
//!
//! A `DBHubInstance` deploys a DBHub MCP gateway whose source set is a
//! dynamic selection over `Database` resources in the same namespace. The
//! operator owns exactly four child objects per instance (ConfigMap,
//! Secret, Deployment, Service); edit the instance, not the children.
//! Out-of-band changes to children are reverted, except the Service
//! `clusterIP` which is always preserved.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::database::Database;

/// Gateway phase derived from deployment availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum InstancePhase {
    #[default]
    Pending,
    Running,
    Failed,
    Degraded,
}

impl InstancePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstancePhase::Pending => "Pending",
            InstancePhase::Running => "Running",
            InstancePhase::Failed => "Failed",
            InstancePhase::Degraded => "Degraded",
        }
    }
}

/// Transport protocol spoken by the gateway container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[default]
    Http,
    Sse,
    Stdio,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Http => "http",
            TransportType::Sse => "sse",
            TransportType::Stdio => "stdio",
        }
    }
}

/// Selects which Database resources feed this gateway
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSelector {
    /// Select by labels; all pairs must match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Select by exact object names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

/// Default access policy applied to every selected database
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultPolicy {
    /// Restrict all tools to read-only operation
    #[serde(rename = "readonly", default = "default_true")]
    pub read_only: bool,

    /// Row cap applied to query tools
    #[serde(default)]
    pub max_rows: i32,

    /// MCP tool names to expose per source
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_operations: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            read_only: true,
            max_rows: 1000,
            allowed_operations: vec!["execute_sql".to_string(), "search_objects".to_string()],
        }
    }
}

/// Compute resource requests and limits for the gateway container
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Minimum resources required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, Quantity>>,

    /// Maximum resources allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Quantity>>,
}

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "dbhub.tas.io",
    version = "v1alpha1",
    kind = "DBHubInstance",
    plural = "dbhubinstances",
    shortname = "dbhi",
    status = "DBHubInstanceStatus",
    namespaced
)]
#[kube(
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.availableReplicas"}"#
)]
#[kube(printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#)]
#[kube(printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct DBHubInstanceSpec {
    /// Number of gateway pods to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Gateway container image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// When to pull the container image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    /// MCP transport protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportType>,

    /// Port the gateway listens on
    #[serde(default)]
    pub port: i32,

    /// Which Database resources to include; absent matches all in namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_selector: Option<DatabaseSelector>,

    /// Default access policy for all selected databases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_policy: Option<DefaultPolicy>,

    /// Compute resources for the gateway container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// ServiceAccount for the gateway pods
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,

    /// Node selection constraint for scheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Pod tolerations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Pod affinity rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DBHubInstanceStatus {
    /// Current gateway phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<InstancePhase>,

    /// Number of ready gateway pods
    #[serde(default)]
    pub available_replicas: i32,

    /// Sorted names of selected databases whose phase is Connected.
    /// Always serialized so merge patches can empty the list.
    #[serde(default)]
    pub connected_databases: Vec<String>,

    /// In-cluster service endpoint
    #[serde(default)]
    pub endpoint: String,

    /// Fingerprint of the rendered gateway configuration
    #[serde(default)]
    pub config_hash: String,

    /// Most recent generation observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Timestamp of the last configuration render
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_config_update: Option<Time>,

    /// Current resource conditions (Available)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Default gateway container image
pub const DEFAULT_IMAGE: &str = "bytebase/dbhub:latest";

impl DBHubInstance {
    /// Desired replica count, defaulting to 1
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    /// Container image, defaulting to the stock gateway image
    pub fn image(&self) -> String {
        if self.spec.image.is_empty() {
            DEFAULT_IMAGE.to_string()
        } else {
            self.spec.image.clone()
        }
    }

    /// Listen port, defaulting to 8080
    pub fn port(&self) -> i32 {
        if self.spec.port == 0 {
            8080
        } else {
            self.spec.port
        }
    }

    /// Transport protocol, defaulting to http
    pub fn transport(&self) -> TransportType {
        self.spec.transport.unwrap_or_default()
    }

    /// Whether the given Database falls under this instance's selector.
    ///
    /// Absent selector matches every Database in the same namespace;
    /// matchNames is exact set membership; matchLabels requires all pairs.
    pub fn matches_database(&self, db: &Database) -> bool {
        if db.namespace() != self.namespace() {
            return false;
        }

        let Some(selector) = &self.spec.database_selector else {
            return true;
        };

        if !selector.match_names.is_empty() {
            let name = db.name_any();
            if !selector.match_names.iter().any(|n| *n == name) {
                return false;
            }
        }

        if !selector.match_labels.is_empty() {
            let labels = db.labels();
            for (key, value) in &selector.match_labels {
                if labels.get(key) != Some(value) {
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::database::{DatabaseSpec, DatabaseType, SslMode};

    fn instance(selector: Option<DatabaseSelector>) -> DBHubInstance {
        let mut inst = DBHubInstance::new(
            "gateway",
            DBHubInstanceSpec {
                database_selector: selector,
                ..Default::default()
            },
        );
        inst.metadata.namespace = Some("default".into());
        inst
    }

    fn database(name: &str, ns: &str, labels: &[(&str, &str)]) -> Database {
        let mut db = Database::new(
            name,
            DatabaseSpec {
                r#type: DatabaseType::Postgres,
                host: "pg".into(),
                port: 5432,
                database: "app".into(),
                credentials_ref: None,
                connection_timeout: 30,
                query_timeout: 60,
                ssl_mode: SslMode::Disable,
                max_rows: 1000,
                read_only: true,
                description: String::new(),
            },
        );
        db.metadata.namespace = Some(ns.into());
        db.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        db
    }

    #[test]
    fn test_getter_defaults() {
        let inst = instance(None);
        assert_eq!(inst.replicas(), 1);
        assert_eq!(inst.image(), DEFAULT_IMAGE);
        assert_eq!(inst.port(), 8080);
        assert_eq!(inst.transport(), TransportType::Http);
    }

    #[test]
    fn test_absent_selector_matches_same_namespace_only() {
        let inst = instance(None);
        assert!(inst.matches_database(&database("a", "default", &[])));
        assert!(!inst.matches_database(&database("a", "other", &[])));
    }

    #[test]
    fn test_match_labels_requires_all_pairs() {
        let inst = instance(Some(DatabaseSelector {
            match_labels: [
                ("env".to_string(), "prod".to_string()),
                ("team".to_string(), "data".to_string()),
            ]
            .into(),
            match_names: vec![],
        }));
        assert!(inst.matches_database(&database(
            "a",
            "default",
            &[("env", "prod"), ("team", "data")]
        )));
        assert!(!inst.matches_database(&database("a", "default", &[("env", "prod")])));
        assert!(!inst.matches_database(&database("a", "default", &[])));
    }

    #[test]
    fn test_match_names_is_set_membership() {
        let inst = instance(Some(DatabaseSelector {
            match_labels: BTreeMap::new(),
            match_names: vec!["orders".into(), "billing".into()],
        }));
        assert!(inst.matches_database(&database("orders", "default", &[])));
        assert!(!inst.matches_database(&database("users", "default", &[])));
    }

    #[test]
    fn test_both_selector_criteria_must_pass() {
        let inst = instance(Some(DatabaseSelector {
            match_labels: [("env".to_string(), "prod".to_string())].into(),
            match_names: vec!["orders".into()],
        }));
        assert!(inst.matches_database(&database("orders", "default", &[("env", "prod")])));
        assert!(!inst.matches_database(&database("orders", "default", &[("env", "dev")])));
        assert!(!inst.matches_database(&database("billing", "default", &[("env", "prod")])));
    }

    #[test]
    fn test_default_policy_matches_admission_defaults() {
        let policy = DefaultPolicy::default();
        assert!(policy.read_only);
        assert_eq!(policy.max_rows, 1000);
        assert_eq!(policy.allowed_operations, vec!["execute_sql", "search_objects"]);
    }

    #[test]
    fn test_policy_readonly_field_name() {
        let json = serde_json::to_value(DefaultPolicy::default()).unwrap();
        assert!(json.get("readonly").is_some());
        assert!(json.get("readOnly").is_none());
    }
}
