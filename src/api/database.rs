//! Database custom resource definition.
//!
//! A `Database` describes a connection to an external SQL server whose
//! credentials live in a referenced Secret. The operator never owns the
//! server itself; it only verifies reachability and publishes status.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Postgres,
    MySQL,
    MariaDB,
    SqlServer,
    Sqlite,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Postgres => "postgres",
            DatabaseType::MySQL => "mysql",
            DatabaseType::MariaDB => "mariadb",
            DatabaseType::SqlServer => "sqlserver",
            DatabaseType::Sqlite => "sqlite",
        }
    }

    /// Default server port for this engine; `None` for file-backed engines
    pub fn default_port(&self) -> Option<i32> {
        match self {
            DatabaseType::Postgres => Some(5432),
            DatabaseType::MySQL | DatabaseType::MariaDB => Some(3306),
            DatabaseType::SqlServer => Some(1433),
            DatabaseType::Sqlite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection phase published by the health reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum DatabasePhase {
    #[default]
    Pending,
    Connected,
    Failed,
    Degraded,
}

impl DatabasePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabasePhase::Pending => "Pending",
            DatabasePhase::Connected => "Connected",
            DatabasePhase::Failed => "Failed",
            DatabasePhase::Degraded => "Degraded",
        }
    }
}

/// SSL/TLS mode for the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    #[default]
    Disable,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }

    /// Whether this mode requires TLS on the wire
    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Reference to a Secret holding database credentials
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRef {
    /// Name of the Secret containing credentials
    pub name: String,

    /// Namespace of the Secret; defaults to the Database's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key in the Secret containing the username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,

    /// Key in the Secret containing the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_key: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "dbhub.tas.io",
    version = "v1alpha1",
    kind = "Database",
    plural = "databases",
    shortname = "db",
    status = "DatabaseStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#)]
#[kube(printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#)]
#[kube(printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#)]
#[kube(printcolumn = r#"{"name":"Database","type":"string","jsonPath":".spec.database"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Database engine
    #[serde(rename = "type")]
    pub r#type: DatabaseType,

    /// Server hostname or IP address; unused for SQLite
    #[serde(default)]
    pub host: String,

    /// Server port; defaulted by type at admission
    #[serde(default)]
    pub port: i32,

    /// Name of the database to connect to (file path for SQLite)
    pub database: String,

    /// Secret holding username and password; not required for SQLite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<CredentialsRef>,

    /// Maximum seconds to wait for a connection
    #[serde(default)]
    pub connection_timeout: i32,

    /// Maximum seconds to wait for a query
    #[serde(default)]
    pub query_timeout: i32,

    /// SSL/TLS mode
    #[serde(default)]
    pub ssl_mode: SslMode,

    /// Soft cap on rows returned by gateway queries
    #[serde(default)]
    pub max_rows: i32,

    /// Restrict the database to read-only operations
    #[serde(default = "default_read_only")]
    pub read_only: bool,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[schemars(length(max = 1000))]
    pub description: String,
}

fn default_read_only() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    /// Current connection phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DatabasePhase>,

    /// Timestamp of the last connectivity check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<Time>,

    /// Additional information about the current phase.
    /// Always serialized so merge patches can clear a stale message.
    #[serde(default)]
    pub message: String,

    /// Constructed connection string, credentials stripped
    #[serde(default)]
    pub dsn: String,

    /// Most recent generation observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Current resource conditions (Ready, Connected)
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Database {
    /// Namespace of the credentials Secret, defaulting to the object's own
    pub fn credentials_namespace(&self) -> String {
        self.spec
            .credentials_ref
            .as_ref()
            .and_then(|r| r.namespace.clone())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }

    /// Secret key holding the username
    pub fn user_key(&self) -> String {
        self.spec
            .credentials_ref
            .as_ref()
            .and_then(|r| r.user_key.clone())
            .unwrap_or_else(|| "username".to_string())
    }

    /// Secret key holding the password
    pub fn password_key(&self) -> String {
        self.spec
            .credentials_ref
            .as_ref()
            .and_then(|r| r.password_key.clone())
            .unwrap_or_else(|| "password".to_string())
    }

    /// Whether the database's last probe succeeded
    pub fn is_connected(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .map(|p| p == DatabasePhase::Connected)
            .unwrap_or(false)
    }
}
