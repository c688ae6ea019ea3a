//! Connection-string construction and environment-name derivation.
//!
//! Each supported engine has a fixed DSN shape built entirely from spec
//! fields plus credentials. Every DSN exists in two forms: the full form
//! (held in memory and written to the derived credentials Secret) and a
//! credential-stripped form published to `status.dsn` for display.

use url::form_urlencoded;

use crate::api::database::{DatabaseSpec, DatabaseType};

/// Full and display forms of a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    /// Complete DSN including credentials; never persisted outside the
    /// derived credentials Secret
    pub full: String,
    /// DSN with user and password stripped, safe for status display
    pub stripped: String,
}

/// Percent-escape a credential component the way Go's `url.QueryEscape`
/// does (space becomes `+`), so rendered DSNs stay byte-compatible with
/// what the gateway image expects.
fn query_escape(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Build the driver-specific DSN for a database spec.
pub fn build_dsn(spec: &DatabaseSpec, username: &str, password: &str) -> Dsn {
    match spec.r#type {
        DatabaseType::Postgres => Dsn {
            full: format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                query_escape(username),
                query_escape(password),
                spec.host,
                spec.port,
                spec.database,
                spec.ssl_mode.as_str(),
            ),
            stripped: format!(
                "postgres://{}:{}/{}?sslmode={}",
                spec.host,
                spec.port,
                spec.database,
                spec.ssl_mode.as_str(),
            ),
        },
        DatabaseType::MySQL | DatabaseType::MariaDB => {
            let tls = if spec.ssl_mode.requires_tls() { "true" } else { "false" };
            Dsn {
                full: format!(
                    "{}:{}@tcp({}:{})/{}?tls={}&timeout={}s",
                    username,
                    password,
                    spec.host,
                    spec.port,
                    spec.database,
                    tls,
                    spec.connection_timeout,
                ),
                stripped: format!(
                    "tcp({}:{})/{}?tls={}",
                    spec.host, spec.port, spec.database, tls,
                ),
            }
        }
        DatabaseType::SqlServer => Dsn {
            full: format!(
                "sqlserver://{}:{}@{}:{}?database={}&connection+timeout={}",
                query_escape(username),
                query_escape(password),
                spec.host,
                spec.port,
                spec.database,
                spec.connection_timeout,
            ),
            stripped: format!(
                "sqlserver://{}:{}?database={}",
                spec.host, spec.port, spec.database,
            ),
        },
        // The database field is a filesystem path; credentials are ignored.
        DatabaseType::Sqlite => Dsn {
            full: spec.database.clone(),
            stripped: spec.database.clone(),
        },
    }
}

/// Derive the environment-variable prefix for a database name: uppercase,
/// with `-` and `.` mapped to `_`. Purely syntactic and stable.
pub fn env_name(name: &str) -> String {
    name.to_uppercase().replace(['-', '.'], "_")
}

/// Key under which a database's DSN lands in the credentials Secret
pub fn dsn_secret_key(name: &str) -> String {
    format!("{}_DSN", env_name(name))
}

/// Placeholder referencing the DSN at init-container render time
pub fn dsn_placeholder(name: &str) -> String {
    format!("${{{}_DSN}}", env_name(name))
}
