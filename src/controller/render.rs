//! Gateway configuration rendering.
//!
//! The rendered TOML is a template: every `dsn` value is a `${NAME_DSN}`
//! placeholder resolved by the init container from the derived credentials
//! Secret. Real DSNs therefore never appear in the ConfigMap; they live
//! only in the Secret under the matching `_DSN` keys.

use std::collections::BTreeMap;
use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::api::instance::DefaultPolicy;
use crate::dsn::{dsn_placeholder, dsn_secret_key};

/// One selected database, already resolved to a full DSN
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Database object name; doubles as the TOML source id
    pub name: String,
    /// Full DSN including credentials
    pub dsn: String,
    /// Seconds; emitted when positive
    pub connection_timeout: i32,
    /// Seconds; emitted when positive
    pub query_timeout: i32,
}

/// Output of a config render
#[derive(Debug, Clone)]
pub struct RenderedConfig {
    /// TOML template with `${..._DSN}` placeholders
    pub toml: String,
    /// `NAME_DSN` -> full DSN, destined for the credentials Secret
    pub credentials: BTreeMap<String, String>,
    /// Hex of the first 8 bytes of SHA-256 over the template
    pub hash: String,
}

/// Render the gateway TOML template and its credential map.
///
/// Zero sources renders an empty template (the gateway comes up with no
/// configured sources); tools are only emitted when a policy is present
/// and at least one source exists.
pub fn render_config(policy: Option<&DefaultPolicy>, sources: &[SourceEntry]) -> RenderedConfig {
    let mut toml = String::new();
    let mut credentials = BTreeMap::new();

    for source in sources {
        credentials.insert(dsn_secret_key(&source.name), source.dsn.clone());

        let _ = write!(
            toml,
            "[[sources]]\nid = \"{}\"\ndsn = \"{}\"\n",
            source.name,
            dsn_placeholder(&source.name),
        );
        if source.connection_timeout > 0 {
            let _ = writeln!(toml, "connection_timeout = {}", source.connection_timeout);
        }
        if source.query_timeout > 0 {
            let _ = writeln!(toml, "query_timeout = {}", source.query_timeout);
        }
        toml.push('\n');
    }

    if let Some(policy) = policy {
        if !sources.is_empty() {
            for source in sources {
                for operation in &policy.allowed_operations {
                    let _ = write!(
                        toml,
                        "[[tools]]\nname = \"{}\"\nsource = \"{}\"\n",
                        operation, source.name,
                    );
                    if policy.read_only {
                        toml.push_str("readonly = true\n");
                    }
                    if policy.max_rows > 0 {
                        let _ = writeln!(toml, "max_rows = {}", policy.max_rows);
                    }
                    toml.push('\n');
                }
            }
        }
    }

    let hash = config_hash(&toml);
    RenderedConfig {
        toml,
        credentials,
        hash,
    }
}

/// Stable fingerprint of rendered config data: hex-encoded first 8 bytes
/// of its SHA-256 digest.
pub fn config_hash(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    digest[..8].iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str) -> SourceEntry {
        SourceEntry {
            name: name.into(),
            dsn: format!("postgres://u:p@{name}:5432/app?sslmode=disable"),
            connection_timeout: 30,
            query_timeout: 60,
        }
    }

    fn policy(ops: &[&str]) -> DefaultPolicy {
        DefaultPolicy {
            read_only: true,
            max_rows: 1000,
            allowed_operations: ops.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_selection_renders_empty_template() {
        let rendered = render_config(Some(&policy(&["execute_sql"])), &[]);
        assert!(rendered.toml.is_empty());
        assert!(rendered.credentials.is_empty());
        assert_eq!(rendered.hash, config_hash(""));
    }

    #[test]
    fn test_single_source_block() {
        let rendered = render_config(None, &[source("orders-db")]);
        assert!(rendered.toml.contains("[[sources]]\nid = \"orders-db\"\ndsn = \"${ORDERS_DB_DSN}\"\n"));
        assert!(rendered.toml.contains("connection_timeout = 30"));
        assert!(rendered.toml.contains("query_timeout = 60"));
        assert!(!rendered.toml.contains("[[tools]]"));
        assert_eq!(
            rendered.credentials.get("ORDERS_DB_DSN").unwrap(),
            "postgres://u:p@orders-db:5432/app?sslmode=disable"
        );
    }

    #[test]
    fn test_timeouts_omitted_when_zero() {
        let mut s = source("a");
        s.connection_timeout = 0;
        s.query_timeout = 0;
        let rendered = render_config(None, &[s]);
        assert!(!rendered.toml.contains("connection_timeout"));
        assert!(!rendered.toml.contains("query_timeout"));
    }

    #[test]
    fn test_tools_per_operation_per_source() {
        let rendered = render_config(
            Some(&policy(&["execute_sql", "search_objects"])),
            &[source("a"), source("b")],
        );
        assert_eq!(rendered.toml.matches("[[tools]]").count(), 4);
        assert!(rendered.toml.contains("name = \"execute_sql\"\nsource = \"a\""));
        assert!(rendered.toml.contains("name = \"search_objects\"\nsource = \"b\""));
        assert!(rendered.toml.contains("readonly = true"));
        assert!(rendered.toml.contains("max_rows = 1000"));
    }

    #[test]
    fn test_non_readonly_policy_omits_readonly_key() {
        let mut p = policy(&["execute_sql"]);
        p.read_only = false;
        p.max_rows = 0;
        let rendered = render_config(Some(&p), &[source("a")]);
        assert!(!rendered.toml.contains("readonly"));
        assert!(!rendered.toml.contains("max_rows"));
    }

    #[test]
    fn test_unrecognized_operation_rendered_verbatim() {
        let rendered = render_config(Some(&policy(&["future_op"])), &[source("a")]);
        assert!(rendered.toml.contains("name = \"future_op\""));
    }

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let one = render_config(None, &[source("a")]);
        let same = render_config(None, &[source("a")]);
        let more = render_config(None, &[source("a"), source("b")]);

        assert_eq!(one.hash, same.hash);
        assert_ne!(one.hash, more.hash);
        assert_eq!(one.hash.len(), 16);
        assert!(one.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
