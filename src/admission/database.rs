//! Defaulting and validation for Database resources.
//!
//! Enum-valued fields (`type`, `sslMode`) are typed; unknown values fail
//! deserialization before these functions run and are rejected at the
//! webhook boundary with a deny.

use std::net::IpAddr;

use crate::admission::{FieldError, Validation};
use crate::api::database::{Database, DatabaseSpec, DatabaseType, SslMode};

/// Longest hostname the resolver will accept
const MAX_HOSTNAME_LEN: usize = 253;
/// maxRows above this is accepted with a warning
const MAX_ROWS_SOFT_CAP: i32 = 100_000;

/// Fill unset optional fields with their documented defaults. Idempotent.
pub fn default_database(spec: &mut DatabaseSpec) {
    if spec.port == 0 {
        if let Some(port) = spec.r#type.default_port() {
            spec.port = port;
        }
    }

    if spec.connection_timeout == 0 {
        spec.connection_timeout = 30;
    }
    if spec.query_timeout == 0 {
        spec.query_timeout = 60;
    }
    if spec.max_rows == 0 {
        spec.max_rows = 1000;
    }

    if let Some(credentials_ref) = &mut spec.credentials_ref {
        if credentials_ref.user_key.is_none() {
            credentials_ref.user_key = Some("username".to_string());
        }
        if credentials_ref.password_key.is_none() {
            credentials_ref.password_key = Some("password".to_string());
        }
    }
}

/// Validate a Database spec, comparing against the previous object on
/// updates. Errors fail admission; warnings are surfaced but allowed.
pub fn validate_database(db: &Database, old: Option<&Database>) -> Validation {
    let mut validation = Validation::default();
    let spec = &db.spec;

    if let Some(old) = old {
        if old.spec.r#type != spec.r#type {
            validation
                .warnings
                .push("Changing database type may require credential updates".to_string());
        }
        if old.spec.host != spec.host {
            validation
                .warnings
                .push("Changing host will trigger reconnection".to_string());
        }
    }

    if spec.r#type != DatabaseType::Sqlite {
        if spec.host.is_empty() {
            validation.errors.push(FieldError::new(
                "spec.host",
                "host is required for non-SQLite databases",
            ));
        } else if spec.host.parse::<IpAddr>().is_err() && spec.host.len() > MAX_HOSTNAME_LEN {
            validation.errors.push(FieldError::new(
                "spec.host",
                format!("hostname exceeds maximum length of {MAX_HOSTNAME_LEN} characters"),
            ));
        }
    }

    if spec.port < 0 || spec.port > 65535 {
        validation.errors.push(FieldError::new(
            "spec.port",
            "port must be between 0 and 65535",
        ));
    }

    if spec.database.is_empty() {
        validation
            .errors
            .push(FieldError::new("spec.database", "database name is required"));
    }

    if spec.r#type != DatabaseType::Sqlite {
        let has_name = spec
            .credentials_ref
            .as_ref()
            .map(|r| !r.name.is_empty())
            .unwrap_or(false);
        if !has_name {
            validation.errors.push(FieldError::new(
                "spec.credentialsRef.name",
                "credentials secret name is required for non-SQLite databases",
            ));
        }
    }

    if spec.connection_timeout < 0 {
        validation.errors.push(FieldError::new(
            "spec.connectionTimeout",
            "connection timeout must be non-negative",
        ));
    }
    if spec.query_timeout < 0 {
        validation.errors.push(FieldError::new(
            "spec.queryTimeout",
            "query timeout must be non-negative",
        ));
    }

    if spec.max_rows < 0 {
        validation.errors.push(FieldError::new(
            "spec.maxRows",
            "max rows must be non-negative",
        ));
    }
    if spec.max_rows > MAX_ROWS_SOFT_CAP {
        validation.warnings.push(format!(
            "maxRows={} is very high and may impact performance",
            spec.max_rows
        ));
    }

    if spec.ssl_mode == SslMode::Disable {
        validation
            .warnings
            .push("SSL is disabled, connection is not encrypted".to_string());
    }

    validation
}
