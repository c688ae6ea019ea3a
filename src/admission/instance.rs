//! Defaulting and validation for DBHubInstance resources.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::admission::{FieldError, Validation};
use crate::api::instance::{
    DBHubInstance, DBHubInstanceSpec, DefaultPolicy, ResourceRequirements, TransportType,
    DEFAULT_IMAGE,
};

/// Replica counts above this are accepted with a warning
const REPLICAS_SOFT_CAP: i32 = 10;
/// maxRows above this is accepted with a warning
const MAX_ROWS_SOFT_CAP: i32 = 100_000;

/// Operation tokens the gateway image is known to accept. Unknown tokens
/// warn but are rendered verbatim; the gateway owns their interpretation.
const KNOWN_OPERATIONS: &[&str] = &[
    "execute_sql",
    "search_objects",
    "list_tables",
    "describe_table",
    "list_connectors",
];

const VALID_PULL_POLICIES: &[&str] = &["Always", "IfNotPresent", "Never"];

/// Fill unset optional fields with their documented defaults. Idempotent.
pub fn default_instance(spec: &mut DBHubInstanceSpec) {
    if spec.replicas.is_none() {
        spec.replicas = Some(1);
    }
    if spec.image.is_empty() {
        spec.image = DEFAULT_IMAGE.to_string();
    }
    if spec.image_pull_policy.is_empty() {
        spec.image_pull_policy = "IfNotPresent".to_string();
    }
    if spec.transport.is_none() {
        spec.transport = Some(TransportType::Http);
    }
    if spec.port == 0 {
        spec.port = 8080;
    }

    if spec.resources.is_none() {
        spec.resources = Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("128Mi".to_string())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("500m".to_string())),
                ("memory".to_string(), Quantity("512Mi".to_string())),
            ])),
        });
    }

    if spec.default_policy.is_none() {
        spec.default_policy = Some(DefaultPolicy::default());
    }
}

/// Validate a DBHubInstance spec, comparing against the previous object
/// on updates. Errors fail admission; warnings are surfaced but allowed.
pub fn validate_instance(instance: &DBHubInstance, old: Option<&DBHubInstance>) -> Validation {
    let mut validation = Validation::default();
    let spec = &instance.spec;

    if let Some(old) = old {
        if old.spec.transport != spec.transport {
            validation
                .warnings
                .push("Changing transport type will restart all pods".to_string());
        }
        if old.spec.port != spec.port {
            validation.warnings.push(
                "Changing port will restart all pods and may require service reconfiguration"
                    .to_string(),
            );
        }
    }

    if let Some(replicas) = spec.replicas {
        if replicas < 0 {
            validation.errors.push(FieldError::new(
                "spec.replicas",
                "replicas must be non-negative",
            ));
        }
        if replicas > REPLICAS_SOFT_CAP {
            validation
                .warnings
                .push(format!("replicas={replicas} is high for DBHub instances"));
        }
    }

    if spec.port < 0 || spec.port > 65535 {
        validation.errors.push(FieldError::new(
            "spec.port",
            "port must be between 0 and 65535",
        ));
    }
    if spec.port > 0 && spec.port < 1024 {
        validation.warnings.push(
            "Using a privileged port (<1024) may require special container security context"
                .to_string(),
        );
    }

    if let Some(selector) = &spec.database_selector {
        if selector.match_labels.is_empty() && selector.match_names.is_empty() {
            validation.errors.push(FieldError::new(
                "spec.databaseSelector",
                "databaseSelector must have at least one of matchLabels or matchNames",
            ));
        }
    }

    if let Some(policy) = &spec.default_policy {
        if policy.max_rows < 0 {
            validation.errors.push(FieldError::new(
                "spec.defaultPolicy.maxRows",
                "maxRows must be non-negative",
            ));
        }
        if policy.max_rows > MAX_ROWS_SOFT_CAP {
            validation
                .warnings
                .push(format!("defaultPolicy.maxRows={} is very high", policy.max_rows));
        }

        if !policy.read_only {
            validation.warnings.push(
                "defaultPolicy.readonly is false - write operations are enabled, use with caution"
                    .to_string(),
            );
        }

        for (i, operation) in policy.allowed_operations.iter().enumerate() {
            if !KNOWN_OPERATIONS.contains(&operation.as_str()) {
                validation.warnings.push(format!(
                    "defaultPolicy.allowedOperations[{i}]={operation} may not be a recognized operation"
                ));
            }
        }
    }

    if let Some(resources) = &spec.resources {
        validate_resources(resources, &mut validation);
    }

    if !spec.image_pull_policy.is_empty()
        && !VALID_PULL_POLICIES.contains(&spec.image_pull_policy.as_str())
    {
        validation.errors.push(FieldError::new(
            "spec.imagePullPolicy",
            format!(
                "unsupported value {:?}, must be one of {:?}",
                spec.image_pull_policy, VALID_PULL_POLICIES
            ),
        ));
    }

    validation
}

/// Every request must not exceed the corresponding limit
fn validate_resources(resources: &ResourceRequirements, validation: &mut Validation) {
    let (Some(requests), Some(limits)) = (&resources.requests, &resources.limits) else {
        return;
    };

    for (name, request) in requests {
        let Some(limit) = limits.get(name) else {
            continue;
        };
        match (parse_quantity(&request.0), parse_quantity(&limit.0)) {
            (Some(request_value), Some(limit_value)) if request_value > limit_value => {
                validation.errors.push(FieldError::new(
                    format!("spec.resources.requests.{name}"),
                    format!("{name} request cannot exceed {name} limit"),
                ));
            }
            _ => {}
        }
    }
}

/// Parse a Kubernetes resource quantity into a comparable f64. Handles
/// decimal ("100m", "2", "1k") and binary ("128Mi") suffixes.
fn parse_quantity(s: &str) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];

    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|v| v * multiplier);
        }
    }
    s.parse::<f64>().ok()
}
