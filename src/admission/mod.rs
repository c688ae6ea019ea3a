//! Admission webhooks: defaulting (mutating) and validation.
//!
//! Four endpoints, one mutate and one validate per resource kind, all
//! speaking `admission/v1` `AdmissionReview`. Defaulting replies with a
//! JSON patch against `/spec`; validation denies with the full list of
//! field errors and attaches warnings to allowed responses. TLS
//! termination and certificate management are the webhook framework's
//! concern, not ours.

mod database;
mod instance;

use axum::routing::{get, post};
use axum::{Json, Router};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{info, warn};

use crate::api::database::Database;
use crate::api::instance::DBHubInstance;

pub use database::{default_database, validate_database};
pub use instance::{default_instance, validate_instance};

/// A validation failure anchored to a spec field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of a validator: errors fail admission, warnings do not
#[derive(Debug, Default)]
pub struct Validation {
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
}

impl Validation {
    /// Collapse the error list into a single deny message
    pub fn deny_message(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Router serving all four webhook endpoints plus a health probe
pub fn webhook_router() -> Router {
    Router::new()
        .route(
            "/mutate-dbhub-tas-io-v1alpha1-database",
            post(mutate_database_handler),
        )
        .route(
            "/validate-dbhub-tas-io-v1alpha1-database",
            post(validate_database_handler),
        )
        .route(
            "/mutate-dbhub-tas-io-v1alpha1-dbhubinstance",
            post(mutate_instance_handler),
        )
        .route(
            "/validate-dbhub-tas-io-v1alpha1-dbhubinstance",
            post(validate_instance_handler),
        )
        .route("/healthz", get(|| async { "ok" }))
}

async fn mutate_database_handler(
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(mutate::<Database>(review, "Database", |db| {
        default_database(&mut db.spec)
    }))
}

async fn mutate_instance_handler(
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(mutate::<DBHubInstance>(review, "DBHubInstance", |instance| {
        default_instance(&mut instance.spec)
    }))
}

async fn validate_database_handler(
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(validate::<Database, _>(review, "Database", |new, old| {
        validate_database(new, old)
    }))
}

async fn validate_instance_handler(
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(validate::<DBHubInstance, _>(review, "DBHubInstance", |new, old| {
        validate_instance(new, old)
    }))
}

/// Run the defaulter over the incoming object and reply with a JSON
/// patch of the `/spec` subtree.
fn mutate<K>(
    review: AdmissionReview<DynamicObject>,
    kind: &str,
    default_fn: impl Fn(&mut K),
) -> AdmissionReview<DynamicObject>
where
    K: DeserializeOwned + Serialize,
{
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "invalid admission review");
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };
    let res = AdmissionResponse::from(&req);

    let Some(obj) = &req.object else {
        return res.into_review();
    };

    info!(kind = %kind, name = %req.name, "defaulting");

    let original = match serde_json::to_value(obj) {
        Ok(value) => value,
        Err(err) => return AdmissionResponse::invalid(err.to_string()).into_review(),
    };
    let mut typed: K = match serde_json::from_value(original.clone()) {
        Ok(typed) => typed,
        Err(err) => return res.deny(format!("invalid {kind}: {err}")).into_review(),
    };

    default_fn(&mut typed);

    let defaulted = match serde_json::to_value(&typed) {
        Ok(value) => value,
        Err(err) => return AdmissionResponse::invalid(err.to_string()).into_review(),
    };

    // Diffing the wrapped spec subtrees keeps metadata and type noise out
    // of the patch and yields `/spec/...` paths directly.
    let patch = json_patch::diff(
        &serde_json::json!({ "spec": original.get("spec") }),
        &serde_json::json!({ "spec": defaulted.get("spec") }),
    );

    match res.with_patch(patch) {
        Ok(res) => res.into_review(),
        Err(err) => AdmissionResponse::invalid(err.to_string()).into_review(),
    }
}

/// Run the validator; structured errors deny, warnings ride along.
fn validate<K, F>(
    review: AdmissionReview<DynamicObject>,
    kind: &str,
    validate_fn: F,
) -> AdmissionReview<DynamicObject>
where
    K: DeserializeOwned,
    F: Fn(&K, Option<&K>) -> Validation,
{
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "invalid admission review");
            return AdmissionResponse::invalid(err.to_string()).into_review();
        }
    };
    let mut res = AdmissionResponse::from(&req);

    // Deletions carry no object and are always allowed.
    let Some(obj) = &req.object else {
        return res.into_review();
    };

    info!(kind = %kind, name = %req.name, operation = ?req.operation, "validating");

    let typed: K = match parse(obj) {
        Ok(typed) => typed,
        Err(err) => return res.deny(format!("invalid {kind}: {err}")).into_review(),
    };
    let old: Option<K> = req.old_object.as_ref().and_then(|o| parse(o).ok());

    let validation = validate_fn(&typed, old.as_ref());

    if !validation.warnings.is_empty() {
        res.warnings = Some(validation.warnings.clone());
    }
    if !validation.errors.is_empty() {
        warn!(kind = %kind, name = %req.name, errors = %validation.deny_message(), "denying");
        return res.deny(validation.deny_message()).into_review();
    }

    res.into_review()
}

fn parse<K: DeserializeOwned>(obj: &DynamicObject) -> serde_json::Result<K> {
    serde_json::from_value(serde_json::to_value(obj)?)
}
