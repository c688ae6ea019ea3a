//! Database health controller.
//!
//! Validates external SQL connectivity for every `Database` resource:
//! reads the referenced credentials Secret, derives the driver DSN,
//! probes the server under a hard deadline, and publishes phase plus
//! `Ready`/`Connected` conditions. Every outcome requeues at the health
//! interval so connectivity is re-verified continuously.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::api::conditions::{set_condition, CONDITION_CONNECTED, CONDITION_READY};
use crate::api::database::{Database, DatabasePhase, DatabaseStatus, DatabaseType};
use crate::controller::context::Context;
use crate::dsn::build_dsn;
use crate::error::{OperatorError, Result};
use crate::ping;

/// How often to re-verify database connectivity
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);

const CONTROLLER_NAME: &str = "database";

/// Reconcile a single Database resource
pub async fn reconcile_database(db: Arc<Database>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let ns = db
        .namespace()
        .ok_or_else(|| OperatorError::InvalidSpec("namespace required".to_string()))?;
    let name = db.name_any();
    let key = format!("{ns}/{name}");

    info!(namespace = %ns, name = %name, "reconciling Database");

    let mut status = db.status.clone().unwrap_or_default();
    status.observed_generation = db.metadata.generation;
    if status.phase.is_none() {
        status.phase = Some(DatabasePhase::Pending);
    }

    let generation = db.metadata.generation;

    // Credentials fetch; failures publish Failed and retry on the health
    // interval rather than erroring the work queue.
    let (username, password) = match get_credentials(&db, &ctx.client).await {
        Ok(creds) => creds,
        Err(err) => {
            warn!(namespace = %ns, name = %name, reason = err.reason(), error = %err,
                "failed to get credentials");
            status.phase = Some(DatabasePhase::Failed);
            status.message = format!("Failed to get credentials: {err}");
            set_condition(
                &mut status.conditions,
                CONDITION_READY,
                false,
                err.reason(),
                &status.message.clone(),
                generation,
            );
            ctx.metrics.observe_failure(CONTROLLER_NAME, err.reason());
            publish_status(&ctx.client, &ns, &name, &status).await?;
            return Ok(Action::requeue(HEALTH_CHECK_INTERVAL));
        }
    };

    // The full DSN stays in memory; only the stripped form is published.
    let dsn = build_dsn(&db.spec, &username, &password);
    status.dsn = dsn.stripped;

    let outcome = ping::test_connection(&db.spec, &username, &password).await;
    status.last_checked = Some(Time(Utc::now()));

    match outcome {
        Ok(()) => {
            info!(namespace = %ns, name = %name, "database connection successful");
            status.phase = Some(DatabasePhase::Connected);
            status.message = String::new();
            set_condition(
                &mut status.conditions,
                CONDITION_CONNECTED,
                true,
                "ConnectionSuccessful",
                "Successfully connected to database",
                generation,
            );
            set_condition(
                &mut status.conditions,
                CONDITION_READY,
                true,
                "DatabaseReady",
                "Database is connected and ready",
                generation,
            );
        }
        Err(err) => {
            warn!(namespace = %ns, name = %name, error = %err, "database connection test failed");
            status.phase = Some(DatabasePhase::Failed);
            status.message = format!("Connection failed: {err}");
            set_condition(
                &mut status.conditions,
                CONDITION_CONNECTED,
                false,
                "ConnectionFailed",
                &err.to_string(),
                generation,
            );
            set_condition(
                &mut status.conditions,
                CONDITION_READY,
                false,
                DatabasePhase::Failed.as_str(),
                &status.message.clone(),
                generation,
            );
            ctx.metrics.observe_failure(CONTROLLER_NAME, err.reason());
        }
    }

    publish_status(&ctx.client, &ns, &name, &status).await?;

    ctx.backoff.clear(&key);
    ctx.metrics
        .observe_reconcile(CONTROLLER_NAME, start.elapsed().as_secs_f64());

    debug!(namespace = %ns, name = %name, interval = ?HEALTH_CHECK_INTERVAL,
        "scheduling next health check");
    Ok(Action::requeue(HEALTH_CHECK_INTERVAL))
}

/// Fetch username and password from the referenced Secret.
///
/// SQLite needs no credentials; a missing reference there yields empty
/// strings instead of an error.
pub(crate) async fn get_credentials(db: &Database, client: &Client) -> Result<(String, String)> {
    let Some(credentials_ref) = &db.spec.credentials_ref else {
        if db.spec.r#type == DatabaseType::Sqlite {
            return Ok((String::new(), String::new()));
        }
        return Err(OperatorError::InvalidSpec(
            "credentialsRef is required for non-SQLite databases".to_string(),
        ));
    };

    let secret_namespace = db.credentials_namespace();
    let secret_name = credentials_ref.name.clone();

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &secret_namespace);
    let secret = secrets.get(&secret_name).await.map_err(|e| match e {
        kube::Error::Api(ref response) if response.code == 404 => OperatorError::SecretNotFound {
            namespace: secret_namespace.clone(),
            name: secret_name.clone(),
        },
        other => OperatorError::KubeError(other),
    })?;

    let data = secret.data.unwrap_or_default();
    let lookup = |key: String| -> Result<String> {
        data.get(&key)
            .map(|v| String::from_utf8_lossy(&v.0).into_owned())
            .ok_or_else(|| OperatorError::SecretKeyMissing {
                namespace: secret_namespace.clone(),
                name: secret_name.clone(),
                key,
            })
    };

    let username = lookup(db.user_key())?;
    let password = lookup(db.password_key())?;
    Ok((username, password))
}

async fn publish_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &DatabaseStatus,
) -> Result<()> {
    let api: Api<Database> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Error handler: requeue with per-object exponential backoff
fn error_policy(db: Arc<Database>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    let key = format!("{}/{}", db.namespace().unwrap_or_default(), db.name_any());
    let delay = ctx.backoff.next(&key);
    error!(key = %key, error = %error, requeue = ?delay, "Database reconciliation error");
    ctx.metrics.observe_failure(CONTROLLER_NAME, error.reason());
    Action::requeue(delay)
}

/// Start the Database controller and run it to completion
pub async fn run_database_controller(client: Client, ctx: Arc<Context>) {
    let databases: Api<Database> = Api::all(client);

    info!("starting Database controller");

    Controller::new(databases, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_database, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(object = ?obj, "reconciled Database"),
                Err(e) => warn!(error = %e, "Database reconciliation failed"),
            }
        })
        .await;
}
