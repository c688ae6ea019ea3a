//! DBHubInstance gateway controller.
//!
//! Aggregates `Database` resources by selector, renders the gateway TOML
//! with credential indirection, and drives the four owned children
//! (ConfigMap, Secret, Deployment, Service) with create-or-update
//! semantics. Three watch edges feed the work queue: the instance itself,
//! its owned children, and a cross-kind fan-out that re-enqueues every
//! instance whose selector may match a changed Database.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use crate::api::conditions::{set_condition, CONDITION_AVAILABLE};
use crate::api::database::Database;
use crate::api::instance::{DBHubInstance, DBHubInstanceStatus, InstancePhase};
use crate::controller::context::Context;
use crate::controller::database::get_credentials;
use crate::controller::render::{render_config, SourceEntry};
use crate::controller::resources::{
    build_config_map, build_credentials_secret, build_deployment, build_service, config_map_name,
    endpoint, secret_name,
};
use crate::dsn::build_dsn;
use crate::error::{OperatorError, Result};

const CONTROLLER_NAME: &str = "dbhubinstance";
const FIELD_MANAGER: &str = "dbhub-operator";

/// Reconcile a single DBHubInstance
pub async fn reconcile_instance(instance: Arc<DBHubInstance>, ctx: Arc<Context>) -> Result<Action> {
    let start = Instant::now();
    let ns = instance
        .namespace()
        .ok_or_else(|| OperatorError::InvalidSpec("namespace required".to_string()))?;
    let name = instance.name_any();
    let key = format!("{ns}/{name}");
    let generation = instance.metadata.generation;

    info!(namespace = %ns, name = %name, "reconciling DBHubInstance");

    let mut status = instance.status.clone().unwrap_or_default();
    status.observed_generation = generation;
    if status.phase.is_none() {
        status.phase = Some(InstancePhase::Pending);
    }

    // Selector resolution: Connected databases only, name-sorted.
    let databases = match find_matching_databases(&instance, &ctx.client, &ns).await {
        Ok(databases) => databases,
        Err(err) => {
            warn!(namespace = %ns, name = %name, error = %err, "failed to find databases");
            set_instance_status(
                &mut status,
                InstancePhase::Failed,
                &format!("Failed to find databases: {err}"),
                generation,
            );
            publish_status(&ctx.client, &ns, &name, &status).await?;
            return Err(err);
        }
    };

    // Publish the selected set even if later steps fail.
    status.connected_databases = databases.iter().map(|db| db.name_any()).collect();

    // Resolve every selected database to a full DSN; a single unreadable
    // secret fails the whole reconcile (retried with backoff).
    let mut sources = Vec::with_capacity(databases.len());
    for db in &databases {
        let (username, password) = match get_credentials(db, &ctx.client).await {
            Ok(creds) => creds,
            Err(err) => {
                warn!(namespace = %ns, name = %name, database = %db.name_any(),
                    error = %err, "failed to read database credentials");
                set_instance_status(
                    &mut status,
                    InstancePhase::Failed,
                    &format!(
                        "Failed to generate config: credentials for database {}: {err}",
                        db.name_any()
                    ),
                    generation,
                );
                publish_status(&ctx.client, &ns, &name, &status).await?;
                return Err(err);
            }
        };
        sources.push(SourceEntry {
            name: db.name_any(),
            dsn: build_dsn(&db.spec, &username, &password).full,
            connection_timeout: db.spec.connection_timeout,
            query_timeout: db.spec.query_timeout,
        });
    }

    let rendered = render_config(instance.spec.default_policy.as_ref(), &sources);
    status.config_hash = rendered.hash.clone();

    // Children, in strict order: ConfigMap, Secret, Deployment, Service.
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ns);
    apply(
        &config_maps,
        &config_map_name(&instance),
        build_config_map(&instance, &rendered.toml),
    )
    .await?;

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);
    apply(
        &secrets,
        &secret_name(&instance),
        build_credentials_secret(&instance, &rendered.credentials),
    )
    .await?;

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
    apply(&deployments, &name, build_deployment(&instance, &rendered.hash)).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    apply(&services, &name, build_service(&instance)).await?;

    // Phase derives from observed deployment availability every reconcile.
    status.endpoint = endpoint(&instance);
    if let Ok(deployment) = deployments.get(&name).await {
        let available = deployment
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        let unavailable = deployment
            .status
            .as_ref()
            .and_then(|s| s.unavailable_replicas)
            .unwrap_or(0);
        status.available_replicas = available;

        if available > 0 {
            set_instance_status(&mut status, InstancePhase::Running, "", generation);
        } else if unavailable > 0 {
            set_instance_status(
                &mut status,
                InstancePhase::Degraded,
                "Some replicas are not available",
                generation,
            );
        } else {
            set_instance_status(
                &mut status,
                InstancePhase::Pending,
                "Waiting for replicas to be ready",
                generation,
            );
        }
    }

    status.last_config_update = Some(Time(Utc::now()));
    publish_status(&ctx.client, &ns, &name, &status).await?;

    ctx.backoff.clear(&key);
    ctx.metrics
        .observe_reconcile(CONTROLLER_NAME, start.elapsed().as_secs_f64());

    info!(namespace = %ns, name = %name, databases = databases.len(),
        replicas = status.available_replicas, "successfully reconciled DBHubInstance");

    // No fixed requeue: watch events on children and databases drive us.
    Ok(Action::await_change())
}

/// List Databases in the instance's namespace matching its selector and
/// currently Connected, sorted by name.
async fn find_matching_databases(
    instance: &DBHubInstance,
    client: &Client,
    namespace: &str,
) -> Result<Vec<Database>> {
    let databases: Api<Database> = Api::namespaced(client.clone(), namespace);
    let list = databases
        .list(&ListParams::default())
        .await
        .map_err(|e| OperatorError::SelectorError(e.to_string()))?;

    let mut matching: Vec<Database> = list
        .items
        .into_iter()
        .filter(|db| instance.matches_database(db) && db.is_connected())
        .collect();
    matching.sort_by_key(|db| db.name_any());
    Ok(matching)
}

/// Create-or-update a child object: create on missing, server-side apply
/// otherwise. Apply leaves server-assigned fields (Service `clusterIP`)
/// untouched while overwriting everything the operator manages.
async fn apply<K>(api: &Api<K>, name: &str, desired: K) -> Result<()>
where
    K: kube::Resource + Clone + std::fmt::Debug + DeserializeOwned + Serialize,
{
    match api.get(name).await {
        Ok(_) => {
            debug!(name = %name, "updating existing child resource");
            api.patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await?;
        }
        Err(_) => {
            debug!(name = %name, "creating child resource");
            api.create(&PostParams::default(), &desired).await?;
        }
    }
    Ok(())
}

fn set_instance_status(
    status: &mut DBHubInstanceStatus,
    phase: InstancePhase,
    message: &str,
    generation: Option<i64>,
) {
    status.phase = Some(phase);
    if phase == InstancePhase::Running {
        set_condition(
            &mut status.conditions,
            CONDITION_AVAILABLE,
            true,
            "InstanceRunning",
            "DBHub instance is running",
            generation,
        );
    } else {
        set_condition(
            &mut status.conditions,
            CONDITION_AVAILABLE,
            false,
            phase.as_str(),
            message,
            generation,
        );
    }
}

async fn publish_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &DBHubInstanceStatus,
) -> Result<()> {
    let api: Api<DBHubInstance> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Map a Database event to the instances whose selector may match it
fn instances_for_database(
    store: &Store<DBHubInstance>,
    db: &Database,
) -> Vec<ObjectRef<DBHubInstance>> {
    store
        .state()
        .into_iter()
        .filter(|instance| instance.matches_database(db))
        .map(|instance| ObjectRef::from_obj(&*instance))
        .collect()
}

/// Error handler: requeue with per-object exponential backoff
fn error_policy(instance: Arc<DBHubInstance>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    let key = format!(
        "{}/{}",
        instance.namespace().unwrap_or_default(),
        instance.name_any()
    );
    let delay = ctx.backoff.next(&key);
    error!(key = %key, error = %error, requeue = ?delay, "DBHubInstance reconciliation error");
    ctx.metrics.observe_failure(CONTROLLER_NAME, error.reason());
    Action::requeue(delay)
}

/// Start the DBHubInstance controller and run it to completion
pub async fn run_instance_controller(client: Client, ctx: Arc<Context>) {
    let instances: Api<DBHubInstance> = Api::all(client.clone());
    let databases: Api<Database> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client.clone());
    let services: Api<Service> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());

    // Children all carry the managed-by label; scope their watches to it.
    let child_cfg =
        WatcherConfig::default().labels("app.kubernetes.io/managed-by=dbhub-operator");

    info!("starting DBHubInstance controller");

    // The controller's own instance store backs the Database -> instance
    // fan-out, so the watch mapper can resolve selectors from cache.
    let controller = Controller::new(instances, WatcherConfig::default());
    let store = controller.store();

    controller
        .shutdown_on_signal()
        .owns(deployments, child_cfg.clone())
        .owns(services, child_cfg.clone())
        .owns(config_maps, child_cfg.clone())
        .owns(secrets, child_cfg)
        .watches(databases, WatcherConfig::default(), move |db| {
            instances_for_database(&store, &db)
        })
        .run(reconcile_instance, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(object = ?obj, "reconciled DBHubInstance"),
                Err(e) => warn!(error = %e, "DBHubInstance reconciliation failed"),
            }
        })
        .await;
}
