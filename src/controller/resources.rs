//! Child resource builders for DBHubInstance.
//!
//! Every gateway owns exactly four children: `<name>-config` (ConfigMap,
//! template only), `<name>-creds` (Secret, substitutable DSN values),
//! `<name>` (Deployment) and `<name>` (Service). The split keeps
//! credentials out of the ConfigMap and out of the pod spec: the init
//! container renders the template with the Secret as its environment.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvFromSource, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, Secret, SecretEnvSource,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::api::instance::DBHubInstance;

/// Suffix of the config template ConfigMap
pub const CONFIG_MAP_SUFFIX: &str = "-config";
/// Suffix of the derived credentials Secret
pub const SECRET_SUFFIX: &str = "-creds";
/// Key of the TOML template inside the ConfigMap
pub const CONFIG_FILE_NAME: &str = "dbhub.toml";
/// Pod-template label carrying the config fingerprint
pub const CONFIG_HASH_LABEL: &str = "config-hash";
/// Image used by the init container to substitute `${VAR}` placeholders
const ENVSUBST_IMAGE: &str = "bhgedigital/envsubst:latest";

/// Name of the config ConfigMap for an instance
pub fn config_map_name(instance: &DBHubInstance) -> String {
    format!("{}{}", instance.name_any(), CONFIG_MAP_SUFFIX)
}

/// Name of the credentials Secret for an instance
pub fn secret_name(instance: &DBHubInstance) -> String {
    format!("{}{}", instance.name_any(), SECRET_SUFFIX)
}

/// Canonical labels stamped on every child object
pub fn labels(instance: &DBHubInstance) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "dbhub".to_string()),
        (
            "app.kubernetes.io/instance".to_string(),
            instance.name_any(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "database-mcp".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            "dbhub-operator".to_string(),
        ),
    ])
}

/// Labels used for pod selection; kept minimal so the selector stays
/// immutable across operator upgrades
pub fn selector_labels(instance: &DBHubInstance) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), "dbhub".to_string()),
        (
            "app.kubernetes.io/instance".to_string(),
            instance.name_any(),
        ),
    ])
}

fn owned_meta(instance: &DBHubInstance, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: instance.namespace(),
        labels: Some(labels(instance)),
        owner_references: instance.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// Build the config template ConfigMap (no credentials, placeholders only)
pub fn build_config_map(instance: &DBHubInstance, config_toml: &str) -> ConfigMap {
    ConfigMap {
        metadata: owned_meta(instance, config_map_name(instance)),
        data: Some(BTreeMap::from([(
            CONFIG_FILE_NAME.to_string(),
            config_toml.to_string(),
        )])),
        ..Default::default()
    }
}

/// Build the derived credentials Secret carrying `NAME_DSN` entries
pub fn build_credentials_secret(
    instance: &DBHubInstance,
    credentials: &BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: owned_meta(instance, secret_name(instance)),
        string_data: Some(credentials.clone()),
        ..Default::default()
    }
}

/// Build the gateway Deployment.
///
/// The pod template carries the config hash as a label, so any change to
/// the rendered TOML produces a template change and a rolling replacement.
pub fn build_deployment(instance: &DBHubInstance, config_hash: &str) -> Deployment {
    let name = instance.name_any();
    let port = instance.port();

    let mut pod_labels = labels(instance);
    pod_labels.insert(CONFIG_HASH_LABEL.to_string(), config_hash.to_string());

    let annotations = BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), port.to_string()),
    ]);

    let init_container = Container {
        name: "config-renderer".to_string(),
        image: Some(ENVSUBST_IMAGE.to_string()),
        // -no-unset/-no-empty make unresolved placeholders a hard failure,
        // keeping a half-configured gateway from ever reaching ready.
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "envsubst -no-unset -no-empty < /config-template/{file} > /config/{file}",
                file = CONFIG_FILE_NAME
            ),
        ]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: Some(secret_name(instance)),
                optional: None,
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "config-template".to_string(),
                mount_path: "/config-template".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "config-rendered".to_string(),
                mount_path: "/config".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let probe = |initial_delay: i32, period: i32, timeout: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/health".to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        failure_threshold: Some(3),
        ..Default::default()
    };

    let main_container = Container {
        name: "dbhub".to_string(),
        image: Some(instance.image()),
        image_pull_policy: if instance.spec.image_pull_policy.is_empty() {
            None
        } else {
            Some(instance.spec.image_pull_policy.clone())
        },
        args: Some(vec![
            "--transport".to_string(),
            instance.transport().as_str().to_string(),
            "--port".to_string(),
            port.to_string(),
            "--config".to_string(),
            format!("/config/{CONFIG_FILE_NAME}"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: "config-rendered".to_string(),
            mount_path: "/config".to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        liveness_probe: Some(probe(10, 30, 5)),
        readiness_probe: Some(probe(5, 10, 3)),
        resources: instance.spec.resources.as_ref().map(|r| {
            k8s_openapi::api::core::v1::ResourceRequirements {
                requests: r.requests.clone(),
                limits: r.limits.clone(),
                ..Default::default()
            }
        }),
        ..Default::default()
    };

    Deployment {
        metadata: owned_meta(instance, name),
        spec: Some(DeploymentSpec {
            replicas: Some(instance.replicas()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(instance)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![init_container]),
                    containers: vec![main_container],
                    volumes: Some(vec![
                        Volume {
                            name: "config-template".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: Some(config_map_name(instance)),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        Volume {
                            name: "config-rendered".to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                    ]),
                    node_selector: instance.spec.node_selector.clone(),
                    tolerations: instance.spec.tolerations.clone(),
                    affinity: instance.spec.affinity.clone(),
                    service_account_name: if instance.spec.service_account_name.is_empty() {
                        None
                    } else {
                        Some(instance.spec.service_account_name.clone())
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the gateway ClusterIP Service, mapping `port` to itself
pub fn build_service(instance: &DBHubInstance) -> Service {
    let port = instance.port();
    Service {
        metadata: owned_meta(instance, instance.name_any()),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(instance)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The in-cluster endpoint published to status
pub fn endpoint(instance: &DBHubInstance) -> String {
    format!(
        "{}.{}.svc.cluster.local:{}",
        instance.name_any(),
        instance.namespace().unwrap_or_default(),
        instance.port()
    )
}
