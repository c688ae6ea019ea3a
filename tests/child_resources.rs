//! Shape of the four owned child objects: canonical names and labels,
//! ownership, config-hash threading, and the init/run container pipeline.

use std::collections::BTreeMap;

use dbhub_operator::api::database::{Database, DatabasePhase, DatabaseStatus};
use dbhub_operator::api::instance::{
    DBHubInstance, DBHubInstanceSpec, DatabaseSelector, DefaultPolicy,
};
use dbhub_operator::controller::render::{config_hash, render_config, SourceEntry};
use dbhub_operator::controller::resources::{
    build_config_map, build_credentials_secret, build_deployment, build_service, config_map_name,
    endpoint, labels, secret_name, CONFIG_FILE_NAME, CONFIG_HASH_LABEL,
};

fn instance() -> DBHubInstance {
    let mut inst = DBHubInstance::new(
        "analytics",
        DBHubInstanceSpec {
            replicas: Some(2),
            port: 8080,
            default_policy: Some(DefaultPolicy::default()),
            database_selector: Some(DatabaseSelector {
                match_labels: BTreeMap::from([("env".to_string(), "prod".to_string())]),
                match_names: vec![],
            }),
            ..Default::default()
        },
    );
    inst.metadata.namespace = Some("data".into());
    inst.metadata.uid = Some("0000-1111".into());
    inst
}

fn source(name: &str) -> SourceEntry {
    SourceEntry {
        name: name.into(),
        dsn: format!("postgres://u:p@{name}:5432/app?sslmode=disable"),
        connection_timeout: 30,
        query_timeout: 60,
    }
}

#[test]
fn child_names_are_canonical() {
    let inst = instance();
    assert_eq!(config_map_name(&inst), "analytics-config");
    assert_eq!(secret_name(&inst), "analytics-creds");
}

#[test]
fn all_children_carry_canonical_labels_and_owner() {
    let inst = instance();
    let rendered = render_config(inst.spec.default_policy.as_ref(), &[source("orders")]);

    let expected_labels = labels(&inst);
    assert_eq!(expected_labels["app.kubernetes.io/name"], "dbhub");
    assert_eq!(expected_labels["app.kubernetes.io/instance"], "analytics");
    assert_eq!(expected_labels["app.kubernetes.io/component"], "database-mcp");
    assert_eq!(expected_labels["app.kubernetes.io/managed-by"], "dbhub-operator");

    let config_map = build_config_map(&inst, &rendered.toml);
    let secret = build_credentials_secret(&inst, &rendered.credentials);
    let deployment = build_deployment(&inst, &rendered.hash);
    let service = build_service(&inst);

    for (metadata, kind) in [
        (&config_map.metadata, "ConfigMap"),
        (&secret.metadata, "Secret"),
        (&deployment.metadata, "Deployment"),
        (&service.metadata, "Service"),
    ] {
        assert_eq!(metadata.labels.as_ref().unwrap(), &expected_labels, "{kind}");
        assert_eq!(metadata.namespace.as_deref(), Some("data"), "{kind}");

        let owners = metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1, "{kind}");
        assert_eq!(owners[0].kind, "DBHubInstance", "{kind}");
        assert_eq!(owners[0].name, "analytics", "{kind}");
        assert_eq!(owners[0].controller, Some(true), "{kind}");
    }
}

#[test]
fn config_map_holds_template_and_hash_matches() {
    let inst = instance();
    let rendered = render_config(inst.spec.default_policy.as_ref(), &[source("orders")]);
    let config_map = build_config_map(&inst, &rendered.toml);

    let data = config_map.data.as_ref().unwrap();
    let toml = data.get(CONFIG_FILE_NAME).unwrap();
    // Template only: placeholders, never credentials.
    assert!(toml.contains("dsn = \"${ORDERS_DSN}\""));
    assert!(!toml.contains("u:p@"));

    // The status hash is always the fingerprint of the ConfigMap content.
    assert_eq!(config_hash(toml), rendered.hash);
}

#[test]
fn secret_holds_real_dsns_under_env_keys() {
    let inst = instance();
    let rendered = render_config(inst.spec.default_policy.as_ref(), &[source("orders-db")]);
    let secret = build_credentials_secret(&inst, &rendered.credentials);

    let data = secret.string_data.as_ref().unwrap();
    assert_eq!(
        data.get("ORDERS_DB_DSN").unwrap(),
        "postgres://u:p@orders-db:5432/app?sslmode=disable"
    );
}

#[test]
fn deployment_threads_config_hash_into_pod_template() {
    let inst = instance();
    let deployment = build_deployment(&inst, "aaaa1111bbbb2222");

    let spec = deployment.spec.as_ref().unwrap();
    assert_eq!(spec.replicas, Some(2));

    let pod_labels = spec
        .template
        .metadata
        .as_ref()
        .unwrap()
        .labels
        .as_ref()
        .unwrap();
    assert_eq!(pod_labels[CONFIG_HASH_LABEL], "aaaa1111bbbb2222");

    // A different hash is a template change, which forces a rollout.
    let changed = build_deployment(&inst, "cccc3333dddd4444");
    assert_ne!(
        serde_json::to_value(&deployment.spec.as_ref().unwrap().template).unwrap(),
        serde_json::to_value(&changed.spec.as_ref().unwrap().template).unwrap()
    );
}

#[test]
fn pod_pipeline_renders_config_via_init_container() {
    let inst = instance();
    let deployment = build_deployment(&inst, "hash");
    let pod = deployment
        .spec
        .as_ref()
        .unwrap()
        .template
        .spec
        .as_ref()
        .unwrap();

    let init = &pod.init_containers.as_ref().unwrap()[0];
    assert_eq!(init.name, "config-renderer");
    let command = init.command.as_ref().unwrap().join(" ");
    assert!(command.contains("envsubst"));
    assert!(command.contains("-no-unset"));
    let env_from = &init.env_from.as_ref().unwrap()[0];
    assert_eq!(
        env_from.secret_ref.as_ref().unwrap().name.as_deref(),
        Some("analytics-creds")
    );

    let main = &pod.containers[0];
    assert_eq!(main.name, "dbhub");
    let args = main.args.as_ref().unwrap();
    assert_eq!(
        args,
        &vec![
            "--transport".to_string(),
            "http".to_string(),
            "--port".to_string(),
            "8080".to_string(),
            "--config".to_string(),
            "/config/dbhub.toml".to_string(),
        ]
    );
    let mount = &main.volume_mounts.as_ref().unwrap()[0];
    assert_eq!(mount.mount_path, "/config");
    assert_eq!(mount.read_only, Some(true));

    let liveness = main.liveness_probe.as_ref().unwrap();
    assert_eq!(liveness.initial_delay_seconds, Some(10));
    assert_eq!(liveness.period_seconds, Some(30));
    assert_eq!(liveness.timeout_seconds, Some(5));
    assert_eq!(liveness.failure_threshold, Some(3));

    let readiness = main.readiness_probe.as_ref().unwrap();
    assert_eq!(readiness.initial_delay_seconds, Some(5));
    assert_eq!(readiness.period_seconds, Some(10));
    assert_eq!(readiness.timeout_seconds, Some(3));

    let volumes = pod.volumes.as_ref().unwrap();
    assert!(volumes.iter().any(|v| v
        .config_map
        .as_ref()
        .is_some_and(|c| c.name.as_deref() == Some("analytics-config"))));
    assert!(volumes.iter().any(|v| v.empty_dir.is_some()));
}

#[test]
fn service_is_cluster_ip_with_identity_port_mapping() {
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    let inst = instance();
    let service = build_service(&inst);
    let spec = service.spec.as_ref().unwrap();

    assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
    let port = &spec.ports.as_ref().unwrap()[0];
    assert_eq!(port.port, 8080);
    assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    assert_eq!(port.protocol.as_deref(), Some("TCP"));

    assert_eq!(endpoint(&inst), "analytics.data.svc.cluster.local:8080");
}

#[test]
fn selection_keeps_only_connected_matching_databases() {
    use dbhub_operator::api::database::{CredentialsRef, DatabaseSpec, DatabaseType, SslMode};
    use kube::ResourceExt;

    let inst = instance();

    let make = |name: &str, env: &str, phase: DatabasePhase| -> Database {
        let mut db = Database::new(
            name,
            DatabaseSpec {
                r#type: DatabaseType::Postgres,
                host: "pg".into(),
                port: 5432,
                database: "app".into(),
                credentials_ref: Some(CredentialsRef {
                    name: "creds".into(),
                    ..Default::default()
                }),
                connection_timeout: 30,
                query_timeout: 60,
                ssl_mode: SslMode::Disable,
                max_rows: 1000,
                read_only: true,
                description: String::new(),
            },
        );
        db.metadata.namespace = Some("data".into());
        db.metadata.labels = Some(BTreeMap::from([("env".to_string(), env.to_string())]));
        db.status = Some(DatabaseStatus {
            phase: Some(phase),
            ..Default::default()
        });
        db
    };

    let candidates = vec![
        make("connected-prod", "prod", DatabasePhase::Connected),
        make("failed-prod", "prod", DatabasePhase::Failed),
        make("connected-dev", "dev", DatabasePhase::Connected),
    ];

    let mut selected: Vec<String> = candidates
        .iter()
        .filter(|db| inst.matches_database(db) && db.is_connected())
        .map(|db| db.name_any())
        .collect();
    selected.sort();

    assert_eq!(selected, vec!["connected-prod"]);
}
