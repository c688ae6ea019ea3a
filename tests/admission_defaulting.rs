//! Admission behavior: defaulting scenarios, rejection scenarios, and the
//! defaulting/validation interplay.

use dbhub_operator::admission::{
    default_database, default_instance, validate_database, validate_instance,
};
use dbhub_operator::api::database::{
    CredentialsRef, Database, DatabaseSpec, DatabaseType, SslMode,
};
use dbhub_operator::api::instance::{DBHubInstance, DBHubInstanceSpec};

fn database_spec(r#type: DatabaseType) -> DatabaseSpec {
    DatabaseSpec {
        r#type,
        host: "db.example.com".into(),
        port: 0,
        database: "app".into(),
        credentials_ref: Some(CredentialsRef {
            name: "app-creds".into(),
            ..Default::default()
        }),
        connection_timeout: 0,
        query_timeout: 0,
        ssl_mode: SslMode::Disable,
        max_rows: 0,
        read_only: true,
        description: String::new(),
    }
}

fn database(spec: DatabaseSpec) -> Database {
    let mut db = Database::new("app-db", spec);
    db.metadata.namespace = Some("default".into());
    db
}

#[test]
fn default_port_follows_database_type() {
    let mut pg = database_spec(DatabaseType::Postgres);
    default_database(&mut pg);
    assert_eq!(pg.port, 5432);

    let mut mysql = database_spec(DatabaseType::MySQL);
    default_database(&mut mysql);
    assert_eq!(mysql.port, 3306);

    let mut mssql = database_spec(DatabaseType::SqlServer);
    default_database(&mut mssql);
    assert_eq!(mssql.port, 1433);
}

#[test]
fn unknown_database_type_fails_to_parse() {
    // The admission handler denies any object it cannot deserialize, so
    // an unknown enum value never reaches the validator.
    let result = serde_json::from_value::<DatabaseSpec>(serde_json::json!({
        "type": "mongo",
        "host": "db.example.com",
        "database": "app",
    }));
    assert!(result.is_err());
}

#[test]
fn defaulting_then_validating_is_clean() {
    // Monotonicity: defaulting a valid object never makes it invalid.
    for r#type in [
        DatabaseType::Postgres,
        DatabaseType::MySQL,
        DatabaseType::MariaDB,
        DatabaseType::SqlServer,
    ] {
        let mut spec = database_spec(r#type);
        default_database(&mut spec);
        let validation = validate_database(&database(spec), None);
        assert!(validation.errors.is_empty(), "type {type:?}");
    }

    let mut sqlite = database_spec(DatabaseType::Sqlite);
    sqlite.host = String::new();
    sqlite.credentials_ref = None;
    sqlite.database = "/data/app.db".into();
    default_database(&mut sqlite);
    let validation = validate_database(&database(sqlite), None);
    assert!(validation.errors.is_empty(), "{:?}", validation.errors);
}

#[test]
fn database_defaulting_is_idempotent_across_types() {
    for r#type in [
        DatabaseType::Postgres,
        DatabaseType::MySQL,
        DatabaseType::SqlServer,
        DatabaseType::Sqlite,
    ] {
        let mut once = database_spec(r#type);
        default_database(&mut once);
        let snapshot = serde_json::to_value(&once).unwrap();
        default_database(&mut once);
        assert_eq!(serde_json::to_value(&once).unwrap(), snapshot, "type {type:?}");
    }
}

#[test]
fn instance_resource_coherence_is_enforced() {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    let mut spec = DBHubInstanceSpec::default();
    default_instance(&mut spec);
    spec.resources = Some(dbhub_operator::api::instance::ResourceRequirements {
        requests: Some(BTreeMap::from([(
            "cpu".to_string(),
            Quantity("500m".to_string()),
        )])),
        limits: Some(BTreeMap::from([(
            "cpu".to_string(),
            Quantity("200m".to_string()),
        )])),
    });

    let mut instance = DBHubInstance::new("gateway", spec);
    instance.metadata.namespace = Some("default".into());

    let validation = validate_instance(&instance, None);
    let fields: Vec<_> = validation.errors.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["spec.resources.requests.cpu"]);
}

#[test]
fn defaulted_instance_passes_validation() {
    let mut spec = DBHubInstanceSpec::default();
    default_instance(&mut spec);
    let mut instance = DBHubInstance::new("gateway", spec);
    instance.metadata.namespace = Some("default".into());

    let validation = validate_instance(&instance, None);
    assert!(validation.errors.is_empty(), "{:?}", validation.errors);
}
