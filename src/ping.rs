//! Driver-specific connectivity probes.
//!
//! A probe opens a short-lived connection (pool size 1, lifetime bounded by
//! the test deadline), issues a liveness round-trip, and closes. The whole
//! operation runs under a hard 10 s deadline; connections are never pooled
//! across reconciles.

use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, SslOpts};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Connection;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::TokioAsyncWriteCompatExt;

use crate::api::database::{DatabaseSpec, DatabaseType, SslMode};
use crate::dsn::build_dsn;
use crate::error::{OperatorError, Result};

/// Hard deadline for the whole open-ping-close sequence
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Open a connection to the database described by `spec`, ping it, and
/// close. Any failure (including the deadline) is reported as
/// [`OperatorError::ConnectionTest`].
pub async fn test_connection(spec: &DatabaseSpec, username: &str, password: &str) -> Result<()> {
    let probe = async {
        match spec.r#type {
            DatabaseType::Postgres => ping_postgres(spec, username, password).await,
            DatabaseType::MySQL | DatabaseType::MariaDB => {
                ping_mysql(spec, username, password).await
            }
            DatabaseType::SqlServer => ping_sqlserver(spec, username, password).await,
            DatabaseType::Sqlite => ping_sqlite(spec).await,
        }
    };

    match timeout(CONNECTION_TEST_TIMEOUT, probe).await {
        Ok(result) => result,
        Err(_) => Err(OperatorError::ConnectionTest(format!(
            "timed out after {}s",
            CONNECTION_TEST_TIMEOUT.as_secs()
        ))),
    }
}

async fn ping_postgres(spec: &DatabaseSpec, username: &str, password: &str) -> Result<()> {
    let dsn = build_dsn(spec, username, password);
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .max_lifetime(CONNECTION_TEST_TIMEOUT)
        .acquire_timeout(CONNECTION_TEST_TIMEOUT)
        .connect(&dsn.full)
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;

    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    conn.ping()
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    drop(conn);
    pool.close().await;
    Ok(())
}

async fn ping_mysql(spec: &DatabaseSpec, username: &str, password: &str) -> Result<()> {
    let mut opts = OptsBuilder::default()
        .ip_or_hostname(spec.host.clone())
        .tcp_port(spec.port as u16)
        .user(Some(username.to_string()))
        .pass(Some(password.to_string()))
        .db_name(Some(spec.database.clone()));
    if spec.ssl_mode.requires_tls() {
        opts = opts.ssl_opts(Some(SslOpts::default()));
    }

    let mut conn = Conn::new(opts)
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    conn.ping()
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    conn.disconnect()
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    Ok(())
}

async fn ping_sqlserver(spec: &DatabaseSpec, username: &str, password: &str) -> Result<()> {
    let mut config = Config::new();
    config.host(&spec.host);
    config.port(spec.port as u16);
    config.database(&spec.database);
    config.authentication(AuthMethod::sql_server(username, password));
    match spec.ssl_mode {
        SslMode::Disable => config.encryption(EncryptionLevel::NotSupported),
        // require: encrypt without chain validation; verify modes keep full validation
        SslMode::Require => config.trust_cert(),
        SslMode::VerifyCa | SslMode::VerifyFull => {}
    }

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;

    let mut client = Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?
        .into_results()
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    Ok(())
}

async fn ping_sqlite(spec: &DatabaseSpec) -> Result<()> {
    let opts = SqliteConnectOptions::new()
        .filename(&spec.database)
        .create_if_missing(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .max_lifetime(CONNECTION_TEST_TIMEOUT)
        .connect_with(opts)
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| OperatorError::ConnectionTest(e.to_string()))?;
    pool.close().await;
    Ok(())
}
