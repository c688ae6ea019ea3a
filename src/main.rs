use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use kube::Client;
use tracing::{error, info};

use dbhub_operator::admission::webhook_router;
use dbhub_operator::controller::{run_database_controller, run_instance_controller, Context};
use dbhub_operator::metrics::{self, Metrics};
use dbhub_operator::{leader, telemetry};

#[derive(Parser, Debug)]
#[command(
    name = "dbhub-operator",
    about = "Kubernetes operator for DBHub MCP gateway instances and their databases",
    version
)]
struct Args {
    /// Address the Prometheus metrics endpoint binds to
    #[arg(long, default_value = "0.0.0.0:8443")]
    metrics_bind_address: String,

    /// Address the health probe endpoint binds to
    #[arg(long, default_value = "0.0.0.0:8081")]
    health_probe_bind_address: String,

    /// Address the admission webhook server binds to
    #[arg(long, default_value = "0.0.0.0:9443")]
    webhook_bind_address: String,

    /// Enable leader election so only one replica reconciles
    #[arg(long, default_value_t = false)]
    leader_elect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init("info");

    info!("starting dbhub-operator");

    let client = Client::try_default().await?;

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(Metrics::default().register(&registry)?);

    if args.leader_elect {
        leader::acquire_and_hold(
            client.clone(),
            leader::operator_namespace(),
            leader::identity(),
        )
        .await?;
    }

    let ready = Arc::new(AtomicBool::new(false));

    let health_router = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/readyz",
            get({
                let ready = ready.clone();
                move || {
                    let ready = ready.clone();
                    async move {
                        if ready.load(Ordering::Relaxed) {
                            (StatusCode::OK, "ok")
                        } else {
                            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
                        }
                    }
                }
            }),
        );
    spawn_server("health probes", args.health_probe_bind_address.clone(), health_router);

    let metrics_router = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || {
                let registry = registry.clone();
                async move { metrics::render(&registry) }
            }
        }),
    );
    spawn_server("metrics", args.metrics_bind_address.clone(), metrics_router);

    spawn_server("admission webhooks", args.webhook_bind_address.clone(), webhook_router());

    let ctx = Arc::new(Context::new(client.clone(), metrics));
    ready.store(true, Ordering::Relaxed);

    // Both controllers run until signalled, then drain in-flight work.
    tokio::join!(
        run_database_controller(client.clone(), ctx.clone()),
        run_instance_controller(client, ctx),
    );

    info!("controllers stopped, shutting down");
    Ok(())
}

fn spawn_server(name: &'static str, addr: String, router: Router) {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(server = name, addr = %addr, error = %err, "failed to bind");
                return;
            }
        };
        info!(server = name, addr = %addr, "listening");
        if let Err(err) = axum::serve(listener, router).await {
            error!(server = name, error = %err, "server exited");
        }
    });
}
