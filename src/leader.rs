//! Lease-based leader election.
//!
//! Implements the standard coordination/v1 lease protocol: acquire when
//! the lease is absent, held by us, or expired; renew on a fixed period
//! once held. Losing the lease mid-flight terminates the process so a
//! standby replica can take over cleanly.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::{error, info, warn};

use crate::error::Result;

const LEASE_NAME: &str = "dbhub-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RETRY_PERIOD: Duration = Duration::from_secs(5);
const RENEW_PERIOD: Duration = Duration::from_secs(5);

/// Namespace the operator runs in: the in-cluster service account
/// namespace when available, `default` otherwise.
pub fn operator_namespace() -> String {
    std::fs::read_to_string("/var/run/secrets/kubernetes.io/serviceaccount/namespace")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// Holder identity for this process
pub fn identity() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "dbhub-operator".to_string());
    format!("{}-{}", hostname, std::process::id())
}

/// Block until this process holds the leader lease, then keep renewing it
/// in a background task for the life of the process.
pub async fn acquire_and_hold(client: Client, namespace: String, identity: String) -> Result<()> {
    let leases: Api<Lease> = Api::namespaced(client, &namespace);

    info!(namespace = %namespace, identity = %identity, "attempting to acquire leader lease");
    loop {
        match try_acquire(&leases, &identity).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(err) => warn!(error = %err, "leader election attempt failed"),
        }
        tokio::time::sleep(RETRY_PERIOD).await;
    }
    info!(identity = %identity, "acquired leader lease");

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RENEW_PERIOD).await;
            match try_acquire(&leases, &identity).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(identity = %identity, "leader lease lost, exiting");
                    std::process::exit(1);
                }
                Err(err) => warn!(error = %err, "leader lease renewal failed"),
            }
        }
    });

    Ok(())
}

/// One acquire/renew attempt. Returns whether we hold the lease after it.
async fn try_acquire(leases: &Api<Lease>, identity: &str) -> Result<bool> {
    let now = MicroTime(Utc::now());

    let Some(existing) = leases.get_opt(LEASE_NAME).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        return match leases.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            // Someone else created it between our get and create.
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        };
    };

    let spec = existing.spec.clone().unwrap_or_default();
    let held_by_us = spec.holder_identity.as_deref() == Some(identity);
    let expired = spec
        .renew_time
        .as_ref()
        .map(|renewed| {
            let duration = chrono::Duration::seconds(
                spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECS) as i64,
            );
            Utc::now() > renewed.0 + duration
        })
        .unwrap_or(true);

    if !held_by_us && !expired {
        return Ok(false);
    }

    let mut lease = existing;
    let lease_spec = lease.spec.get_or_insert_with(Default::default);
    if !held_by_us {
        lease_spec.holder_identity = Some(identity.to_string());
        lease_spec.acquire_time = Some(now.clone());
        lease_spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
    }
    lease_spec.renew_time = Some(now);

    // Replace carries the resourceVersion, so concurrent takeovers lose
    // with a conflict instead of clobbering each other.
    match leases.replace(LEASE_NAME, &PostParams::default(), &lease).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
        Err(err) => Err(err.into()),
    }
}
