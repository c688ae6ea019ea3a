//! Shared reconciler context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::Client;

use crate::metrics::Metrics;

/// Base delay for error-driven requeues
const BACKOFF_BASE: Duration = Duration::from_secs(5);
/// Upper bound for error-driven requeues
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Per-object exponential backoff for failing reconciles
#[derive(Default)]
pub struct Backoff {
    /// Consecutive failure counts per object key
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    /// Next requeue delay for a failing object: doubles per consecutive
    /// failure, capped at [`BACKOFF_CAP`].
    pub fn next(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap();
        let n = attempts.entry(key.to_string()).or_insert(0);
        let delay = BACKOFF_BASE
            .saturating_mul(2u32.saturating_pow(*n))
            .min(BACKOFF_CAP);
        *n = n.saturating_add(1);
        delay
    }

    /// Reset the failure streak after a successful reconcile
    pub fn clear(&self, key: &str) {
        self.attempts.lock().unwrap().remove(key);
    }
}

/// Context handed to every reconcile invocation
pub struct Context {
    pub client: Client,
    pub metrics: Arc<Metrics>,
    pub backoff: Backoff,
}

impl Context {
    pub fn new(client: Client, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            metrics,
            backoff: Backoff::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.next("a"), Duration::from_secs(5));
        assert_eq!(backoff.next("a"), Duration::from_secs(10));
        assert_eq!(backoff.next("a"), Duration::from_secs(20));
        for _ in 0..10 {
            backoff.next("a");
        }
        assert_eq!(backoff.next("a"), BACKOFF_CAP);
    }

    #[test]
    fn test_backoff_is_per_key_and_resettable() {
        let backoff = Backoff::default();
        backoff.next("a");
        backoff.next("a");
        assert_eq!(backoff.next("b"), Duration::from_secs(5));

        backoff.clear("a");
        assert_eq!(backoff.next("a"), Duration::from_secs(5));
    }
}
