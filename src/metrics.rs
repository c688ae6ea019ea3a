//! Prometheus metrics for the reconcilers.

use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounterVec, Registry, TextEncoder,
};

/// Per-controller reconcile counters and timings
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconciliations = IntCounterVec::new(
            opts!(
                "dbhub_operator_reconciliations_total",
                "Total reconciliations per controller"
            ),
            &["controller"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "dbhub_operator_reconciliation_errors_total",
                "Reconciliation errors per controller and reason"
            ),
            &["controller", "reason"],
        )
        .unwrap();
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "dbhub_operator_reconcile_duration_seconds",
                "Reconcile latency per controller",
                vec![0.01, 0.05, 0.25, 1.0, 5.0, 15.0, 60.0]
            ),
            &["controller"],
        )
        .unwrap();

        Self {
            reconciliations,
            failures,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Register all collectors in the given registry
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        Ok(self)
    }

    pub fn observe_reconcile(&self, controller: &str, seconds: f64) {
        self.reconciliations.with_label_values(&[controller]).inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .observe(seconds);
    }

    pub fn observe_failure(&self, controller: &str, reason: &str) {
        self.failures.with_label_values(&[controller, reason]).inc();
    }
}

/// Encode the registry in Prometheus text exposition format
pub fn render(registry: &Registry) -> String {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let registry = Registry::new();
        let metrics = Metrics::default().register(&registry).unwrap();

        metrics.observe_reconcile("database", 0.02);
        metrics.observe_failure("dbhubinstance", "SecretNotFound");

        let text = render(&registry);
        assert!(text.contains("dbhub_operator_reconciliations_total"));
        assert!(text.contains("dbhub_operator_reconciliation_errors_total"));
        assert!(text.contains("SecretNotFound"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let _ = Metrics::default().register(&registry).unwrap();
        assert!(Metrics::default().register(&registry).is_err());
    }
}
