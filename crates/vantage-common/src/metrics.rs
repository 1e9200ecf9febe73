//! Metrics for Vantage reconcilers
//!
//! OpenTelemetry instruments on the global meter. When no meter provider is
//! installed (tests, no OTLP endpoint) recording is a no-op.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for Vantage metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("vantage"));

/// Histogram of reconciliation pass duration
///
/// Labels:
/// - `installation`: namespace/name of the Installation
/// - `phase`: in_progress, completed, failed
pub static PASS_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("vantage_monitoring_pass_duration_seconds")
        .with_description("Duration of monitoring reconciliation passes in seconds")
        .with_unit("s")
        .build()
});

/// Counter of pass errors
///
/// Labels:
/// - `installation`: namespace/name of the Installation
/// - `error_type`: config, install, sync, eligibility, timeout
pub static PASS_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("vantage_monitoring_pass_errors_total")
        .with_description("Total number of monitoring reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of ServiceMonitor clone mutations
///
/// Labels:
/// - `operation`: create, update, delete
pub static CLONE_MUTATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("vantage_servicemonitor_clone_mutations_total")
        .with_description("ServiceMonitor clones created, updated or deleted")
        .with_unit("{objects}")
        .build()
});

/// Counter of RoleBinding mutations
///
/// Labels:
/// - `operation`: create, update, delete
pub static ROLE_BINDING_MUTATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("vantage_rolebinding_mutations_total")
        .with_description("Scraper RoleBindings created, updated or deleted")
        .with_unit("{objects}")
        .build()
});

/// Gauge of namespaces eligible for monitoring in the last pass
pub static ELIGIBLE_NAMESPACES: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("vantage_monitoring_eligible_namespaces")
        .with_description("Namespaces selected for monitoring in the last pass")
        .with_unit("{namespaces}")
        .build()
});

/// Kind of mutation applied to a managed object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Object created
    Create,
    /// Object replaced after drift
    Update,
    /// Object removed
    Delete,
}

impl Mutation {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Record a ServiceMonitor clone mutation
pub fn record_clone_mutation(mutation: Mutation) {
    CLONE_MUTATIONS.add(1, &[KeyValue::new("operation", mutation.as_str())]);
}

/// Record a RoleBinding mutation
pub fn record_role_binding_mutation(mutation: Mutation) {
    ROLE_BINDING_MUTATIONS.add(1, &[KeyValue::new("operation", mutation.as_str())]);
}

/// Record how many namespaces were eligible this pass
pub fn set_eligible_namespaces(installation: &str, count: i64) {
    ELIGIBLE_NAMESPACES.record(
        count,
        &[KeyValue::new("installation", installation.to_string())],
    );
}

/// Times one reconciliation pass
pub struct PassTimer {
    installation: String,
    start: std::time::Instant,
}

impl PassTimer {
    /// Start timing a pass
    pub fn start(installation: impl Into<String>) -> Self {
        Self {
            installation: installation.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Record the pass with its resulting phase label
    pub fn finish(self, phase: &'static str) {
        PASS_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("installation", self.installation),
                KeyValue::new("phase", phase),
            ],
        );
    }

    /// Record the pass plus an error of the given type
    pub fn finish_with_error(self, phase: &'static str, error_type: &'static str) {
        PASS_ERRORS.add(
            1,
            &[
                KeyValue::new("installation", self.installation.clone()),
                KeyValue::new("error_type", error_type),
            ],
        );
        self.finish(phase);
    }
}
