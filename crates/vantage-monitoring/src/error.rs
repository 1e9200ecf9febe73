//! Monitoring reconciler error types

use std::time::Duration;

use vantage_common::crd::ReconcilePhase;

/// Errors produced by a monitoring reconciliation pass
#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("could not read monitoring config: {0}")]
    ConfigRead(String),

    #[error("could not write monitoring config: {0}")]
    ConfigWrite(String),

    #[error("monitoring operator install ({stage}): {source}")]
    Install {
        stage: &'static str,
        source: vantage_common::Error,
    },

    #[error("could not list eligible namespaces: {0}")]
    Eligibility(#[source] vantage_common::Error),

    #[error("{operation} {kind} {namespace}/{name}: {source}")]
    Resource {
        operation: &'static str,
        kind: &'static str,
        namespace: String,
        name: String,
        source: vantage_common::Error,
    },

    #[error("refusing to modify {kind} {namespace}/{name}: not managed by this controller")]
    Unmanaged {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("clone name {clone} for {source_ref} is already taken by {existing} in this pass")]
    CloneCollision {
        clone: String,
        source_ref: String,
        existing: String,
    },

    #[error("{} sync failure(s): {}", .0.len(), summarize(.0))]
    PartialSync(Vec<MonitoringError>),

    #[error("installation has no namespace")]
    MissingNamespace,

    #[error("installation has no uid")]
    MissingUid,

    #[error("reconcile pass timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Common(#[from] vantage_common::Error),
}

fn summarize(failures: &[MonitoringError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MonitoringError {
    /// Wrap a cluster call failure with the object it was about
    pub fn resource(
        operation: &'static str,
        kind: &'static str,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: vantage_common::Error,
    ) -> Self {
        Self::Resource {
            operation,
            kind,
            namespace: namespace.into(),
            name: name.into(),
            source,
        }
    }

    /// Phase a pass ends in when this is its deciding error
    pub fn phase(&self) -> ReconcilePhase {
        match self {
            Self::Install { .. } | Self::Timeout(_) => ReconcilePhase::InProgress,
            Self::ConfigWrite(_) => ReconcilePhase::InProgress,
            Self::ConfigRead(_)
            | Self::Eligibility(_)
            | Self::Resource { .. }
            | Self::Unmanaged { .. }
            | Self::CloneCollision { .. }
            | Self::PartialSync(_)
            | Self::MissingNamespace
            | Self::MissingUid
            | Self::Common(_) => ReconcilePhase::Failed,
        }
    }

    /// Short label for metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::ConfigRead(_) | Self::ConfigWrite(_) => "config",
            Self::Install { .. } => "install",
            Self::Eligibility(_) => "eligibility",
            Self::Resource { .. }
            | Self::Unmanaged { .. }
            | Self::CloneCollision { .. }
            | Self::PartialSync(_) => "sync",
            Self::MissingNamespace | Self::MissingUid => "validation",
            Self::Timeout(_) => "timeout",
            Self::Common(_) => "kube",
        }
    }

    /// Whether retrying without a change to the Installation can help
    ///
    /// An Installation missing its namespace or uid never gets one by
    /// itself; cluster errors defer to [`vantage_common::Error::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MissingNamespace | Self::MissingUid => false,
            Self::Common(e) => e.is_retryable(),
            Self::Install { source, .. }
            | Self::Eligibility(source)
            | Self::Resource { source, .. } => source.is_retryable(),
            Self::PartialSync(failures) => failures.iter().any(MonitoringError::is_retryable),
            Self::ConfigRead(_)
            | Self::ConfigWrite(_)
            | Self::Unmanaged { .. }
            | Self::CloneCollision { .. }
            | Self::Timeout(_) => true,
        }
    }

    /// Individual failures when this is an aggregate, otherwise `self` alone
    pub fn failures(&self) -> Vec<&MonitoringError> {
        match self {
            Self::PartialSync(failures) => failures.iter().collect(),
            other => vec![other],
        }
    }

    /// Flatten nested aggregates into one list
    pub fn into_failures(self) -> Vec<MonitoringError> {
        match self {
            Self::PartialSync(failures) => failures
                .into_iter()
                .flat_map(MonitoringError::into_failures)
                .collect(),
            other => vec![other],
        }
    }
}
