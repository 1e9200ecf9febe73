//! Namespace eligibility
//!
//! A namespace is monitored when it is claimed by the Installation and opted
//! in with `monitoring-key=middleware`. The set is recomputed every pass.

use k8s_openapi::api::core::v1::Namespace;
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::error::MonitoringError;
use crate::labels::OwnershipLabeler;

/// A namespace selected for monitoring in this pass
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EligibleNamespace {
    pub name: String,
}

impl EligibleNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

fn is_terminating(ns: &Namespace) -> bool {
    ns.metadata.deletion_timestamp.is_some()
        || ns
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == "Terminating")
}

/// Namespaces eligible for monitoring, sorted by name
///
/// Terminating namespaces are skipped: nothing can be created in them.
pub async fn list_eligible_namespaces(
    cluster: &dyn ClusterClient,
    labeler: &OwnershipLabeler,
) -> Result<Vec<EligibleNamespace>, MonitoringError> {
    let selector = labeler.eligibility_selector();
    let namespaces = cluster
        .list_namespaces(&selector)
        .await
        .map_err(MonitoringError::Eligibility)?;

    let mut eligible: Vec<EligibleNamespace> = namespaces
        .iter()
        .filter(|ns| {
            let terminating = is_terminating(ns);
            if terminating {
                debug!(namespace = ?ns.metadata.name, "skipping terminating namespace");
            }
            !terminating
        })
        .filter_map(|ns| ns.metadata.name.clone())
        .map(EligibleNamespace::new)
        .collect();
    eligible.sort();
    eligible.dedup();

    debug!(selector = %selector, count = eligible.len(), "resolved eligible namespaces");
    Ok(eligible)
}
