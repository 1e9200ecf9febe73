//! Source ServiceMonitors of one pass
//!
//! Each eligible namespace is listed exactly once. The mirror and the
//! RoleBinding provisioner both work from this snapshot, so they always
//! agree on which namespaces have something to scrape and which ones are
//! protected because their listing failed.

use std::collections::BTreeMap;

use tracing::warn;
use vantage_common::crd::ServiceMonitor;

use crate::cluster::ClusterClient;
use crate::eligibility::EligibleNamespace;
use crate::error::MonitoringError;
use crate::labels;

/// Sources per eligible namespace, captured once per pass
#[derive(Debug, Default)]
pub struct SourceSnapshot {
    listed: BTreeMap<String, Vec<ServiceMonitor>>,
    unavailable: BTreeMap<String, MonitoringError>,
}

impl SourceSnapshot {
    /// List the sources of every eligible namespace
    ///
    /// Clones are dropped and sources are ordered by name. A failed listing
    /// marks the namespace unavailable; it is reported once through
    /// [`SourceSnapshot::into_failures`].
    pub async fn collect(cluster: &dyn ClusterClient, eligible: &[EligibleNamespace]) -> Self {
        let mut snapshot = Self::default();
        for ns in eligible {
            let namespace = ns.name.as_str();
            match cluster.list_service_monitors(namespace, "").await {
                Ok(found) => {
                    let mut sources: Vec<ServiceMonitor> = found
                        .into_iter()
                        .filter(|sm| !labels::is_clone(sm.metadata.labels.as_ref()))
                        .filter(|sm| sm.metadata.name.is_some())
                        .collect();
                    sources.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
                    snapshot.listed.insert(namespace.to_string(), sources);
                }
                Err(e) => {
                    warn!(namespace, error = %e, "could not list ServiceMonitors, protecting namespace");
                    snapshot.unavailable.insert(
                        namespace.to_string(),
                        MonitoringError::resource("list", "ServiceMonitor", namespace, "*", e),
                    );
                }
            }
        }
        snapshot
    }

    /// Namespaces that were listed, with their sources
    pub fn listed(&self) -> impl Iterator<Item = (&str, &[ServiceMonitor])> {
        self.listed
            .iter()
            .map(|(ns, sources)| (ns.as_str(), sources.as_slice()))
    }

    /// True when `namespace` was listed and holds at least one source
    pub fn has_sources(&self, namespace: &str) -> bool {
        self.listed
            .get(namespace)
            .is_some_and(|sources| !sources.is_empty())
    }

    /// True when listing `namespace` failed this pass
    pub fn is_unavailable(&self, namespace: &str) -> bool {
        self.unavailable.contains_key(namespace)
    }

    pub fn into_failures(self) -> Vec<MonitoringError> {
        self.unavailable.into_values().collect()
    }
}
