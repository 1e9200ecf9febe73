//! ServiceMonitor mirroring
//!
//! Mark: every source ServiceMonitor in an eligible namespace is upserted as
//! a clone named `<namespace>-<name>` in the monitoring namespace.
//! Sweep: every clone-marked object there that was not marked is deleted.
//!
//! Sources come from the pass's [`SourceSnapshot`]. A namespace whose
//! sources could not be listed is protected: its clones survive the sweep so
//! a transient list failure never drops scrape targets.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use vantage_common::crd::{NamespaceSelector, ServiceMonitor};
use vantage_common::metrics::{record_clone_mutation, Mutation};

use crate::cluster::ClusterClient;
use crate::error::MonitoringError;
use crate::labels::{self, OwnershipLabeler, SOURCE_NAMESPACE_LABEL};
use crate::outcome::SyncReport;
use crate::sources::SourceSnapshot;

const KIND: &str = "ServiceMonitor";

enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Build the clone of `source` that lives in the monitoring namespace
///
/// The namespace selector is pinned to the source namespace so the clone
/// keeps scraping the services it was written for.
pub fn build_clone(
    source: &ServiceMonitor,
    source_namespace: &str,
    monitoring_namespace: &str,
    labeler: &OwnershipLabeler,
) -> ServiceMonitor {
    let source_name = source.metadata.name.as_deref().unwrap_or_default();
    let mut spec = source.spec.clone();
    spec.namespace_selector = Some(NamespaceSelector::only(source_namespace));

    let mut clone = ServiceMonitor::new(
        &labels::clone_name(source_namespace, source_name),
        spec,
    );
    clone.metadata.namespace = Some(monitoring_namespace.to_string());
    clone.metadata.labels = Some(
        labeler.clone_labels(source.metadata.labels.as_ref(), source_namespace),
    );
    clone
}

fn has_drifted(existing: &ServiceMonitor, desired: &ServiceMonitor) -> bool {
    existing.metadata.labels.clone().unwrap_or_default()
        != desired.metadata.labels.clone().unwrap_or_default()
        || existing.spec != desired.spec
}

async fn upsert_clone(
    cluster: &dyn ClusterClient,
    desired: ServiceMonitor,
) -> Result<Change, MonitoringError> {
    let namespace = desired.metadata.namespace.clone().unwrap_or_default();
    let name = desired.metadata.name.clone().unwrap_or_default();

    let existing = cluster
        .get_service_monitor(&namespace, &name)
        .await
        .map_err(|e| MonitoringError::resource("get", KIND, &namespace, &name, e))?;

    match existing {
        None => {
            cluster
                .create_service_monitor(&desired)
                .await
                .map_err(|e| MonitoringError::resource("create", KIND, &namespace, &name, e))?;
            record_clone_mutation(Mutation::Create);
            info!(namespace = %namespace, name = %name, "created ServiceMonitor clone");
            Ok(Change::Created)
        }
        Some(existing) if !labels::is_clone(existing.metadata.labels.as_ref()) => {
            Err(MonitoringError::Unmanaged {
                kind: KIND,
                namespace,
                name,
            })
        }
        Some(existing) if !has_drifted(&existing, &desired) => Ok(Change::Unchanged),
        Some(existing) => {
            let mut replacement = desired;
            replacement.metadata.resource_version = existing.metadata.resource_version.clone();
            cluster
                .replace_service_monitor(&replacement)
                .await
                .map_err(|e| MonitoringError::resource("replace", KIND, &namespace, &name, e))?;
            record_clone_mutation(Mutation::Update);
            info!(namespace = %namespace, name = %name, "updated drifted ServiceMonitor clone");
            Ok(Change::Updated)
        }
    }
}

/// Mirror the snapshot's sources into `monitoring_namespace` and sweep stale clones
///
/// Per-namespace failures do not stop the pass; they are collected into
/// `MonitoringError::PartialSync`. Listing failures are owned by the
/// snapshot and not repeated here.
pub async fn sync_service_monitors(
    cluster: &dyn ClusterClient,
    sources: &SourceSnapshot,
    monitoring_namespace: &str,
    labeler: &OwnershipLabeler,
) -> Result<SyncReport, MonitoringError> {
    let mut report = SyncReport::default();
    let mut failures = Vec::new();
    // clone name -> source "namespace/name"
    let mut live: BTreeMap<String, String> = BTreeMap::new();

    // Mark
    for (namespace, monitors) in sources.listed() {
        for source in monitors {
            let Some(source_name) = source.metadata.name.as_deref() else {
                continue;
            };
            let source_ref = format!("{namespace}/{source_name}");
            let clone_name = labels::clone_name(namespace, source_name);

            if let Some(existing) = live.get(&clone_name) {
                failures.push(MonitoringError::CloneCollision {
                    clone: clone_name,
                    source_ref,
                    existing: existing.clone(),
                });
                continue;
            }
            live.insert(clone_name, source_ref);

            let desired = build_clone(source, namespace, monitoring_namespace, labeler);
            match upsert_clone(cluster, desired).await {
                Ok(Change::Created) => report.created += 1,
                Ok(Change::Updated) => report.updated += 1,
                Ok(Change::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(namespace, source = %source_name, error = %e, "could not mirror ServiceMonitor");
                    failures.push(e);
                }
            }
        }
    }

    // Sweep
    match cluster
        .list_service_monitors(monitoring_namespace, &labels::clone_selector())
        .await
    {
        Ok(clones) => {
            for clone in clones {
                let Some(name) = clone.metadata.name.as_deref() else {
                    continue;
                };
                if live.contains_key(name) {
                    continue;
                }
                let source_namespace = clone
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(SOURCE_NAMESPACE_LABEL));
                if source_namespace.is_some_and(|ns| sources.is_unavailable(ns)) {
                    debug!(name, "keeping clone of protected namespace");
                    continue;
                }

                match cluster
                    .delete_service_monitor(monitoring_namespace, name)
                    .await
                {
                    Ok(true) => {
                        record_clone_mutation(Mutation::Delete);
                        info!(namespace = %monitoring_namespace, name, "deleted stale ServiceMonitor clone");
                        report.deleted += 1;
                    }
                    Ok(false) => {}
                    Err(e) => failures.push(MonitoringError::resource(
                        "delete",
                        KIND,
                        monitoring_namespace,
                        name,
                        e,
                    )),
                }
            }
        }
        Err(e) => {
            warn!(namespace = %monitoring_namespace, error = %e, "could not list clones, skipping sweep");
            failures.push(MonitoringError::resource(
                "list",
                KIND,
                monitoring_namespace,
                "*",
                e,
            ));
        }
    }

    debug!(%report, failures = failures.len(), "ServiceMonitor sync finished");
    if failures.is_empty() {
        Ok(report)
    } else {
        Err(MonitoringError::PartialSync(failures))
    }
}
