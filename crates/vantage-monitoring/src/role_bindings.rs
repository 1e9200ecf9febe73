//! Scraper RoleBindings
//!
//! The cluster monitoring service account gets `view` in every eligible
//! namespace that has something to scrape. Bindings in namespaces that no
//! longer qualify are removed, but only when they are recognisably ours.

use std::collections::BTreeSet;

use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::api::ObjectMeta;
use tracing::{debug, info, warn};
use vantage_common::metrics::{record_role_binding_mutation, Mutation};

use crate::cluster::ClusterClient;
use crate::error::MonitoringError;
use crate::labels::OwnershipLabeler;
use crate::outcome::SyncReport;
use crate::sources::SourceSnapshot;

/// Name of the binding in every monitored namespace
pub const ROLE_BINDING_NAME: &str = "prometheus-k8s-monitoring";
/// Service account the cluster monitoring stack scrapes with
pub const SCRAPER_SERVICE_ACCOUNT: &str = "prometheus-k8s";
pub const SCRAPER_NAMESPACE: &str = "openshift-monitoring";
pub const ROLE_REF_KIND: &str = "ClusterRole";
pub const ROLE_REF_NAME: &str = "view";
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

const KIND: &str = "RoleBinding";

fn scraper_subject() -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: SCRAPER_SERVICE_ACCOUNT.to_string(),
        namespace: Some(SCRAPER_NAMESPACE.to_string()),
        api_group: None,
    }
}

fn scraper_role_ref() -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: ROLE_REF_KIND.to_string(),
        name: ROLE_REF_NAME.to_string(),
    }
}

/// The binding the engine wants in `namespace`
pub fn build_role_binding(namespace: &str, labeler: &OwnershipLabeler) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(ROLE_BINDING_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labeler.ownership_labels()),
            ..Default::default()
        },
        role_ref: scraper_role_ref(),
        subjects: Some(vec![scraper_subject()]),
    }
}

/// Subjects equal ours, ignoring the empty API group the server may add
fn subjects_match(rb: &RoleBinding) -> bool {
    let expected = scraper_subject();
    match rb.subjects.as_deref() {
        Some([s]) => {
            s.kind == expected.kind
                && s.name == expected.name
                && s.namespace == expected.namespace
                && s.api_group.as_deref().unwrap_or_default().is_empty()
        }
        _ => false,
    }
}

fn labels_match(rb: &RoleBinding, labeler: &OwnershipLabeler) -> bool {
    labeler.is_owned(rb.metadata.labels.as_ref())
}

/// Ours when it carries our ownership labels or exactly our subject and role
fn is_managed(rb: &RoleBinding, labeler: &OwnershipLabeler) -> bool {
    labels_match(rb, labeler) || (subjects_match(rb) && rb.role_ref == scraper_role_ref())
}

enum Change {
    Created,
    Updated,
    Unchanged,
}

async fn ensure_role_binding(
    cluster: &dyn ClusterClient,
    namespace: &str,
    labeler: &OwnershipLabeler,
) -> Result<Change, MonitoringError> {
    let err = |operation: &'static str| {
        move |e: vantage_common::Error| {
            MonitoringError::resource(operation, KIND, namespace, ROLE_BINDING_NAME, e)
        }
    };
    let desired = build_role_binding(namespace, labeler);

    let Some(existing) = cluster
        .get_role_binding(namespace, ROLE_BINDING_NAME)
        .await
        .map_err(err("get"))?
    else {
        cluster
            .create_role_binding(&desired)
            .await
            .map_err(err("create"))?;
        record_role_binding_mutation(Mutation::Create);
        info!(namespace, "created scraper RoleBinding");
        return Ok(Change::Created);
    };

    if !is_managed(&existing, labeler) {
        return Err(MonitoringError::Unmanaged {
            kind: KIND,
            namespace: namespace.to_string(),
            name: ROLE_BINDING_NAME.to_string(),
        });
    }

    if existing.role_ref != desired.role_ref {
        // roleRef is immutable server side
        cluster
            .delete_role_binding(namespace, ROLE_BINDING_NAME)
            .await
            .map_err(err("delete"))?;
        cluster
            .create_role_binding(&desired)
            .await
            .map_err(err("create"))?;
        record_role_binding_mutation(Mutation::Update);
        info!(namespace, "recreated RoleBinding with drifted roleRef");
        return Ok(Change::Updated);
    }

    if subjects_match(&existing) && labels_match(&existing, labeler) {
        return Ok(Change::Unchanged);
    }

    let mut replacement = desired;
    let mut merged = existing.metadata.labels.clone().unwrap_or_default();
    merged.extend(labeler.ownership_labels());
    replacement.metadata.labels = Some(merged);
    replacement.metadata.resource_version = existing.metadata.resource_version.clone();
    cluster
        .replace_role_binding(&replacement)
        .await
        .map_err(err("replace"))?;
    record_role_binding_mutation(Mutation::Update);
    info!(namespace, "updated drifted scraper RoleBinding");
    Ok(Change::Updated)
}

/// Namespaces that may hold a binding to clean up
async fn removal_candidates(
    cluster: &dyn ClusterClient,
    labeler: &OwnershipLabeler,
) -> Result<BTreeSet<String>, MonitoringError> {
    let bindings = cluster
        .list_role_bindings(&labeler.ownership_selector())
        .await
        .map_err(|e| MonitoringError::resource("list", KIND, "", "*", e))?;
    let namespaces = cluster
        .list_namespaces(&labeler.owner_namespace_selector())
        .await
        .map_err(|e| MonitoringError::resource("list", "Namespace", "", "*", e))?;

    Ok(bindings
        .iter()
        .filter_map(|rb| rb.metadata.namespace.clone())
        .chain(namespaces.iter().filter_map(|ns| ns.metadata.name.clone()))
        .collect())
}

/// Ensure bindings where there is something to scrape and remove stale ones
///
/// Which namespaces have sources comes from the pass's snapshot; a
/// namespace whose listing failed keeps whatever binding it has.
pub async fn sync_role_bindings(
    cluster: &dyn ClusterClient,
    sources: &SourceSnapshot,
    labeler: &OwnershipLabeler,
) -> Result<SyncReport, MonitoringError> {
    let mut report = SyncReport::default();
    let mut failures = Vec::new();
    let mut desired: BTreeSet<String> = BTreeSet::new();

    for (namespace, _) in sources.listed() {
        if sources.has_sources(namespace) {
            desired.insert(namespace.to_string());
        } else {
            debug!(namespace, "nothing to scrape, no binding needed");
        }
    }

    for namespace in &desired {
        match ensure_role_binding(cluster, namespace, labeler).await {
            Ok(Change::Created) => report.created += 1,
            Ok(Change::Updated) => report.updated += 1,
            Ok(Change::Unchanged) => report.unchanged += 1,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "could not ensure RoleBinding");
                failures.push(e);
            }
        }
    }

    match removal_candidates(cluster, labeler).await {
        Ok(candidates) => {
            for namespace in candidates
                .iter()
                .filter(|ns| !desired.contains(*ns) && !sources.is_unavailable(ns))
            {
                match remove_role_binding(cluster, namespace, labeler).await {
                    Ok(true) => report.deleted += 1,
                    Ok(false) => {}
                    Err(e) => failures.push(e),
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "could not list removal candidates, skipping cleanup");
            failures.push(e);
        }
    }

    debug!(%report, failures = failures.len(), "RoleBinding sync finished");
    if failures.is_empty() {
        Ok(report)
    } else {
        Err(MonitoringError::PartialSync(failures))
    }
}

async fn remove_role_binding(
    cluster: &dyn ClusterClient,
    namespace: &str,
    labeler: &OwnershipLabeler,
) -> Result<bool, MonitoringError> {
    let existing = cluster
        .get_role_binding(namespace, ROLE_BINDING_NAME)
        .await
        .map_err(|e| MonitoringError::resource("get", KIND, namespace, ROLE_BINDING_NAME, e))?;
    let Some(existing) = existing else {
        return Ok(false);
    };
    if !is_managed(&existing, labeler) {
        debug!(namespace, "leaving RoleBinding we do not manage");
        return Ok(false);
    }

    let deleted = cluster
        .delete_role_binding(namespace, ROLE_BINDING_NAME)
        .await
        .map_err(|e| MonitoringError::resource("delete", KIND, namespace, ROLE_BINDING_NAME, e))?;
    if deleted {
        record_role_binding_mutation(Mutation::Delete);
        info!(namespace, "deleted stale scraper RoleBinding");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::EligibleNamespace;
    use crate::testing::{namespace, service_monitor, FakeCluster};
    use std::collections::BTreeMap;

    fn labeler() -> OwnershipLabeler {
        OwnershipLabeler::new("xyz")
    }

    fn eligible(names: &[&str]) -> Vec<EligibleNamespace> {
        names.iter().map(|n| EligibleNamespace::new(*n)).collect()
    }

    async fn provision(
        cluster: &FakeCluster,
        names: &[&str],
    ) -> Result<SyncReport, MonitoringError> {
        let sources = SourceSnapshot::collect(cluster, &eligible(names)).await;
        sync_role_bindings(cluster, &sources, &labeler()).await
    }

    /// Binding with our subject and role but no labels, as older installs left them
    fn unlabeled_binding(ns: &str) -> RoleBinding {
        let mut rb = build_role_binding(ns, &labeler());
        rb.metadata.labels = None;
        rb
    }

    fn foreign_binding(ns: &str) -> RoleBinding {
        let mut rb = build_role_binding(ns, &labeler());
        rb.metadata.labels = None;
        rb.subjects = Some(vec![Subject {
            kind: "User".to_string(),
            name: "alice".to_string(),
            namespace: None,
            api_group: Some(RBAC_API_GROUP.to_string()),
        }]);
        rb
    }

    #[tokio::test]
    async fn binds_scraper_where_there_is_something_to_scrape() {
        let cluster = FakeCluster::new();
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));

        let report = provision(&cluster, &["fuse", "amq"])
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        let rb = cluster.role_binding("fuse", ROLE_BINDING_NAME).unwrap();
        assert_eq!(rb.role_ref.kind, "ClusterRole");
        assert_eq!(rb.role_ref.name, "view");
        assert_eq!(rb.role_ref.api_group, "rbac.authorization.k8s.io");
        let subject = &rb.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "prometheus-k8s");
        assert_eq!(subject.namespace.as_deref(), Some("openshift-monitoring"));
        assert!(labeler().is_owned(rb.metadata.labels.as_ref()));
        assert!(cluster.role_binding("amq", ROLE_BINDING_NAME).is_none());
    }

    #[tokio::test]
    async fn second_pass_makes_no_mutations() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("fuse", Some("xyz"), true));
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));
        let ns = &["fuse"];

        provision(&cluster, ns).await.unwrap();
        cluster.clear_mutations();
        let report = provision(&cluster, ns).await.unwrap();

        assert_eq!(report.mutations(), 0);
        assert_eq!(report.unchanged, 1);
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn eligible_namespace_without_sources_loses_its_binding() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("fuse", Some("xyz"), true));
        cluster.add_role_binding(unlabeled_binding("fuse"));

        let report = provision(&cluster, &["fuse"])
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert!(cluster.role_binding("fuse", ROLE_BINDING_NAME).is_none());
    }

    #[tokio::test]
    async fn namespace_that_lost_eligibility_loses_its_binding() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("fuse", Some("xyz"), false));
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));
        cluster.add_role_binding(build_role_binding("fuse", &labeler()));

        provision(&cluster, &[]).await.unwrap();

        assert!(cluster.role_binding("fuse", ROLE_BINDING_NAME).is_none());
    }

    #[tokio::test]
    async fn labeled_binding_in_unclaimed_namespace_is_found_and_removed() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("released", None, false));
        cluster.add_role_binding(build_role_binding("released", &labeler()));

        let report = provision(&cluster, &[]).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(cluster.role_binding_namespaces().is_empty());
    }

    #[tokio::test]
    async fn foreign_binding_with_our_name_is_never_deleted() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("fuse", Some("xyz"), false));
        cluster.add_role_binding(foreign_binding("fuse"));

        provision(&cluster, &[]).await.unwrap();

        assert!(cluster.role_binding("fuse", ROLE_BINDING_NAME).is_some());
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn foreign_binding_in_desired_namespace_is_not_overwritten() {
        let cluster = FakeCluster::new();
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));
        cluster.add_role_binding(foreign_binding("fuse"));

        let err = provision(&cluster, &["fuse"])
            .await
            .unwrap_err();

        assert!(matches!(err.failures()[0], MonitoringError::Unmanaged { .. }));
        let kept = cluster.role_binding("fuse", ROLE_BINDING_NAME).unwrap();
        assert_eq!(kept.subjects.unwrap()[0].name, "alice");
    }

    #[tokio::test]
    async fn drifted_role_ref_is_recreated() {
        let cluster = FakeCluster::new();
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));
        let mut drifted = build_role_binding("fuse", &labeler());
        drifted.role_ref.name = "edit".to_string();
        cluster.add_role_binding(drifted);

        let report = provision(&cluster, &["fuse"])
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(
            cluster.mutations(),
            vec![
                format!("delete RoleBinding fuse/{ROLE_BINDING_NAME}"),
                format!("create RoleBinding fuse/{ROLE_BINDING_NAME}"),
            ]
        );
        let rb = cluster.role_binding("fuse", ROLE_BINDING_NAME).unwrap();
        assert_eq!(rb.role_ref.name, "view");
    }

    #[tokio::test]
    async fn unlabeled_binding_is_adopted_by_replace() {
        let cluster = FakeCluster::new();
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));
        let mut rb = unlabeled_binding("fuse");
        rb.metadata.labels = Some(BTreeMap::from([("team".to_string(), "fuse".to_string())]));
        cluster.add_role_binding(rb);

        let report = provision(&cluster, &["fuse"])
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        let rb = cluster.role_binding("fuse", ROLE_BINDING_NAME).unwrap();
        let labels = rb.metadata.labels.unwrap();
        assert_eq!(labels["team"], "fuse");
        assert!(labeler().is_owned(Some(&labels)));
    }

    #[tokio::test]
    async fn list_failure_protects_binding() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("fuse", Some("xyz"), true));
        cluster.add_role_binding(build_role_binding("fuse", &labeler()));
        cluster.fail_service_monitor_list("fuse");

        let sources = SourceSnapshot::collect(&cluster, &eligible(&["fuse"])).await;
        let report = sync_role_bindings(&cluster, &sources, &labeler())
            .await
            .unwrap();

        assert_eq!(report.mutations(), 0);
        assert!(cluster.role_binding("fuse", ROLE_BINDING_NAME).is_some());
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn clones_alone_do_not_need_a_binding() {
        let cluster = FakeCluster::new();
        cluster.add_namespace(namespace("vantage-monitoring", Some("xyz"), true));
        let mut clone = crate::service_monitors::build_clone(
            &service_monitor("fuse", "fuse-servicemon"),
            "fuse",
            "vantage-monitoring",
            &labeler(),
        );
        clone.metadata.namespace = Some("vantage-monitoring".to_string());
        cluster.add_service_monitor(clone);

        let report = provision(&cluster, &["vantage-monitoring"]).await.unwrap();

        assert_eq!(report.mutations(), 0);
        assert!(cluster.role_binding_namespaces().is_empty());
    }

    #[tokio::test]
    async fn write_failure_in_one_namespace_does_not_stop_others() {
        let cluster = FakeCluster::new();
        cluster.add_service_monitor(service_monitor("amq", "amq-servicemon"));
        cluster.add_service_monitor(service_monitor("fuse", "fuse-servicemon"));
        cluster.fail_role_binding_writes("amq");

        let err = provision(&cluster, &["amq", "fuse"])
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), 1);
        assert!(cluster.role_binding("fuse", ROLE_BINDING_NAME).is_some());
        assert!(cluster.role_binding("amq", ROLE_BINDING_NAME).is_none());
    }
}
