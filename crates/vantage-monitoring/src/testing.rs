//! In-memory cluster for state-based tests
//!
//! Implements `ClusterClient` over maps keyed by (namespace, name), with
//! equality label selectors, API-like 404/409 errors, per-namespace failure
//! injection and a log of every mutating call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::ObjectMeta;
use kube::core::ErrorResponse;
use kube::Resource;
use vantage_common::crd::{Endpoint, MonitorLabelSelector, ServiceMonitor, ServiceMonitorSpec};
use vantage_common::Error;

use crate::cluster::ClusterClient;
use crate::labels::{MONITORING_KEY_LABEL, MONITORING_KEY_VALUE, OWNER_UID_LABEL};

type Key = (String, String);

#[derive(Default)]
struct FakeState {
    namespaces: BTreeMap<String, Namespace>,
    service_monitors: BTreeMap<Key, ServiceMonitor>,
    role_bindings: BTreeMap<Key, RoleBinding>,
    failing_namespace_list: bool,
    failing_service_monitor_lists: BTreeSet<String>,
    failing_role_binding_writes: BTreeSet<String>,
    vanishing_sources: BTreeSet<String>,
    service_monitor_lists: BTreeMap<String, usize>,
    mutations: Vec<String>,
    resource_version: u64,
}

impl FakeState {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

fn api_error(code: u16, reason: &str, kind: &str, namespace: &str, name: &str) -> Error {
    Error::api(
        kind,
        namespace,
        name,
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{kind} {namespace}/{name}: {reason}"),
            reason: reason.to_string(),
            code,
        }),
    )
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

/// Equality-only selector matching, `k=v,k2=v2`; empty matches everything
fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.and_then(|l| l.get(k)).is_some_and(|actual| actual == v),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_namespace(&self, ns: Namespace) {
        let name = ns.metadata.name.clone().unwrap_or_default();
        self.state().namespaces.insert(name, ns);
    }

    pub fn add_service_monitor(&self, sm: ServiceMonitor) {
        let key = key_of(&sm);
        self.state().service_monitors.insert(key, sm);
    }

    pub fn add_role_binding(&self, rb: RoleBinding) {
        let key = key_of(&rb);
        self.state().role_bindings.insert(key, rb);
    }

    pub fn service_monitor(&self, namespace: &str, name: &str) -> Option<ServiceMonitor> {
        self.state()
            .service_monitors
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn service_monitor_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .service_monitors
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        self.state()
            .role_bindings
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn role_binding_namespaces(&self) -> Vec<String> {
        self.state()
            .role_bindings
            .keys()
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// Mutating calls so far, e.g. `create ServiceMonitor m/fuse-fuse-servicemon`
    pub fn mutations(&self) -> Vec<String> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    pub fn fail_namespace_list(&self) {
        self.state().failing_namespace_list = true;
    }

    pub fn fail_service_monitor_list(&self, namespace: &str) {
        self.state()
            .failing_service_monitor_lists
            .insert(namespace.to_string());
    }

    pub fn fail_role_binding_writes(&self, namespace: &str) {
        self.state()
            .failing_role_binding_writes
            .insert(namespace.to_string());
    }

    /// Sources in `namespace` disappear right after they are first listed
    pub fn vanish_sources_after_list(&self, namespace: &str) {
        self.state().vanishing_sources.insert(namespace.to_string());
    }

    /// How often ServiceMonitors in `namespace` were listed
    pub fn service_monitor_lists(&self, namespace: &str) -> usize {
        self.state()
            .service_monitor_lists
            .get(namespace)
            .copied()
            .unwrap_or_default()
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.failing_namespace_list = false;
        state.failing_service_monitor_lists.clear();
        state.failing_role_binding_writes.clear();
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, Error> {
        let state = self.state();
        if state.failing_namespace_list {
            return Err(Error::internal("injected namespace list failure"));
        }
        Ok(state
            .namespaces
            .values()
            .filter(|ns| matches_selector(ns.metadata.labels.as_ref(), label_selector))
            .cloned()
            .collect())
    }

    async fn list_service_monitors(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceMonitor>, Error> {
        let mut state = self.state();
        *state
            .service_monitor_lists
            .entry(namespace.to_string())
            .or_default() += 1;
        if state.failing_service_monitor_lists.contains(namespace) {
            return Err(Error::internal(format!(
                "injected ServiceMonitor list failure in {namespace}"
            )));
        }
        let listed = state
            .service_monitors
            .iter()
            .filter(|((ns, _), sm)| {
                ns == namespace && matches_selector(sm.metadata.labels.as_ref(), label_selector)
            })
            .map(|(_, sm)| sm.clone())
            .collect();
        if state.vanishing_sources.remove(namespace) {
            state.service_monitors.retain(|(ns, _), _| ns != namespace);
        }
        Ok(listed)
    }

    async fn get_service_monitor(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMonitor>, Error> {
        Ok(self.service_monitor(namespace, name))
    }

    async fn create_service_monitor(&self, sm: &ServiceMonitor) -> Result<(), Error> {
        let mut state = self.state();
        let key = key_of(sm);
        if state.service_monitors.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "ServiceMonitor", &key.0, &key.1));
        }
        let mut stored = sm.clone();
        stored.metadata.resource_version = Some(state.next_resource_version());
        state
            .mutations
            .push(format!("create ServiceMonitor {}/{}", key.0, key.1));
        state.service_monitors.insert(key, stored);
        Ok(())
    }

    async fn replace_service_monitor(&self, sm: &ServiceMonitor) -> Result<(), Error> {
        let mut state = self.state();
        let key = key_of(sm);
        if !state.service_monitors.contains_key(&key) {
            return Err(api_error(404, "NotFound", "ServiceMonitor", &key.0, &key.1));
        }
        let mut stored = sm.clone();
        stored.metadata.resource_version = Some(state.next_resource_version());
        state
            .mutations
            .push(format!("replace ServiceMonitor {}/{}", key.0, key.1));
        state.service_monitors.insert(key, stored);
        Ok(())
    }

    async fn delete_service_monitor(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let mut state = self.state();
        let removed = state
            .service_monitors
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        if removed {
            state
                .mutations
                .push(format!("delete ServiceMonitor {namespace}/{name}"));
        }
        Ok(removed)
    }

    async fn list_role_bindings(&self, label_selector: &str) -> Result<Vec<RoleBinding>, Error> {
        Ok(self
            .state()
            .role_bindings
            .values()
            .filter(|rb| matches_selector(rb.metadata.labels.as_ref(), label_selector))
            .cloned()
            .collect())
    }

    async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RoleBinding>, Error> {
        Ok(self.role_binding(namespace, name))
    }

    async fn create_role_binding(&self, rb: &RoleBinding) -> Result<(), Error> {
        let mut state = self.state();
        let key = key_of(rb);
        if state.failing_role_binding_writes.contains(&key.0) {
            return Err(Error::internal(format!(
                "injected RoleBinding write failure in {}",
                key.0
            )));
        }
        if state.role_bindings.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "RoleBinding", &key.0, &key.1));
        }
        let mut stored = rb.clone();
        stored.metadata.resource_version = Some(state.next_resource_version());
        state
            .mutations
            .push(format!("create RoleBinding {}/{}", key.0, key.1));
        state.role_bindings.insert(key, stored);
        Ok(())
    }

    async fn replace_role_binding(&self, rb: &RoleBinding) -> Result<(), Error> {
        let mut state = self.state();
        let key = key_of(rb);
        if state.failing_role_binding_writes.contains(&key.0) {
            return Err(Error::internal(format!(
                "injected RoleBinding write failure in {}",
                key.0
            )));
        }
        match state.role_bindings.get(&key) {
            None => return Err(api_error(404, "NotFound", "RoleBinding", &key.0, &key.1)),
            Some(existing) if existing.role_ref != rb.role_ref => {
                return Err(api_error(422, "Invalid", "RoleBinding", &key.0, &key.1))
            }
            Some(_) => {}
        }
        let mut stored = rb.clone();
        stored.metadata.resource_version = Some(state.next_resource_version());
        state
            .mutations
            .push(format!("replace RoleBinding {}/{}", key.0, key.1));
        state.role_bindings.insert(key, stored);
        Ok(())
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let mut state = self.state();
        if state.failing_role_binding_writes.contains(namespace) {
            return Err(Error::internal(format!(
                "injected RoleBinding write failure in {namespace}"
            )));
        }
        let removed = state
            .role_bindings
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        if removed {
            state
                .mutations
                .push(format!("delete RoleBinding {namespace}/{name}"));
        }
        Ok(removed)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Namespace optionally claimed by an Installation and opted into monitoring
pub fn namespace(name: &str, owner_uid: Option<&str>, monitored: bool) -> Namespace {
    let mut labels = BTreeMap::new();
    if let Some(uid) = owner_uid {
        labels.insert(OWNER_UID_LABEL.to_string(), uid.to_string());
    }
    if monitored {
        labels.insert(
            MONITORING_KEY_LABEL.to_string(),
            MONITORING_KEY_VALUE.to_string(),
        );
    }
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A product's ServiceMonitor scraping an `upstream` port every 30s
pub fn service_monitor(namespace: &str, name: &str) -> ServiceMonitor {
    let mut sm = ServiceMonitor::new(
        name,
        ServiceMonitorSpec {
            endpoints: vec![Endpoint {
                port: Some("upstream".to_string()),
                path: Some("/name".to_string()),
                scheme: Some("http".to_string()),
                params: BTreeMap::from([(
                    "match[]".to_string(),
                    vec!["{__name__=\"ALERTS\",alertstate=\"firing\"}".to_string()],
                )]),
                interval: Some("30s".to_string()),
                scrape_timeout: Some("30s".to_string()),
                honor_labels: true,
                ..Default::default()
            }],
            selector: MonitorLabelSelector {
                match_labels: BTreeMap::from([("app".to_string(), name.to_string())]),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    sm.metadata.namespace = Some(namespace.to_string());
    sm.metadata.labels = Some(BTreeMap::from([(
        "monitoring-key".to_string(),
        "middleware".to_string(),
    )]));
    sm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching() {
        let labels = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        assert!(matches_selector(Some(&labels), ""));
        assert!(matches_selector(Some(&labels), "a=1"));
        assert!(matches_selector(Some(&labels), "a=1,b=2"));
        assert!(!matches_selector(Some(&labels), "a=1,b=3"));
        assert!(!matches_selector(None, "a=1"));
        assert!(matches_selector(None, ""));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_and_missing_replace_is_not_found() {
        let cluster = FakeCluster::new();
        let sm = service_monitor("fuse", "fuse-servicemon");

        cluster.create_service_monitor(&sm).await.unwrap();
        let err = cluster.create_service_monitor(&sm).await.unwrap_err();
        assert!(!err.is_not_found());

        let missing = service_monitor("fuse", "missing");
        let err = cluster.replace_service_monitor(&missing).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(cluster.mutations(), vec!["create ServiceMonitor fuse/fuse-servicemon"]);
    }

    #[tokio::test]
    async fn delete_of_missing_object_reports_false() {
        let cluster = FakeCluster::new();
        assert!(!cluster.delete_service_monitor("m", "gone").await.unwrap());
        assert!(!cluster.delete_role_binding("m", "gone").await.unwrap());
        assert!(cluster.mutations().is_empty());
    }
}
