//! Typed cluster access for the resource kinds the engine touches
//!
//! Contract: `get_*` return `None` on NotFound, `delete_*` return `false` on
//! NotFound. Every other API failure is an error. Label selectors are
//! equality-based; an empty selector matches everything.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use vantage_common::crd::ServiceMonitor;
use vantage_common::kube_utils::is_not_found;
use vantage_common::Error;

/// Cluster operations used by the monitoring engine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, Error>;

    async fn list_service_monitors(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceMonitor>, Error>;

    async fn get_service_monitor(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMonitor>, Error>;

    async fn create_service_monitor(&self, sm: &ServiceMonitor) -> Result<(), Error>;

    /// Replace an existing object; the caller carries over `resourceVersion`
    async fn replace_service_monitor(&self, sm: &ServiceMonitor) -> Result<(), Error>;

    async fn delete_service_monitor(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// List RoleBindings across all namespaces
    async fn list_role_bindings(&self, label_selector: &str) -> Result<Vec<RoleBinding>, Error>;

    async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RoleBinding>, Error>;

    async fn create_role_binding(&self, rb: &RoleBinding) -> Result<(), Error>;

    async fn replace_role_binding(&self, rb: &RoleBinding) -> Result<(), Error>;

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<bool, Error>;
}

/// `ClusterClient` over `kube::Api`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn list_params(label_selector: &str) -> ListParams {
        if label_selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(label_selector)
        }
    }
}

fn namespace_of<K: kube::Resource>(obj: &K) -> String {
    obj.meta().namespace.clone().unwrap_or_default()
}

fn name_of<K: kube::Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&Self::list_params(label_selector))
            .await
            .map_err(|e| Error::api("Namespace", "", "*", e))?;
        Ok(list.items)
    }

    async fn list_service_monitors(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceMonitor>, Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&Self::list_params(label_selector))
            .await
            .map_err(|e| Error::api("ServiceMonitor", namespace, "*", e))?;
        Ok(list.items)
    }

    async fn get_service_monitor(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceMonitor>, Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::api("ServiceMonitor", namespace, name, e))
    }

    async fn create_service_monitor(&self, sm: &ServiceMonitor) -> Result<(), Error> {
        let namespace = namespace_of(sm);
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), sm)
            .await
            .map_err(|e| Error::api("ServiceMonitor", &namespace, name_of(sm), e))?;
        Ok(())
    }

    async fn replace_service_monitor(&self, sm: &ServiceMonitor) -> Result<(), Error> {
        let namespace = namespace_of(sm);
        let name = name_of(sm);
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), sm)
            .await
            .map_err(|e| Error::api("ServiceMonitor", &namespace, &name, e))?;
        Ok(())
    }

    async fn delete_service_monitor(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::api("ServiceMonitor", namespace, name, e)),
        }
    }

    async fn list_role_bindings(&self, label_selector: &str) -> Result<Vec<RoleBinding>, Error> {
        let api: Api<RoleBinding> = Api::all(self.client.clone());
        let list = api
            .list(&Self::list_params(label_selector))
            .await
            .map_err(|e| Error::api("RoleBinding", "", "*", e))?;
        Ok(list.items)
    }

    async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RoleBinding>, Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::api("RoleBinding", namespace, name, e))
    }

    async fn create_role_binding(&self, rb: &RoleBinding) -> Result<(), Error> {
        let namespace = namespace_of(rb);
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), rb)
            .await
            .map_err(|e| Error::api("RoleBinding", &namespace, name_of(rb), e))?;
        Ok(())
    }

    async fn replace_role_binding(&self, rb: &RoleBinding) -> Result<(), Error> {
        let namespace = namespace_of(rb);
        let name = name_of(rb);
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), rb)
            .await
            .map_err(|e| Error::api("RoleBinding", &namespace, &name, e))?;
        Ok(())
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::api("RoleBinding", namespace, name, e)),
        }
    }
}
