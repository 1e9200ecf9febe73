//! Monitoring product configuration
//!
//! The config is a flat string map stored as YAML under one key of the
//! installation ConfigMap. The engine reads it at the start of every pass
//! and writes it back only when it filled in a default.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vantage_common::kube_utils::is_not_found;
use vantage_common::Error;

use crate::FIELD_MANAGER;

/// ConfigMap holding per-product configuration
pub const CONFIG_MAP_NAME: &str = "installation-config";
/// Key of the monitoring product's section in the ConfigMap
pub const CONFIG_KEY: &str = "monitoringspec";

const KEY_NAMESPACE: &str = "NAMESPACE";
const KEY_OPERATOR_NAMESPACE: &str = "OPERATOR_NAMESPACE";

/// Monitoring product config
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoringSpec {
    values: BTreeMap<String, String>,
}

impl MonitoringSpec {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Namespace the cloned ServiceMonitors live in; empty when unset
    pub fn namespace(&self) -> &str {
        self.get(KEY_NAMESPACE)
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.values
            .insert(KEY_NAMESPACE.to_string(), namespace.into());
    }

    /// Namespace the monitoring operator is installed into; empty when unset
    pub fn operator_namespace(&self) -> &str {
        self.get(KEY_OPERATOR_NAMESPACE)
    }

    pub fn set_operator_namespace(&mut self, namespace: impl Into<String>) {
        self.values
            .insert(KEY_OPERATOR_NAMESPACE.to_string(), namespace.into());
    }

    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Fill empty namespace values and report whether anything changed
    ///
    /// `NAMESPACE` falls back to the Installation's namespace,
    /// `OPERATOR_NAMESPACE` to the (possibly just defaulted) `NAMESPACE`.
    pub fn apply_defaults(&mut self, installation_namespace: &str) -> bool {
        let mut changed = false;
        if self.namespace().is_empty() {
            self.set_namespace(installation_namespace);
            changed = true;
        }
        if self.operator_namespace().is_empty() {
            let namespace = self.namespace().to_string();
            self.set_operator_namespace(namespace);
            changed = true;
        }
        changed
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::serialization_for_kind("MonitoringSpec", e.to_string()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let values: Option<BTreeMap<String, String>> = serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("MonitoringSpec", e.to_string()))?;
        Ok(Self::new(values.unwrap_or_default()))
    }
}

/// Reads and persists the monitoring config
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigReadWriter: Send + Sync {
    async fn read_monitoring_spec(&self) -> Result<MonitoringSpec, Error>;

    async fn write_config(&self, spec: &MonitoringSpec) -> Result<(), Error>;
}

/// Config stored in the `installation-config` ConfigMap
pub struct ConfigMapConfigStore {
    api: Api<ConfigMap>,
    namespace: String,
}

impl ConfigMapConfigStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ConfigReadWriter for ConfigMapConfigStore {
    async fn read_monitoring_spec(&self) -> Result<MonitoringSpec, Error> {
        let cm = match self.api.get(CONFIG_MAP_NAME).await {
            Ok(cm) => cm,
            Err(e) if is_not_found(&e) => {
                debug!(namespace = %self.namespace, "no installation config yet, using defaults");
                return Ok(MonitoringSpec::default());
            }
            Err(e) => return Err(Error::api("ConfigMap", &self.namespace, CONFIG_MAP_NAME, e)),
        };

        let yaml = cm
            .data
            .as_ref()
            .and_then(|d| d.get(CONFIG_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        MonitoringSpec::from_yaml(yaml)
    }

    async fn write_config(&self, spec: &MonitoringSpec) -> Result<(), Error> {
        // Apply only our key; other products' sections keep their managers
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(CONFIG_MAP_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(CONFIG_KEY.to_string(), spec.to_yaml()?)])),
            ..Default::default()
        };

        self.api
            .patch(
                CONFIG_MAP_NAME,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&cm),
            )
            .await
            .map_err(|e| Error::api("ConfigMap", &self.namespace, CONFIG_MAP_NAME, e))?;
        Ok(())
    }
}
