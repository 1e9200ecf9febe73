//! Prometheus operator `ServiceMonitor` (`monitoring.coreos.com/v1`)
//!
//! Only the fields Vantage reasons about are typed. Unknown fields are kept in
//! flattened maps so a clone carries the full source spec.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Scrape-target declaration consumed by the Prometheus operator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    plural = "servicemonitors",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Endpoints to scrape on the selected services
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Label selector for the services to scrape
    #[serde(default)]
    pub selector: MonitorLabelSelector,

    /// Namespaces the selector applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,

    /// Service label whose value becomes the `job` label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,

    /// Remaining upstream fields, preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One scrape endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Named service port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// HTTP path to scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// http or https
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// Extra query parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,

    /// Scrape interval (e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Scrape timeout (e.g. "10s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    /// Keep labels from the scraped data on conflict
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub honor_labels: bool,

    /// Remaining upstream fields (tlsConfig, relabelings, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Label selector (matchLabels + raw matchExpressions)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorLabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements, kept as raw JSON
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<serde_json::Value>,
}

/// Namespaces a ServiceMonitor selects services from
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Select services in every namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<bool>,

    /// Explicit namespace list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

impl NamespaceSelector {
    /// Selector that pins scraping to exactly one namespace
    pub fn only(namespace: impl Into<String>) -> Self {
        Self {
            any: None,
            match_names: vec![namespace.into()],
        }
    }
}
