//! Operator Lifecycle Manager resources (`operators.coreos.com`)
//!
//! Vantage creates an OperatorGroup and a Subscription for the monitoring
//! operator and then polls the InstallPlan the subscription points at.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// InstallPlan phase reported once every step has been applied
pub const INSTALL_PLAN_PHASE_COMPLETE: &str = "Complete";

/// Approval strategy for install plans
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum Approval {
    /// OLM applies plans without human approval
    #[default]
    Automatic,
    /// Plans wait for a human to approve them
    Manual,
}

impl std::fmt::Display for Approval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "Automatic"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Request to install and track an operator package from a catalog
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    namespaced,
    status = "SubscriptionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Package name in the catalog
    pub name: String,

    /// Catalog source name
    pub source: String,

    /// Namespace of the catalog source
    pub source_namespace: String,

    /// Update channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Install plan approval strategy
    #[serde(default)]
    pub install_plan_approval: Approval,

    /// Exact CSV to start from
    #[serde(default, rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
}

/// Subscription status as reported by OLM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// Install plan created for the current CSV
    #[serde(default, rename = "installplan", skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallPlanReference>,

    /// Subscription state (e.g. "AtLatestKnown")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// CSV OLM is converging on
    #[serde(default, rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,

    /// CSV that is installed
    #[serde(default, rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
}

/// Reference from a Subscription to its InstallPlan
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanReference {
    /// InstallPlan name
    pub name: String,

    /// InstallPlan API version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Always "InstallPlan"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

// =============================================================================
// InstallPlan
// =============================================================================

/// Set of resources OLM will create to install a CSV
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    namespaced,
    status = "InstallPlanStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    /// CSVs this plan installs
    #[serde(default, rename = "clusterServiceVersionNames")]
    pub cluster_service_version_names: Vec<String>,

    /// Approval strategy inherited from the subscription
    #[serde(default)]
    pub approval: Approval,

    /// Whether the plan has been approved
    #[serde(default)]
    pub approved: bool,
}

/// InstallPlan status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanStatus {
    /// Planning, RequiresApproval, Installing, Complete, Failed
    #[serde(default)]
    pub phase: String,

    /// Remaining upstream fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

// =============================================================================
// OperatorGroup
// =============================================================================

/// Namespaces an installed operator is allowed to watch
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Namespaces the operator watches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}
