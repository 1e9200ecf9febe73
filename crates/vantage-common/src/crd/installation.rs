//! Installation CRD - the platform's top-level desired-state record
//!
//! An Installation is created once by an external installer. Vantage only
//! reads its spec and writes per-product entries under `status.products`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

// =============================================================================
// CRD
// =============================================================================

/// Spec for an Installation
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vantage.dev",
    version = "v1alpha1",
    kind = "Installation",
    plural = "installations",
    shortname = "vinst",
    namespaced,
    status = "InstallationStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Secret holding SMTP credentials for alert delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp_secret: Option<String>,

    /// Secret holding the PagerDuty integration key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pager_duty_secret: Option<String>,

    /// Secret holding the dead man's snitch URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_mans_snitch_secret: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of an Installation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Per-product reconciliation status, keyed by product name
    #[serde(default)]
    pub products: BTreeMap<String, ProductStatus>,

    /// Status conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Reconciliation status of a single product
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductStatus {
    /// Product name (e.g. "monitoring-spec")
    pub name: String,

    /// Result of the most recent reconciliation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ReconcilePhase>,

    /// Product version reconciled by this operator build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Installed operator version (CSV name) when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,

    /// Human-readable detail for the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProductStatus {
    /// Create an empty status entry for the named product
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Aggregate result of one reconciliation pass
///
/// A closed set: gating decisions match on it exhaustively.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ReconcilePhase {
    /// Work remains (operator still installing, transient failure)
    InProgress,
    /// Observed state matches desired state
    Completed,
    /// The pass hit a non-transient failure
    Failed,
}

impl ReconcilePhase {
    /// Lowercase label value for metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
