//! Ownership labels stamped on every object the engine creates
//!
//! Ownership lives on the objects themselves, so mark-and-sweep needs no
//! state between passes: a clone is recognised by its marker label, a
//! RoleBinding by the managed-by and installation-uid pair.

use std::collections::BTreeMap;

use vantage_common::kube_utils::label_selector;
use vantage_common::LABEL_MANAGED_BY;

/// Value of `app.kubernetes.io/managed-by` on engine-created objects
pub const MANAGED_BY_VALUE: &str = "vantage-monitoring";

/// Label carrying the UID of the owning Installation
///
/// Also set on product namespaces by the installer to claim them.
pub const OWNER_UID_LABEL: &str = "vantage.dev/installation-uid";

/// Marker distinguishing mirrored ServiceMonitors from sources
pub const CLONE_MARKER_LABEL: &str = "vantage.dev/cloned-servicemonitor";
pub const CLONE_MARKER_VALUE: &str = "true";

/// Namespace a clone was mirrored from
pub const SOURCE_NAMESPACE_LABEL: &str = "vantage.dev/source-namespace";

/// Namespace label opting a product namespace into monitoring
pub const MONITORING_KEY_LABEL: &str = "monitoring-key";
pub const MONITORING_KEY_VALUE: &str = "middleware";

/// Builds and checks ownership labels for one Installation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipLabeler {
    owner_uid: String,
}

impl OwnershipLabeler {
    pub fn new(owner_uid: impl Into<String>) -> Self {
        Self {
            owner_uid: owner_uid.into(),
        }
    }

    pub fn owner_uid(&self) -> &str {
        &self.owner_uid
    }

    /// managed-by plus installation-uid
    pub fn ownership_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
            (OWNER_UID_LABEL.to_string(), self.owner_uid.clone()),
        ])
    }

    /// Labels for a clone: the source's own labels overlaid with the markers
    pub fn clone_labels(
        &self,
        source_labels: Option<&BTreeMap<String, String>>,
        source_namespace: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = source_labels.cloned().unwrap_or_default();
        labels.extend(self.ownership_labels());
        labels.insert(
            CLONE_MARKER_LABEL.to_string(),
            CLONE_MARKER_VALUE.to_string(),
        );
        labels.insert(
            SOURCE_NAMESPACE_LABEL.to_string(),
            source_namespace.to_string(),
        );
        labels
    }

    /// True when both ownership labels match this Installation
    pub fn is_owned(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        labels.is_some_and(|l| {
            l.get(LABEL_MANAGED_BY).map(String::as_str) == Some(MANAGED_BY_VALUE)
                && l.get(OWNER_UID_LABEL) == Some(&self.owner_uid)
        })
    }

    /// Selector for namespaces eligible for monitoring
    pub fn eligibility_selector(&self) -> String {
        label_selector(&[
            (OWNER_UID_LABEL, &self.owner_uid),
            (MONITORING_KEY_LABEL, MONITORING_KEY_VALUE),
        ])
    }

    /// Selector for objects carrying this Installation's ownership labels
    pub fn ownership_selector(&self) -> String {
        label_selector(&[
            (LABEL_MANAGED_BY, MANAGED_BY_VALUE),
            (OWNER_UID_LABEL, &self.owner_uid),
        ])
    }

    /// Selector for namespaces claimed by this Installation
    pub fn owner_namespace_selector(&self) -> String {
        label_selector(&[(OWNER_UID_LABEL, &self.owner_uid)])
    }
}

/// True when the labels mark a mirrored ServiceMonitor
pub fn is_clone(labels: Option<&BTreeMap<String, String>>) -> bool {
    labels
        .and_then(|l| l.get(CLONE_MARKER_LABEL))
        .is_some_and(|v| v == CLONE_MARKER_VALUE)
}

/// Selector for every clone, regardless of owner
pub fn clone_selector() -> String {
    label_selector(&[(CLONE_MARKER_LABEL, CLONE_MARKER_VALUE)])
}

/// Name of the clone of `source_namespace/source_name`
pub fn clone_name(source_namespace: &str, source_name: &str) -> String {
    format!("{source_namespace}-{source_name}")
}
