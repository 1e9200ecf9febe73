//! Monitoring operator installation through OLM
//!
//! The installer creates an OperatorGroup (when the target namespace has none)
//! and a Subscription, then exposes the Subscription and its InstallPlans so
//! the install tracker can decide whether the operator is ready.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use vantage_common::crd::{
    Approval, InstallPlan, OperatorGroup, OperatorGroupSpec, Subscription, SubscriptionSpec,
};
use vantage_common::Error;

use crate::labels::OwnershipLabeler;
use crate::FIELD_MANAGER;

/// Default OLM package of the monitoring operator
pub const DEFAULT_PACKAGE: &str = "monitoring-operator";
/// Default subscription channel
pub const DEFAULT_CHANNEL: &str = "stable";
/// Default catalog source
pub const DEFAULT_CATALOG_SOURCE: &str = "community-operators";
/// Default namespace of the catalog source
pub const DEFAULT_CATALOG_SOURCE_NAMESPACE: &str = "olm";

// =============================================================================
// Settings
// =============================================================================

/// Which operator to install and from where
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallerSettings {
    /// OLM package name; also used as the Subscription name
    pub package: String,
    pub channel: String,
    pub catalog_source: String,
    pub catalog_source_namespace: String,
    pub approval: Approval,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            package: DEFAULT_PACKAGE.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            catalog_source: DEFAULT_CATALOG_SOURCE.to_string(),
            catalog_source_namespace: DEFAULT_CATALOG_SOURCE_NAMESPACE.to_string(),
            approval: Approval::Automatic,
        }
    }
}

impl InstallerSettings {
    /// Subscription target in the given operator namespace
    pub fn target(&self, namespace: &str) -> Target {
        Target {
            namespace: namespace.to_string(),
            subscription_name: self.package.clone(),
            package: self.package.clone(),
            channel: self.channel.clone(),
            catalog_source: self.catalog_source.clone(),
            catalog_source_namespace: self.catalog_source_namespace.clone(),
        }
    }
}

/// A concrete Subscription to create
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub subscription_name: String,
    pub package: String,
    pub channel: String,
    pub catalog_source: String,
    pub catalog_source_namespace: String,
}

/// The Installation on whose behalf the operator is installed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRef {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl OwnerRef {
    fn labels(&self) -> BTreeMap<String, String> {
        OwnershipLabeler::new(&self.uid).ownership_labels()
    }
}

// =============================================================================
// Installer trait and implementation
// =============================================================================

/// Installs an operator and reports on its progress
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperatorInstaller: Send + Sync {
    /// Ensure the OperatorGroup and Subscription exist. Idempotent.
    async fn install_operator(
        &self,
        owner: &OwnerRef,
        target: &Target,
        operator_group_namespaces: &[String],
        approval: Approval,
    ) -> Result<(), Error>;

    /// Fetch a Subscription and the InstallPlans in its namespace
    async fn get_subscription_install_plans(
        &self,
        subscription: &str,
        namespace: &str,
    ) -> Result<(Vec<InstallPlan>, Subscription), Error>;
}

/// `OperatorInstaller` backed by OLM custom resources
pub struct OlmInstaller {
    client: Client,
}

impl OlmInstaller {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn ensure_operator_group(
        &self,
        owner: &OwnerRef,
        namespace: &str,
        target_namespaces: &[String],
    ) -> Result<(), Error> {
        let api: Api<OperatorGroup> = Api::namespaced(self.client.clone(), namespace);

        // OLM refuses to install into a namespace with more than one group
        let existing = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::api("OperatorGroup", namespace, "*", e))?;
        if !existing.items.is_empty() {
            debug!(namespace, "operator group already present");
            return Ok(());
        }

        let name = format!("{namespace}-operator-group");
        let group = OperatorGroup {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(owner.labels()),
                ..Default::default()
            },
            spec: OperatorGroupSpec {
                target_namespaces: target_namespaces.to_vec(),
            },
        };

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&group),
        )
        .await
        .map_err(|e| Error::api("OperatorGroup", namespace, &name, e))?;
        info!(namespace, name = %name, "created operator group");
        Ok(())
    }

    async fn apply_subscription(
        &self,
        owner: &OwnerRef,
        target: &Target,
        approval: Approval,
    ) -> Result<(), Error> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), &target.namespace);
        let subscription = build_subscription(owner, target, approval);

        api.patch(
            &target.subscription_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&subscription),
        )
        .await
        .map_err(|e| {
            Error::api(
                "Subscription",
                &target.namespace,
                &target.subscription_name,
                e,
            )
        })?;
        Ok(())
    }
}

fn build_subscription(owner: &OwnerRef, target: &Target, approval: Approval) -> Subscription {
    let mut subscription = Subscription::new(
        &target.subscription_name,
        SubscriptionSpec {
            name: target.package.clone(),
            source: target.catalog_source.clone(),
            source_namespace: target.catalog_source_namespace.clone(),
            channel: Some(target.channel.clone()),
            install_plan_approval: approval,
            starting_csv: None,
        },
    );
    subscription.metadata.namespace = Some(target.namespace.clone());
    subscription.metadata.labels = Some(owner.labels());
    subscription
}

#[async_trait]
impl OperatorInstaller for OlmInstaller {
    async fn install_operator(
        &self,
        owner: &OwnerRef,
        target: &Target,
        operator_group_namespaces: &[String],
        approval: Approval,
    ) -> Result<(), Error> {
        self.ensure_operator_group(owner, &target.namespace, operator_group_namespaces)
            .await?;
        self.apply_subscription(owner, target, approval).await
    }

    async fn get_subscription_install_plans(
        &self,
        subscription: &str,
        namespace: &str,
    ) -> Result<(Vec<InstallPlan>, Subscription), Error> {
        let subs: Api<Subscription> = Api::namespaced(self.client.clone(), namespace);
        let sub = subs
            .get(subscription)
            .await
            .map_err(|e| Error::api("Subscription", namespace, subscription, e))?;

        let plans: Api<InstallPlan> = Api::namespaced(self.client.clone(), namespace);
        let list = plans
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::api("InstallPlan", namespace, "*", e))?;

        Ok((list.items, sub))
    }
}
