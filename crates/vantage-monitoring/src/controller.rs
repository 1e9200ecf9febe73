//! Installation controller for the monitoring product
//!
//! Adapts the [`Reconciler`] to `kube::runtime::Controller`: each pass is
//! bounded by a timeout, and its result is written to
//! `status.products["monitoring-spec"]` plus a `MonitoringReady` condition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{error, instrument, warn};

use vantage_common::crd::{
    Condition, ConditionStatus, Installation, ProductStatus, ReconcilePhase,
};
use vantage_common::events::{EventPublisher, KubeEventPublisher};
use vantage_common::Error;

use crate::cluster::{ClusterClient, KubeClusterClient};
use crate::config::{ConfigMapConfigStore, ConfigReadWriter};
use crate::error::MonitoringError;
use crate::installer::{InstallerSettings, OlmInstaller, OperatorInstaller};
use crate::outcome::PassOutcome;
use crate::reconciler::{Reconciler, PRODUCT_NAME};

/// Name reported on Events and used as field manager
pub const CONTROLLER_NAME: &str = "vantage-monitoring";

/// Condition type summarising the monitoring product
pub const CONDITION_MONITORING_READY: &str = "MonitoringReady";

// =============================================================================
// Installation access
// =============================================================================

/// Access to the Installation object and its per-namespace config
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstallationClient: Send + Sync {
    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Config store for an Installation living in `namespace`
    fn config_store(&self, namespace: &str) -> Arc<dyn ConfigReadWriter>;
}

/// `InstallationClient` over the real API server
pub struct KubeInstallationClient {
    client: Client,
}

impl KubeInstallationClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InstallationClient for KubeInstallationClient {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::api("Installation", namespace, name, e))?;
        Ok(())
    }

    fn config_store(&self, namespace: &str) -> Arc<dyn ConfigReadWriter> {
        Arc::new(ConfigMapConfigStore::new(self.client.clone(), namespace))
    }
}

// =============================================================================
// Context
// =============================================================================

/// Requeue and timeout settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerTiming {
    /// Requeue after a Completed pass
    pub requeue: Duration,
    /// Requeue after an InProgress or Failed pass
    pub error_requeue: Duration,
    /// Upper bound for one pass
    pub pass_timeout: Duration,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            requeue: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
            pass_timeout: Duration::from_secs(120),
        }
    }
}

/// Shared state for the monitoring controller
pub struct MonitoringContext {
    pub installations: Arc<dyn InstallationClient>,
    pub cluster: Arc<dyn ClusterClient>,
    pub installer: Arc<dyn OperatorInstaller>,
    pub events: Arc<dyn EventPublisher>,
    pub settings: InstallerSettings,
    pub timing: ControllerTiming,
}

impl MonitoringContext {
    /// Create a builder for constructing a context
    pub fn builder(client: Client) -> MonitoringContextBuilder {
        MonitoringContextBuilder::new(client)
    }

    /// Context for tests that never reach a real API server
    #[cfg(test)]
    pub fn for_testing(
        installations: Arc<dyn InstallationClient>,
        cluster: Arc<dyn ClusterClient>,
        installer: Arc<dyn OperatorInstaller>,
    ) -> Self {
        Self {
            installations,
            cluster,
            installer,
            events: Arc::new(vantage_common::events::NoopEventPublisher),
            settings: InstallerSettings::default(),
            timing: ControllerTiming::default(),
        }
    }
}

/// Builder for [`MonitoringContext`]
pub struct MonitoringContextBuilder {
    client: Client,
    cluster: Option<Arc<dyn ClusterClient>>,
    installer: Option<Arc<dyn OperatorInstaller>>,
    events: Option<Arc<dyn EventPublisher>>,
    settings: InstallerSettings,
    timing: ControllerTiming,
}

impl MonitoringContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            cluster: None,
            installer: None,
            events: None,
            settings: InstallerSettings::default(),
            timing: ControllerTiming::default(),
        }
    }

    /// Override the cluster client
    pub fn cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Override the operator installer
    pub fn installer(mut self, installer: Arc<dyn OperatorInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(mut self, settings: InstallerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn timing(mut self, timing: ControllerTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn build(self) -> MonitoringContext {
        MonitoringContext {
            installations: Arc::new(KubeInstallationClient::new(self.client.clone())),
            cluster: self
                .cluster
                .unwrap_or_else(|| Arc::new(KubeClusterClient::new(self.client.clone()))),
            installer: self
                .installer
                .unwrap_or_else(|| Arc::new(OlmInstaller::new(self.client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
            settings: self.settings,
            timing: self.timing,
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile the monitoring product of one Installation
#[instrument(skip(installation, ctx), fields(installation = %installation.name_any()))]
pub async fn reconcile(
    installation: Arc<Installation>,
    ctx: Arc<MonitoringContext>,
) -> Result<Action, MonitoringError> {
    let name = installation.name_any();
    let namespace = installation
        .namespace()
        .ok_or(MonitoringError::MissingNamespace)?;

    let mut product = installation
        .status
        .as_ref()
        .and_then(|s| s.products.get(PRODUCT_NAME))
        .cloned()
        .unwrap_or_else(|| ProductStatus::new(PRODUCT_NAME));

    let reconciler = Reconciler::new(
        ctx.installations.config_store(&namespace),
        ctx.installer.clone(),
        ctx.events.clone(),
        ctx.settings.clone(),
    );

    let pass = reconciler.reconcile(&installation, &mut product, ctx.cluster.as_ref());
    let outcome = match tokio::time::timeout(ctx.timing.pass_timeout, pass).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(timeout = ?ctx.timing.pass_timeout, "monitoring pass timed out");
            let outcome = PassOutcome::failed(MonitoringError::Timeout(ctx.timing.pass_timeout));
            product.name = PRODUCT_NAME.to_string();
            product.phase = Some(outcome.phase);
            product.message = Some(outcome.message());
            outcome
        }
    };

    let patch = status_patch(&installation, &product);
    ctx.installations
        .patch_status(&namespace, &name, &patch)
        .await?;

    Ok(requeue_for(&outcome, &ctx.timing))
}

/// Requeue policy for a finished pass
pub fn requeue_for(outcome: &PassOutcome, timing: &ControllerTiming) -> Action {
    match outcome.phase {
        ReconcilePhase::Completed if outcome.error.is_none() => Action::requeue(timing.requeue),
        _ => Action::requeue(timing.error_requeue),
    }
}

/// Merge patch writing our product entry and the readiness condition
pub fn status_patch(installation: &Installation, product: &ProductStatus) -> serde_json::Value {
    let existing = installation
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    let (status, reason) = match product.phase {
        Some(ReconcilePhase::Completed) => (ConditionStatus::True, "Reconciled"),
        Some(ReconcilePhase::InProgress) => (ConditionStatus::False, "InProgress"),
        Some(ReconcilePhase::Failed) => (ConditionStatus::False, "Failed"),
        None => (ConditionStatus::Unknown, "Pending"),
    };
    let condition = Condition::new(
        CONDITION_MONITORING_READY,
        status,
        reason,
        product.message.clone().unwrap_or_default(),
    );

    serde_json::json!({
        "status": {
            "products": { PRODUCT_NAME: product },
            "conditions": upsert_condition(existing, condition),
        }
    })
}

/// Replace the condition of the same type, keeping its transition time when
/// the status did not change
pub fn upsert_condition(mut conditions: Vec<Condition>, mut condition: Condition) -> Vec<Condition> {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
    conditions
}

/// Error policy for the controller
///
/// Transient errors requeue after `error_requeue`; permanent ones wait for
/// the Installation to change.
pub fn error_policy(
    installation: Arc<Installation>,
    error: &MonitoringError,
    ctx: Arc<MonitoringContext>,
) -> Action {
    error!(
        ?error,
        installation = %installation.name_any(),
        retryable = error.is_retryable(),
        "monitoring reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.timing.error_requeue)
    } else {
        Action::await_change()
    }
}
