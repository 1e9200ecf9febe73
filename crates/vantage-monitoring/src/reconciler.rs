//! One monitoring reconciliation pass
//!
//! ConfigLoad -> OperatorInstall (gate) -> ResourceSync -> Done.
//!
//! Nothing under ResourceSync runs until the operator's install plan is
//! Complete. Eligibility is resolved and sources are listed once; the
//! ServiceMonitor mirror and RoleBinding provisioner then run concurrently
//! on that same snapshot.

use std::sync::Arc;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};
use vantage_common::crd::{Installation, ProductStatus, ReconcilePhase};
use vantage_common::events::{actions, reasons, EventPublisher};
use vantage_common::metrics::{set_eligible_namespaces, PassTimer};

use crate::cluster::ClusterClient;
use crate::config::{ConfigReadWriter, MonitoringSpec};
use crate::eligibility::list_eligible_namespaces;
use crate::error::MonitoringError;
use crate::install_tracker::ensure_operator_installed;
use crate::installer::{InstallerSettings, OperatorInstaller, OwnerRef};
use crate::labels::OwnershipLabeler;
use crate::outcome::PassOutcome;
use crate::role_bindings::sync_role_bindings;
use crate::service_monitors::sync_service_monitors;
use crate::sources::SourceSnapshot;

/// Key of this product under `status.products`
pub const PRODUCT_NAME: &str = "monitoring-spec";
/// Product version reported in the status entry
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Drives monitoring passes for Installations
pub struct Reconciler {
    config: Arc<dyn ConfigReadWriter>,
    installer: Arc<dyn OperatorInstaller>,
    events: Arc<dyn EventPublisher>,
    settings: InstallerSettings,
}

impl Reconciler {
    pub fn new(
        config: Arc<dyn ConfigReadWriter>,
        installer: Arc<dyn OperatorInstaller>,
        events: Arc<dyn EventPublisher>,
        settings: InstallerSettings,
    ) -> Self {
        Self {
            config,
            installer,
            events,
            settings,
        }
    }

    /// Run one pass and record its result in `product`
    ///
    /// Never returns early without a phase: every failure is folded into the
    /// returned outcome.
    pub async fn reconcile(
        &self,
        installation: &Installation,
        product: &mut ProductStatus,
        cluster: &dyn ClusterClient,
    ) -> PassOutcome {
        let key = format!(
            "{}/{}",
            installation.namespace().unwrap_or_default(),
            installation.name_any()
        );
        let previous = product.phase;
        let timer = PassTimer::start(&key);

        let outcome = self.run_pass(installation, product, cluster).await;

        product.name = PRODUCT_NAME.to_string();
        product.phase = Some(outcome.phase);
        product.version = Some(PRODUCT_VERSION.to_string());
        product.message = Some(outcome.message());

        match &outcome.error {
            Some(e) => timer.finish_with_error(outcome.phase.as_str(), e.error_type()),
            None => timer.finish(outcome.phase.as_str()),
        }
        self.publish_outcome(installation, previous, &outcome).await;

        info!(
            installation = %key,
            phase = %outcome.phase,
            message = %outcome.message(),
            "monitoring pass finished"
        );
        outcome
    }

    async fn run_pass(
        &self,
        installation: &Installation,
        product: &mut ProductStatus,
        cluster: &dyn ClusterClient,
    ) -> PassOutcome {
        let Some(namespace) = installation.namespace() else {
            return PassOutcome::failed(MonitoringError::MissingNamespace);
        };
        let Some(uid) = installation.uid() else {
            return PassOutcome::failed(MonitoringError::MissingUid);
        };

        // ConfigLoad
        let (spec, config_error) = match self.load_config(installation, &namespace).await {
            Ok(loaded) => loaded,
            Err(e) => return PassOutcome::failed(e),
        };

        // OperatorInstall
        let owner = OwnerRef {
            name: installation.name_any(),
            namespace: namespace.clone(),
            uid: uid.clone(),
        };
        let install = ensure_operator_installed(
            self.installer.as_ref(),
            &owner,
            &spec,
            &self.settings,
        )
        .await;
        if install.installed_csv.is_some() {
            product.operator_version = install.installed_csv.clone();
        }
        if install.outcome.phase != ReconcilePhase::Completed {
            debug!(
                subscription_found = install.subscription_found,
                plan_phase = install.plan_phase.as_deref().unwrap_or("<none>"),
                "monitoring operator not ready, gating resource sync"
            );
            return install.outcome.with_error(config_error);
        }

        // ResourceSync
        let labeler = OwnershipLabeler::new(uid);
        let eligible = match list_eligible_namespaces(cluster, &labeler).await {
            Ok(eligible) => eligible,
            Err(e) => return PassOutcome::failed(e).with_error(config_error),
        };
        set_eligible_namespaces(
            &format!("{namespace}/{}", owner.name),
            eligible.len() as i64,
        );

        let sources = SourceSnapshot::collect(cluster, &eligible).await;
        let (mirrored, bound) = tokio::join!(
            sync_service_monitors(cluster, &sources, spec.namespace(), &labeler),
            sync_role_bindings(cluster, &sources, &labeler),
        );

        let mut failures = sources.into_failures();
        for (unit, result) in [("ServiceMonitor", mirrored), ("RoleBinding", bound)] {
            match result {
                Ok(report) => debug!(unit, %report, "sync unit converged"),
                Err(e) => failures.extend(e.into_failures()),
            }
        }

        let outcome = match failures.len() {
            0 => PassOutcome::completed(),
            1 => PassOutcome::failed(failures.remove(0)),
            _ => PassOutcome::failed(MonitoringError::PartialSync(failures)),
        };
        outcome.with_error(config_error)
    }

    /// Read the config, fill defaults and persist them
    ///
    /// A read failure is fatal to the pass; a write failure is returned
    /// alongside the defaulted spec.
    async fn load_config(
        &self,
        installation: &Installation,
        namespace: &str,
    ) -> Result<(MonitoringSpec, Option<MonitoringError>), MonitoringError> {
        let mut spec = self
            .config
            .read_monitoring_spec()
            .await
            .map_err(|e| MonitoringError::ConfigRead(e.to_string()))?;

        if !spec.apply_defaults(namespace) {
            return Ok((spec, None));
        }

        match self.config.write_config(&spec).await {
            Ok(()) => {
                info!(
                    namespace = %spec.namespace(),
                    operator_namespace = %spec.operator_namespace(),
                    "persisted defaulted monitoring config"
                );
                self.events
                    .publish(
                        &installation.object_ref(&()),
                        EventType::Normal,
                        reasons::CONFIG_DEFAULTED,
                        actions::CONFIGURE,
                        Some(format!("monitoring namespace set to {}", spec.namespace())),
                    )
                    .await;
                Ok((spec, None))
            }
            Err(e) => {
                warn!(error = %e, "could not persist defaulted monitoring config");
                Ok((spec, Some(MonitoringError::ConfigWrite(e.to_string()))))
            }
        }
    }

    async fn publish_outcome(
        &self,
        installation: &Installation,
        previous: Option<ReconcilePhase>,
        outcome: &PassOutcome,
    ) {
        let (type_, reason, action) = match outcome.phase {
            ReconcilePhase::Failed => (EventType::Warning, reasons::MONITORING_FAILED, actions::RECONCILE),
            ReconcilePhase::Completed if previous != Some(ReconcilePhase::Completed) => {
                (EventType::Normal, reasons::MONITORING_RECONCILED, actions::RECONCILE)
            }
            ReconcilePhase::InProgress if previous.is_none() => {
                (EventType::Normal, reasons::OPERATOR_INSTALLING, actions::INSTALL)
            }
            _ => return,
        };
        self.events
            .publish(
                &installation.object_ref(&()),
                type_,
                reason,
                action,
                Some(outcome.message()),
            )
            .await;
    }
}
