//! Tracks the monitoring operator's installation
//!
//! Maps the install plan referenced by the Subscription onto the engine's
//! phase model: `Complete` is Completed, everything else is InProgress.
//! Installer failures never fail the pass; the next pass retries.

use tracing::{debug, warn};
use vantage_common::crd::{InstallPlan, Subscription, INSTALL_PLAN_PHASE_COMPLETE};

use crate::config::MonitoringSpec;
use crate::error::MonitoringError;
use crate::installer::{InstallerSettings, OperatorInstaller, OwnerRef};
use crate::outcome::PassOutcome;

/// What one install check observed
#[derive(Debug)]
pub struct OperatorInstallState {
    pub outcome: PassOutcome,
    pub subscription_found: bool,
    /// Phase of the plan the Subscription references, if it exists yet
    pub plan_phase: Option<String>,
    /// Installed CSV reported by the Subscription
    pub installed_csv: Option<String>,
}

impl OperatorInstallState {
    fn pending(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            subscription_found: false,
            plan_phase: None,
            installed_csv: None,
        }
    }
}

/// Request the install and report how far it got
pub async fn ensure_operator_installed(
    installer: &dyn OperatorInstaller,
    owner: &OwnerRef,
    spec: &MonitoringSpec,
    settings: &InstallerSettings,
) -> OperatorInstallState {
    let operator_namespace = spec.operator_namespace();
    let target = settings.target(operator_namespace);

    if let Err(e) = installer
        .install_operator(
            owner,
            &target,
            &[operator_namespace.to_string()],
            settings.approval,
        )
        .await
    {
        warn!(namespace = %operator_namespace, error = %e, "operator install request failed");
        return OperatorInstallState::pending(PassOutcome::in_progress_with(
            MonitoringError::Install {
                stage: "install",
                source: e,
            },
        ));
    }

    let (plans, subscription) = match installer
        .get_subscription_install_plans(&target.subscription_name, operator_namespace)
        .await
    {
        Ok(found) => found,
        Err(e) if e.is_not_found() => {
            debug!(namespace = %operator_namespace, "subscription not visible yet");
            return OperatorInstallState::pending(PassOutcome::in_progress());
        }
        Err(e) => {
            warn!(namespace = %operator_namespace, error = %e, "could not read install plans");
            return OperatorInstallState::pending(PassOutcome::in_progress_with(
                MonitoringError::Install {
                    stage: "status",
                    source: e,
                },
            ));
        }
    };

    let plan_phase = referenced_plan_phase(&subscription, &plans);
    let installed_csv = subscription
        .status
        .as_ref()
        .and_then(|s| s.installed_csv.clone());

    let outcome = if plan_phase.as_deref() == Some(INSTALL_PLAN_PHASE_COMPLETE) {
        PassOutcome::completed()
    } else {
        debug!(
            subscription = %target.subscription_name,
            phase = plan_phase.as_deref().unwrap_or("<none>"),
            "install plan not complete"
        );
        PassOutcome::in_progress()
    };

    OperatorInstallState {
        outcome,
        subscription_found: true,
        plan_phase,
        installed_csv,
    }
}

/// Phase of the plan named in the Subscription's status
fn referenced_plan_phase(subscription: &Subscription, plans: &[InstallPlan]) -> Option<String> {
    let reference = subscription.status.as_ref()?.install.as_ref()?;
    plans
        .iter()
        .find(|p| p.metadata.name.as_deref() == Some(reference.name.as_str()))
        .and_then(|p| p.status.as_ref())
        .map(|s| s.phase.clone())
}
