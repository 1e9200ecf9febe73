//! Custom Resource Definitions used by Vantage
//!
//! `Installation` is owned by Vantage. The ServiceMonitor and OLM types are
//! third-party resources; only the fields the reconciler reads or writes are
//! typed, everything else round-trips through flattened maps.

mod installation;
mod olm;
mod service_monitor;
mod types;

pub use installation::{
    Installation, InstallationSpec, InstallationStatus, ProductStatus, ReconcilePhase,
};
pub use olm::{
    Approval, InstallPlan, InstallPlanReference, InstallPlanSpec, InstallPlanStatus,
    OperatorGroup, OperatorGroupSpec, Subscription, SubscriptionSpec, SubscriptionStatus,
    INSTALL_PLAN_PHASE_COMPLETE,
};
pub use service_monitor::{
    Endpoint, MonitorLabelSelector, NamespaceSelector, ServiceMonitor, ServiceMonitorSpec,
};
pub use types::{Condition, ConditionStatus};
