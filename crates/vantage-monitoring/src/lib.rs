//! Monitoring footprint reconciliation for Vantage Installations
//!
//! One pass, driven by [`reconciler::Reconciler`]:
//!
//! - **Config**: read the monitoring config, default and persist namespaces
//! - **Operator install**: subscribe the monitoring operator through OLM and
//!   gate everything else on its install plan completing
//! - **Eligibility**: select namespaces claimed by the Installation and opted
//!   in with `monitoring-key=middleware`, then list their ServiceMonitors
//!   once into a [`sources::SourceSnapshot`] shared by the two sync units
//! - **ServiceMonitor mirror**: clone product ServiceMonitors into the
//!   monitoring namespace and sweep stale clones
//! - **RoleBindings**: grant the cluster scraper `view` where there is
//!   something to scrape, and revoke it where there is not
//!
//! Ownership is encoded as labels on the objects themselves (see [`labels`]),
//! so passes carry no state between runs.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod eligibility;
pub mod error;
pub mod install_tracker;
pub mod installer;
pub mod labels;
pub mod outcome;
pub mod reconciler;
pub mod role_bindings;
pub mod service_monitors;
pub mod sources;

#[cfg(test)]
mod testing;

pub use controller::{error_policy, reconcile, ControllerTiming, MonitoringContext};
pub use error::MonitoringError;
pub use outcome::{PassOutcome, SyncReport};
pub use reconciler::Reconciler;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "vantage-monitoring";
