//! Common types for Vantage: CRDs, errors, events, metrics and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Standard label naming the tool that manages an object
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
