//! Error types shared by Vantage crates
//!
//! Leaf errors carry enough context (resource kind, namespace, name) to
//! diagnose a failed API call without re-running it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Vantage operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error without resource context
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Kubernetes API error for a specific object
    #[error("kubernetes error on {kind} {namespace}/{name}: {source}")]
    Api {
        /// Resource kind (e.g. "ServiceMonitor")
        kind: String,
        /// Namespace of the object (empty for cluster-scoped kinds)
        namespace: String,
        /// Object name, or "*" for list calls
        name: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "installer", "config")
        context: String,
    },
}

impl Error {
    /// Wrap a kube error with the object it was about
    pub fn api(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Api {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            source,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Serialization errors need a config or object fix.
    /// Kubernetes 4xx responses are not retried, everything else is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } | Error::Api { source, .. } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Returns true when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube { source } | Error::Api { source, .. } => {
                crate::kube_utils::is_not_found(source)
            }
            _ => false,
        }
    }
}
