//! Kubernetes utility functions shared by Vantage crates

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connect timeout for API server connections
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for API calls
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a client from an explicit kubeconfig, or in-cluster / default config
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a client with explicit connect and read timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "kubeconfig",
                    format!("failed to read {}: {e}", path.display()),
                )
            })?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context("kubeconfig", format!("invalid kubeconfig: {e}"))
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("kubeconfig", format!("failed to infer config: {e}"))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);

    Client::try_from(config).map_err(Error::from)
}

/// Returns true when the error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Build an equality-based label selector string from key/value pairs
///
/// Pairs are emitted in the given order: `a=1,b=2`.
pub fn label_selector(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
