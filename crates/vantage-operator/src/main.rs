//! Vantage operator - reconciles the monitoring footprint of Installations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, CustomResourceExt};

use vantage_common::crd::{Approval, Installation};
use vantage_common::kube_utils::create_client;
use vantage_common::telemetry::{init_telemetry, TelemetryConfig};
use vantage_monitoring::installer::{
    InstallerSettings, DEFAULT_CATALOG_SOURCE, DEFAULT_CATALOG_SOURCE_NAMESPACE, DEFAULT_CHANNEL,
    DEFAULT_PACKAGE,
};
use vantage_monitoring::{error_policy, reconcile, ControllerTiming, MonitoringContext};

/// Server-side watch timeout, below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Vantage - installs platform monitoring and keeps its footprint in sync
#[derive(Parser, Debug)]
#[command(name = "vantage-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Installation CRD as YAML and exit
    #[arg(long)]
    crd: bool,

    /// Path to a kubeconfig; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Only watch Installations in this namespace
    #[arg(long, env = "VANTAGE_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Seconds between passes once converged
    #[arg(long, env = "VANTAGE_REQUEUE_SECS", default_value_t = 300)]
    requeue_secs: u64,

    /// Seconds before retrying an in-progress or failed pass
    #[arg(long, env = "VANTAGE_ERROR_REQUEUE_SECS", default_value_t = 30)]
    error_requeue_secs: u64,

    /// Upper bound on one pass, in seconds
    #[arg(long, env = "VANTAGE_PASS_TIMEOUT_SECS", default_value_t = 120)]
    pass_timeout_secs: u64,

    /// OLM package of the monitoring operator
    #[arg(long, env = "VANTAGE_OPERATOR_PACKAGE", default_value = DEFAULT_PACKAGE)]
    operator_package: String,

    /// Subscription channel
    #[arg(long, env = "VANTAGE_OPERATOR_CHANNEL", default_value = DEFAULT_CHANNEL)]
    operator_channel: String,

    /// Catalog source providing the package
    #[arg(long, env = "VANTAGE_CATALOG_SOURCE", default_value = DEFAULT_CATALOG_SOURCE)]
    catalog_source: String,

    /// Namespace of the catalog source
    #[arg(
        long,
        env = "VANTAGE_CATALOG_SOURCE_NAMESPACE",
        default_value = DEFAULT_CATALOG_SOURCE_NAMESPACE
    )]
    catalog_source_namespace: String,

    /// Require manual approval of install plans
    #[arg(long, env = "VANTAGE_MANUAL_APPROVAL")]
    manual_approval: bool,
}

impl Cli {
    fn installer_settings(&self) -> InstallerSettings {
        InstallerSettings {
            package: self.operator_package.clone(),
            channel: self.operator_channel.clone(),
            catalog_source: self.catalog_source.clone(),
            catalog_source_namespace: self.catalog_source_namespace.clone(),
            approval: if self.manual_approval {
                Approval::Manual
            } else {
                Approval::Automatic
            },
        }
    }

    fn timing(&self) -> ControllerTiming {
        ControllerTiming {
            requeue: Duration::from_secs(self.requeue_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Installation::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "vantage-operator".to_string(),
        ..Default::default()
    })?;

    let client = create_client(cli.kubeconfig.as_deref()).await?;

    let installations: Api<Installation> = match &cli.watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(
        MonitoringContext::builder(client)
            .settings(cli.installer_settings())
            .timing(cli.timing())
            .build(),
    );

    tracing::info!(
        watch_namespace = cli.watch_namespace.as_deref().unwrap_or("<all>"),
        package = %cli.operator_package,
        "starting Installation monitoring controller"
    );

    Controller::new(
        installations,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| {
        match result {
            Ok((installation, action)) => {
                tracing::debug!(%installation, ?action, "monitoring reconciliation completed")
            }
            Err(e) => tracing::error!(error = ?e, "monitoring reconciliation error"),
        }
        futures::future::ready(())
    })
    .await;

    tracing::info!("controller stopped");
    Ok(())
}
