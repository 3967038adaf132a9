//! Beacon Operator - monitoring-spec reconciliation for Installations

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use beacon_common::crd::Installation;
use beacon_common::kube_utils::create_client;
use beacon_common::telemetry::{init_logging, TelemetryConfig};
use beacon_common::{KubeEventPublisher, FIELD_MANAGER};
use beacon_monitoring::{MonitoringIdentity, OlmInstaller, OperatorSettings};
use beacon_operator::controller::{
    error_policy, reconcile, Context, InstallationKubeClientImpl, KubeMonitoringPass,
};

/// Beacon - mirrors product ServiceMonitors into the central monitoring stack
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about, long_about = None)]
struct Cli {
    /// Generate the Installation CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// Only watch Installations in this namespace (all namespaces if unset)
    #[arg(long, env = "WATCH_NAMESPACE", global = true)]
    watch_namespace: Option<String>,

    /// Service account the monitoring stack scrapes with
    #[arg(
        long,
        env = "MONITORING_SERVICE_ACCOUNT",
        default_value = beacon_monitoring::grants::DEFAULT_SERVICE_ACCOUNT,
        global = true
    )]
    monitoring_service_account: String,

    /// Namespace of the monitoring service account
    #[arg(
        long,
        env = "MONITORING_SERVICE_ACCOUNT_NAMESPACE",
        default_value = beacon_monitoring::grants::DEFAULT_SERVICE_ACCOUNT_NAMESPACE,
        global = true
    )]
    monitoring_service_account_namespace: String,

    /// Subscription (and package) name of the monitoring operator
    #[arg(
        long,
        env = "MONITORING_SUBSCRIPTION_NAME",
        default_value = beacon_monitoring::installer::DEFAULT_SUBSCRIPTION_NAME,
        global = true
    )]
    subscription_name: String,

    /// Subscription channel of the monitoring operator
    #[arg(
        long,
        env = "MONITORING_CHANNEL",
        default_value = beacon_monitoring::installer::DEFAULT_CHANNEL,
        global = true
    )]
    channel: String,

    /// Catalog source providing the monitoring operator
    #[arg(
        long,
        env = "MONITORING_CATALOG_SOURCE",
        default_value = beacon_monitoring::installer::DEFAULT_CATALOG_SOURCE,
        global = true
    )]
    catalog_source: String,

    /// Namespace of the catalog source
    #[arg(
        long,
        env = "MONITORING_CATALOG_SOURCE_NAMESPACE",
        default_value = beacon_monitoring::installer::DEFAULT_CATALOG_SOURCE_NAMESPACE,
        global = true
    )]
    catalog_source_namespace: String,

    /// Path to a kubeconfig file (in-cluster or default config if unset)
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Pod running this replica, recorded as the reporting instance on events
    #[arg(long, env = "POD_NAME", global = true)]
    pod_name: Option<String>,

    /// Human-readable log lines instead of JSON
    #[arg(long, global = true)]
    plain_logs: bool,
}

impl ControllerArgs {
    fn identity(&self) -> MonitoringIdentity {
        MonitoringIdentity {
            service_account: self.monitoring_service_account.clone(),
            namespace: self.monitoring_service_account_namespace.clone(),
        }
    }

    fn operator_settings(&self) -> OperatorSettings {
        OperatorSettings {
            subscription_name: self.subscription_name.clone(),
            channel: self.channel.clone(),
            catalog_source: self.catalog_source.clone(),
            catalog_source_namespace: self.catalog_source_namespace.clone(),
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

    init_logging(TelemetryConfig {
        json: !cli.controller.plain_logs,
        ..Default::default()
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

/// Ensure the Installation CRD is installed
///
/// Applied server-side on every start so the stored schema always matches
/// this binary.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Installation CRD...");
    crds.patch(
        "installations.beacon.dev",
        &params,
        &Patch::Apply(&Installation::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Installation CRD: {}", e))?;

    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Starting Beacon controller...");

    let client = create_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    let installations: Api<Installation> = match args.watch_namespace.as_deref() {
        Some(ns) if !ns.is_empty() => {
            tracing::info!(namespace = %ns, "watching Installations in one namespace");
            Api::namespaced(client.clone(), ns)
        }
        _ => Api::all(client.clone()),
    };

    let events = Arc::new(KubeEventPublisher::new(
        client.clone(),
        FIELD_MANAGER,
        args.pod_name.clone(),
    ));
    let pass = KubeMonitoringPass::new(
        client.clone(),
        Arc::new(OlmInstaller::new(client.clone())),
        events,
        args.identity(),
        args.operator_settings(),
    );
    let ctx = Arc::new(Context::new(
        Arc::new(InstallationKubeClientImpl::new(client.clone())),
        Arc::new(pass),
    ));

    tracing::info!(
        service_account = %args.monitoring_service_account,
        subscription = %args.subscription_name,
        "Installation controller"
    );

    Controller::new(installations, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Installation reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Installation reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Beacon controller shutting down");
    Ok(())
}
