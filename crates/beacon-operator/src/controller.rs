//! Installation controller
//!
//! Drives one monitoring-spec pass per Installation reconcile and records
//! the outcome on `status.products["monitoring-spec"]`. A finalizer keeps
//! the Installation around until every mirror and grant it caused is gone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use beacon_common::crd::{Installation, InstallationStatus, ProductStatus, StatusPhase};
use beacon_common::{Error, EventPublisher, FIELD_MANAGER};
use beacon_monitoring::{
    ConfigMapConfigReadWriter, KubeMonitoringClient, MonitoringIdentity,
    MonitoringOperatorInstaller, NoQuota, OperatorSettings, Reconciler, PRODUCT_NAME,
};

/// Finalizer guarding teardown of mirrored monitors and grants
pub const MONITORING_FINALIZER: &str = "beacon.dev/monitoring-cleanup";

/// Requeue interval while the operator installs or teardown waits
pub const IN_PROGRESS_REQUEUE: Duration = Duration::from_secs(10);
/// Drift-check interval once a pass completed
pub const COMPLETED_REQUEUE: Duration = Duration::from_secs(300);
/// Retry interval after a retryable error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Trait abstracting Installation writes for testability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstallationKubeClient: Send + Sync {
    /// Patch Installation status
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &InstallationStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to an Installation
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from an Installation
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct InstallationKubeClientImpl {
    client: Client,
}

impl InstallationKubeClientImpl {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl InstallationKubeClient for InstallationKubeClientImpl {
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &InstallationStatus,
    ) -> Result<(), Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);

        let mut status_value =
            serde_json::to_value(status).map_err(|e| Error::serialization(e.to_string()))?;
        // merge patches only clear fields sent as null
        status_value["lastError"] = status.last_error.clone().into();
        let status_patch = serde_json::json!({
            "status": status_value
        });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        let installation = api.get(name).await?;
        let mut finalizers = installation.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(name, namespace, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        let installation = api.get(name).await?;
        let finalizers: Vec<String> = installation
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.patch_finalizers(name, namespace, finalizers).await
    }
}

/// One monitoring-spec pass for an Installation
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringPass: Send + Sync {
    /// Run a pass, writing the phase into `product`
    async fn run(
        &self,
        installation: &Installation,
        product: &mut ProductStatus,
        uninstall: bool,
    ) -> Result<StatusPhase, Error>;
}

/// [`MonitoringPass`] against the live cluster
///
/// Product configuration lives in the Installation's own namespace, so a
/// [`Reconciler`] is assembled per pass.
pub struct KubeMonitoringPass {
    client: Client,
    installer: Arc<dyn MonitoringOperatorInstaller>,
    events: Arc<dyn EventPublisher>,
    identity: MonitoringIdentity,
    operator: OperatorSettings,
}

impl KubeMonitoringPass {
    /// Create a pass runner
    pub fn new(
        client: Client,
        installer: Arc<dyn MonitoringOperatorInstaller>,
        events: Arc<dyn EventPublisher>,
        identity: MonitoringIdentity,
        operator: OperatorSettings,
    ) -> Self {
        Self {
            client,
            installer,
            events,
            identity,
            operator,
        }
    }
}

#[async_trait]
impl MonitoringPass for KubeMonitoringPass {
    async fn run(
        &self,
        installation: &Installation,
        product: &mut ProductStatus,
        uninstall: bool,
    ) -> Result<StatusPhase, Error> {
        let namespace = installation.namespace().unwrap_or_default();
        let reconciler = Reconciler::new(
            Arc::new(ConfigMapConfigReadWriter::new(self.client.clone(), namespace)),
            self.installer.clone(),
            self.events.clone(),
        )
        .with_identity(self.identity.clone())
        .with_operator_settings(self.operator.clone());

        let store = KubeMonitoringClient::new(self.client.clone());
        reconciler
            .reconcile(installation, product, &store, &NoQuota, uninstall)
            .await
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Controller context shared across reconciliations
pub struct Context {
    /// Installation writes
    pub kube: Arc<dyn InstallationKubeClient>,
    /// Monitoring pass runner
    pub monitoring: Arc<dyn MonitoringPass>,
}

impl Context {
    /// Create a new Context
    pub fn new(kube: Arc<dyn InstallationKubeClient>, monitoring: Arc<dyn MonitoringPass>) -> Self {
        Self { kube, monitoring }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

fn has_finalizer(installation: &Installation) -> bool {
    installation
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == MONITORING_FINALIZER))
}

/// Requeue action after a pass that ended in `phase`
pub fn requeue_for(phase: StatusPhase) -> Action {
    match phase {
        StatusPhase::Completed => Action::requeue(COMPLETED_REQUEUE),
        StatusPhase::InProgress => Action::requeue(IN_PROGRESS_REQUEUE),
        StatusPhase::Failed => Action::requeue(ERROR_REQUEUE),
    }
}

/// Status after a pass: the product entry replaced, the overall phase
/// following the monitoring product
pub fn build_status(
    installation: &Installation,
    product: ProductStatus,
    error: Option<&Error>,
) -> InstallationStatus {
    let mut status = installation.status.clone().unwrap_or_default();
    status.phase = product.phase;
    status.products.insert(PRODUCT_NAME.to_string(), product);
    status.last_error = error.map(|e| e.to_string());
    status.last_updated = Some(Utc::now());
    status
}

/// Reconcile one Installation
///
/// Adds the cleanup finalizer first, runs a pass (a teardown pass once the
/// Installation is being deleted), records the outcome in status and
/// releases the finalizer when teardown completes.
#[instrument(skip(installation, ctx), fields(installation = %installation.name_any()))]
pub async fn reconcile(installation: Arc<Installation>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = installation.name_any();
    let namespace = installation
        .namespace()
        .ok_or_else(|| Error::validation("Installation must be namespaced"))?;
    let uninstall = installation.metadata.deletion_timestamp.is_some();

    if !has_finalizer(&installation) {
        if uninstall {
            debug!("installation deleting without finalizer, nothing to clean up");
            return Ok(Action::await_change());
        }
        info!("adding monitoring cleanup finalizer");
        ctx.kube
            .add_finalizer(&name, &namespace, MONITORING_FINALIZER)
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let mut product = installation
        .status
        .as_ref()
        .and_then(|s| s.products.get(PRODUCT_NAME).cloned())
        .unwrap_or_else(|| ProductStatus::new(PRODUCT_NAME));

    let result = ctx
        .monitoring
        .run(&installation, &mut product, uninstall)
        .await;

    let status = build_status(&installation, product, result.as_ref().err());
    ctx.kube.patch_status(&name, &namespace, &status).await?;

    let phase = result?;
    if uninstall && phase == StatusPhase::Completed {
        info!("monitoring teardown complete, releasing finalizer");
        ctx.kube
            .remove_finalizer(&name, &namespace, MONITORING_FINALIZER)
            .await?;
        return Ok(Action::await_change());
    }

    debug!(%phase, "monitoring pass finished");
    Ok(requeue_for(phase))
}

/// Error policy for the Installation controller
pub fn error_policy(installation: Arc<Installation>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        installation = %installation.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        warn!("waiting for an Installation change before retrying");
        Action::await_change()
    }
}
