//! Monitoring-spec reconcile orchestration
//!
//! One call to [`Reconciler::reconcile`] is one pass: read configuration,
//! resolve namespaces, make sure the monitoring operator is installed, then
//! mirror, grant and collect. Every pass recomputes the desired state from
//! the cluster, so a failed pass is simply retried by the caller.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use beacon_common::crd::{Installation, ProductStatus, StatusPhase};
use beacon_common::events::{actions, reasons};
use beacon_common::{Error, EventPublisher};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::client::MonitoringKubeClient;
use crate::config::{ConfigReadWriter, MonitoringSpecConfig};
use crate::gc::{collect_garbage, GcReport};
use crate::grants::{sync_grants, GrantStats, MonitoringIdentity};
use crate::installer::{Approval, InstallPlanPhase, MonitoringOperatorInstaller, OperatorSettings};
use crate::mirror::{sync_mirrors, MirrorStats};
use crate::resolver;
use crate::scanner::scan_sources;
use crate::state::DesiredState;

/// Product key of the monitoring-spec product in installation status
pub const PRODUCT_NAME: &str = "monitoring-spec";
/// Version recorded on the product status when a pass completes
pub const PRODUCT_VERSION: &str = "1.0";
/// Operator version recorded when the subscription reports no installed CSV
pub const OPERATOR_VERSION: &str = "1.0";

/// Quota settings of the installation
///
/// Carried through a pass and recorded on its span; nothing in the
/// monitoring product is sized by quota.
pub trait QuotaConfig: Send + Sync {
    /// Quota name, e.g. `"20"` or `"none"`
    fn name(&self) -> &str;
}

/// Quota for installations without one
#[derive(Clone, Copy, Debug, Default)]
pub struct NoQuota;

impl QuotaConfig for NoQuota {
    fn name(&self) -> &str {
        "none"
    }
}

/// Counts from one successful sync pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Product namespaces scanned
    pub namespaces: usize,
    /// Source ServiceMonitors found
    pub sources: usize,
    /// Mirror outcomes
    pub mirrors: MirrorStats,
    /// Grant objects created
    pub grants: GrantStats,
    /// Objects collected
    pub gc: GcReport,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources in {} namespaces; mirrors created {}, updated {}, skipped {}; \
             grants created {}; deleted {} stale objects",
            self.sources,
            self.namespaces,
            self.mirrors.created,
            self.mirrors.updated,
            self.mirrors.skipped,
            self.grants.roles_created + self.grants.bindings_created,
            self.gc.total(),
        )
    }
}

enum OperatorState {
    Ready { version: Option<String> },
    Pending(String),
}

enum PassOutcome {
    Synced {
        summary: PassSummary,
        operator_version: Option<String>,
    },
    Installing(String),
    Uninstalled,
    Uninstalling,
}

/// Drives monitoring-spec reconcile passes
pub struct Reconciler {
    config: Arc<dyn ConfigReadWriter>,
    installer: Arc<dyn MonitoringOperatorInstaller>,
    events: Arc<dyn EventPublisher>,
    identity: MonitoringIdentity,
    operator: OperatorSettings,
}

impl Reconciler {
    /// Create a reconciler with the default monitoring identity and operator settings
    pub fn new(
        config: Arc<dyn ConfigReadWriter>,
        installer: Arc<dyn MonitoringOperatorInstaller>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            installer,
            events,
            identity: MonitoringIdentity::default(),
            operator: OperatorSettings::default(),
        }
    }

    /// Bind grants to a different monitoring identity
    pub fn with_identity(mut self, identity: MonitoringIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Install the monitoring operator from different OLM coordinates
    pub fn with_operator_settings(mut self, operator: OperatorSettings) -> Self {
        self.operator = operator;
        self
    }

    /// Run one pass for `installation`
    ///
    /// The resulting phase is written into `product`. `Err` always means
    /// the pass failed and `product.phase` is [`StatusPhase::Failed`].
    #[instrument(
        skip_all,
        fields(
            installation = %installation.name_any(),
            namespace = %installation.namespace().unwrap_or_default(),
            install_type = %installation.spec.install_type,
            quota = quota.name(),
            uninstall = uninstall,
        )
    )]
    pub async fn reconcile(
        &self,
        installation: &Installation,
        product: &mut ProductStatus,
        client: &dyn MonitoringKubeClient,
        quota: &dyn QuotaConfig,
        uninstall: bool,
    ) -> Result<StatusPhase, Error> {
        product.name = PRODUCT_NAME.to_string();

        let outcome = match self.run(installation, client, uninstall).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "monitoring reconcile failed");
                product.phase = StatusPhase::Failed;
                self.publish(
                    installation,
                    EventType::Warning,
                    reasons::RECONCILE_FAILED,
                    if uninstall { actions::UNINSTALL } else { actions::RECONCILE },
                    e.to_string(),
                )
                .await;
                return Err(e);
            }
        };

        let phase = match outcome {
            PassOutcome::Synced {
                summary,
                operator_version,
            } => {
                info!(%summary, "monitoring spec synced");
                product.version = Some(PRODUCT_VERSION.to_string());
                product.operator_version =
                    Some(operator_version.unwrap_or_else(|| OPERATOR_VERSION.to_string()));
                self.publish(
                    installation,
                    EventType::Normal,
                    reasons::MONITORING_SYNCED,
                    actions::RECONCILE,
                    summary.to_string(),
                )
                .await;
                StatusPhase::Completed
            }
            PassOutcome::Installing(plan) => {
                self.publish(
                    installation,
                    EventType::Normal,
                    reasons::OPERATOR_INSTALLING,
                    actions::RECONCILE,
                    plan,
                )
                .await;
                StatusPhase::InProgress
            }
            PassOutcome::Uninstalled => {
                self.publish(
                    installation,
                    EventType::Normal,
                    reasons::UNINSTALL_COMPLETE,
                    actions::UNINSTALL,
                    "monitoring objects removed".to_string(),
                )
                .await;
                StatusPhase::Completed
            }
            PassOutcome::Uninstalling => StatusPhase::InProgress,
        };
        product.phase = phase;
        Ok(phase)
    }

    async fn publish(
        &self,
        installation: &Installation,
        type_: EventType,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.events
            .publish(&installation.object_ref(&()), type_, reason, action, Some(note))
            .await;
    }

    async fn read_config(&self) -> Result<MonitoringSpecConfig, Error> {
        self.config.read_monitoring_spec().await.map_err(|e| match e {
            Error::ConfigUnreadable { .. } => e,
            other => Error::config_unreadable(other.to_string()),
        })
    }

    async fn run(
        &self,
        installation: &Installation,
        client: &dyn MonitoringKubeClient,
        uninstall: bool,
    ) -> Result<PassOutcome, Error> {
        let mut config = self.read_config().await?;

        if uninstall {
            let monitoring_ns = resolver::monitoring_namespace(installation, &config);
            let operator_ns = resolver::operator_namespace(&config, &monitoring_ns);
            return self.teardown(client, &monitoring_ns, &operator_ns).await;
        }

        let (monitoring_ns, changed) = resolver::resolve_config(installation, &mut config);
        if changed {
            self.config.write_config(&config).await?;
            debug!(namespace = %monitoring_ns, "recorded resolved monitoring namespace");
        }
        let operator_ns = resolver::operator_namespace(&config, &monitoring_ns);

        let operator_version = match self.ensure_operator(&operator_ns).await? {
            OperatorState::Ready { version } => version,
            OperatorState::Pending(note) => return Ok(PassOutcome::Installing(note)),
        };

        let summary = self.sync(client, &monitoring_ns).await?;
        Ok(PassOutcome::Synced {
            summary,
            operator_version,
        })
    }

    async fn ensure_operator(&self, operator_ns: &str) -> Result<OperatorState, Error> {
        let target = self.operator.target(operator_ns);
        self.installer
            .install_operator(&target, &[operator_ns.to_string()], Approval::Automatic)
            .await
            .map_err(as_upstream)?;

        let (plan, subscription) = self
            .installer
            .get_subscription_install_plan(&target.subscription_name, operator_ns)
            .await
            .map_err(as_upstream)?;

        match plan {
            Some(plan) if plan.phase == InstallPlanPhase::Complete => {
                Ok(OperatorState::Ready {
                    version: subscription.operator_version(),
                })
            }
            Some(plan) => {
                info!(plan = %plan.name, phase = ?plan.phase, "waiting for monitoring operator install plan");
                Ok(OperatorState::Pending(format!(
                    "install plan {} is {:?}",
                    plan.name, plan.phase
                )))
            }
            None => {
                info!(subscription = %subscription.name, "monitoring operator subscription has no install plan yet");
                Ok(OperatorState::Pending(format!(
                    "subscription {} has no install plan yet",
                    target.subscription_name
                )))
            }
        }
    }

    async fn sync(
        &self,
        client: &dyn MonitoringKubeClient,
        monitoring_ns: &str,
    ) -> Result<PassSummary, Error> {
        let namespaces = resolver::product_namespaces(client, monitoring_ns).await?;
        let sources = scan_sources(client, &namespaces).await?;

        let mut desired = DesiredState::empty();
        let mirrors = sync_mirrors(client, &sources, monitoring_ns, &mut desired).await?;

        let source_namespaces: BTreeSet<String> =
            sources.iter().map(|s| s.namespace.clone()).collect();
        let grants = sync_grants(client, &source_namespaces, &self.identity, &mut desired).await?;

        let gc = collect_garbage(client, monitoring_ns, &desired).await?;

        Ok(PassSummary {
            namespaces: namespaces.len(),
            sources: sources.len(),
            mirrors,
            grants,
            gc,
        })
    }

    async fn teardown(
        &self,
        client: &dyn MonitoringKubeClient,
        monitoring_ns: &str,
        operator_ns: &str,
    ) -> Result<PassOutcome, Error> {
        let report = collect_garbage(client, monitoring_ns, &DesiredState::empty()).await?;
        info!(deleted = report.total(), "removed monitoring objects for uninstall");

        self.installer
            .uninstall_operator(&self.operator.subscription_name, operator_ns)
            .await
            .map_err(as_upstream)?;

        let exists = self
            .installer
            .subscription_exists(&self.operator.subscription_name, operator_ns)
            .await
            .map_err(as_upstream)?;
        if exists {
            debug!(namespace = %operator_ns, "monitoring operator subscription still present");
            Ok(PassOutcome::Uninstalling)
        } else {
            Ok(PassOutcome::Uninstalled)
        }
    }
}

fn as_upstream(e: Error) -> Error {
    match e {
        Error::UpstreamInstall { .. } => e,
        other => Error::upstream_install(other.to_string()),
    }
}
