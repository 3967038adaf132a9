//! Namespace resolution
//!
//! Turns an [`Installation`] plus its product configuration into the
//! monitoring namespace and the ordered list of product namespaces to scan.
//! This is the only place the install type is looked at.

use beacon_common::crd::Installation;
use beacon_common::Error;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::debug;

use crate::client::MonitoringKubeClient;
use crate::config::MonitoringSpecConfig;

/// Label selecting namespaces whose ServiceMonitors are mirrored
pub const PRODUCT_NAMESPACE_SELECTOR: &str = "monitoring-key=middleware";

const TERMINATING: &str = "Terminating";

/// Fallback monitoring namespace for an installation
///
/// `<prefix>observability` for managed-API installs, `<prefix>monitoring`
/// for everything else.
pub fn default_monitoring_namespace(installation: &Installation) -> String {
    let suffix = if installation.spec.install_type.is_managed_api() {
        "observability"
    } else {
        "monitoring"
    };
    format!("{}{}", installation.spec.namespace_prefix, suffix)
}

/// Monitoring namespace: `NAMESPACE`, then `OPERATOR_NAMESPACE`, then the
/// install-type default
pub fn monitoring_namespace(installation: &Installation, config: &MonitoringSpecConfig) -> String {
    config
        .namespace()
        .or_else(|| config.operator_namespace())
        .map(str::to_string)
        .unwrap_or_else(|| default_monitoring_namespace(installation))
}

/// Operator namespace: `OPERATOR_NAMESPACE`, else `<monitoring>-operator`
pub fn operator_namespace(config: &MonitoringSpecConfig, monitoring_ns: &str) -> String {
    config
        .operator_namespace()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-operator", monitoring_ns))
}

/// Fill in an empty `NAMESPACE` with the resolved monitoring namespace
///
/// Returns the resolved namespace and whether `config` changed and should be
/// written back.
pub fn resolve_config(installation: &Installation, config: &mut MonitoringSpecConfig) -> (String, bool) {
    let ns = monitoring_namespace(installation, config);
    if config.namespace().is_some() {
        return (ns, false);
    }
    config.set_namespace(ns.clone());
    (ns, true)
}

/// Product namespaces: labelled `monitoring-key=middleware`, not terminating,
/// not the monitoring namespace itself, sorted by name
pub async fn product_namespaces(
    client: &dyn MonitoringKubeClient,
    monitoring_ns: &str,
) -> Result<Vec<String>, Error> {
    let namespaces = client.list_namespaces(PRODUCT_NAMESPACE_SELECTOR).await?;
    let mut names: Vec<String> = namespaces
        .iter()
        .filter(|ns| !is_terminating(ns))
        .map(|ns| ns.name_any())
        .filter(|name| name != monitoring_ns)
        .collect();
    names.sort();
    names.dedup();
    debug!(count = names.len(), monitoring_namespace = %monitoring_ns, "resolved product namespaces");
    Ok(names)
}

fn is_terminating(ns: &Namespace) -> bool {
    ns.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|p| p == TERMINATING)
}
