//! Garbage collection of owned objects without a live justification
//!
//! Only provenance-labelled objects are listed, so nothing Beacon did not
//! create is ever deleted. A 404 on delete means someone got there first and
//! counts as success.

use beacon_common::error::is_not_found;
use beacon_common::Error;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::Resource;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::client::MonitoringKubeClient;
use crate::labels;
use crate::state::DesiredState;

const ALL_NAMESPACES: &str = "all namespaces";

/// Counts of objects deleted by one collection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Mirrors deleted from the monitoring namespace
    pub mirrors_deleted: usize,
    /// Roles deleted from product namespaces
    pub roles_deleted: usize,
    /// RoleBindings deleted from product namespaces
    pub bindings_deleted: usize,
}

impl GcReport {
    /// Total objects deleted
    pub fn total(&self) -> usize {
        self.mirrors_deleted + self.roles_deleted + self.bindings_deleted
    }
}

fn tolerate_not_found(result: Result<(), kube::Error>) -> Result<bool, kube::Error> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete owned mirrors and grants that `desired` does not justify
///
/// Mirrors are matched by name within `monitoring_ns`; grants by namespace
/// across the cluster. Bindings go before roles so no binding is left
/// pointing at a missing role.
#[instrument(skip(client, desired), fields(mirrors = desired.mirrored_names.len(), grants = desired.grant_namespaces.len()))]
pub async fn collect_garbage(
    client: &dyn MonitoringKubeClient,
    monitoring_ns: &str,
    desired: &DesiredState,
) -> Result<GcReport, Error> {
    let mut report = GcReport::default();

    let mirrors = client
        .list_owned_service_monitors(monitoring_ns)
        .await
        .map_err(|source| Error::GcList {
            kind: "ServiceMonitor",
            scope: format!("namespace {}", monitoring_ns),
            source,
        })?;
    for mirror in mirrors.iter().filter(|m| labels::is_owned(*m)) {
        let name = mirror.name_any();
        if desired.mirrored_names.contains(&name) {
            continue;
        }
        let deleted = tolerate_not_found(client.delete_service_monitor(&name, monitoring_ns).await)
            .map_err(|source| Error::GcDelete {
                kind: "ServiceMonitor",
                name: name.clone(),
                namespace: monitoring_ns.to_string(),
                source,
            })?;
        if deleted {
            report.mirrors_deleted += 1;
            info!(name = %name, namespace = %monitoring_ns, "deleted stale mirrored service monitor");
        }
    }

    let bindings = client
        .list_owned_role_bindings()
        .await
        .map_err(|source| Error::GcList {
            kind: RoleBinding::KIND,
            scope: ALL_NAMESPACES.to_string(),
            source,
        })?;
    for binding in bindings.iter().filter(|b| labels::is_owned(*b)) {
        let namespace = binding.namespace().unwrap_or_default();
        if desired.grant_namespaces.contains(&namespace) {
            continue;
        }
        let name = binding.name_any();
        let deleted = tolerate_not_found(client.delete_role_binding(&name, &namespace).await)
            .map_err(|source| Error::GcDelete {
                kind: RoleBinding::KIND,
                name: name.clone(),
                namespace: namespace.clone(),
                source,
            })?;
        if deleted {
            report.bindings_deleted += 1;
            info!(name = %name, namespace = %namespace, "deleted stale role binding");
        }
    }

    let roles = client
        .list_owned_roles()
        .await
        .map_err(|source| Error::GcList {
            kind: Role::KIND,
            scope: ALL_NAMESPACES.to_string(),
            source,
        })?;
    for role in roles.iter().filter(|r| labels::is_owned(*r)) {
        let namespace = role.namespace().unwrap_or_default();
        if desired.grant_namespaces.contains(&namespace) {
            continue;
        }
        let name = role.name_any();
        let deleted = tolerate_not_found(client.delete_role(&name, &namespace).await).map_err(
            |source| Error::GcDelete {
                kind: Role::KIND,
                name: name.clone(),
                namespace: namespace.clone(),
                source,
            },
        )?;
        if deleted {
            report.roles_deleted += 1;
            info!(name = %name, namespace = %namespace, "deleted stale role");
        }
    }

    debug!(deleted = report.total(), "garbage collection finished");
    Ok(report)
}
