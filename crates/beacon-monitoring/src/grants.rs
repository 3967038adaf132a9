//! Read access for the monitoring stack into product namespaces
//!
//! Each product namespace that yielded a source this pass gets a Role
//! allowing reads of services, endpoints and pods, bound to the monitoring
//! identity. Grants are only ever created; an existing grant is left as is.

use std::collections::BTreeSet;

use beacon_common::Error;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::Resource;
use kube::api::ObjectMeta;
use tracing::{debug, info, instrument, warn};

use crate::client::MonitoringKubeClient;
use crate::labels;
use crate::state::DesiredState;

/// Name of the Role created in each product namespace
pub const ROLE_NAME: &str = "beacon-monitoring-read";
/// Name of the RoleBinding created in each product namespace
pub const ROLE_BINDING_NAME: &str = "beacon-monitoring-read";

/// Default monitoring service account
pub const DEFAULT_SERVICE_ACCOUNT: &str = "prometheus-k8s";
/// Default namespace of the monitoring service account
pub const DEFAULT_SERVICE_ACCOUNT_NAMESPACE: &str = "openshift-monitoring";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const READ_VERBS: [&str; 3] = ["get", "list", "watch"];
const READ_RESOURCES: [&str; 3] = ["services", "endpoints", "pods"];

/// Service account the monitoring stack scrapes as
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitoringIdentity {
    /// Service account name
    pub service_account: String,
    /// Service account namespace
    pub namespace: String,
}

impl Default for MonitoringIdentity {
    fn default() -> Self {
        Self {
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            namespace: DEFAULT_SERVICE_ACCOUNT_NAMESPACE.to_string(),
        }
    }
}

/// Read-only Role for `namespace`
pub fn build_role(namespace: &str) -> Role {
    let mut role = Role {
        metadata: ObjectMeta {
            name: Some(ROLE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(READ_RESOURCES.iter().map(|r| r.to_string()).collect()),
            verbs: READ_VERBS.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }]),
    };
    labels::stamp(&mut role);
    role
}

/// RoleBinding granting [`ROLE_NAME`] in `namespace` to `identity`
pub fn build_role_binding(namespace: &str, identity: &MonitoringIdentity) -> RoleBinding {
    let mut binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(ROLE_BINDING_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: Role::KIND.to_string(),
            name: ROLE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: identity.service_account.clone(),
            namespace: Some(identity.namespace.clone()),
            ..Default::default()
        }]),
    };
    labels::stamp(&mut binding);
    binding
}

/// Counts of grant objects created by one sync
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantStats {
    /// Roles created
    pub roles_created: usize,
    /// RoleBindings created
    pub bindings_created: usize,
}

/// Ensure a Role and RoleBinding exist in every namespace in `namespaces`
///
/// Each namespace is added to `desired.grant_namespaces`. Write failures
/// abort with [`Error::SyncWrite`].
#[instrument(skip(client, namespaces, identity, desired), fields(namespace_count = namespaces.len()))]
pub async fn sync_grants(
    client: &dyn MonitoringKubeClient,
    namespaces: &BTreeSet<String>,
    identity: &MonitoringIdentity,
    desired: &mut DesiredState,
) -> Result<GrantStats, Error> {
    let mut stats = GrantStats::default();
    for namespace in namespaces {
        desired.grant_namespaces.insert(namespace.clone());

        if ensure_role(client, namespace).await? {
            stats.roles_created += 1;
        }
        if ensure_role_binding(client, namespace, identity).await? {
            stats.bindings_created += 1;
        }
    }
    Ok(stats)
}

async fn ensure_role(client: &dyn MonitoringKubeClient, namespace: &str) -> Result<bool, Error> {
    let write_err = |source| Error::SyncWrite {
        kind: Role::KIND,
        name: ROLE_NAME.to_string(),
        namespace: namespace.to_string(),
        source,
    };
    match client.get_role(ROLE_NAME, namespace).await.map_err(write_err)? {
        Some(existing) => {
            if !labels::is_owned(&existing) {
                warn!(namespace = %namespace, name = ROLE_NAME, "role exists without provenance label, leaving it untouched");
            }
            Ok(false)
        }
        None => {
            client
                .create_role(namespace, &build_role(namespace))
                .await
                .map_err(write_err)?;
            info!(namespace = %namespace, name = ROLE_NAME, "created monitoring role");
            Ok(true)
        }
    }
}

async fn ensure_role_binding(
    client: &dyn MonitoringKubeClient,
    namespace: &str,
    identity: &MonitoringIdentity,
) -> Result<bool, Error> {
    let write_err = |source| Error::SyncWrite {
        kind: RoleBinding::KIND,
        name: ROLE_BINDING_NAME.to_string(),
        namespace: namespace.to_string(),
        source,
    };
    match client
        .get_role_binding(ROLE_BINDING_NAME, namespace)
        .await
        .map_err(write_err)?
    {
        Some(existing) => {
            if !labels::is_owned(&existing) {
                warn!(namespace = %namespace, name = ROLE_BINDING_NAME, "role binding exists without provenance label, leaving it untouched");
            } else {
                debug!(namespace = %namespace, "role binding present");
            }
            Ok(false)
        }
        None => {
            client
                .create_role_binding(namespace, &build_role_binding(namespace, identity))
                .await
                .map_err(write_err)?;
            info!(
                namespace = %namespace,
                service_account = %identity.service_account,
                "created monitoring role binding"
            );
            Ok(true)
        }
    }
}
