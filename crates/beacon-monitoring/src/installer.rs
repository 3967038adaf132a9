//! Monitoring operator installation through OLM
//!
//! The reconciler asks the operator lifecycle manager to install the
//! monitoring operator and reads back the install plan of its subscription.
//! Teardown removes what was installed and waits until the subscription is
//! gone. OLM types are read and written untyped via [`DynamicObject`].

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use beacon_common::error::is_not_found;
use beacon_common::{Error, FIELD_MANAGER};

const OLM_GROUP: &str = "operators.coreos.com";

/// Default subscription (and package) name of the monitoring operator
pub const DEFAULT_SUBSCRIPTION_NAME: &str = "monitoring-operator";
/// Default subscription channel
pub const DEFAULT_CHANNEL: &str = "stable";
/// Default catalog source
pub const DEFAULT_CATALOG_SOURCE: &str = "redhat-operators";
/// Default catalog source namespace
pub const DEFAULT_CATALOG_SOURCE_NAMESPACE: &str = "openshift-marketplace";

/// Install plan approval strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Approval {
    /// OLM approves install plans on its own
    Automatic,
    /// Install plans wait for a human
    Manual,
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approval::Automatic => write!(f, "Automatic"),
            Approval::Manual => write!(f, "Manual"),
        }
    }
}

/// Which operator to install and from where
#[derive(Clone, Debug, PartialEq)]
pub struct InstallTarget {
    /// Subscription name, also the package name
    pub subscription_name: String,
    /// Namespace the operator runs in
    pub namespace: String,
    /// Subscription channel
    pub channel: String,
    /// Catalog source providing the package
    pub catalog_source: String,
    /// Namespace of the catalog source
    pub catalog_source_namespace: String,
}

/// Operator-level install settings, independent of any installation
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorSettings {
    /// Subscription name, also the package name
    pub subscription_name: String,
    /// Subscription channel
    pub channel: String,
    /// Catalog source providing the package
    pub catalog_source: String,
    /// Namespace of the catalog source
    pub catalog_source_namespace: String,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            subscription_name: DEFAULT_SUBSCRIPTION_NAME.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            catalog_source: DEFAULT_CATALOG_SOURCE.to_string(),
            catalog_source_namespace: DEFAULT_CATALOG_SOURCE_NAMESPACE.to_string(),
        }
    }
}

impl OperatorSettings {
    /// Target these settings at an operator namespace
    pub fn target(&self, operator_namespace: &str) -> InstallTarget {
        InstallTarget {
            subscription_name: self.subscription_name.clone(),
            namespace: operator_namespace.to_string(),
            channel: self.channel.clone(),
            catalog_source: self.catalog_source.clone(),
            catalog_source_namespace: self.catalog_source_namespace.clone(),
        }
    }
}

/// Phase of an OLM install plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallPlanPhase {
    /// Waiting for approval
    RequiresApproval,
    /// Resources are being created
    Installing,
    /// Operator is installed
    Complete,
    /// Install failed
    Failed,
    /// Anything else OLM reports
    Unknown(String),
}

impl InstallPlanPhase {
    /// Parse the `status.phase` string of an InstallPlan
    pub fn parse(phase: &str) -> Self {
        match phase {
            "RequiresApproval" => Self::RequiresApproval,
            "Installing" => Self::Installing,
            "Complete" => Self::Complete,
            "Failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What the reconciler needs from an InstallPlan
#[derive(Clone, Debug, PartialEq)]
pub struct InstallPlanInfo {
    /// InstallPlan name
    pub name: String,
    /// Current phase
    pub phase: InstallPlanPhase,
}

/// What the reconciler needs from a Subscription
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionInfo {
    /// Subscription name
    pub name: String,
    /// CSV installed by OLM, if any
    pub installed_csv: Option<String>,
    /// CSV OLM is currently resolving to
    pub current_csv: Option<String>,
    /// InstallPlan referenced by the subscription status
    pub install_plan_ref: Option<String>,
}

impl SubscriptionInfo {
    /// Operator version from the installed CSV name (`<package>.v<version>`)
    pub fn operator_version(&self) -> Option<String> {
        let csv = self.installed_csv.as_deref()?;
        csv.split_once(".v").map(|(_, v)| v.to_string())
    }
}

/// Installs the monitoring operator and reports install progress
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringOperatorInstaller: Send + Sync {
    /// Request installation of the operator described by `target`
    async fn install_operator(
        &self,
        target: &InstallTarget,
        operator_group_namespaces: &[String],
        approval: Approval,
    ) -> Result<(), Error>;

    /// Read the subscription and the install plan it references
    ///
    /// The plan is `None` while OLM has not created one yet.
    async fn get_subscription_install_plan(
        &self,
        subscription_name: &str,
        namespace: &str,
    ) -> Result<(Option<InstallPlanInfo>, SubscriptionInfo), Error>;

    /// Remove the subscription, the CSV it installed and the OperatorGroup
    ///
    /// Objects that are already gone count as removed.
    async fn uninstall_operator(&self, subscription_name: &str, namespace: &str)
        -> Result<(), Error>;

    /// Whether the subscription still exists
    async fn subscription_exists(
        &self,
        subscription_name: &str,
        namespace: &str,
    ) -> Result<bool, Error>;
}

/// [`MonitoringOperatorInstaller`] writing OLM objects
pub struct OlmInstaller {
    client: Client,
}

impl OlmInstaller {
    /// Install through the given kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &str, namespace: &str) -> Api<DynamicObject> {
        let version = if kind == "OperatorGroup" { "v1" } else { "v1alpha1" };
        let gvk = GroupVersionKind::gvk(OLM_GROUP, version, kind);
        let ar = ApiResource::from_gvk(&gvk);
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    async fn apply(&self, kind: &str, name: &str, namespace: &str, manifest: Value) -> Result<(), Error> {
        let obj: DynamicObject =
            serde_json::from_value(manifest).map_err(|e| Error::serialization(e.to_string()))?;
        self.api(kind, namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&obj),
            )
            .await
            .map_err(|e| {
                Error::upstream_install(format!("failed to apply {} {}/{}: {}", kind, namespace, name, e))
            })?;
        debug!(kind, name, namespace, "applied OLM object");
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(kind, name, namespace, "deleted OLM object");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::upstream_install(format!(
                "failed to delete {} {}/{}: {}",
                kind, namespace, name, e
            ))),
        }
    }
}

/// OperatorGroup manifest for the operator namespace
pub fn operator_group_manifest(target: &InstallTarget, target_namespaces: &[String]) -> Value {
    json!({
        "apiVersion": format!("{}/v1", OLM_GROUP),
        "kind": "OperatorGroup",
        "metadata": {
            "name": target.subscription_name,
            "namespace": target.namespace,
        },
        "spec": {
            "targetNamespaces": target_namespaces,
        }
    })
}

/// Subscription manifest for `target`
pub fn subscription_manifest(target: &InstallTarget, approval: Approval) -> Value {
    json!({
        "apiVersion": format!("{}/v1alpha1", OLM_GROUP),
        "kind": "Subscription",
        "metadata": {
            "name": target.subscription_name,
            "namespace": target.namespace,
        },
        "spec": {
            "name": target.subscription_name,
            "channel": target.channel,
            "source": target.catalog_source,
            "sourceNamespace": target.catalog_source_namespace,
            "installPlanApproval": approval.to_string(),
        }
    })
}

fn status_str<'a>(obj: &'a DynamicObject, path: &[&str]) -> Option<&'a str> {
    let mut value = obj.data.get("status")?;
    for key in path {
        value = value.get(key)?;
    }
    value.as_str().filter(|s| !s.is_empty())
}

/// Extract [`SubscriptionInfo`] from an untyped Subscription
pub fn subscription_info(obj: &DynamicObject) -> SubscriptionInfo {
    SubscriptionInfo {
        name: obj.metadata.name.clone().unwrap_or_default(),
        installed_csv: status_str(obj, &["installedCSV"]).map(str::to_string),
        current_csv: status_str(obj, &["currentCSV"]).map(str::to_string),
        install_plan_ref: status_str(obj, &["installPlanRef", "name"])
            .or_else(|| status_str(obj, &["install", "name"]))
            .map(str::to_string),
    }
}

/// Extract [`InstallPlanInfo`] from an untyped InstallPlan
pub fn install_plan_info(obj: &DynamicObject) -> InstallPlanInfo {
    InstallPlanInfo {
        name: obj.metadata.name.clone().unwrap_or_default(),
        phase: InstallPlanPhase::parse(status_str(obj, &["phase"]).unwrap_or_default()),
    }
}

#[async_trait]
impl MonitoringOperatorInstaller for OlmInstaller {
    async fn install_operator(
        &self,
        target: &InstallTarget,
        operator_group_namespaces: &[String],
        approval: Approval,
    ) -> Result<(), Error> {
        self.apply(
            "OperatorGroup",
            &target.subscription_name,
            &target.namespace,
            operator_group_manifest(target, operator_group_namespaces),
        )
        .await?;
        self.apply(
            "Subscription",
            &target.subscription_name,
            &target.namespace,
            subscription_manifest(target, approval),
        )
        .await?;
        info!(
            subscription = %target.subscription_name,
            namespace = %target.namespace,
            approval = %approval,
            "requested monitoring operator install"
        );
        Ok(())
    }

    async fn get_subscription_install_plan(
        &self,
        subscription_name: &str,
        namespace: &str,
    ) -> Result<(Option<InstallPlanInfo>, SubscriptionInfo), Error> {
        let subscription = self
            .api("Subscription", namespace)
            .get_opt(subscription_name)
            .await
            .map_err(|e| Error::upstream_install(format!("failed to get subscription: {}", e)))?
            .ok_or_else(|| {
                Error::upstream_install(format!(
                    "subscription {}/{} not found",
                    namespace, subscription_name
                ))
            })?;
        let info = subscription_info(&subscription);

        let Some(plan_name) = info.install_plan_ref.as_deref() else {
            return Ok((None, info));
        };
        let plan = self
            .api("InstallPlan", namespace)
            .get_opt(plan_name)
            .await
            .map_err(|e| Error::upstream_install(format!("failed to get install plan: {}", e)))?;
        Ok((plan.as_ref().map(install_plan_info), info))
    }

    async fn uninstall_operator(
        &self,
        subscription_name: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        // OLM leaves the CSV behind when a subscription goes, so read it first
        let installed_csv = self
            .api("Subscription", namespace)
            .get_opt(subscription_name)
            .await
            .map_err(|e| Error::upstream_install(format!("failed to get subscription: {}", e)))?
            .and_then(|sub| subscription_info(&sub).installed_csv);

        self.delete("Subscription", subscription_name, namespace)
            .await?;
        if let Some(csv) = installed_csv {
            self.delete("ClusterServiceVersion", &csv, namespace).await?;
        }
        self.delete("OperatorGroup", subscription_name, namespace)
            .await
    }

    async fn subscription_exists(
        &self,
        subscription_name: &str,
        namespace: &str,
    ) -> Result<bool, Error> {
        let found = self
            .api("Subscription", namespace)
            .get_opt(subscription_name)
            .await
            .map_err(|e| Error::upstream_install(format!("failed to get subscription: {}", e)))?;
        Ok(found.is_some())
    }
}
