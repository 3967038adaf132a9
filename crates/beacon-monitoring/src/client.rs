//! Object store access for the monitoring reconciler
//!
//! Every cluster read and write made by a reconcile pass goes through
//! [`MonitoringKubeClient`]. Methods return the raw `kube::Error` so the
//! calling step can wrap it with the object coordinates and step that failed
//! (scan, sync or gc).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use beacon_common::crd::ServiceMonitor;
use beacon_common::FIELD_MANAGER;

use crate::labels;

/// Trait abstracting the cluster operations of a reconcile pass
///
/// Lets tests inject a fresh in-memory store or a mock per test while
/// production code uses the API server.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MonitoringKubeClient: Send + Sync {
    /// List namespaces matching an equality-based label selector
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, kube::Error>;

    /// List every ServiceMonitor in a namespace
    async fn list_service_monitors(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMonitor>, kube::Error>;

    /// List provenance-labelled ServiceMonitors in a namespace
    async fn list_owned_service_monitors(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMonitor>, kube::Error>;

    /// Get a ServiceMonitor, `None` if it does not exist
    async fn get_service_monitor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServiceMonitor>, kube::Error>;

    /// Create a ServiceMonitor
    async fn create_service_monitor(
        &self,
        namespace: &str,
        monitor: &ServiceMonitor,
    ) -> Result<ServiceMonitor, kube::Error>;

    /// Replace a ServiceMonitor (optimistic on `metadata.resourceVersion`)
    async fn replace_service_monitor(
        &self,
        namespace: &str,
        monitor: &ServiceMonitor,
    ) -> Result<ServiceMonitor, kube::Error>;

    /// Delete a ServiceMonitor
    async fn delete_service_monitor(&self, name: &str, namespace: &str)
        -> Result<(), kube::Error>;

    /// Get a Role, `None` if it does not exist
    async fn get_role(&self, name: &str, namespace: &str) -> Result<Option<Role>, kube::Error>;

    /// Create a Role
    async fn create_role(&self, namespace: &str, role: &Role) -> Result<Role, kube::Error>;

    /// List provenance-labelled Roles across all namespaces
    async fn list_owned_roles(&self) -> Result<Vec<Role>, kube::Error>;

    /// Delete a Role
    async fn delete_role(&self, name: &str, namespace: &str) -> Result<(), kube::Error>;

    /// Get a RoleBinding, `None` if it does not exist
    async fn get_role_binding(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<RoleBinding>, kube::Error>;

    /// Create a RoleBinding
    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding, kube::Error>;

    /// List provenance-labelled RoleBindings across all namespaces
    async fn list_owned_role_bindings(&self) -> Result<Vec<RoleBinding>, kube::Error>;

    /// Delete a RoleBinding
    async fn delete_role_binding(&self, name: &str, namespace: &str) -> Result<(), kube::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeMonitoringClient {
    client: Client,
}

impl KubeMonitoringClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn owned() -> ListParams {
        ListParams::default().labels(&labels::selector())
    }
}

#[async_trait]
impl MonitoringKubeClient for KubeMonitoringClient {
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, kube::Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn list_service_monitors(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMonitor>, kube::Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        trace!(namespace = %namespace, count = list.items.len(), "listed service monitors");
        Ok(list.items)
    }

    async fn list_owned_service_monitors(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMonitor>, kube::Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&Self::owned()).await?.items)
    }

    async fn get_service_monitor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServiceMonitor>, kube::Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn create_service_monitor(
        &self,
        namespace: &str,
        monitor: &ServiceMonitor,
    ) -> Result<ServiceMonitor, kube::Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), monitor).await
    }

    async fn replace_service_monitor(
        &self,
        namespace: &str,
        monitor: &ServiceMonitor,
    ) -> Result<ServiceMonitor, kube::Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        let name = monitor.metadata.name.as_deref().unwrap_or_default();
        api.replace(name, &Self::post_params(), monitor).await
    }

    async fn delete_service_monitor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(), kube::Error> {
        let api: Api<ServiceMonitor> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_role(&self, name: &str, namespace: &str) -> Result<Option<Role>, kube::Error> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<Role, kube::Error> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), role).await
    }

    async fn list_owned_roles(&self) -> Result<Vec<Role>, kube::Error> {
        let api: Api<Role> = Api::all(self.client.clone());
        Ok(api.list(&Self::owned()).await?.items)
    }

    async fn delete_role(&self, name: &str, namespace: &str) -> Result<(), kube::Error> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_role_binding(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<RoleBinding>, kube::Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding, kube::Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.create(&Self::post_params(), binding).await
    }

    async fn list_owned_role_bindings(&self) -> Result<Vec<RoleBinding>, kube::Error> {
        let api: Api<RoleBinding> = Api::all(self.client.clone());
        Ok(api.list(&Self::owned()).await?.items)
    }

    async fn delete_role_binding(&self, name: &str, namespace: &str) -> Result<(), kube::Error> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
