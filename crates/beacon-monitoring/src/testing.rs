//! Test doubles and fixtures shared by this crate's tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_common::crd::{
    Endpoint, Installation, InstallationSpec, InstallationType, ServiceMonitor, ServiceMonitorSpec,
};
use beacon_common::kube_utils::selector_matches;
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::client::MonitoringKubeClient;
use crate::labels;

/// Build a kube API error with the given status code
pub fn api_error(code: u16) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "Conflict",
        403 => "Forbidden",
        _ => "InternalError",
    };
    kube::Error::Api(
        kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} error", reason),
            reason: reason.to_string(),
            code,
        }
        .into(),
    )
}

/// An Installation named `installation` in namespace `beacon`
pub fn installation(install_type: InstallationType, prefix: &str) -> Installation {
    let mut inst = Installation::new(
        "installation",
        InstallationSpec {
            install_type,
            namespace_prefix: prefix.to_string(),
        },
    );
    inst.metadata.namespace = Some("beacon".to_string());
    inst.metadata.uid = Some("xyz".to_string());
    inst
}

/// An active namespace, optionally labelled as a product namespace
pub fn namespace(name: &str, product: bool) -> Namespace {
    let labels = product.then(|| {
        BTreeMap::from([("monitoring-key".to_string(), "middleware".to_string())])
    });
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels,
            ..Default::default()
        },
        status: Some(NamespaceStatus {
            phase: Some("Active".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A product ServiceMonitor scraping one endpoint
pub fn service_monitor(name: &str, namespace: &str) -> ServiceMonitor {
    ServiceMonitor {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ServiceMonitorSpec {
            endpoints: vec![Endpoint {
                port: Some("upstream".to_string()),
                path: Some("/name".to_string()),
                scheme: Some("http".to_string()),
                params: BTreeMap::from([(
                    "match[]".to_string(),
                    vec![r#"{__name__="ALERTS",alertstate="firing"}"#.to_string()],
                )]),
                interval: Some("30s".to_string()),
                scrape_timeout: Some("30s".to_string()),
                honor_labels: true,
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}

/// A provenance-labelled ServiceMonitor, as left behind by an earlier pass
pub fn owned_mirror(name: &str, namespace: &str) -> ServiceMonitor {
    let mut sm = service_monitor(name, namespace);
    labels::stamp(&mut sm);
    sm
}

type Key = (String, String);

fn key_of<K: Resource>(obj: &K) -> Key {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

#[derive(Default)]
struct StoreState {
    namespaces: BTreeMap<String, Namespace>,
    monitors: BTreeMap<Key, ServiceMonitor>,
    roles: BTreeMap<Key, Role>,
    bindings: BTreeMap<Key, RoleBinding>,
    next_version: u64,
    writes: Vec<String>,
    failing_lists: BTreeMap<String, u16>,
}

impl StoreState {
    fn bump<K: Resource>(&mut self, obj: &mut K) {
        self.next_version += 1;
        obj.meta_mut().resource_version = Some(self.next_version.to_string());
    }

    fn create<K: Resource + Clone>(
        &mut self,
        verb: &str,
        namespace: &str,
        obj: &K,
        select: fn(&mut StoreState) -> &mut BTreeMap<Key, K>,
    ) -> Result<K, kube::Error> {
        let mut obj = obj.clone();
        obj.meta_mut().namespace = Some(namespace.to_string());
        let key = key_of(&obj);
        if select(self).contains_key(&key) {
            return Err(api_error(409));
        }
        self.bump(&mut obj);
        self.writes.push(format!("{} {}/{}", verb, key.0, key.1));
        select(self).insert(key, obj.clone());
        Ok(obj)
    }

    fn delete<K>(
        &mut self,
        verb: &str,
        name: &str,
        namespace: &str,
        select: fn(&mut StoreState) -> &mut BTreeMap<Key, K>,
    ) -> Result<(), kube::Error> {
        let key = (namespace.to_string(), name.to_string());
        select(self).remove(&key).ok_or_else(|| api_error(404))?;
        self.writes.push(format!("{} {}/{}", verb, namespace, name));
        Ok(())
    }
}

/// In-memory [`MonitoringKubeClient`] with API-server-like semantics
///
/// Creates conflict on existing names, deletes of missing objects return
/// 404, replaces are checked against the stored resource version, and every
/// successful write is logged. Construct a fresh one per test.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("store mutex should not be poisoned")
    }

    pub fn insert_namespace(&self, ns: Namespace) {
        self.state().namespaces.insert(ns.name_any(), ns);
    }

    pub fn insert_service_monitor(&self, mut sm: ServiceMonitor) {
        let mut state = self.state();
        state.bump(&mut sm);
        state.monitors.insert(key_of(&sm), sm);
    }

    pub fn insert_role(&self, mut role: Role) {
        let mut state = self.state();
        state.bump(&mut role);
        state.roles.insert(key_of(&role), role);
    }

    pub fn insert_role_binding(&self, mut binding: RoleBinding) {
        let mut state = self.state();
        state.bump(&mut binding);
        state.bindings.insert(key_of(&binding), binding);
    }

    /// Make listing ServiceMonitors in `namespace` fail with `code`
    pub fn fail_list_in(&self, namespace: &str, code: u16) {
        self.state()
            .failing_lists
            .insert(namespace.to_string(), code);
    }

    pub fn service_monitor(&self, namespace: &str, name: &str) -> Option<ServiceMonitor> {
        self.state()
            .monitors
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn service_monitors_in(&self, namespace: &str) -> Vec<ServiceMonitor> {
        self.state()
            .monitors
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, sm)| sm.clone())
            .collect()
    }

    pub fn role(&self, namespace: &str, name: &str) -> Option<Role> {
        self.state()
            .roles
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        self.state()
            .bindings
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn role_count(&self) -> usize {
        self.state().roles.len()
    }

    pub fn role_binding_count(&self) -> usize {
        self.state().bindings.len()
    }

    /// Every successful write so far, as `<verb> <namespace>/<name>`
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }
}

fn owned_values<K: Resource + Clone>(items: &BTreeMap<Key, K>) -> Vec<K> {
    items
        .values()
        .filter(|obj| labels::is_owned(*obj))
        .cloned()
        .collect()
}

#[async_trait]
impl MonitoringKubeClient for InMemoryStore {
    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>, kube::Error> {
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| selector_matches(label_selector, ns.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn list_service_monitors(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMonitor>, kube::Error> {
        if let Some(code) = self.state().failing_lists.get(namespace) {
            return Err(api_error(*code));
        }
        Ok(self.service_monitors_in(namespace))
    }

    async fn list_owned_service_monitors(
        &self,
        namespace: &str,
    ) -> Result<Vec<ServiceMonitor>, kube::Error> {
        Ok(self
            .service_monitors_in(namespace)
            .into_iter()
            .filter(labels::is_owned)
            .collect())
    }

    async fn get_service_monitor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ServiceMonitor>, kube::Error> {
        Ok(self.service_monitor(namespace, name))
    }

    async fn create_service_monitor(
        &self,
        namespace: &str,
        monitor: &ServiceMonitor,
    ) -> Result<ServiceMonitor, kube::Error> {
        self.state()
            .create("create servicemonitor", namespace, monitor, |s| &mut s.monitors)
    }

    async fn replace_service_monitor(
        &self,
        namespace: &str,
        monitor: &ServiceMonitor,
    ) -> Result<ServiceMonitor, kube::Error> {
        let mut state = self.state();
        let key = (namespace.to_string(), monitor.name_any());
        let stored_version = state
            .monitors
            .get(&key)
            .ok_or_else(|| api_error(404))?
            .metadata
            .resource_version
            .clone();
        if monitor.metadata.resource_version != stored_version {
            return Err(api_error(409));
        }
        let mut updated = monitor.clone();
        updated.metadata.namespace = Some(namespace.to_string());
        state.bump(&mut updated);
        state
            .writes
            .push(format!("replace servicemonitor {}/{}", key.0, key.1));
        state.monitors.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_service_monitor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(), kube::Error> {
        self.state()
            .delete("delete servicemonitor", name, namespace, |s| &mut s.monitors)
    }

    async fn get_role(&self, name: &str, namespace: &str) -> Result<Option<Role>, kube::Error> {
        Ok(self.role(namespace, name))
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<Role, kube::Error> {
        self.state()
            .create("create role", namespace, role, |s| &mut s.roles)
    }

    async fn list_owned_roles(&self) -> Result<Vec<Role>, kube::Error> {
        Ok(owned_values(&self.state().roles))
    }

    async fn delete_role(&self, name: &str, namespace: &str) -> Result<(), kube::Error> {
        self.state()
            .delete("delete role", name, namespace, |s| &mut s.roles)
    }

    async fn get_role_binding(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<RoleBinding>, kube::Error> {
        Ok(self.role_binding(namespace, name))
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<RoleBinding, kube::Error> {
        self.state()
            .create("create rolebinding", namespace, binding, |s| &mut s.bindings)
    }

    async fn list_owned_role_bindings(&self) -> Result<Vec<RoleBinding>, kube::Error> {
        Ok(owned_values(&self.state().bindings))
    }

    async fn delete_role_binding(&self, name: &str, namespace: &str) -> Result<(), kube::Error> {
        self.state()
            .delete("delete rolebinding", name, namespace, |s| &mut s.bindings)
    }
}
