//! Product configuration for the monitoring reconciler
//!
//! Each product keeps a flat string map. The production store is a single
//! ConfigMap in the installation namespace, one YAML document per product key.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use beacon_common::{Error, FIELD_MANAGER};

/// Key holding the monitoring namespace
pub const KEY_NAMESPACE: &str = "NAMESPACE";
/// Key holding the monitoring operator's namespace
pub const KEY_OPERATOR_NAMESPACE: &str = "OPERATOR_NAMESPACE";

/// ConfigMap storing every product's configuration
pub const CONFIG_MAP_NAME: &str = "installation-config";
/// Data key of the monitoring product inside [`CONFIG_MAP_NAME`]
pub const MONITORING_SPEC_KEY: &str = "monitoringspec";

/// Raw key/value configuration of one product
pub type ProductConfig = BTreeMap<String, String>;

/// Configuration of the monitoring-spec product
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitoringSpecConfig {
    config: ProductConfig,
}

impl MonitoringSpecConfig {
    /// Wrap a raw product map
    pub fn new(config: ProductConfig) -> Self {
        Self { config }
    }

    /// Configured monitoring namespace, `None` when unset or empty
    pub fn namespace(&self) -> Option<&str> {
        self.non_empty(KEY_NAMESPACE)
    }

    /// Set the monitoring namespace
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.config
            .insert(KEY_NAMESPACE.to_string(), namespace.into());
    }

    /// Configured operator namespace, `None` when unset or empty
    pub fn operator_namespace(&self) -> Option<&str> {
        self.non_empty(KEY_OPERATOR_NAMESPACE)
    }

    /// Set the operator namespace
    pub fn set_operator_namespace(&mut self, namespace: impl Into<String>) {
        self.config
            .insert(KEY_OPERATOR_NAMESPACE.to_string(), namespace.into());
    }

    /// Data key this product is stored under
    pub fn product_key(&self) -> &'static str {
        MONITORING_SPEC_KEY
    }

    /// Raw key/value view
    pub fn as_map(&self) -> &ProductConfig {
        &self.config
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Reads and writes product configuration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigReadWriter: Send + Sync {
    /// Read the monitoring-spec configuration
    ///
    /// Any failure surfaces as [`Error::ConfigUnreadable`].
    async fn read_monitoring_spec(&self) -> Result<MonitoringSpecConfig, Error>;

    /// Persist the monitoring-spec configuration
    async fn write_config(&self, config: &MonitoringSpecConfig) -> Result<(), Error>;
}

/// [`ConfigReadWriter`] backed by the `installation-config` ConfigMap
pub struct ConfigMapConfigReadWriter {
    client: Client,
    namespace: String,
}

impl ConfigMapConfigReadWriter {
    /// Store configuration in the given installation namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Decode one product's YAML document from ConfigMap data
///
/// A missing ConfigMap or key yields an empty configuration.
pub fn decode_product_config(cm: Option<&ConfigMap>, key: &str) -> Result<ProductConfig, Error> {
    let raw = cm
        .and_then(|cm| cm.data.as_ref())
        .and_then(|data| data.get(key));
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)
            .map_err(|e| Error::serialization(format!("invalid {} config: {}", key, e))),
        _ => Ok(ProductConfig::new()),
    }
}

/// Encode one product's configuration as a YAML document
pub fn encode_product_config(config: &ProductConfig) -> Result<String, Error> {
    serde_yaml::to_string(config).map_err(|e| Error::serialization(e.to_string()))
}

#[async_trait]
impl ConfigReadWriter for ConfigMapConfigReadWriter {
    async fn read_monitoring_spec(&self) -> Result<MonitoringSpecConfig, Error> {
        let cm = self
            .api()
            .get_opt(CONFIG_MAP_NAME)
            .await
            .map_err(|e| Error::config_unreadable(e.to_string()))?;
        let config = decode_product_config(cm.as_ref(), MONITORING_SPEC_KEY)
            .map_err(|e| Error::config_unreadable(e.to_string()))?;
        Ok(MonitoringSpecConfig::new(config))
    }

    async fn write_config(&self, config: &MonitoringSpecConfig) -> Result<(), Error> {
        let data = BTreeMap::from([(
            config.product_key(),
            encode_product_config(config.as_map())?,
        )]);
        let patch = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": CONFIG_MAP_NAME,
                "namespace": self.namespace,
            },
            "data": data,
        });
        self.api()
            .patch(
                CONFIG_MAP_NAME,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await?;
        debug!(namespace = %self.namespace, key = config.product_key(), "wrote product config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map(key: &str, value: &str) -> ConfigMap {
        ConfigMap {
            data: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn empty_values_read_as_unset() {
        let cfg = MonitoringSpecConfig::new(ProductConfig::from([
            (KEY_NAMESPACE.to_string(), String::new()),
            (
                KEY_OPERATOR_NAMESPACE.to_string(),
                "observability".to_string(),
            ),
        ]));
        assert_eq!(cfg.namespace(), None);
        assert_eq!(cfg.operator_namespace(), Some("observability"));
    }

    #[test]
    fn setters_overwrite() {
        let mut cfg = MonitoringSpecConfig::default();
        cfg.set_namespace("monitoring");
        cfg.set_operator_namespace("monitoring-operator");
        assert_eq!(cfg.namespace(), Some("monitoring"));
        assert_eq!(cfg.operator_namespace(), Some("monitoring-operator"));
        assert_eq!(cfg.as_map().len(), 2);
    }

    #[test]
    fn decode_reads_yaml_document() {
        let cm = config_map(
            MONITORING_SPEC_KEY,
            "NAMESPACE: observability\nOPERATOR_NAMESPACE: observability-operator\n",
        );
        let cfg = decode_product_config(Some(&cm), MONITORING_SPEC_KEY).unwrap();
        assert_eq!(cfg[KEY_NAMESPACE], "observability");
        assert_eq!(cfg[KEY_OPERATOR_NAMESPACE], "observability-operator");
    }

    #[test]
    fn decode_missing_config_map_or_key_is_empty() {
        assert!(decode_product_config(None, MONITORING_SPEC_KEY)
            .unwrap()
            .is_empty());
        let cm = config_map("threescale", "NAMESPACE: 3scale\n");
        assert!(decode_product_config(Some(&cm), MONITORING_SPEC_KEY)
            .unwrap()
            .is_empty());
        let cm = config_map(MONITORING_SPEC_KEY, "  ");
        assert!(decode_product_config(Some(&cm), MONITORING_SPEC_KEY)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn decode_rejects_malformed_yaml() {
        let cm = config_map(MONITORING_SPEC_KEY, "- not\n- a map\n");
        let err = decode_product_config(Some(&cm), MONITORING_SPEC_KEY).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn encode_then_decode_keeps_values() {
        let mut cfg = MonitoringSpecConfig::default();
        cfg.set_namespace("observability");
        let doc = encode_product_config(cfg.as_map()).unwrap();
        let cm = config_map(MONITORING_SPEC_KEY, &doc);
        let decoded = decode_product_config(Some(&cm), MONITORING_SPEC_KEY).unwrap();
        assert_eq!(MonitoringSpecConfig::new(decoded), cfg);
    }
}
