//! Prometheus Operator `ServiceMonitor` types
//!
//! Only the fields Beacon copies between namespaces are modelled. Anything
//! else on the object survives a round trip through `extra` so mirroring
//! never drops configuration the product operator set.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ServiceMonitor spec (`monitoring.coreos.com/v1`)
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    plural = "servicemonitors",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Label on the target Service whose value becomes the `job` label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,

    /// Scrape endpoints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<Endpoint>,

    /// Service labels transferred onto scraped series
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_labels: Vec<String>,

    /// Pod labels transferred onto scraped series
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pod_target_labels: Vec<String>,

    /// Selector for the Services to scrape
    #[serde(default)]
    pub selector: LabelSelector,

    /// Namespaces the selector applies to; absent means the object's own namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,

    /// Per-scrape sample limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_limit: Option<u64>,

    /// Fields not modelled above
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A single scrape endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Named Service port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// Pod port name or number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<serde_json::Value>,

    /// HTTP path to scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// HTTP scheme (http or https)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// URL query parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,

    /// Scrape interval (e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Scrape timeout (e.g. "10s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    /// Keep labels from the scraped data on conflict
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub honor_labels: bool,

    /// File holding the bearer token for the scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,

    /// Fields not modelled above (tlsConfig, relabelings, ...)
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Kubernetes label selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// A set-based label requirement
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key
    pub key: String,
    /// In, NotIn, Exists, DoesNotExist
    pub operator: String,
    /// Values for In/NotIn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Which namespaces a ServiceMonitor's selector applies to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Select every namespace
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub any: bool,

    /// Explicit namespace names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

impl NamespaceSelector {
    /// Selector matching exactly one namespace
    pub fn only(namespace: impl Into<String>) -> Self {
        Self {
            any: false,
            match_names: vec![namespace.into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUSE_MONITOR: &str = r#"
apiVersion: monitoring.coreos.com/v1
kind: ServiceMonitor
metadata:
  name: fuse-fuse-servicemon
  namespace: fuse
spec:
  endpoints:
    - port: upstream
      path: /name
      scheme: http
      params:
        match[]:
          - '{__name__="ALERTS",alertstate="firing"}'
      interval: 30s
      scrapeTimeout: 30s
      honorLabels: true
      tlsConfig:
        insecureSkipVerify: true
  selector:
    matchLabels:
      app: fuse
"#;

    #[test]
    fn parses_product_service_monitor() {
        let sm: ServiceMonitor =
            serde_yaml::from_str(FUSE_MONITOR).expect("service monitor should parse");
        assert_eq!(sm.metadata.name.as_deref(), Some("fuse-fuse-servicemon"));

        let ep = &sm.spec.endpoints[0];
        assert_eq!(ep.port.as_deref(), Some("upstream"));
        assert_eq!(ep.scrape_timeout.as_deref(), Some("30s"));
        assert!(ep.honor_labels);
        assert_eq!(ep.params["match[]"].len(), 1);
        assert_eq!(sm.spec.selector.match_labels["app"], "fuse");
        assert!(sm.spec.namespace_selector.is_none());
    }

    #[test]
    fn unmodelled_fields_survive_round_trip() {
        let sm: ServiceMonitor =
            serde_yaml::from_str(FUSE_MONITOR).expect("service monitor should parse");
        assert!(sm.spec.endpoints[0].extra.contains_key("tlsConfig"));

        let json = serde_json::to_value(&sm.spec).expect("spec should serialize");
        assert_eq!(
            json["endpoints"][0]["tlsConfig"]["insecureSkipVerify"],
            serde_json::Value::Bool(true)
        );
        assert!(json["endpoints"][0].get("bearerTokenFile").is_none());
    }

    #[test]
    fn namespace_selector_only() {
        let sel = NamespaceSelector::only("fuse");
        assert!(!sel.any);
        assert_eq!(sel.match_names, vec!["fuse".to_string()]);
    }
}
