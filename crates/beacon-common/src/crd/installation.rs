//! Installation CRD types
//!
//! An `Installation` identifies one managed deployment: its install type, the
//! namespace it lives in and the prefix used for every product namespace. Its
//! `metadata.uid` is the provenance root for objects created on its behalf.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Installation spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "beacon.dev",
    version = "v1alpha1",
    kind = "Installation",
    plural = "installations",
    shortname = "inst",
    namespaced,
    status = "InstallationStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Installation type
    #[serde(rename = "type")]
    pub install_type: InstallationType,

    /// Prefix prepended to every product namespace (e.g. "redhat-rhoam-")
    #[serde(default)]
    pub namespace_prefix: String,
}

/// Kind of installation being managed
///
/// Only the namespace resolver branches on this; the synchronization core
/// consumes the resolved namespace list.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum InstallationType {
    /// Full managed integration installation
    #[default]
    Managed,
    /// Self-service workshop installation
    Workshop,
    /// Managed API installation
    ManagedApi,
    /// Managed API, single tenant
    ManagedApiSingleTenant,
    /// Managed API, multi tenant
    ManagedApiMultiTenant,
}

impl InstallationType {
    /// Whether this is one of the managed API variants
    pub fn is_managed_api(&self) -> bool {
        matches!(
            self,
            Self::ManagedApi | Self::ManagedApiSingleTenant | Self::ManagedApiMultiTenant
        )
    }

    /// Whether the installation serves more than one tenant
    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, Self::ManagedApiMultiTenant)
    }
}

impl fmt::Display for InstallationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Managed => "managed",
            Self::Workshop => "workshop",
            Self::ManagedApi => "managed-api",
            Self::ManagedApiSingleTenant => "managed-api-single-tenant",
            Self::ManagedApiMultiTenant => "managed-api-multi-tenant",
        };
        f.write_str(s)
    }
}

/// Outcome phase of a reconcile pass
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StatusPhase {
    /// Work remains (first pass, or an upstream step still running)
    #[default]
    InProgress,
    /// Every step succeeded
    Completed,
    /// A step failed; the next pass retries from scratch
    Failed,
}

impl fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Per-product status recorded on the Installation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductStatus {
    /// Product name (e.g. "monitoring-spec")
    pub name: String,

    /// Phase reported by the last pass
    #[serde(default)]
    pub phase: StatusPhase,

    /// Installed product version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Installed operator version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_version: Option<String>,
}

impl ProductStatus {
    /// Fresh status for the named product
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Installation status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Overall phase
    #[serde(default)]
    pub phase: StatusPhase,

    /// Status of each product, keyed by product name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub products: BTreeMap<String, ProductStatus>,

    /// Last error message, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the status was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn managed_api_variants() {
        assert!(!InstallationType::Managed.is_managed_api());
        assert!(!InstallationType::Workshop.is_managed_api());
        assert!(InstallationType::ManagedApi.is_managed_api());
        assert!(InstallationType::ManagedApiSingleTenant.is_managed_api());
        assert!(InstallationType::ManagedApiMultiTenant.is_managed_api());
        assert!(InstallationType::ManagedApiMultiTenant.is_multi_tenant());
        assert!(!InstallationType::ManagedApi.is_multi_tenant());
    }

    #[test]
    fn install_type_serializes_kebab_case() {
        let spec = InstallationSpec {
            install_type: InstallationType::ManagedApiSingleTenant,
            namespace_prefix: "redhat-rhoam-".to_string(),
        };
        let json = serde_json::to_value(&spec).expect("spec should serialize");
        assert_eq!(json["type"], "managed-api-single-tenant");
        assert_eq!(json["namespacePrefix"], "redhat-rhoam-");
        assert_eq!(
            InstallationType::ManagedApiSingleTenant.to_string(),
            "managed-api-single-tenant"
        );
    }

    #[test]
    fn crd_is_namespaced_with_status() {
        let crd = Installation::crd();
        assert_eq!(crd.spec.group, "beacon.dev");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "Installation");
        assert!(crd.spec.versions[0]
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }

    #[test]
    fn status_defaults_to_in_progress() {
        let status = ProductStatus::new("monitoring-spec");
        assert_eq!(status.phase, StatusPhase::InProgress);
        assert_eq!(status.name, "monitoring-spec");
        assert!(status.version.is_none());
    }
}
