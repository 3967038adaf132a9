//! Custom Resource Definitions used by Beacon
//!
//! `Installation` is Beacon's own CRD. `ServiceMonitor` belongs to the
//! Prometheus Operator; Beacon only reads and mirrors it.

mod installation;
mod service_monitor;

pub use installation::{
    Installation, InstallationSpec, InstallationStatus, InstallationType, ProductStatus,
    StatusPhase,
};
pub use service_monitor::{
    Endpoint, LabelSelector, LabelSelectorRequirement, NamespaceSelector, ServiceMonitor,
    ServiceMonitorSpec,
};
