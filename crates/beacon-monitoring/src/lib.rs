//! Monitoring-spec reconciliation for Beacon
//!
//! Mirrors product ServiceMonitors into the central monitoring namespace,
//! grants the monitoring stack read access into product namespaces, and
//! collects anything it created that no longer has a live source. Objects
//! Beacon creates are recognised only by their provenance label.

pub mod client;
pub mod config;
pub mod gc;
pub mod grants;
pub mod installer;
pub mod labels;
pub mod mirror;
pub mod reconciler;
pub mod resolver;
pub mod scanner;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{KubeMonitoringClient, MonitoringKubeClient};
pub use config::{ConfigMapConfigReadWriter, ConfigReadWriter, MonitoringSpecConfig};
pub use gc::GcReport;
pub use grants::MonitoringIdentity;
pub use installer::{MonitoringOperatorInstaller, OlmInstaller, OperatorSettings};
pub use reconciler::{NoQuota, QuotaConfig, Reconciler, PRODUCT_NAME};
pub use state::DesiredState;
