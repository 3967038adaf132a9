//! Common types for Beacon: CRDs, errors, events and Kubernetes utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "beacon-operator";

/// Standard label for the tool managing a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on resources Beacon creates
pub const LABEL_MANAGED_BY_BEACON: &str = "beacon";
