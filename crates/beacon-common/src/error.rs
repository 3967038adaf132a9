//! Error types for Beacon
//!
//! Every fatal condition in a reconcile pass is one of these variants. The
//! variants carry the object coordinates (kind, name, namespace) of the call
//! that failed so a pass failure can be traced back to a single API request.

use thiserror::Error;

/// Fixed message reported when the monitoring product configuration cannot be read
pub const CONFIG_UNREADABLE_MESSAGE: &str = "could not read monitoring config";

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Beacon operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error outside of a scan/sync/gc step
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Product configuration could not be read
    #[error("{message}")]
    ConfigUnreadable {
        /// Fixed, caller-visible message
        message: String,
        /// Underlying reason, kept out of the display string
        reason: Option<String>,
    },

    /// Listing source ServiceMonitors in a product namespace failed
    #[error("failed to list service monitors in namespace {namespace}: {source}")]
    Scan {
        /// Namespace that could not be listed
        namespace: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Creating or updating a mirrored object or access grant failed
    #[error("failed to write {kind} {namespace}/{name}: {source}")]
    SyncWrite {
        /// Object kind (ServiceMonitor, Role, RoleBinding)
        kind: &'static str,
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Listing provenance-labelled objects for garbage collection failed
    #[error("failed to list owned {kind} objects in {scope}: {source}")]
    GcList {
        /// Object kind (ServiceMonitor, Role, RoleBinding)
        kind: &'static str,
        /// Where the list ran, e.g. `namespace observability` or `all namespaces`
        scope: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Deleting a stale object failed with something other than not-found
    #[error("failed to delete {kind} {namespace}/{name}: {source}")]
    GcDelete {
        /// Object kind (ServiceMonitor, Role, RoleBinding)
        kind: &'static str,
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// Installing the monitoring operator or reading its install plan failed
    #[error("monitoring operator install failed: {message}")]
    UpstreamInstall {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration or resource
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "controller")
        context: String,
    },
}

impl Error {
    /// The fixed config-unreadable error, recording the underlying reason
    pub fn config_unreadable(reason: impl Into<String>) -> Self {
        Self::ConfigUnreadable {
            message: CONFIG_UNREADABLE_MESSAGE.to_string(),
            reason: Some(reason.into()),
        }
    }

    /// Create an upstream install error with the given message
    pub fn upstream_install(msg: impl Into<String>) -> Self {
        Self::UpstreamInstall {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Every pass recomputes desired state from scratch, so anything that may
    /// clear up on its own (API hiccups, conflicts, an operator still
    /// installing) is retryable. Validation and serialization errors need a
    /// configuration fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source }
            | Error::Scan { source, .. }
            | Error::SyncWrite { source, .. }
            | Error::GcList { source, .. }
            | Error::GcDelete { source, .. } => is_retryable_kube(source),
            Error::ConfigUnreadable { .. } => true,
            Error::UpstreamInstall { .. } => true,
            Error::Serialization { .. } => false,
            Error::Validation { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the namespace if this error is associated with a specific namespace
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Error::Scan { namespace, .. }
            | Error::SyncWrite { namespace, .. }
            | Error::GcDelete { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}

/// Whether a kube error is a 404 from the API server
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a kube error is a 409 from the API server
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

fn is_retryable_kube(err: &kube::Error) -> bool {
    match err {
        // Conflicts come from concurrent writers; the next pass re-reads.
        kube::Error::Api(ae) if ae.code == 409 => true,
        kube::Error::Api(ae) => !(400..500).contains(&ae.code),
        _ => true,
    }
}
