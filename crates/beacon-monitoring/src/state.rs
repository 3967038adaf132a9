//! Per-pass desired state

use std::collections::BTreeSet;

/// Everything one reconcile pass decided should exist
///
/// Built by the synchronizers and consumed by the garbage collector within a
/// single pass. Never stored between passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Names of mirrors in the monitoring namespace justified by a source
    pub mirrored_names: BTreeSet<String>,
    /// Product namespaces that keep their access grant
    pub grant_namespaces: BTreeSet<String>,
}

impl DesiredState {
    /// Empty desired state; every owned object is collected against it
    pub fn empty() -> Self {
        Self::default()
    }
}
