//! Provenance labelling
//!
//! Every object Beacon creates carries one fixed label. Garbage collection
//! only ever lists and deletes objects with that label, so user-created and
//! operator-created objects are never touched even when names collide.

use beacon_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_BEACON};
use kube::Resource;

/// Label key marking objects created by the monitoring reconciler
pub const PROVENANCE_LABEL_KEY: &str = "beacon.dev/cloned-servicemonitor";

/// Value of [`PROVENANCE_LABEL_KEY`]
pub const PROVENANCE_LABEL_VALUE: &str = "true";

/// Set the provenance label on `obj`, keeping any other labels.
///
/// Also marks the object as managed by Beacon for humans reading it; only
/// the provenance pair decides ownership.
pub fn stamp<K: Resource>(obj: &mut K) {
    let labels = obj.meta_mut().labels.get_or_insert_with(Default::default);
    labels.insert(
        PROVENANCE_LABEL_KEY.to_string(),
        PROVENANCE_LABEL_VALUE.to_string(),
    );
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_BEACON.to_string(),
    );
}

/// Whether `obj` carries the exact provenance key/value pair.
pub fn is_owned<K: Resource>(obj: &K) -> bool {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(PROVENANCE_LABEL_KEY))
        .is_some_and(|v| v == PROVENANCE_LABEL_VALUE)
}

/// Label selector for list calls that only return owned objects
pub fn selector() -> String {
    format!("{}={}", PROVENANCE_LABEL_KEY, PROVENANCE_LABEL_VALUE)
}
