//! Mirroring of product ServiceMonitors into the monitoring namespace
//!
//! A source `S` in namespace `N` mirrors to `N-S` in the monitoring
//! namespace. Mirrors are created when first seen and their spec replaced
//! when the source changes. An object already sitting at the derived name
//! without the provenance label belongs to someone else and is left alone.

use std::collections::BTreeMap;

use beacon_common::crd::{NamespaceSelector, ServiceMonitor};
use beacon_common::Error;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::client::MonitoringKubeClient;
use crate::labels;
use crate::scanner::SourceMonitor;
use crate::state::DesiredState;

/// Longest object name the API server accepts
pub const MAX_NAME_LENGTH: usize = 253;

const KIND: &str = "ServiceMonitor";

/// Mirror name for a source `name` in `namespace`
pub fn mirrored_name(namespace: &str, name: &str) -> String {
    format!("{}-{}", namespace, name)
}

/// Desired mirror of `source` in `monitoring_ns`
///
/// Source labels are copied and the provenance label stamped. A source
/// without a namespace selector implicitly targets its own namespace, so the
/// mirror is pinned to that namespace explicitly.
pub fn build_mirror(source: &SourceMonitor, monitoring_ns: &str) -> ServiceMonitor {
    let mut spec = source.monitor.spec.clone();
    let selects_own_namespace = spec
        .namespace_selector
        .as_ref()
        .is_none_or(|sel| !sel.any && sel.match_names.is_empty());
    if selects_own_namespace {
        spec.namespace_selector = Some(NamespaceSelector::only(&source.namespace));
    }

    let mut mirror = ServiceMonitor {
        metadata: ObjectMeta {
            name: Some(mirrored_name(&source.namespace, &source.name())),
            namespace: Some(monitoring_ns.to_string()),
            labels: source.monitor.metadata.labels.clone(),
            ..Default::default()
        },
        spec,
    };
    labels::stamp(&mut mirror);
    mirror
}

/// What happened to one source during a sync
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// No mirror existed; one was created
    Created,
    /// The owned mirror drifted and was replaced
    Updated,
    /// The owned mirror already matched
    Unchanged,
    /// An object without the provenance label holds the name
    SkippedUnowned,
    /// The derived name is not a valid object name
    SkippedInvalidName,
    /// Another source this pass already derived the same name
    SkippedDuplicate,
}

/// Per-outcome counts of one sync
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Mirrors created
    pub created: usize,
    /// Mirrors replaced
    pub updated: usize,
    /// Mirrors already in sync
    pub unchanged: usize,
    /// Sources not mirrored
    pub skipped: usize,
}

impl MirrorStats {
    fn record(&mut self, outcome: MirrorOutcome) {
        match outcome {
            MirrorOutcome::Created => self.created += 1,
            MirrorOutcome::Updated => self.updated += 1,
            MirrorOutcome::Unchanged => self.unchanged += 1,
            MirrorOutcome::SkippedUnowned
            | MirrorOutcome::SkippedInvalidName
            | MirrorOutcome::SkippedDuplicate => self.skipped += 1,
        }
    }
}

fn labels_of(sm: &ServiceMonitor) -> BTreeMap<String, String> {
    sm.metadata.labels.clone().unwrap_or_default()
}

/// Create or refresh the mirror of every source
///
/// Each derived name is added to `desired.mirrored_names`. Write failures
/// abort with [`Error::SyncWrite`].
#[instrument(skip(client, sources, desired), fields(sources = sources.len()))]
pub async fn sync_mirrors(
    client: &dyn MonitoringKubeClient,
    sources: &[SourceMonitor],
    monitoring_ns: &str,
    desired: &mut DesiredState,
) -> Result<MirrorStats, Error> {
    let mut stats = MirrorStats::default();
    for source in sources {
        let outcome = sync_one(client, source, monitoring_ns, desired).await?;
        stats.record(outcome);
    }
    Ok(stats)
}

async fn sync_one(
    client: &dyn MonitoringKubeClient,
    source: &SourceMonitor,
    monitoring_ns: &str,
    desired: &mut DesiredState,
) -> Result<MirrorOutcome, Error> {
    let mirror = build_mirror(source, monitoring_ns);
    let name = mirror.name_any();

    if name.len() > MAX_NAME_LENGTH {
        warn!(
            namespace = %source.namespace,
            source = %source.name(),
            "derived mirror name too long, skipping"
        );
        return Ok(MirrorOutcome::SkippedInvalidName);
    }
    if !desired.mirrored_names.insert(name.clone()) {
        warn!(
            namespace = %source.namespace,
            source = %source.name(),
            name = %name,
            "another source already mirrors to this name, skipping"
        );
        return Ok(MirrorOutcome::SkippedDuplicate);
    }

    let write_err = |source: kube::Error| Error::SyncWrite {
        kind: KIND,
        name: name.clone(),
        namespace: monitoring_ns.to_string(),
        source,
    };

    let existing = client
        .get_service_monitor(&name, monitoring_ns)
        .await
        .map_err(write_err)?;

    match existing {
        None => {
            client
                .create_service_monitor(monitoring_ns, &mirror)
                .await
                .map_err(write_err)?;
            info!(name = %name, namespace = %monitoring_ns, "created mirrored service monitor");
            Ok(MirrorOutcome::Created)
        }
        Some(current) if !labels::is_owned(&current) => {
            warn!(
                name = %name,
                namespace = %monitoring_ns,
                "service monitor exists without provenance label, leaving it untouched"
            );
            Ok(MirrorOutcome::SkippedUnowned)
        }
        Some(current) => {
            let wanted_labels = labels_of(&mirror);
            if current.spec == mirror.spec && labels_of(&current) == wanted_labels {
                debug!(name = %name, "mirror up to date");
                return Ok(MirrorOutcome::Unchanged);
            }
            let mut updated = current;
            updated.spec = mirror.spec;
            updated.metadata.labels = Some(wanted_labels);
            client
                .replace_service_monitor(monitoring_ns, &updated)
                .await
                .map_err(write_err)?;
            info!(name = %name, namespace = %monitoring_ns, "updated mirrored service monitor");
            Ok(MirrorOutcome::Updated)
        }
    }
}
