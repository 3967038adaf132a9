//! Source ServiceMonitor discovery

use beacon_common::crd::ServiceMonitor;
use beacon_common::Error;
use kube::ResourceExt;
use tracing::{debug, instrument};

use crate::client::MonitoringKubeClient;

/// A ServiceMonitor found in a product namespace
#[derive(Clone, Debug)]
pub struct SourceMonitor {
    /// Namespace the monitor was found in
    pub namespace: String,
    /// The monitor as read from the cluster
    pub monitor: ServiceMonitor,
}

impl SourceMonitor {
    /// Name of the source object
    pub fn name(&self) -> String {
        self.monitor.name_any()
    }
}

/// List every ServiceMonitor in each product namespace, in namespace order
///
/// Any list failure aborts the scan with [`Error::Scan`].
#[instrument(skip(client, namespaces), fields(namespace_count = namespaces.len()))]
pub async fn scan_sources(
    client: &dyn MonitoringKubeClient,
    namespaces: &[String],
) -> Result<Vec<SourceMonitor>, Error> {
    let mut sources = Vec::new();
    for namespace in namespaces {
        let monitors = client
            .list_service_monitors(namespace)
            .await
            .map_err(|source| Error::Scan {
                namespace: namespace.clone(),
                source,
            })?;
        debug!(namespace = %namespace, count = monitors.len(), "scanned namespace");
        sources.extend(monitors.into_iter().map(|monitor| SourceMonitor {
            namespace: namespace.clone(),
            monitor,
        }));
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMonitoringKubeClient;
    use crate::testing::{api_error, service_monitor};

    #[tokio::test]
    async fn scan_keeps_namespace_order_and_pairs() {
        let mut client = MockMonitoringKubeClient::new();
        client
            .expect_list_service_monitors()
            .returning(|ns| match ns {
                "fuse" => Ok(vec![service_monitor("fuse-servicemon", "fuse")]),
                "ups" => Ok(vec![
                    service_monitor("ups-a", "ups"),
                    service_monitor("ups-b", "ups"),
                ]),
                _ => Ok(vec![]),
            });

        let namespaces = vec!["3scale".to_string(), "fuse".to_string(), "ups".to_string()];
        let sources = scan_sources(&client, &namespaces).await.unwrap();

        let pairs: Vec<(String, String)> = sources
            .iter()
            .map(|s| (s.namespace.clone(), s.name()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("fuse".to_string(), "fuse-servicemon".to_string()),
                ("ups".to_string(), "ups-a".to_string()),
                ("ups".to_string(), "ups-b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn no_namespaces_scans_nothing() {
        let client = MockMonitoringKubeClient::new();
        let sources = scan_sources(&client, &[]).await.unwrap();
        assert!(sources.is_empty());
    }

    #[tokio::test]
    async fn list_failure_names_the_namespace() {
        let mut client = MockMonitoringKubeClient::new();
        client
            .expect_list_service_monitors()
            .returning(|ns| match ns {
                "fuse" => Ok(vec![]),
                _ => Err(api_error(500)),
            });

        let namespaces = vec!["fuse".to_string(), "ups".to_string()];
        let err = scan_sources(&client, &namespaces).await.unwrap_err();
        match err {
            Error::Scan { namespace, .. } => assert_eq!(namespace, "ups"),
            other => panic!("Expected Scan error, got {:?}", other),
        }
    }
}
