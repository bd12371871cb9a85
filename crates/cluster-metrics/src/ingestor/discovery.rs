use crate::{error::Result, settings::DiscoverySettings};
use async_trait::async_trait;
use aws_sdk_rds::{
    Client,
    types::{DbCluster, DbInstance},
};
use mockall::automock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placeholder service tag for clusters without the tag
pub const UNTAGGED: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub instance_id: String,
    pub is_writer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: String,
    pub service_tag: String,
    pub engine: Option<String>,
    pub members: Vec<ClusterMember>,
}

impl ClusterSummary {
    pub fn is_writer(&self, instance_id: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.instance_id == instance_id && m.is_writer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub instance_class: Option<String>,
    pub availability_zone: Option<String>,
}

/// Source of clusters and their instances
#[automock]
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    async fn clusters(&self) -> Result<Vec<ClusterSummary>>;
    async fn instances(&self, cluster: &ClusterSummary) -> Result<Vec<InstanceSummary>>;
}

/// Cluster selection, empty lists select everything
#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    pub cluster_ids: Vec<String>,
    pub service_tags: Vec<String>,
}

impl ClusterFilter {
    /// Requested clusters keep the requested order; ids that do not exist
    /// are dropped.
    pub fn apply(&self, clusters: Vec<ClusterSummary>) -> Vec<ClusterSummary> {
        let by_id: Vec<ClusterSummary> = if self.cluster_ids.is_empty() {
            clusters
        } else {
            self.cluster_ids
                .iter()
                .filter_map(|id| {
                    let found = clusters.iter().find(|c| &c.cluster_id == id).cloned();
                    if found.is_none() {
                        warn!(cluster = %id, "Requested cluster not found");
                    }
                    found
                })
                .collect()
        };

        if self.service_tags.is_empty() {
            return by_id;
        }
        by_id
            .into_iter()
            .filter(|c| self.service_tags.contains(&c.service_tag))
            .collect()
    }
}

/// List the clusters selected by `filter`
pub async fn discover<D: ClusterDirectory + ?Sized>(
    directory: &D,
    filter: &ClusterFilter,
) -> Result<Vec<ClusterSummary>> {
    let all = directory.clusters().await?;
    let total = all.len();
    let selected = filter.apply(all);
    info!("Selected {} of {} clusters", selected.len(), total);
    Ok(selected)
}

/// RDS-backed cluster directory
#[derive(Clone)]
pub struct RdsDirectory {
    pub client: Arc<Client>,
    pub service_tag_key: String,
}

impl RdsDirectory {
    pub fn new(sdk_config: &aws_config::SdkConfig, settings: &DiscoverySettings) -> Self {
        Self {
            client: Arc::new(Client::new(sdk_config)),
            service_tag_key: settings.service_tag_key.clone(),
        }
    }

    fn cluster_summary(&self, cluster: &DbCluster) -> Option<ClusterSummary> {
        let cluster_id = cluster.db_cluster_identifier()?.to_string();
        let service_tag = cluster
            .tag_list()
            .iter()
            .find(|tag| tag.key() == Some(self.service_tag_key.as_str()))
            .and_then(|tag| tag.value())
            .unwrap_or(UNTAGGED)
            .to_string();
        let members = cluster
            .db_cluster_members()
            .iter()
            .filter_map(|m| {
                Some(ClusterMember {
                    instance_id: m.db_instance_identifier()?.to_string(),
                    is_writer: m.is_cluster_writer().unwrap_or(false),
                })
            })
            .collect();

        Some(ClusterSummary {
            cluster_id,
            service_tag,
            engine: cluster.engine().map(str::to_string),
            members,
        })
    }
}

fn instance_summary(instance: &DbInstance) -> Option<InstanceSummary> {
    Some(InstanceSummary {
        instance_id: instance.db_instance_identifier()?.to_string(),
        instance_class: instance.db_instance_class().map(str::to_string),
        availability_zone: instance.availability_zone().map(str::to_string),
    })
}

#[async_trait]
impl ClusterDirectory for RdsDirectory {
    async fn clusters(&self) -> Result<Vec<ClusterSummary>> {
        let mut clusters = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_db_clusters()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(aws_sdk_rds::Error::from)?;

            clusters.extend(
                output
                    .db_clusters()
                    .iter()
                    .filter_map(|c| self.cluster_summary(c)),
            );

            match output.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }
        debug!("Found {} clusters", clusters.len());
        Ok(clusters)
    }

    async fn instances(&self, cluster: &ClusterSummary) -> Result<Vec<InstanceSummary>> {
        let mut instances = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let output = self
                .client
                .describe_db_instances()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(aws_sdk_rds::Error::from)?;

            instances.extend(
                output
                    .db_instances()
                    .iter()
                    .filter(|i| i.db_cluster_identifier() == Some(cluster.cluster_id.as_str()))
                    .filter_map(instance_summary),
            );

            match output.marker() {
                Some(next) => marker = Some(next.to_string()),
                None => break,
            }
        }
        debug!(
            cluster = %cluster.cluster_id,
            "Found {} instances",
            instances.len()
        );
        Ok(instances)
    }
}
