pub mod validation;

use crate::ingestor::{
    splitter::DEFAULT_MAX_DATAPOINTS,
    types::{MetricQuerySpec, Statistic},
};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use validation::validate_config;

/// Main settings configuration for cluster-metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level for application logging (e.g., "info", "debug", "warn", "error")
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// AWS client configuration
    #[serde(default)]
    pub aws: AwsSettings,
    /// Metric retrieval parameters
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Cluster discovery parameters
    #[serde(default)]
    pub discovery: DiscoverySettings,
    /// Report output configuration
    #[serde(default)]
    pub output: OutputSettings,
    /// Metrics fetched per instance (dimension DBInstanceIdentifier)
    #[serde(default = "default_instance_metrics")]
    pub instance_metrics: Vec<MetricSettings>,
    /// Metrics fetched per cluster (dimension DBClusterIdentifier)
    #[serde(default = "default_cluster_metrics")]
    pub cluster_metrics: Vec<MetricSettings>,
}

/// AWS client configuration
///
/// When both keys are set they are used as static credentials, otherwise the
/// default provider chain (env, profile, instance role) applies.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Override endpoint, e.g. for a local emulator
    pub endpoint_url: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "ap-northeast-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
        }
    }
}

// Keep secrets out of logs
impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "***"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

/// Metric retrieval parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Monitoring namespace (default: AWS/RDS)
    pub namespace: String,
    /// Datapoint ceiling of a single query (default: 1440)
    pub max_datapoints: u32,
    /// Fixed UTC offset of report timestamps in hours (default: 9)
    pub display_utc_offset_hours: i32,
    /// Number of instances fetched concurrently (default: 1 = sequential)
    pub concurrency: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            namespace: "AWS/RDS".to_string(),
            max_datapoints: DEFAULT_MAX_DATAPOINTS,
            display_utc_offset_hours: 9,
            concurrency: 1,
        }
    }
}

impl FetchSettings {
    pub fn display_offset(&self) -> Option<FixedOffset> {
        self.display_utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
    }
}

/// Cluster discovery parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Cluster tag holding the service tag (default: ServiceTag)
    pub service_tag_key: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            service_tag_key: "ServiceTag".to_string(),
        }
    }
}

/// Report output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Root directory, one subdirectory per cluster (default: metrics)
    pub dir: String,
    /// Write fetched series as JSON for plotting (default: true)
    pub write_series: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: "metrics".to_string(),
            write_series: true,
        }
    }
}

/// One metric to fetch and aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSettings {
    pub metric_name: String,
    pub period_secs: u32,
    #[serde(default)]
    pub statistics: Vec<Statistic>,
    #[serde(default)]
    pub extended_statistics: Vec<String>,
}

impl MetricSettings {
    fn new(metric_name: &str, period_secs: u32, statistics: &[Statistic]) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            period_secs,
            statistics: statistics.to_vec(),
            extended_statistics: vec!["p90".to_string(), "p99".to_string()],
        }
    }

    /// Query for this metric over `[start, end)`
    pub fn query_spec(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> crate::error::Result<MetricQuerySpec> {
        MetricQuerySpec::new(
            self.metric_name.clone(),
            TimeDelta::seconds(i64::from(self.period_secs)),
            self.statistics.iter().copied(),
            self.extended_statistics.iter().cloned(),
            start,
            end,
        )
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_instance_metrics() -> Vec<MetricSettings> {
    use Statistic::*;
    vec![
        MetricSettings::new("CPUUtilization", 300, &[Average, Maximum]),
        MetricSettings::new("DatabaseConnections", 300, &[Average, Maximum, Sum]),
        MetricSettings::new("FreeableMemory", 300, &[Average, Minimum]),
        MetricSettings::new("Queries", 300, &[Average, Maximum, Sum]),
        MetricSettings::new("ReadIOPS", 86_400, &[Average, Maximum, Sum]),
        MetricSettings::new("WriteIOPS", 86_400, &[Average, Maximum, Sum]),
    ]
}

pub fn default_cluster_metrics() -> Vec<MetricSettings> {
    vec![MetricSettings::new(
        "VolumeBytesUsed",
        3_600,
        &[Statistic::Average, Statistic::Maximum],
    )]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            aws: AwsSettings::default(),
            fetch: FetchSettings::default(),
            discovery: DiscoverySettings::default(),
            output: OutputSettings::default(),
            instance_metrics: default_instance_metrics(),
            cluster_metrics: default_cluster_metrics(),
        }
    }
}

impl Settings {
    /// Load configuration from a specific config file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Construct settings, env vars take priority still
        let settings = ConfigBuilder::builder()
            .add_source(File::with_name(&path.as_ref().to_string_lossy()))
            .add_source(
                Environment::with_prefix("CLUSTER_METRICS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // NOTE: It's ok if this fails (file might not exist)
        let _ = dotenvy::dotenv();

        let settings: Settings = ConfigBuilder::builder()
            .add_source(
                Environment::with_prefix("CLUSTER_METRICS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings {{\n\
             \tLog Level: {}\n\
             \tRegion: {}\n\
             \tNamespace: {}\n\
             \tMax Datapoints: {}\n\
             \tDisplay Offset: UTC{:+}\n\
             \tConcurrency: {}\n\
             \tOutput Dir: {}\n\
             \tInstance Metrics: {}\n\
             \tCluster Metrics: {}\n\
             }}",
            self.log_level,
            self.aws.region,
            self.fetch.namespace,
            self.fetch.max_datapoints,
            self.fetch.display_utc_offset_hours,
            self.fetch.concurrency,
            self.output.dir,
            self.instance_metrics.len(),
            self.cluster_metrics.len(),
        )
    }
}
