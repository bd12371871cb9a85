use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

/// Entity id used for cluster-level metrics, which have no instance.
pub const CLUSTER_LEVEL_ENTITY: &str = "NO-INSTANCE";

/// Standard statistics supported by the monitoring API
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Statistic {
    Average,
    Maximum,
    Minimum,
    Sum,
}

impl Statistic {
    pub const ALL: [Statistic; 4] = [
        Statistic::Average,
        Statistic::Maximum,
        Statistic::Minimum,
        Statistic::Sum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "Average",
            Self::Maximum => "Maximum",
            Self::Minimum => "Minimum",
            Self::Sum => "Sum",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Statistic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|stat| stat.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidQuery(format!("unknown statistic: {s}")))
    }
}

/// Percentile labels look like `p50`, `p99` or `p99.9`
pub fn is_valid_percentile_label(label: &str) -> bool {
    label
        .strip_prefix('p')
        .and_then(|rest| rest.parse::<f64>().ok())
        .is_some_and(|value| value > 0.0 && value <= 100.0)
}

/// Metric granularity, which selects the query dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Instance,
    Cluster,
}

impl Dimension {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Instance => "DBInstanceIdentifier",
            Self::Cluster => "DBClusterIdentifier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Standard,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// What to fetch for one metric over one time window
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuerySpec {
    pub metric_name: String,
    pub period: TimeDelta,
    pub statistics: BTreeSet<Statistic>,
    pub extended_statistics: BTreeSet<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl MetricQuerySpec {
    pub fn new(
        metric_name: impl Into<String>,
        period: TimeDelta,
        statistics: impl IntoIterator<Item = Statistic>,
        extended_statistics: impl IntoIterator<Item = String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self> {
        let spec = Self {
            metric_name: metric_name.into(),
            period,
            statistics: statistics.into_iter().collect(),
            extended_statistics: extended_statistics.into_iter().collect(),
            start_time,
            end_time,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric_name.is_empty() {
            return Err(Error::InvalidQuery("metric name is empty".to_string()));
        }
        if self.period <= TimeDelta::zero() {
            return Err(Error::InvalidQuery(format!(
                "period must be positive, got {}s",
                self.period.num_seconds()
            )));
        }
        if self.end_time <= self.start_time {
            return Err(Error::InvalidQuery(format!(
                "end time {} is not after start time {}",
                self.end_time, self.start_time
            )));
        }
        if let Some(label) = self
            .extended_statistics
            .iter()
            .find(|label| !is_valid_percentile_label(label))
        {
            return Err(Error::InvalidQuery(format!(
                "invalid percentile label: {label}"
            )));
        }
        Ok(())
    }
}

/// One query against the monitoring API
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsRequest {
    pub namespace: String,
    pub metric_name: String,
    pub dimension: Dimension,
    pub entity_id: String,
    pub period_secs: i32,
    pub range: TimeRange,
    pub statistics: Vec<Statistic>,
    pub extended_statistics: Vec<String>,
}

/// A datapoint as returned upstream, before unit normalization
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawDatapoint {
    pub timestamp: DateTime<Utc>,
    pub unit: String,
    pub values: BTreeMap<Statistic, f64>,
    pub extended_values: BTreeMap<String, f64>,
}

/// A normalized datapoint in the display timezone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<FixedOffset>,
    pub unit: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<Statistic, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended_values: BTreeMap<String, f64>,
}

/// Ordered datapoints for one (entity, metric) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub entity_id: String,
    pub metric_name: String,
    pub kind: SeriesKind,
    pub datapoints: Vec<Datapoint>,
}

impl MetricSeries {
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn unit(&self) -> Option<&str> {
        self.datapoints.first().map(|dp| dp.unit.as_str())
    }
}

/// Standard and extended series of one entity, keyed by entity id
pub type SeriesMap = BTreeMap<String, MetricSeries>;
