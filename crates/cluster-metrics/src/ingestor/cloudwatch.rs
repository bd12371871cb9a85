use crate::{
    error::{Error, Result},
    ingestor::{
        source::MetricsSource,
        types::{RawDatapoint, Statistic, StatisticsRequest},
    },
    settings::AwsSettings,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatch::{
    Client,
    config::Credentials,
    primitives::DateTime as AwsDateTime,
    types::{Datapoint as AwsDatapoint, Dimension as AwsDimension, Statistic as AwsStatistic},
};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// CloudWatch-backed metrics source
#[derive(Clone)]
pub struct CloudWatchSource {
    pub client: Arc<Client>,
}

impl CloudWatchSource {
    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Arc::new(Client::new(sdk_config)),
        }
    }
}

/// Shared AWS configuration for the CloudWatch and RDS clients.
///
/// Static credentials from settings win over the default provider chain.
pub async fn load_sdk_config(settings: &AwsSettings) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.to_string()));

    if let (Some(access_key_id), Some(secret_access_key)) =
        (&settings.access_key_id, &settings.secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id.to_string(),
            secret_access_key.to_string(),
            None,
            None,
            "cluster-metrics",
        ));
    }

    if let Some(endpoint_url) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint_url.to_string());
    }

    loader.load().await
}

#[async_trait]
impl MetricsSource for CloudWatchSource {
    async fn get_metric_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> Result<Vec<RawDatapoint>> {
        let dimension = AwsDimension::builder()
            .name(request.dimension.name())
            .value(&request.entity_id)
            .build();

        let mut call = self
            .client
            .get_metric_statistics()
            .namespace(&request.namespace)
            .metric_name(&request.metric_name)
            .dimensions(dimension)
            .period(request.period_secs)
            .start_time(to_aws_datetime(request.range.start))
            .end_time(to_aws_datetime(request.range.end));

        for stat in &request.statistics {
            call = call.statistics(to_aws_statistic(*stat));
        }
        for label in &request.extended_statistics {
            call = call.extended_statistics(label);
        }

        let output = call.send().await.map_err(aws_sdk_cloudwatch::Error::from)?;

        debug!(
            metric = %request.metric_name,
            entity = %request.entity_id,
            start = %request.range.start,
            end = %request.range.end,
            datapoints = output.datapoints().len(),
            "GetMetricStatistics"
        );

        output.datapoints().iter().map(from_aws_datapoint).collect()
    }
}

fn to_aws_statistic(stat: Statistic) -> AwsStatistic {
    match stat {
        Statistic::Average => AwsStatistic::Average,
        Statistic::Maximum => AwsStatistic::Maximum,
        Statistic::Minimum => AwsStatistic::Minimum,
        Statistic::Sum => AwsStatistic::Sum,
    }
}

fn to_aws_datetime(ts: DateTime<Utc>) -> AwsDateTime {
    AwsDateTime::from_millis(ts.timestamp_millis())
}

fn from_aws_datetime(ts: &AwsDateTime) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
        .ok_or_else(|| Error::InvalidTimestamp(format!("{ts:?}")))
}

fn from_aws_datapoint(dp: &AwsDatapoint) -> Result<RawDatapoint> {
    let timestamp = dp
        .timestamp()
        .ok_or_else(|| Error::InvalidTimestamp("datapoint without timestamp".to_string()))
        .and_then(from_aws_datetime)?;

    let values: BTreeMap<Statistic, f64> = [
        (Statistic::Average, dp.average()),
        (Statistic::Maximum, dp.maximum()),
        (Statistic::Minimum, dp.minimum()),
        (Statistic::Sum, dp.sum()),
    ]
    .into_iter()
    .filter_map(|(stat, value)| value.map(|v| (stat, v)))
    .collect();

    let extended_values = dp
        .extended_statistics()
        .map(|ext| ext.iter().map(|(k, v)| (k.clone(), *v)).collect())
        .unwrap_or_default();

    Ok(RawDatapoint {
        timestamp,
        unit: dp.unit().map(|u| u.as_str().to_string()).unwrap_or_default(),
        values,
        extended_values,
    })
}
