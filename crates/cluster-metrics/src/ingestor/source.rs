use crate::{
    error::Result,
    ingestor::types::{RawDatapoint, StatisticsRequest},
};
use async_trait::async_trait;
use mockall::automock;

/// Upstream monitoring API
///
/// One call is one bounded query: the caller is responsible for keeping the
/// requested range under the datapoint ceiling.
#[automock]
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_metric_statistics(
        &self,
        request: &StatisticsRequest,
    ) -> Result<Vec<RawDatapoint>>;
}
