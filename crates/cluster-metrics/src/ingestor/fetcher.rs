use crate::{
    error::{Error, Result},
    ingestor::{
        source::MetricsSource,
        splitter::{DEFAULT_MAX_DATAPOINTS, split},
        types::{
            Dimension, MetricQuerySpec, MetricSeries, RawDatapoint, SeriesKind, StatisticsRequest,
            TimeRange,
        },
    },
    processor::normalizer::normalize,
    settings::FetchSettings,
};
use chrono::FixedOffset;
use tracing::{debug, info};

/// Retrieves standard and extended series for one entity, splitting the
/// requested window under the upstream datapoint ceiling.
pub struct MetricFetcher<S> {
    source: S,
    namespace: String,
    max_datapoints: u32,
    display_tz: FixedOffset,
}

impl<S: MetricsSource> MetricFetcher<S> {
    pub fn new(
        source: S,
        namespace: impl Into<String>,
        max_datapoints: u32,
        display_tz: FixedOffset,
    ) -> Self {
        Self {
            source,
            namespace: namespace.into(),
            max_datapoints,
            display_tz,
        }
    }

    pub fn from_settings(source: S, settings: &FetchSettings) -> Result<Self> {
        let display_tz = settings.display_offset().ok_or_else(|| {
            Error::InvalidQuery(format!(
                "display offset of {}h is out of range",
                settings.display_utc_offset_hours
            ))
        })?;
        Ok(Self::new(
            source,
            settings.namespace.clone(),
            settings.max_datapoints,
            display_tz,
        ))
    }

    pub fn with_default_ceiling(
        source: S,
        namespace: impl Into<String>,
        display_tz: FixedOffset,
    ) -> Self {
        Self::new(source, namespace, DEFAULT_MAX_DATAPOINTS, display_tz)
    }

    pub fn display_tz(&self) -> &FixedOffset {
        &self.display_tz
    }

    /// Fetch `(standard, extended)` series for one entity and metric.
    ///
    /// Both series are empty when upstream has no data, which is not an
    /// error. Datapoints are normalized, moved to the display timezone and
    /// sorted ascending by timestamp regardless of how many sub-ranges the
    /// window was split into.
    pub async fn fetch(
        &self,
        dimension: Dimension,
        entity_id: &str,
        spec: &MetricQuerySpec,
    ) -> Result<(MetricSeries, MetricSeries)> {
        spec.validate()?;
        let period_secs = i32::try_from(spec.period.num_seconds())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "period of {}ms is not a whole positive number of seconds",
                    spec.period.num_milliseconds()
                ))
            })?;

        let ranges = split(
            spec.start_time,
            spec.end_time,
            spec.period,
            self.max_datapoints,
        )?;

        if ranges.len() > 1 {
            debug!(
                metric = %spec.metric_name,
                entity = %entity_id,
                windows = ranges.len(),
                "Splitting request under datapoint ceiling"
            );
        }

        let mut standard_raw = Vec::new();
        let mut extended_raw = Vec::new();

        for range in ranges {
            if !spec.statistics.is_empty() {
                let request = self.request(dimension, entity_id, spec, period_secs, range);
                let request = StatisticsRequest {
                    statistics: spec.statistics.iter().copied().collect(),
                    ..request
                };
                standard_raw.extend(self.source.get_metric_statistics(&request).await?);
            }
            if !spec.extended_statistics.is_empty() {
                let request = self.request(dimension, entity_id, spec, period_secs, range);
                let request = StatisticsRequest {
                    extended_statistics: spec.extended_statistics.iter().cloned().collect(),
                    ..request
                };
                extended_raw.extend(self.source.get_metric_statistics(&request).await?);
            }
        }

        let standard = self.into_series(entity_id, spec, SeriesKind::Standard, standard_raw);
        let extended = self.into_series(entity_id, spec, SeriesKind::Extended, extended_raw);

        info!(
            metric = %spec.metric_name,
            entity = %entity_id,
            standard = standard.len(),
            extended = extended.len(),
            "Fetched datapoints"
        );

        Ok((standard, extended))
    }

    fn request(
        &self,
        dimension: Dimension,
        entity_id: &str,
        spec: &MetricQuerySpec,
        period_secs: i32,
        range: TimeRange,
    ) -> StatisticsRequest {
        StatisticsRequest {
            namespace: self.namespace.clone(),
            metric_name: spec.metric_name.clone(),
            dimension,
            entity_id: entity_id.to_string(),
            period_secs,
            range,
            statistics: Vec::new(),
            extended_statistics: Vec::new(),
        }
    }

    fn into_series(
        &self,
        entity_id: &str,
        spec: &MetricQuerySpec,
        kind: SeriesKind,
        raw: Vec<RawDatapoint>,
    ) -> MetricSeries {
        let mut datapoints: Vec<_> = raw
            .into_iter()
            .map(|dp| normalize(dp, kind, &self.display_tz))
            .collect();
        datapoints.sort_by_key(|dp| dp.timestamp);

        MetricSeries {
            entity_id: entity_id.to_string(),
            metric_name: spec.metric_name.clone(),
            kind,
            datapoints,
        }
    }
}
