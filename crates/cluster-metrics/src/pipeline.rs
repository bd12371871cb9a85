use crate::{
    exporter::report::ReportSink,
    ingestor::{
        discovery::{ClusterDirectory, ClusterFilter, ClusterSummary, discover},
        fetcher::MetricFetcher,
        source::MetricsSource,
        types::{CLUSTER_LEVEL_ENTITY, Dimension, SeriesMap},
    },
    processor::aggregator::{AggregateContext, AggregateRecord, aggregate},
    settings::{MetricSettings, Settings},
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use std::{fmt::Display, pin::pin};
use tracing::{error, info, warn};

/// Half-open report window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - TimeDelta::days(i64::from(days)),
            end: now,
        }
    }
}

/// One (cluster, metric, entity) unit that did not produce a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub cluster_id: String,
    pub metric_name: String,
    pub entity: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub clusters: usize,
    pub records: usize,
    pub skipped_entities: usize,
    pub failures: Vec<UnitFailure>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn fail(&mut self, cluster_id: &str, metric_name: &str, entity: &str, reason: impl Display) {
        error!(
            cluster = %cluster_id,
            metric = %metric_name,
            entity = %entity,
            "{reason}"
        );
        self.failures.push(UnitFailure {
            cluster_id: cluster_id.to_string(),
            metric_name: metric_name.to_string(),
            entity: entity.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// An entity as keyed in the report and as queried upstream
struct Entity {
    key: String,
    query_id: String,
}

/// Drives discovery, fetching, aggregation and reporting for every selected
/// cluster.
pub struct Pipeline<S, D, R> {
    fetcher: MetricFetcher<S>,
    directory: D,
    sink: R,
    instance_metrics: Vec<MetricSettings>,
    cluster_metrics: Vec<MetricSettings>,
    concurrency: usize,
}

impl<S, D, R> Pipeline<S, D, R>
where
    S: MetricsSource,
    D: ClusterDirectory,
    R: ReportSink,
{
    pub fn new(settings: &Settings, fetcher: MetricFetcher<S>, directory: D, sink: R) -> Self {
        Self {
            fetcher,
            directory,
            sink,
            instance_metrics: settings.instance_metrics.clone(),
            cluster_metrics: settings.cluster_metrics.clone(),
            concurrency: settings.fetch.concurrency.max(1),
        }
    }

    pub async fn run(&self, window: &ReportWindow, filter: &ClusterFilter) -> Result<RunSummary> {
        let clusters = discover(&self.directory, filter)
            .await
            .context("Failed to discover clusters")?;

        info!(
            "Reporting {} clusters from {} to {}",
            clusters.len(),
            window.start,
            window.end
        );

        let mut summary = RunSummary::default();
        for cluster in &clusters {
            self.run_cluster(cluster, window, &mut summary).await;
            summary.clusters += 1;
        }

        info!(
            clusters = summary.clusters,
            records = summary.records,
            skipped = summary.skipped_entities,
            failures = summary.failures.len(),
            "Run complete"
        );
        Ok(summary)
    }

    async fn run_cluster(
        &self,
        cluster: &ClusterSummary,
        window: &ReportWindow,
        summary: &mut RunSummary,
    ) {
        info!(
            cluster = %cluster.cluster_id,
            service_tag = %cluster.service_tag,
            "Processing cluster"
        );

        let instances = match self.directory.instances(cluster).await {
            Ok(instances) => instances,
            Err(err) => {
                summary.fail(&cluster.cluster_id, "-", "-", err);
                Vec::new()
            }
        };

        if let Err(err) = self.sink.cluster_info(cluster, &instances) {
            summary.fail(&cluster.cluster_id, "-", "-", err);
        }

        let instance_entities: Vec<Entity> = instances
            .iter()
            .map(|instance| Entity {
                key: instance.instance_id.clone(),
                query_id: instance.instance_id.clone(),
            })
            .collect();
        if !instance_entities.is_empty() {
            for metric in &self.instance_metrics {
                self.run_metric(
                    cluster,
                    Dimension::Instance,
                    &instance_entities,
                    metric,
                    window,
                    summary,
                )
                .await;
            }
        }

        let cluster_entity = [Entity {
            key: CLUSTER_LEVEL_ENTITY.to_string(),
            query_id: cluster.cluster_id.clone(),
        }];
        for metric in &self.cluster_metrics {
            self.run_metric(
                cluster,
                Dimension::Cluster,
                &cluster_entity,
                metric,
                window,
                summary,
            )
            .await;
        }
    }

    async fn run_metric(
        &self,
        cluster: &ClusterSummary,
        dimension: Dimension,
        entities: &[Entity],
        metric: &MetricSettings,
        window: &ReportWindow,
        summary: &mut RunSummary,
    ) {
        let cluster_id = cluster.cluster_id.as_str();
        let query = match metric.query_spec(window.start, window.end) {
            Ok(query) => query,
            Err(err) => {
                summary.fail(cluster_id, &metric.metric_name, "-", err);
                return;
            }
        };
        let spec = &query;

        // Order of results follows `entities` regardless of concurrency
        let mut results = pin!(
            stream::iter(entities)
                .map(|entity| async move {
                    let result = self.fetcher.fetch(dimension, &entity.query_id, spec).await;
                    (entity, result)
                })
                .buffered(self.concurrency)
        );

        let mut fetched: Vec<(&Entity, _)> = Vec::with_capacity(entities.len());
        while let Some((entity, result)) = results.next().await {
            // An upstream failure ends this metric for the whole cluster
            if let Err(err) = &result {
                if err.is_upstream() {
                    for (entity, result) in fetched.drain(..) {
                        if let Err(err) = result {
                            summary.fail(cluster_id, &spec.metric_name, &entity.key, err);
                        }
                    }
                    summary.fail(cluster_id, &spec.metric_name, &entity.key, err);
                    return;
                }
            }
            fetched.push((entity, result));
        }

        let mut standard = SeriesMap::new();
        let mut extended = SeriesMap::new();
        for (entity, result) in fetched {
            match result {
                Ok((standard_series, extended_series)) => {
                    // Entities without both series are neither plotted nor aggregated
                    if standard_series.is_empty() || extended_series.is_empty() {
                        warn!(
                            cluster = %cluster_id,
                            entity = %entity.key,
                            metric = %spec.metric_name,
                            "No datapoints in window"
                        );
                        summary.skipped_entities += 1;
                        continue;
                    }
                    standard.insert(entity.key.clone(), standard_series);
                    extended.insert(entity.key.clone(), extended_series);
                }
                Err(err) => summary.fail(cluster_id, &spec.metric_name, &entity.key, err),
            }
        }

        if standard.is_empty() {
            return;
        }

        if let Err(err) = self.sink.series(cluster_id, spec, &standard, &extended) {
            summary.fail(cluster_id, &spec.metric_name, "-", err);
        }

        let ctx = AggregateContext {
            spec,
            start_time: window.start,
            end_time: window.end,
            service_tag: &cluster.service_tag,
            cluster_id,
        };
        let aggregation = aggregate(&ctx, &standard, &extended);

        summary.skipped_entities += aggregation.skipped.len();
        for (entity, err) in aggregation.failures {
            summary.fail(cluster_id, &spec.metric_name, &entity, err);
        }

        let records: Vec<AggregateRecord> = aggregation.records.into_values().collect();
        if records.is_empty() {
            return;
        }
        match self.sink.records(cluster_id, &records) {
            Ok(()) => summary.records += records.len(),
            Err(err) => summary.fail(cluster_id, &spec.metric_name, "-", err),
        }
    }
}
