use crate::{
    error::Error,
    ingestor::types::{MetricQuerySpec, MetricSeries, SeriesMap, Statistic},
    processor::stats::{mean, reduce},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Summary of one percentile series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSummary {
    pub avg: f64,
    // NOTE: this is the mean of the percentile series, same as `avg`. The
    // reports have always been produced this way; switching to a true max
    // needs sign-off from the report owners.
    pub max: f64,
}

/// Summary of one (cluster, entity, metric) triple over the report window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRecord {
    pub service_tag: String,
    pub cluster_id: String,
    pub instance_id: String,
    pub metric_name: String,
    pub metric_unit: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub sum: Option<f64>,
    pub percentiles: BTreeMap<String, PercentileSummary>,
}

impl AggregateRecord {
    pub fn statistic(&self, stat: Statistic) -> Option<f64> {
        match stat {
            Statistic::Average => self.avg,
            Statistic::Maximum => self.max,
            Statistic::Minimum => self.min,
            Statistic::Sum => self.sum,
        }
    }

    fn set_statistic(&mut self, stat: Statistic, value: f64) {
        let slot = match stat {
            Statistic::Average => &mut self.avg,
            Statistic::Maximum => &mut self.max,
            Statistic::Minimum => &mut self.min,
            Statistic::Sum => &mut self.sum,
        };
        *slot = Some(value);
    }
}

/// Labels attached to every record of one aggregation call
#[derive(Debug, Clone, Copy)]
pub struct AggregateContext<'a> {
    pub spec: &'a MetricQuerySpec,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub service_tag: &'a str,
    pub cluster_id: &'a str,
}

/// Result of aggregating every entity of one metric
#[derive(Debug, Default)]
pub struct Aggregation {
    pub records: BTreeMap<String, AggregateRecord>,
    pub failures: BTreeMap<String, Error>,
    pub skipped: Vec<String>,
}

/// Reduce each entity's standard and extended series into one record.
///
/// Entities missing from either map, or with an empty series on either
/// side, are skipped. An entity whose series never carries a requested
/// statistic is reported under `failures` without affecting the others.
pub fn aggregate(
    ctx: &AggregateContext<'_>,
    standard: &SeriesMap,
    extended: &SeriesMap,
) -> Aggregation {
    let mut out = Aggregation::default();

    for (entity_id, standard_series) in standard {
        let Some(extended_series) = extended.get(entity_id) else {
            debug!(entity = %entity_id, "No extended series, skipping");
            out.skipped.push(entity_id.clone());
            continue;
        };
        if standard_series.is_empty() || extended_series.is_empty() {
            debug!(entity = %entity_id, "Empty series, skipping");
            out.skipped.push(entity_id.clone());
            continue;
        }

        match aggregate_entity(ctx, entity_id, standard_series, extended_series) {
            Ok(record) => {
                out.records.insert(entity_id.clone(), record);
            }
            Err(err) => {
                warn!(
                    cluster = %ctx.cluster_id,
                    entity = %entity_id,
                    metric = %ctx.spec.metric_name,
                    error = %err,
                    "Aggregation failed"
                );
                out.failures.insert(entity_id.clone(), err);
            }
        }
    }

    out.skipped.extend(
        extended
            .keys()
            .filter(|entity_id| !standard.contains_key(*entity_id))
            .cloned(),
    );

    out
}

fn aggregate_entity(
    ctx: &AggregateContext<'_>,
    entity_id: &str,
    standard: &MetricSeries,
    extended: &MetricSeries,
) -> Result<AggregateRecord, Error> {
    let missing = |statistic: &str| Error::MissingStatistic {
        entity: entity_id.to_string(),
        metric: ctx.spec.metric_name.clone(),
        statistic: statistic.to_string(),
    };

    let mut record = AggregateRecord {
        service_tag: ctx.service_tag.to_string(),
        cluster_id: ctx.cluster_id.to_string(),
        instance_id: entity_id.to_string(),
        metric_name: ctx.spec.metric_name.clone(),
        metric_unit: standard.unit().unwrap_or_default().to_string(),
        start_time: ctx.start_time,
        end_time: ctx.end_time,
        avg: None,
        max: None,
        min: None,
        sum: None,
        percentiles: BTreeMap::new(),
    };

    for stat in &ctx.spec.statistics {
        let values: Vec<f64> = standard
            .datapoints
            .iter()
            .filter_map(|dp| dp.values.get(stat).copied())
            .collect();
        let value = reduce(*stat, &values).ok_or_else(|| missing(stat.as_str()))?;
        record.set_statistic(*stat, value);
    }

    for label in &ctx.spec.extended_statistics {
        let values: Vec<f64> = extended
            .datapoints
            .iter()
            .filter_map(|dp| dp.extended_values.get(label).copied())
            .collect();
        let avg = mean(&values).ok_or_else(|| missing(label.as_str()))?;
        record
            .percentiles
            .insert(label.clone(), PercentileSummary { avg, max: avg });
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestor::types::{Datapoint, SeriesKind};
    use chrono::{FixedOffset, TimeDelta, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    fn spec(stats: &[Statistic], ext: &[&str]) -> MetricQuerySpec {
        MetricQuerySpec::new(
            "DatabaseConnections",
            TimeDelta::seconds(300),
            stats.iter().copied(),
            ext.iter().map(|s| s.to_string()),
            start(),
            start() + TimeDelta::days(1),
        )
        .unwrap()
    }

    fn ts(i: i64) -> DateTime<FixedOffset> {
        (start() + TimeDelta::minutes(5 * i)).with_timezone(&FixedOffset::east_opt(9 * 3600).unwrap())
    }

    fn standard_series(entity: &str, values: &[f64], stats: &[Statistic]) -> MetricSeries {
        MetricSeries {
            entity_id: entity.to_string(),
            metric_name: "DatabaseConnections".to_string(),
            kind: SeriesKind::Standard,
            datapoints: values
                .iter()
                .enumerate()
                .map(|(i, v)| Datapoint {
                    timestamp: ts(i as i64),
                    unit: "Count".to_string(),
                    values: stats.iter().map(|s| (*s, *v)).collect(),
                    extended_values: BTreeMap::new(),
                })
                .collect(),
        }
    }

    fn extended_series(entity: &str, label: &str, values: &[f64]) -> MetricSeries {
        MetricSeries {
            entity_id: entity.to_string(),
            metric_name: "DatabaseConnections".to_string(),
            kind: SeriesKind::Extended,
            datapoints: values
                .iter()
                .enumerate()
                .map(|(i, v)| Datapoint {
                    timestamp: ts(i as i64),
                    unit: "Count".to_string(),
                    values: BTreeMap::new(),
                    extended_values: BTreeMap::from([(label.to_string(), *v)]),
                })
                .collect(),
        }
    }

    fn run(spec: &MetricQuerySpec, standard: SeriesMap, extended: SeriesMap) -> Aggregation {
        let ctx = AggregateContext {
            spec,
            start_time: spec.start_time,
            end_time: spec.end_time,
            service_tag: "billing",
            cluster_id: "cluster-a",
        };
        aggregate(&ctx, &standard, &extended)
    }

    #[test]
    fn test_all_standard_statistics() {
        let stats = Statistic::ALL;
        let spec = spec(&stats, &["p90"]);
        let standard = SeriesMap::from([(
            "db-1".to_string(),
            standard_series("db-1", &[10.0, 20.0, 30.0], &stats),
        )]);
        let extended = SeriesMap::from([(
            "db-1".to_string(),
            extended_series("db-1", "p90", &[5.0, 15.0]),
        )]);

        let agg = run(&spec, standard, extended);
        assert!(agg.failures.is_empty());
        let record = &agg.records["db-1"];
        assert_eq!(record.avg, Some(20.0));
        assert_eq!(record.max, Some(30.0));
        assert_eq!(record.min, Some(10.0));
        assert_eq!(record.sum, Some(60.0));
        assert_eq!(record.metric_unit, "Count");
        assert_eq!(record.service_tag, "billing");
        assert_eq!(record.cluster_id, "cluster-a");
        assert_eq!(record.instance_id, "db-1");
    }

    #[test]
    fn test_percentile_max_equals_mean() {
        let spec = spec(&[Statistic::Average], &["p90"]);
        let standard = SeriesMap::from([(
            "db-1".to_string(),
            standard_series("db-1", &[1.0, 2.0], &[Statistic::Average]),
        )]);
        let extended = SeriesMap::from([(
            "db-1".to_string(),
            extended_series("db-1", "p90", &[5.0, 15.0]),
        )]);

        let record = &run(&spec, standard, extended).records["db-1"];
        assert_eq!(
            record.percentiles["p90"],
            PercentileSummary {
                avg: 10.0,
                max: 10.0
            }
        );
    }

    #[test]
    fn test_unrequested_statistics_stay_absent() {
        let spec = spec(&[Statistic::Average, Statistic::Maximum], &["p90"]);
        // datapoints carry every statistic, only two were requested
        let standard = SeriesMap::from([(
            "db-1".to_string(),
            standard_series("db-1", &[1.0, 3.0], &Statistic::ALL),
        )]);
        let extended = SeriesMap::from([(
            "db-1".to_string(),
            extended_series("db-1", "p90", &[2.0]),
        )]);

        let record = &run(&spec, standard, extended).records["db-1"];
        assert_eq!(record.avg, Some(2.0));
        assert_eq!(record.max, Some(3.0));
        assert_eq!(record.min, None);
        assert_eq!(record.sum, None);
        assert!(!record.percentiles.contains_key("p99"));
    }

    #[test]
    fn test_missing_statistic_fails_only_that_entity() {
        let spec = spec(&[Statistic::Average, Statistic::Sum], &["p90"]);
        let standard = SeriesMap::from([
            (
                "db-1".to_string(),
                standard_series("db-1", &[1.0], &[Statistic::Average]),
            ),
            (
                "db-2".to_string(),
                standard_series("db-2", &[1.0], &[Statistic::Average, Statistic::Sum]),
            ),
        ]);
        let extended = SeriesMap::from([
            ("db-1".to_string(), extended_series("db-1", "p90", &[1.0])),
            ("db-2".to_string(), extended_series("db-2", "p90", &[1.0])),
        ]);

        let agg = run(&spec, standard, extended);
        assert!(agg.records.contains_key("db-2"));
        assert!(!agg.records.contains_key("db-1"));
        assert!(matches!(
            &agg.failures["db-1"],
            Error::MissingStatistic { statistic, .. } if statistic == "Sum"
        ));
    }

    #[test]
    fn test_empty_entities_skipped() {
        let spec = spec(&[Statistic::Average], &["p90"]);
        let standard = SeriesMap::from([
            (
                "db-1".to_string(),
                standard_series("db-1", &[], &[Statistic::Average]),
            ),
            (
                "db-2".to_string(),
                standard_series("db-2", &[1.0], &[Statistic::Average]),
            ),
            (
                "db-3".to_string(),
                standard_series("db-3", &[1.0], &[Statistic::Average]),
            ),
        ]);
        let extended = SeriesMap::from([
            ("db-1".to_string(), extended_series("db-1", "p90", &[1.0])),
            ("db-2".to_string(), extended_series("db-2", "p90", &[])),
            ("db-4".to_string(), extended_series("db-4", "p90", &[1.0])),
        ]);

        let agg = run(&spec, standard, extended);
        assert!(agg.records.is_empty());
        assert!(agg.failures.is_empty());
        assert_eq!(agg.skipped, vec!["db-1", "db-2", "db-3", "db-4"]);
    }

    #[test]
    fn test_deterministic() {
        let stats = Statistic::ALL;
        let spec = spec(&stats, &["p50", "p90", "p99"]);
        let values: Vec<f64> = (0..500).map(|i| (i as f64 * 0.37).sin() * 100.0).collect();
        let standard: SeriesMap = ["db-1", "db-2", "db-3"]
            .into_iter()
            .map(|e| (e.to_string(), standard_series(e, &values, &stats)))
            .collect();
        let extended: SeriesMap = ["db-1", "db-2", "db-3"]
            .into_iter()
            .map(|e| {
                let mut series = extended_series(e, "p50", &values);
                for dp in series.datapoints.iter_mut() {
                    let v = dp.extended_values["p50"];
                    dp.extended_values.insert("p90".to_string(), v * 1.5);
                    dp.extended_values.insert("p99".to_string(), v * 2.0);
                }
                (e.to_string(), series)
            })
            .collect();

        let a = run(&spec, standard.clone(), extended.clone());
        let b = run(&spec, standard, extended);
        assert_eq!(a.records, b.records);
        let bits = |agg: &Aggregation| -> Vec<u64> {
            agg.records
                .values()
                .flat_map(|r| {
                    [r.avg, r.max, r.min, r.sum]
                        .into_iter()
                        .flatten()
                        .chain(r.percentiles.values().map(|p| p.avg))
                        .map(f64::to_bits)
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        assert_eq!(bits(&a), bits(&b));
    }
}
