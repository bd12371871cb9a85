use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use cluster_metrics::{
    error::Error,
    exporter::report::FileReporter,
    ingestor::{
        discovery::{
            ClusterFilter, ClusterMember, ClusterSummary, InstanceSummary, MockClusterDirectory,
        },
        fetcher::MetricFetcher,
        source::MockMetricsSource,
        types::{Dimension, RawDatapoint, Statistic, StatisticsRequest},
    },
    pipeline::{Pipeline, ReportWindow},
    settings::{MetricSettings, Settings},
};
use std::{collections::BTreeMap, fs, path::Path};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn window() -> ReportWindow {
    ReportWindow::new(start(), start() + TimeDelta::days(3))
}

fn cluster() -> ClusterSummary {
    ClusterSummary {
        cluster_id: "orders".to_string(),
        service_tag: "shop".to_string(),
        engine: Some("aurora-mysql".to_string()),
        members: vec![ClusterMember {
            instance_id: "orders-1".to_string(),
            is_writer: true,
        }],
    }
}

fn instance(id: &str) -> InstanceSummary {
    InstanceSummary {
        instance_id: id.to_string(),
        instance_class: Some("db.r6g.large".to_string()),
        availability_zone: Some("ap-northeast-1a".to_string()),
    }
}

fn directory() -> MockClusterDirectory {
    let mut directory = MockClusterDirectory::new();
    directory.expect_clusters().returning(|| Ok(vec![cluster()]));
    directory
        .expect_instances()
        .returning(|_| Ok(vec![instance("orders-1"), instance("orders-2"), instance("orders-3")]));
    directory
}

/// Hourly datapoints: Average = base, Maximum = 2 * base, percentiles = 1.5 * base
fn hourly(request: &StatisticsRequest, base: f64, unit: &str) -> Vec<RawDatapoint> {
    let mut datapoints = Vec::new();
    let mut ts = request.range.start;
    while ts < request.range.end {
        let values = request
            .statistics
            .iter()
            .map(|stat| match stat {
                Statistic::Maximum => (*stat, 2.0 * base),
                _ => (*stat, base),
            })
            .collect();
        let extended_values = request
            .extended_statistics
            .iter()
            .map(|label| (label.clone(), 1.5 * base))
            .collect::<BTreeMap<_, _>>();
        datapoints.push(RawDatapoint {
            timestamp: ts,
            unit: unit.to_string(),
            values,
            extended_values,
        });
        ts += TimeDelta::seconds(i64::from(request.period_secs));
    }
    datapoints
}

fn source() -> MockMetricsSource {
    let mut source = MockMetricsSource::new();
    source
        .expect_get_metric_statistics()
        .returning(|request| match (request.dimension, request.entity_id.as_str()) {
            (Dimension::Cluster, _) => Ok(hourly(request, 1_048_576.0, "Bytes")),
            (Dimension::Instance, "orders-1") => Ok(hourly(request, 10.0, "Percent")),
            (Dimension::Instance, "orders-2") => Ok(vec![]),
            _ => Err(Error::InvalidTimestamp("upstream unavailable".to_string())),
        });
    source
}

fn settings(output_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.output.dir = output_dir.to_string_lossy().into_owned();
    settings.fetch.concurrency = 2;
    settings.instance_metrics = vec![MetricSettings {
        metric_name: "CPUUtilization".to_string(),
        period_secs: 3_600,
        statistics: vec![Statistic::Average, Statistic::Maximum],
        extended_statistics: vec!["p90".to_string()],
    }];
    settings.cluster_metrics = vec![MetricSettings {
        metric_name: "VolumeBytesUsed".to_string(),
        period_secs: 3_600,
        statistics: vec![Statistic::Average, Statistic::Maximum],
        extended_statistics: vec!["p90".to_string()],
    }];
    settings
}

fn pipeline(
    settings: &Settings,
    source: MockMetricsSource,
) -> Pipeline<MockMetricsSource, MockClusterDirectory, FileReporter> {
    // 72 hourly points under a ceiling of 24 forces three sub-ranges
    let fetcher = MetricFetcher::new(
        source,
        settings.fetch.namespace.clone(),
        24,
        FixedOffset::east_opt(9 * 3600).unwrap(),
    );
    Pipeline::new(
        settings,
        fetcher,
        directory(),
        FileReporter::from_settings(settings),
    )
}

#[tokio::test]
async fn test_end_to_end_report() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let summary = pipeline(&settings, source())
        .run(&window(), &ClusterFilter::default())
        .await
        .unwrap();

    assert_eq!(summary.clusters, 1);
    assert_eq!(summary.records, 2);
    // orders-2 has no data
    assert_eq!(summary.skipped_entities, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].entity, "orders-3");
    assert_eq!(summary.failures[0].metric_name, "CPUUtilization");

    let csv = fs::read_to_string(dir.path().join("orders/orders-aggregated-metrics.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines,
        [
            "ServiceTag,Cluster,Instance,MetricName,MetricUnit,avg,max,min,sum,\
             p99_avg,p99_max,p90_avg,p90_max,p80_avg,p80_max,p50_avg,p50_max",
            "shop,orders,orders-1,CPUUtilization,Percent,10,20,-,-,-,-,15,15,-,-,-,-",
            "shop,orders,NO-INSTANCE,VolumeBytesUsed,MB,1,2,-,-,-,-,1.5,1.5,-,-,-,-",
        ]
    );

    let info = fs::read_to_string(dir.path().join("orders/orders.txt")).unwrap();
    assert!(info.contains("Instances: 3"));
    assert!(info.contains("orders-1, Writer, db.r6g.large, ap-northeast-1a"));
    assert!(info.contains("orders-2, Reader, db.r6g.large, ap-northeast-1a"));

    let series = fs::read_to_string(dir.path().join("orders/orders-CPUUtilization-series.json"))
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&series).unwrap();
    let points = json["entities"]["orders-1"]["standard"].as_array().unwrap();
    assert_eq!(points.len(), 72);
    // display timezone applied and ascending order kept across sub-ranges
    assert_eq!(points[0]["timestamp"], "2024-05-01T09:00:00+09:00");
    assert_eq!(points[71]["timestamp"], "2024-05-04T08:00:00+09:00");
    assert!(json["entities"]["orders-3"].is_null());
    // no-data entities are left out of the plotting output
    assert!(json["entities"]["orders-2"].is_null());
    assert_eq!(json["entities"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rerun_without_data_resets_report() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let csv_path = dir.path().join("orders/orders-aggregated-metrics.csv");

    pipeline(&settings, source())
        .run(&window(), &ClusterFilter::default())
        .await
        .unwrap();
    assert_eq!(fs::read_to_string(&csv_path).unwrap().lines().count(), 3);

    let mut empty = MockMetricsSource::new();
    empty
        .expect_get_metric_statistics()
        .returning(|_| Ok(vec![]));
    let summary = pipeline(&settings, empty)
        .run(&window(), &ClusterFilter::default())
        .await
        .unwrap();

    assert_eq!(summary.records, 0);
    assert_eq!(summary.skipped_entities, 4);
    let csv = fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("ServiceTag,Cluster,Instance"));
}

#[tokio::test]
async fn test_service_tag_filter_selects_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path());
    let filter = ClusterFilter {
        cluster_ids: vec![],
        service_tags: vec!["billing".to_string()],
    };
    let summary = pipeline(&settings, source())
        .run(&window(), &filter)
        .await
        .unwrap();

    assert_eq!(summary.clusters, 0);
    assert_eq!(summary.records, 0);
    assert!(!summary.has_failures());
    assert!(!dir.path().join("orders").exists());
}
