use crate::{
    error::Result,
    exporter::csv_exporter::{write_header, write_records},
    ingestor::{
        discovery::{ClusterSummary, InstanceSummary},
        types::{Datapoint, MetricQuerySpec, SeriesMap},
    },
    processor::aggregator::AggregateRecord,
    settings::Settings,
};
use csv::WriterBuilder;
use mockall::automock;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions, create_dir_all},
    io::{BufWriter, Write},
    path::PathBuf,
};
use tracing::{debug, info};

/// Destination of everything a run produces per cluster
#[automock]
pub trait ReportSink: Send + Sync {
    fn cluster_info(&self, cluster: &ClusterSummary, instances: &[InstanceSummary]) -> Result;
    fn series(
        &self,
        cluster_id: &str,
        spec: &MetricQuerySpec,
        standard: &SeriesMap,
        extended: &SeriesMap,
    ) -> Result;
    fn records(&self, cluster_id: &str, records: &[AggregateRecord]) -> Result;
}

#[derive(Serialize)]
struct SeriesDump<'a> {
    metric_name: &'a str,
    statistics: Vec<&'static str>,
    extended_statistics: Vec<&'a str>,
    entities: BTreeMap<&'a str, EntitySeries<'a>>,
}

#[derive(Serialize, Default)]
struct EntitySeries<'a> {
    standard: &'a [Datapoint],
    extended: &'a [Datapoint],
}

/// Writes reports under `<root>/<cluster>/`
#[derive(Debug)]
pub struct FileReporter {
    root: PathBuf,
    region: String,
    write_series: bool,
}

impl FileReporter {
    pub fn new(root: impl Into<PathBuf>, region: impl Into<String>, write_series: bool) -> Self {
        Self {
            root: root.into(),
            region: region.into(),
            write_series,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.output.dir,
            &settings.aws.region,
            settings.output.write_series,
        )
    }

    pub fn cluster_dir(&self, cluster_id: &str) -> PathBuf {
        self.root.join(cluster_id)
    }

    pub fn info_path(&self, cluster_id: &str) -> PathBuf {
        self.cluster_dir(cluster_id).join(format!("{cluster_id}.txt"))
    }

    pub fn csv_path(&self, cluster_id: &str) -> PathBuf {
        self.cluster_dir(cluster_id)
            .join(format!("{cluster_id}-aggregated-metrics.csv"))
    }

    pub fn series_path(&self, cluster_id: &str, metric_name: &str) -> PathBuf {
        self.cluster_dir(cluster_id)
            .join(format!("{cluster_id}-{metric_name}-series.json"))
    }

    fn ensure_dir(&self, cluster_id: &str) -> Result<PathBuf> {
        let dir = self.cluster_dir(cluster_id);
        create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Replace the cluster's CSV with a header-only file
    fn reset_csv(&self, cluster_id: &str) -> Result {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(self.csv_path(cluster_id))?;
        write_header(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

fn or_placeholder(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

impl ReportSink for FileReporter {
    fn cluster_info(&self, cluster: &ClusterSummary, instances: &[InstanceSummary]) -> Result {
        self.ensure_dir(&cluster.cluster_id)?;
        let path = self.info_path(&cluster.cluster_id);

        let mut out = BufWriter::new(File::create(&path)?);
        writeln!(out, "Cluster: {}", cluster.cluster_id)?;
        writeln!(out, "ServiceTag: {}", cluster.service_tag)?;
        writeln!(out, "Engine: {}", or_placeholder(cluster.engine.as_deref()))?;
        writeln!(out, "Region: {}", self.region)?;
        writeln!(out, "Instances: {}", instances.len())?;
        for instance in instances {
            let role = if cluster.is_writer(&instance.instance_id) {
                "Writer"
            } else {
                "Reader"
            };
            writeln!(
                out,
                "{}, {}, {}, {}",
                instance.instance_id,
                role,
                or_placeholder(instance.instance_class.as_deref()),
                or_placeholder(instance.availability_zone.as_deref()),
            )?;
        }
        out.flush()?;
        info!("Wrote {}", path.display());

        // Every run starts the cluster's CSV over, even if no record follows
        self.reset_csv(&cluster.cluster_id)
    }

    fn series(
        &self,
        cluster_id: &str,
        spec: &MetricQuerySpec,
        standard: &SeriesMap,
        extended: &SeriesMap,
    ) -> Result {
        if !self.write_series {
            return Ok(());
        }
        self.ensure_dir(cluster_id)?;

        let mut entities: BTreeMap<&str, EntitySeries<'_>> = BTreeMap::new();
        for (entity_id, series) in standard {
            entities.entry(entity_id.as_str()).or_default().standard = &series.datapoints;
        }
        for (entity_id, series) in extended {
            entities.entry(entity_id.as_str()).or_default().extended = &series.datapoints;
        }

        let dump = SeriesDump {
            metric_name: &spec.metric_name,
            statistics: spec.statistics.iter().map(|s| s.as_str()).collect(),
            extended_statistics: spec.extended_statistics.iter().map(String::as_str).collect(),
            entities,
        };

        let path = self.series_path(cluster_id, &spec.metric_name);
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, &dump)?;
        out.flush()?;

        debug!("Wrote {}", path.display());
        Ok(())
    }

    fn records(&self, cluster_id: &str, records: &[AggregateRecord]) -> Result {
        self.ensure_dir(cluster_id)?;
        let path = self.csv_path(cluster_id);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let fresh = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            write_header(&mut writer)?;
        }
        write_records(&mut writer, records)?;

        debug!(rows = records.len(), "Appended to {}", path.display());
        Ok(())
    }
}
