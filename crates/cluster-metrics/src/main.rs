mod cli;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use cluster_metrics::{
    exporter::report::FileReporter,
    ingestor::{
        cloudwatch::{CloudWatchSource, load_sdk_config},
        discovery::{ClusterFilter, RdsDirectory},
        fetcher::MetricFetcher,
    },
    pipeline::{Pipeline, ReportWindow},
    settings::Settings,
};
use std::{path::PathBuf, process::ExitCode};
use tokio::signal;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "cluster-metrics",
    about = "Aggregate monitoring metrics of managed database clusters into per-cluster reports",
    version,
    author,
    after_help = r#"Configuration:
    Configuration can be provided via:
    1. Environment variables with CLUSTER_METRICS__ prefix (e.g., CLUSTER_METRICS__AWS__REGION)
    2. .env file in the current directory
    3. Config file with -c option

Examples:
    # Report the last 30 days for every cluster
    cluster-metrics

    # Report the last week for two clusters
    cluster-metrics --last-days 7 --clusters orders,billing

    # Report clusters of one service into a custom directory
    cluster-metrics --service-tags shop --output-dir /tmp/reports"#
)]
pub struct Cli {
    /// Path to the configuration file (TOML format)
    ///
    /// If not provided, will attempt to load from environment variables
    #[clap(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of days before now covered by the report
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    pub last_days: u32,

    /// Only report these cluster ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub clusters: Vec<String>,

    /// Only report clusters carrying one of these service tags (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub service_tags: Vec<String>,

    /// Override the configured output directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<String>,
}

impl Cli {
    pub async fn run(self) -> Result<ExitCode> {
        let mut settings = if let Some(config_path) = &self.config {
            Settings::from_path(config_path)?
        } else {
            Settings::from_env()?
        };
        if let Some(dir) = self.output_dir {
            settings.output.dir = dir;
        }
        init_logging(&settings.log_level)?;
        debug!("{settings}");

        let sdk_config = load_sdk_config(&settings.aws).await;
        let fetcher = MetricFetcher::from_settings(
            CloudWatchSource::from_sdk_config(&sdk_config),
            &settings.fetch,
        )?;
        let directory = RdsDirectory::new(&sdk_config, &settings.discovery);
        let reporter = FileReporter::from_settings(&settings);
        let pipeline = Pipeline::new(&settings, fetcher, directory, reporter);

        let window = ReportWindow::last_days(self.last_days, Utc::now());
        let filter = ClusterFilter {
            cluster_ids: self.clusters,
            service_tags: self.service_tags,
        };

        let summary = tokio::select! {
            result = pipeline.run(&window, &filter) => result?,
            _ = signal::ctrl_c() => {
                warn!("Interrupted, reports may be incomplete");
                return Ok(ExitCode::from(130));
            }
        };

        println!("{}", cli::print_summary(&summary));
        if summary.has_failures() {
            println!("{}", cli::print_failures(&summary));
            return Ok(ExitCode::FAILURE);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    cli.run().await
}

fn init_logging(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
