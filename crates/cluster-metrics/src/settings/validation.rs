use crate::{
    ingestor::types::is_valid_percentile_label,
    settings::{MetricSettings, Settings},
};
use anyhow::{Result, bail};

/// Validate the configuration values
pub fn validate_config(settings: &Settings) -> Result<()> {
    // Validate log level
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        bail!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level,
            valid_log_levels
        );
    }

    // Validate AWS settings
    if settings.aws.region.is_empty() {
        bail!("AWS region cannot be empty");
    }
    if settings.aws.access_key_id.is_some() != settings.aws.secret_access_key.is_some() {
        bail!("AWS access_key_id and secret_access_key must be set together");
    }
    if let Some(url) = &settings.aws.endpoint_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("AWS endpoint URL must start with http:// or https://");
        }
    }

    // Validate fetch settings
    if settings.fetch.namespace.is_empty() {
        bail!("Metrics namespace cannot be empty");
    }
    if settings.fetch.max_datapoints == 0 {
        bail!("max_datapoints must be greater than 0");
    }
    if settings.fetch.display_utc_offset_hours.abs() > 14 {
        bail!(
            "display_utc_offset_hours must be within [-14, 14], got {}",
            settings.fetch.display_utc_offset_hours
        );
    }
    if settings.fetch.concurrency == 0 {
        bail!("Fetch concurrency must be greater than 0");
    }

    // Validate discovery and output settings
    if settings.discovery.service_tag_key.is_empty() {
        bail!("Service tag key cannot be empty");
    }
    if settings.output.dir.is_empty() {
        bail!("Output directory cannot be empty");
    }

    for metric in settings
        .instance_metrics
        .iter()
        .chain(settings.cluster_metrics.iter())
    {
        validate_metric(metric)?;
    }

    Ok(())
}

fn validate_metric(metric: &MetricSettings) -> Result<()> {
    if metric.metric_name.is_empty() {
        bail!("Metric name cannot be empty");
    }
    if metric.period_secs == 0 {
        bail!("Metric {} period_secs must be greater than 0", metric.metric_name);
    }
    // Entities without both series are never aggregated
    if metric.statistics.is_empty() {
        bail!(
            "Metric {} must request at least one standard statistic",
            metric.metric_name
        );
    }
    if metric.extended_statistics.is_empty() {
        bail!(
            "Metric {} must request at least one extended statistic",
            metric.metric_name
        );
    }
    if let Some(label) = metric
        .extended_statistics
        .iter()
        .find(|label| !is_valid_percentile_label(label))
    {
        bail!(
            "Metric {} has invalid percentile label '{}'",
            metric.metric_name,
            label
        );
    }
    Ok(())
}
