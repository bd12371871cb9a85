use crate::{error::Result, processor::aggregator::AggregateRecord};
use csv::Writer;
use std::io::Write;

/// Rendered in place of absent values
pub const PLACEHOLDER: &str = "-";

/// Percentile columns, in output order
pub const PERCENTILE_COLUMNS: [&str; 4] = ["p99", "p90", "p80", "p50"];

pub const HEADER: [&str; 17] = [
    "ServiceTag",
    "Cluster",
    "Instance",
    "MetricName",
    "MetricUnit",
    "avg",
    "max",
    "min",
    "sum",
    "p99_avg",
    "p99_max",
    "p90_avg",
    "p90_max",
    "p80_avg",
    "p80_max",
    "p50_avg",
    "p50_max",
];

fn render(value: Option<f64>) -> String {
    value.map_or_else(|| PLACEHOLDER.to_string(), |v| v.to_string())
}

/// One CSV row in `HEADER` order
pub fn record_row(record: &AggregateRecord) -> Vec<String> {
    let mut row = vec![
        record.service_tag.clone(),
        record.cluster_id.clone(),
        record.instance_id.clone(),
        record.metric_name.clone(),
        if record.metric_unit.is_empty() {
            PLACEHOLDER.to_string()
        } else {
            record.metric_unit.clone()
        },
        render(record.avg),
        render(record.max),
        render(record.min),
        render(record.sum),
    ];

    for label in PERCENTILE_COLUMNS {
        let summary = record.percentiles.get(label);
        row.push(render(summary.map(|s| s.avg)));
        row.push(render(summary.map(|s| s.max)));
    }

    row
}

pub fn write_header<W: Write>(writer: &mut Writer<W>) -> Result {
    writer.write_record(HEADER)?;
    Ok(())
}

pub fn write_records<W: Write>(writer: &mut Writer<W>, records: &[AggregateRecord]) -> Result {
    for record in records {
        writer.write_record(record_row(record))?;
    }
    writer.flush()?;
    Ok(())
}
