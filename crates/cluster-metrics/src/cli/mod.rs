use cluster_metrics::pipeline::RunSummary;
use tabled::{builder::Builder as TableBuilder, settings::Style};

pub fn print_summary(summary: &RunSummary) -> String {
    let printable = vec![
        vec![
            "clusters".to_string(),
            "records".to_string(),
            "skipped".to_string(),
            "failures".to_string(),
        ],
        vec![
            summary.clusters.to_string(),
            summary.records.to_string(),
            summary.skipped_entities.to_string(),
            summary.failures.len().to_string(),
        ],
    ];

    TableBuilder::from(printable)
        .build()
        .with(Style::psql().remove_horizontals())
        .to_string()
}

pub fn print_failures(summary: &RunSummary) -> String {
    let mut printable = vec![vec![
        "cluster".to_string(),
        "metric".to_string(),
        "entity".to_string(),
        "reason".to_string(),
    ]];

    for failure in &summary.failures {
        printable.push(vec![
            failure.cluster_id.clone(),
            failure.metric_name.clone(),
            failure.entity.clone(),
            failure.reason.clone(),
        ]);
    }

    TableBuilder::from(printable)
        .build()
        .with(Style::psql().remove_horizontals())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_metrics::pipeline::UnitFailure;

    #[test]
    fn test_print_failures() {
        let summary = RunSummary {
            clusters: 2,
            records: 7,
            skipped_entities: 1,
            failures: vec![UnitFailure {
                cluster_id: "orders".to_string(),
                metric_name: "Queries".to_string(),
                entity: "orders-2".to_string(),
                reason: "throttled".to_string(),
            }],
        };

        let overview = print_summary(&summary);
        assert!(overview.contains("records"));
        assert!(overview.contains('7'));

        let failures = print_failures(&summary);
        assert!(failures.contains("orders-2"));
        assert!(failures.contains("throttled"));
    }
}
