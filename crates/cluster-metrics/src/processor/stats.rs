use crate::ingestor::types::Statistic;
use statrs::statistics::Statistics;

/// Plain sum over count, the same arithmetic the historical reports used
pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

pub fn max(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| Statistics::max(values))
}

pub fn min(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| Statistics::min(values))
}

pub fn sum(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum())
}

/// Reduce a column of values with the statistic's natural operator.
///
/// Returns `None` for an empty column instead of a zero or NaN.
pub fn reduce(stat: Statistic, values: &[f64]) -> Option<f64> {
    match stat {
        Statistic::Average => mean(values),
        Statistic::Maximum => max(values),
        Statistic::Minimum => min(values),
        Statistic::Sum => sum(values),
    }
}
