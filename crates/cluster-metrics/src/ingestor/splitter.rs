use crate::{
    error::{Error, Result},
    ingestor::types::TimeRange,
};
use chrono::{DateTime, TimeDelta, Utc};

/// Datapoint ceiling of a single GetMetricStatistics call
pub const DEFAULT_MAX_DATAPOINTS: u32 = 1440;

/// Partition `[start, end)` into contiguous half-open windows so that no
/// window asks for more than `max_datapoints` points at the given period.
///
/// A range that already fits is returned unchanged as a single window, and
/// an empty range yields no windows at all.
pub fn split(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: TimeDelta,
    max_datapoints: u32,
) -> Result<Vec<TimeRange>> {
    if period <= TimeDelta::zero() {
        return Err(Error::InvalidQuery(format!(
            "period must be positive, got {}ms",
            period.num_milliseconds()
        )));
    }
    if end < start {
        return Err(Error::InvalidQuery(format!(
            "end time {end} precedes start time {start}"
        )));
    }
    if max_datapoints == 0 {
        return Err(Error::InvalidQuery(
            "datapoint ceiling must be greater than 0".to_string(),
        ));
    }
    if start == end {
        return Ok(Vec::new());
    }

    let requested = (end - start).num_milliseconds() / period.num_milliseconds().max(1);
    if requested <= i64::from(max_datapoints) {
        return Ok(vec![TimeRange { start, end }]);
    }

    let window = i32::try_from(max_datapoints)
        .ok()
        .and_then(|ceiling| period.checked_mul(ceiling))
        .ok_or_else(|| {
            Error::InvalidQuery(format!(
                "window of {max_datapoints} periods overflows the time range"
            ))
        })?;

    let mut ranges = Vec::with_capacity(requested as usize / max_datapoints as usize + 1);
    let mut current = start;
    while current < end {
        let next = current
            .checked_add_signed(window)
            .map_or(end, |candidate| candidate.min(end));
        ranges.push(TimeRange {
            start: current,
            end: next,
        });
        current = next;
    }

    Ok(ranges)
}
