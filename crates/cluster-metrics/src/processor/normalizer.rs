use crate::ingestor::types::{Datapoint, RawDatapoint, SeriesKind};
use chrono::FixedOffset;

pub const BYTES_UNIT: &str = "Bytes";
pub const MEGABYTES_UNIT: &str = "MB";
pub const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;

/// Turn an upstream datapoint into a display datapoint.
///
/// Byte-valued points are rescaled to megabytes; only the fields of the
/// given series kind are divided and absent fields stay absent. The raw
/// point is consumed, so a datapoint can only ever be rescaled once.
pub fn normalize(raw: RawDatapoint, kind: SeriesKind, display_tz: &FixedOffset) -> Datapoint {
    let RawDatapoint {
        timestamp,
        mut unit,
        mut values,
        mut extended_values,
    } = raw;

    if unit == BYTES_UNIT {
        unit = MEGABYTES_UNIT.to_string();
        match kind {
            SeriesKind::Standard => values.values_mut().for_each(|v| *v /= BYTES_PER_MEGABYTE),
            SeriesKind::Extended => extended_values
                .values_mut()
                .for_each(|v| *v /= BYTES_PER_MEGABYTE),
        }
    }

    Datapoint {
        timestamp: timestamp.with_timezone(display_tz),
        unit,
        values,
        extended_values,
    }
}
