//! Descriptive statistics over score and biomarker values

use serde::Serialize;

/// Number of equal-width buckets over 0.0..=1.0
pub const HISTOGRAM_BUCKETS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl NumericStats {
    /// `None` for an empty input; NaN values are ignored
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };

        Some(Self {
            count,
            mean,
            median,
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}

/// Counts per 0.1-wide bucket; values outside 0..=1 are clamped into the end buckets
pub fn unit_histogram(values: &[f64]) -> [usize; HISTOGRAM_BUCKETS] {
    let mut buckets = [0; HISTOGRAM_BUCKETS];
    for value in values.iter().filter(|v| !v.is_nan()) {
        let index = (value * HISTOGRAM_BUCKETS as f64).floor();
        let index = index.clamp(0.0, (HISTOGRAM_BUCKETS - 1) as f64) as usize;
        buckets[index] += 1;
    }
    buckets
}

/// Label for bucket `index`, e.g. `0.3-0.4`
pub fn bucket_label(index: usize) -> String {
    format!(
        "{:.1}-{:.1}",
        index as f64 / HISTOGRAM_BUCKETS as f64,
        (index + 1) as f64 / HISTOGRAM_BUCKETS as f64
    )
}
