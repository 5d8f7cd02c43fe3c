//! Run-wide duration history and interpolated percentiles.

use serde::{Deserialize, Serialize};

/// Append-only list of test durations for the current run.
#[derive(Debug, Clone, Default)]
pub struct DurationHistory {
    samples: Vec<f64>,
}

/// p50/p95/p99 at one point in the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileSnapshot {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DurationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, duration_ms: f64) {
        if duration_ms.is_finite() {
            self.samples.push(duration_ms);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn percentile(&self, p: f64) -> f64 {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        percentile(&sorted, p)
    }

    pub fn snapshot(&self) -> PercentileSnapshot {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        PercentileSnapshot {
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

impl FromIterator<f64> for DurationHistory {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut history = Self::new();
        for value in iter {
            history.push(value);
        }
        history
    }
}

/// Linear-interpolated percentile over an ascending slice.
///
/// `index = p/100 * (n-1)`; an integral index returns that element, otherwise
/// the neighbours are blended by the fractional part. Empty input yields `0`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }

    let p = p.clamp(0.0, 100.0);
    let index = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }

    let weight = index - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
