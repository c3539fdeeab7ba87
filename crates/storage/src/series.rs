//! Per-series sorted sample index.
//!
//! Samples stay strictly ordered by timestamp; equal timestamps keep
//! arrival order. Range lookups binary-search both bounds, and the
//! aggregate is computed in a single pass over the same interval, so
//! `range` and `aggregate` always observe identical data.

use pulse_common::{Aggregate, Role, Sample};

/// One series' samples, ordered by timestamp.
#[derive(Debug, Default, Clone)]
pub struct SeriesIndex {
    samples: Vec<Sample>,
}

impl SeriesIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Insert a sample at its sorted position.
    ///
    /// The insertion point is the first index past all samples with
    /// `timestamp <= ts`, which keeps arrival order among equal
    /// timestamps. Monotone-arriving samples append in O(log n).
    pub fn insert(&mut self, timestamp: i64, value: f64, role: Role) {
        let pos = self.samples.partition_point(|s| s.timestamp <= timestamp);
        self.samples.insert(
            pos,
            Sample {
                timestamp,
                value,
                role,
            },
        );
    }

    /// The samples inside `[start, end]` under the open-bound rules:
    ///
    /// - `start == 0, end == 0`: the whole series.
    /// - `start == 0, end > 0`: the whole series (historical behavior,
    ///   kept for compatibility) unless `strict_end` asks for
    ///   `(-inf, end]`.
    /// - `start > 0, end == 0`: from `start` to the end of the series.
    pub fn range(&self, start: i64, end: i64, strict_end: bool) -> &[Sample] {
        match self.bounds(start, end, strict_end) {
            Some((lo, hi)) => &self.samples[lo..=hi],
            None => &[],
        }
    }

    /// Single-pass aggregate over the same interval `range` would return.
    pub fn aggregate(&self, start: i64, end: i64, strict_end: bool) -> Aggregate {
        let mut agg = Aggregate::default();
        for sample in self.range(start, end, strict_end) {
            agg.observe(sample.value);
        }
        agg
    }

    /// Inclusive index bounds for a time interval, or `None` when empty.
    fn bounds(&self, start: i64, end: i64, strict_end: bool) -> Option<(usize, usize)> {
        if self.samples.is_empty() {
            return None;
        }
        let last = self.samples.len() - 1;

        if start == 0 {
            if end == 0 || !strict_end {
                return Some((0, last));
            }
            let upper = self.samples.partition_point(|s| s.timestamp <= end);
            return if upper == 0 { None } else { Some((0, upper - 1)) };
        }

        let lower = self.samples.partition_point(|s| s.timestamp < start);
        if lower > last {
            return None;
        }

        if end == 0 {
            return Some((lower, last));
        }

        let upper = self.samples.partition_point(|s| s.timestamp <= end);
        if upper <= lower {
            return None;
        }
        Some((lower, upper - 1))
    }
}
