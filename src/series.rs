//! In-memory, step-aligned time series with explicit gaps.

use std::ops::Add;

/// A dense, step-aligned vector of optional samples spanning
/// `[start_time, end_time)` at `time_step` seconds. `None` marks a missing
/// sample (on disk: NaN).
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesData {
    pub start_time: i64,
    pub end_time: i64,
    pub time_step: u32,
    pub values: Vec<Option<f64>>,
}

impl TimeSeriesData {
    pub fn new(start_time: i64, end_time: i64, time_step: u32, values: Vec<Option<f64>>) -> Self {
        Self {
            start_time,
            end_time,
            time_step,
            values,
        }
    }

    /// An all-missing series spanning `[start_time, end_time)`.
    pub fn empty(start_time: i64, end_time: i64, time_step: u32) -> Self {
        let step = time_step as i64;
        let len = if end_time > start_time {
            ((end_time - start_time) / step) as usize
        } else {
            0
        };
        Self::new(start_time, end_time, time_step, vec![None; len])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Yields `(timestamp, value)` pairs for `timestamp` in
    /// `[start_time, end_time)` stepping by `time_step`.
    pub fn iter(&self) -> impl Iterator<Item = (i64, Option<f64>)> + '_ {
        let step = self.time_step as i64;
        self.values
            .iter()
            .enumerate()
            .map(move |(i, v)| (self.start_time + i as i64 * step, *v))
    }

    /// Append `other`'s values after this series's. Requires equal step;
    /// no alignment check beyond that.
    pub fn concat(mut self, other: TimeSeriesData) -> Self {
        assert_eq!(
            self.time_step, other.time_step,
            "can't concat series with different time steps"
        );
        self.values.extend(other.values);
        self.end_time = other.end_time;
        self
    }

    /// Overwrite `self` with `other` at `other`'s (step-aligned) position,
    /// extending `self` as needed. Requires equal step and
    /// `other.start_time >= self.start_time`.
    pub fn merge(&mut self, other: &TimeSeriesData) {
        assert_eq!(
            self.time_step, other.time_step,
            "can't merge series with different time steps"
        );
        assert!(
            other.start_time >= self.start_time,
            "merge source must not start before the target"
        );

        let step = self.time_step as i64;
        let aligned_start = other.start_time - (other.start_time.rem_euclid(step));
        let mut index = (aligned_start - self.start_time) / step;

        for value in &other.values {
            if index < 0 {
                // other starts before an aligned boundary we track; shouldn't
                // happen given the precondition above, but stay defensive.
                index += 1;
                continue;
            }
            let idx = index as usize;
            if idx < self.values.len() {
                self.values[idx] = *value;
            } else {
                self.values.push(*value);
            }
            index += 1;
        }

        if other.end_time > self.end_time {
            self.end_time = other.end_time;
        }
    }
}

impl Add for TimeSeriesData {
    type Output = TimeSeriesData;

    fn add(self, other: TimeSeriesData) -> TimeSeriesData {
        self.concat(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_spans_both_ranges() {
        let a = TimeSeriesData::new(0, 120, 60, vec![Some(1.0), Some(2.0)]);
        let b = TimeSeriesData::new(120, 240, 60, vec![Some(3.0), Some(4.0)]);
        let c = a.concat(b);
        assert_eq!(c.start_time, 0);
        assert_eq!(c.end_time, 240);
        assert_eq!(c.values, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn merge_overwrites_overlap_and_extends() {
        let mut a = TimeSeriesData::new(0, 180, 60, vec![Some(1.0), Some(2.0), Some(3.0)]);
        let b = TimeSeriesData::new(120, 300, 60, vec![Some(20.0), Some(30.0), Some(40.0)]);
        a.merge(&b);
        assert_eq!(a.end_time, 300);
        assert_eq!(
            a.values,
            vec![Some(1.0), Some(2.0), Some(20.0), Some(30.0), Some(40.0)]
        );
    }

    #[test]
    fn iterate_pairs_timestamps_with_values() {
        let s = TimeSeriesData::new(60, 180, 60, vec![Some(1.0), None]);
        let pairs: Vec<_> = s.iter().collect();
        assert_eq!(pairs, vec![(60, Some(1.0)), (120, None)]);
    }
}
