//! Half-open time intervals bounding the validity of trajectories and effects.
//!
//! A [`TimeRange`] covers `[begin, end)`. The default range is unbounded in both directions,
//! which is what a freshly constructed trajectory gets unless the caller restricts it.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub begin: f64,
    pub end: f64,
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange {
            begin: f64::MIN,
            end: f64::MAX,
        }
    }
}

impl TimeRange {
    /// Build a range; the bounds are swapped if given in reverse order.
    pub fn new(begin: f64, end: f64) -> Self {
        if begin <= end {
            TimeRange { begin, end }
        } else {
            TimeRange {
                begin: end,
                end: begin,
            }
        }
    }

    pub fn in_range(&self, time: f64) -> bool {
        time >= self.begin && time < self.end
    }

    /// Duration of the range.
    pub fn span(&self) -> f64 {
        self.end - self.begin
    }

    pub fn mid(&self) -> f64 {
        0.5 * (self.begin + self.end)
    }

    pub fn is_infinite(&self) -> bool {
        self.begin == f64::MIN || self.end == f64::MAX
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// Clamp a time into the range.
    pub fn force_range(&self, time: f64) -> f64 {
        time.clamp(self.begin, self.end)
    }

    /// Intersection of two ranges, `None` when they do not overlap.
    pub fn restrict(&self, other: &TimeRange) -> Option<TimeRange> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        (begin < end).then_some(TimeRange { begin, end })
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.6}, {:.6})", self.begin, self.end)
    }
}

#[cfg(test)]
mod time_range_test {
    use super::*;

    #[test]
    fn test_half_open_membership() {
        let range = TimeRange::new(-2.0, 3.0);
        assert!(range.in_range(-2.0));
        assert!(range.in_range(2.999));
        assert!(!range.in_range(3.0));
        assert_eq!(range.span(), 5.0);
        assert_eq!(range.mid(), 0.5);
    }

    #[test]
    fn test_reversed_bounds_are_ordered() {
        let range = TimeRange::new(4.0, 1.0);
        assert_eq!(range.begin, 1.0);
        assert_eq!(range.end, 4.0);
    }

    #[test]
    fn test_restrict_and_clamp() {
        let a = TimeRange::new(0.0, 10.0);
        let b = TimeRange::new(5.0, 20.0);
        assert_eq!(a.restrict(&b), Some(TimeRange::new(5.0, 10.0)));
        assert_eq!(a.restrict(&TimeRange::new(11.0, 12.0)), None);
        assert_eq!(a.force_range(-1.0), 0.0);
        assert_eq!(a.force_range(12.0), 10.0);
        assert!(TimeRange::default().is_infinite());
    }
}
