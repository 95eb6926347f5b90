//! Closed time intervals and the interval merge.
//!
//! Used to reconcile exclusion windows with the ones already recorded for a
//! variable, and to decide whether a backup file's coverage reaches past the
//! trailing edge of its master.

use crate::error::{ConditionerError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed interval `[start, end]` with `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Interval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Deserialize)]
struct RawInterval {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawInterval::deserialize(deserializer)?;
        Interval::new(raw.start, raw.end).map_err(serde::de::Error::custom)
    }
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end < start {
            return Err(ConditionerError::alignment(
                "interval ends before it starts",
                format!("{start} > {end}"),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Whether this interval reaches strictly past `edge`
    pub fn extends_beyond(&self, edge: NaiveDateTime) -> bool {
        self.end > edge
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Merge intervals into the minimal sorted, non-overlapping cover of their union.
///
/// Intervals whose endpoints touch are merged.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by_key(|i| i.start);

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for next in intervals {
        match merged.last_mut() {
            Some(current) if next.start <= current.end => {
                current.end = current.end.max(next.end);
            }
            _ => merged.push(next),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn iv(start: &str, end: &str) -> Interval {
        Interval::new(ts(start), ts(end)).unwrap()
    }

    #[test]
    fn test_merge_overlapping_and_disjoint() {
        let merged = merge_intervals(vec![
            iv("2024-01-01 00:00", "2024-01-03 00:00"),
            iv("2024-01-02 00:00", "2024-01-04 00:00"),
            iv("2024-02-01 00:00", "2024-02-02 00:00"),
        ]);

        assert_eq!(
            merged,
            vec![
                iv("2024-01-01 00:00", "2024-01-04 00:00"),
                iv("2024-02-01 00:00", "2024-02-02 00:00"),
            ]
        );
    }

    #[test]
    fn test_touching_endpoints_merge() {
        let merged = merge_intervals(vec![
            iv("2024-01-01 12:00", "2024-01-02 00:00"),
            iv("2024-01-01 00:00", "2024-01-01 12:00"),
        ]);

        assert_eq!(merged, vec![iv("2024-01-01 00:00", "2024-01-02 00:00")]);
    }

    #[test]
    fn test_single_interval_unchanged() {
        let single = vec![iv("2024-03-01 00:00", "2024-03-01 00:30")];
        assert_eq!(merge_intervals(single.clone()), single);
    }

    #[test]
    fn test_contained_interval_absorbed() {
        let merged = merge_intervals(vec![
            iv("2024-01-01 00:00", "2024-01-10 00:00"),
            iv("2024-01-02 00:00", "2024-01-03 00:00"),
        ]);
        assert_eq!(merged, vec![iv("2024-01-01 00:00", "2024-01-10 00:00")]);
    }

    #[test]
    fn test_reversed_interval_rejected() {
        let err = Interval::new(ts("2024-01-02 00:00"), ts("2024-01-01 00:00")).unwrap_err();
        assert!(matches!(err, ConditionerError::Alignment { .. }));
    }

    #[test]
    fn test_deserialize_checks_order() {
        let window = iv("2024-01-01 00:00", "2024-01-02 00:00");
        let json = serde_json::to_value(window).unwrap();
        assert_eq!(serde_json::from_value::<Interval>(json.clone()).unwrap(), window);

        let reversed = serde_json::json!({"start": json["end"], "end": json["start"]});
        assert!(serde_json::from_value::<Interval>(reversed).is_err());
    }

    #[test]
    fn test_extends_beyond() {
        let window = iv("2024-01-01 00:00", "2024-01-02 00:00");
        assert!(window.extends_beyond(ts("2024-01-01 23:30")));
        assert!(!window.extends_beyond(ts("2024-01-02 00:00")));
    }

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn arb_intervals() -> impl Strategy<Value = Vec<Interval>> {
        prop::collection::vec((0i64..400, 0i64..60), 0..12).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(offset, width)| {
                    let start = base() + Duration::minutes(offset);
                    Interval::new(start, start + Duration::minutes(width)).unwrap()
                })
                .collect()
        })
    }

    fn covered(intervals: &[Interval], minute: i64) -> bool {
        let t = base() + Duration::minutes(minute);
        intervals.iter().any(|i| i.contains(t))
    }

    proptest! {
        #[test]
        fn prop_merged_is_sorted_disjoint_and_covers_same_union(input in arb_intervals()) {
            let merged = merge_intervals(input.clone());

            for pair in merged.windows(2) {
                prop_assert!(pair[0].end() < pair[1].start());
            }
            for minute in 0..=460 {
                prop_assert_eq!(covered(&input, minute), covered(&merged, minute));
            }
        }

        #[test]
        fn prop_merge_is_idempotent(input in arb_intervals()) {
            let once = merge_intervals(input);
            let twice = merge_intervals(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
