//! Persisted control-record types.
//!
//! A control record is the JSON document holding one site's L2 variable
//! configuration. Only `RangeCheck` and `ExcludeDates` are interpreted; every
//! other key is carried through untouched.

use crate::config::TimeStep;
use crate::constants::MINUTE_FORMAT;
use crate::error::{ConditionerError, Result};
use crate::interval::Interval;
use crate::normalizer::parse_timestamp;
use chrono::NaiveDateTime;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub level: String,
    #[serde(rename = "Variables")]
    pub variables: BTreeMap<String, VariableRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    #[serde(rename = "RangeCheck", default, skip_serializing_if = "Option::is_none")]
    pub range_check: Option<RangeCheckRecord>,
    #[serde(rename = "ExcludeDates", default, skip_serializing_if = "Option::is_none")]
    pub exclude_dates: Option<StoredExclusions>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Range limit as persisted: bounds kept as numeric-coercible strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeCheckRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub lower: String,
    #[serde(deserialize_with = "string_or_number")]
    pub upper: String,
}

impl RangeCheckRecord {
    pub fn to_limit(&self) -> Result<RangeLimit> {
        Ok(RangeLimit {
            lower: coerce_numeric(&self.lower)?,
            upper: coerce_numeric(&self.upper)?,
        })
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

/// Parse a bound, rejecting anything that is not a finite number
pub fn coerce_numeric(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConditionerError::InvalidCorrections {
            reason: format!("range bound '{value}' is not numeric"),
        })
}

/// Numeric (lower, upper) pair; no ordering between the two is enforced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeLimit {
    pub lower: f64,
    pub upper: f64,
}

impl RangeLimit {
    /// Whether a value falls outside the limits
    pub fn rejects(&self, value: f64) -> bool {
        value < self.lower || value > self.upper
    }
}

/// Exclusion windows exactly as loaded: string index -> `[start, end]`, in
/// document order with repeated keys kept.
///
/// Nothing about the content is trusted until it passes
/// [`IntervalSet::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredExclusions(pub Vec<(String, [String; 2])>);

impl Serialize for StoredExclusions {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, window) in &self.0 {
            map.serialize_entry(key, window)?;
        }
        map.end()
    }
}

struct EntriesVisitor;

impl<'de> Visitor<'de> for EntriesVisitor {
    type Value = StoredExclusions;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of exclusion index to [start, end]")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or_default());
        while let Some((key, window)) = map.next_entry::<String, [String; 2]>()? {
            entries.push((key, window));
        }
        Ok(StoredExclusions(entries))
    }
}

impl<'de> Deserialize<'de> for StoredExclusions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Validated exclusion windows: sorted, non-overlapping, grid aligned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalSet(Vec<Interval>);

impl IntervalSet {
    /// Check a stored set: keys are exactly `"0"`, `"1"`, ... in order, bounds
    /// are `YYYY-MM-DD HH:MM` on the grid, each window ends at or after its
    /// start and starts after the previous one ends.
    pub fn validate(stored: &StoredExclusions, step: TimeStep) -> Result<Self> {
        let mut intervals: Vec<Interval> = Vec::with_capacity(stored.0.len());
        let mut seen = HashSet::new();

        for (position, (key, [start, end])) in stored.0.iter().enumerate() {
            if !seen.insert(key.as_str()) {
                return Err(ConditionerError::alignment("duplicate exclusion index", key));
            }
            if *key != position.to_string() {
                return Err(ConditionerError::alignment(
                    format!("exclusion indices are not contiguous from 0; expected {position}"),
                    key,
                ));
            }

            let window = Interval::new(parse_stored(start)?, parse_stored(end)?)?;
            for bound in [window.start(), window.end()] {
                if !step.is_aligned(bound) {
                    return Err(ConditionerError::alignment(
                        format!("exclusion {key} bound not on the {step} grid"),
                        bound,
                    ));
                }
            }
            if let Some(previous) = intervals.last() {
                if window.start() <= previous.end() {
                    return Err(ConditionerError::alignment(
                        format!("exclusion {key} overlaps or precedes exclusion {}", position - 1),
                        window,
                    ));
                }
            }
            intervals.push(window);
        }

        Ok(Self(intervals))
    }

    pub fn from_merged(intervals: Vec<Interval>) -> Self {
        Self(crate::interval::merge_intervals(intervals))
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.0.iter().any(|window| window.contains(timestamp))
    }

    /// Re-index as `0..n-1` in the persisted timestamp format
    pub fn to_stored(&self) -> StoredExclusions {
        StoredExclusions(
            self.0
                .iter()
                .enumerate()
                .map(|(i, window)| {
                    (
                        i.to_string(),
                        [
                            window.start().format(MINUTE_FORMAT).to_string(),
                            window.end().format(MINUTE_FORMAT).to_string(),
                        ],
                    )
                })
                .collect(),
        )
    }
}

/// Persisted bounds are minute resolution and nothing else
fn parse_stored(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, MINUTE_FORMAT)
        .ok()
        .filter(|ts| ts.format(MINUTE_FORMAT).to_string() == text)
        .ok_or_else(|| {
            ConditionerError::alignment(
                format!("stored exclusion bound is not in {MINUTE_FORMAT} form"),
                text,
            )
        })
}

/// Parse one `[start, end]` window and check it against the grid
pub fn parse_window(start: &str, end: &str, step: TimeStep) -> Result<Interval> {
    let start = parse_timestamp(start, 0)?;
    let end = parse_timestamp(end, 0)?;
    for ts in [start, end] {
        if !step.is_aligned(ts) {
            return Err(ConditionerError::alignment(
                format!("exclusion bound not on the {step} grid"),
                ts,
            ));
        }
    }
    Interval::new(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(entries: &[(&str, &str, &str)]) -> StoredExclusions {
        StoredExclusions(
            entries
                .iter()
                .map(|(k, s, e)| (k.to_string(), [s.to_string(), e.to_string()]))
                .collect(),
        )
    }

    #[test]
    fn test_validate_accepts_canonical_set() {
        let set = IntervalSet::validate(
            &stored(&[
                ("0", "2024-06-01 00:00", "2024-06-01 01:00"),
                ("1", "2024-06-02 00:00", "2024-06-02 00:30"),
            ]),
            TimeStep::default(),
        )
        .unwrap();
        assert_eq!(set.intervals().len(), 2);
    }

    #[test]
    fn test_validate_rejects_broken_sets() {
        let step = TimeStep::default();
        let cases = [
            stored(&[("1", "2024-06-01 00:00", "2024-06-01 01:00")]),
            stored(&[("0", "2024-06-01 02:00", "2024-06-01 01:00")]),
            stored(&[("0", "2024-06-01 00:10", "2024-06-01 01:00")]),
            stored(&[
                ("0", "2024-06-01 00:00", "2024-06-01 01:00"),
                ("1", "2024-06-01 01:00", "2024-06-01 02:00"),
            ]),
        ];
        for case in cases {
            let err = IntervalSet::validate(&case, step).unwrap_err();
            assert!(matches!(err, ConditionerError::Alignment { .. }), "{case:?}");
        }
    }

    #[test]
    fn test_stored_exclusions_keep_document_order() {
        let json = r#"{"1": ["a", "b"], "0": ["c", "d"]}"#;
        let parsed: StoredExclusions = serde_json::from_str(json).unwrap();
        let keys: Vec<_> = parsed.0.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["1", "0"]);

        let written = serde_json::to_string(&parsed).unwrap();
        assert_eq!(written, r#"{"1":["a","b"],"0":["c","d"]}"#);
    }

    fn validate_json(json: &str) -> Result<IntervalSet> {
        let record: VariableRecord = serde_json::from_str(json).unwrap();
        IntervalSet::validate(&record.exclude_dates.unwrap(), TimeStep::default())
    }

    #[test]
    fn test_duplicate_index_is_not_collapsed() {
        let json = r#"{"ExcludeDates": {
            "0": ["2024-06-01 00:00", "2024-06-01 01:00"],
            "0": ["2024-07-01 00:00", "2024-07-01 01:00"]}}"#;
        let record: VariableRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.exclude_dates.as_ref().unwrap().0.len(), 2);

        let err = validate_json(json).unwrap_err();
        assert!(matches!(err, ConditionerError::Alignment { reason, .. } if reason.contains("duplicate")));
    }

    #[test]
    fn test_non_canonical_index_rejected() {
        let padded = validate_json(
            r#"{"ExcludeDates": {"00": ["2024-06-01 00:00", "2024-06-01 01:00"]}}"#,
        );
        assert!(matches!(padded, Err(ConditionerError::Alignment { value, .. }) if value == "00"));

        let out_of_order = validate_json(
            r#"{"ExcludeDates": {
                "1": ["2024-06-02 00:00", "2024-06-02 01:00"],
                "0": ["2024-06-01 00:00", "2024-06-01 01:00"]}}"#,
        );
        assert!(matches!(out_of_order, Err(ConditionerError::Alignment { .. })));
    }

    #[test]
    fn test_stored_bounds_must_be_minute_form() {
        for json in [
            r#"{"ExcludeDates": {"0": ["2024-06-01 00:00:00", "2024-06-01 01:00"]}}"#,
            r#"{"ExcludeDates": {"0": ["2024-6-1 00:00", "2024-06-01 01:00"]}}"#,
        ] {
            let err = validate_json(json).unwrap_err();
            assert!(matches!(err, ConditionerError::Alignment { reason, .. } if reason.contains("form")));
        }
    }

    #[test]
    fn test_range_check_accepts_numbers_and_strings() {
        let record: RangeCheckRecord =
            serde_json::from_str(r#"{"lower": -50, "upper": "50.5"}"#).unwrap();
        let limit = record.to_limit().unwrap();
        assert_eq!(limit, RangeLimit { lower: -50.0, upper: 50.5 });
        assert!(limit.rejects(60.0));
        assert!(!limit.rejects(0.0));
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let json = r#"{"level":"L2","Variables":{"Fc":{"Attr":{"units":"umol/m^2/s"},"RangeCheck":{"lower":"-50","upper":"50"}}},"Global":{"site":"x"}}"#;
        let record: ControlRecord = serde_json::from_str(json).unwrap();
        assert!(record.extra.contains_key("Global"));
        assert!(record.variables["Fc"].extra.contains_key("Attr"));

        let round: ControlRecord =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(round, record);
    }
}
