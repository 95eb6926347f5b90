//! Configuration management and validation.
//!
//! Provides the processing parameters shared by the parser, normaliser,
//! concatenation engine and merge aligner. Only the logical schema is
//! defined here; callers build it from whatever source they like.

use crate::constants::{
    DEFAULT_BACKUP_PATTERN, DEFAULT_MISSING_VALUES, DEFAULT_STEP_MINUTES, MINUTES_PER_DAY,
    UNIT_ALIASES,
};
use crate::error::{ConditionerError, Result};
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fixed-step grid spacing in whole minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStep(u32);

impl TimeStep {
    /// Create a step, rejecting zero and steps that do not divide a day
    pub fn new(minutes: u32) -> Result<Self> {
        if minutes == 0 || MINUTES_PER_DAY % minutes != 0 {
            return Err(ConditionerError::Configuration {
                message: format!("time step of {minutes} minutes does not divide a day"),
            });
        }
        Ok(Self(minutes))
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }

    /// Whether a timestamp sits exactly on this grid
    pub fn is_aligned(&self, timestamp: NaiveDateTime) -> bool {
        timestamp.second() == 0
            && timestamp.nanosecond() == 0
            && (timestamp.hour() * 60 + timestamp.minute()) % self.0 == 0
    }

    /// Number of grid slots in `[first, last]`, both ends included
    pub fn slots_between(&self, first: NaiveDateTime, last: NaiveDateTime) -> usize {
        if last < first {
            return 0;
        }
        ((last - first).num_minutes() / i64::from(self.0)) as usize + 1
    }
}

impl Default for TimeStep {
    fn default() -> Self {
        Self(DEFAULT_STEP_MINUTES)
    }
}

impl fmt::Display for TimeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.0)
    }
}

/// Global configuration for conditioning and merging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionerConfig {
    /// Grid every conditioned timestamp must sit on
    pub step: TimeStep,

    /// Field values read as missing data
    pub missing_values: Vec<String>,

    /// Master units -> equivalent spellings accepted from backups
    pub unit_aliases: HashMap<String, Vec<String>>,

    /// Glob (relative to the master's directory) for backup discovery
    pub backup_pattern: String,

    /// Fail instead of keeping the first row when a timestamp repeats with different values
    pub reject_conflicting_duplicates: bool,

    /// Drop text and bookkeeping columns when merging
    pub drop_non_numeric: bool,

    /// Reindex merged output onto the full fixed-step grid
    pub regularize_merged: bool,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        let unit_aliases = UNIT_ALIASES
            .iter()
            .map(|(units, aliases)| {
                (
                    units.to_string(),
                    aliases.iter().map(|a| a.to_string()).collect(),
                )
            })
            .collect();

        Self {
            step: TimeStep::default(),
            missing_values: DEFAULT_MISSING_VALUES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            unit_aliases,
            backup_pattern: DEFAULT_BACKUP_PATTERN.to_string(),
            reject_conflicting_duplicates: false,
            drop_non_numeric: true,
            regularize_merged: true,
        }
    }
}

impl ConditionerConfig {
    /// Create configuration with a custom grid step
    pub fn with_step(mut self, step: TimeStep) -> Self {
        self.step = step;
        self
    }

    /// Set the backup discovery pattern
    pub fn with_backup_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.backup_pattern = pattern.into();
        self
    }

    /// Treat repeated timestamps carrying different values as fatal
    pub fn with_conflicting_duplicates_rejected(mut self) -> Self {
        self.reject_conflicting_duplicates = true;
        self
    }

    /// Keep text and bookkeeping columns in merged output
    pub fn keeping_non_numeric(mut self) -> Self {
        self.drop_non_numeric = false;
        self
    }

    /// Merge onto the union of source timestamps only
    pub fn without_regularized_merge(mut self) -> Self {
        self.regularize_merged = false;
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        TimeStep::new(self.step.minutes())?;
        if self.backup_pattern.trim().is_empty() {
            return Err(ConditionerError::Configuration {
                message: "backup pattern is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Whether a field value denotes missing data
    pub fn is_missing(&self, value: &str) -> bool {
        let trimmed = value.trim();
        self.missing_values.iter().any(|m| m == trimmed)
    }

    /// Whether two unit strings are equal or registered aliases of each other
    pub fn units_compatible(&self, master: &str, candidate: &str) -> bool {
        master == candidate
            || self
                .unit_aliases
                .get(master)
                .is_some_and(|aliases| aliases.iter().any(|a| a == candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_step_rejects_non_divisors() {
        assert!(TimeStep::new(30).is_ok());
        assert!(TimeStep::new(60).is_ok());
        assert!(TimeStep::new(1440).is_ok());
        assert!(TimeStep::new(0).is_err());
        assert!(TimeStep::new(7).is_err());
    }

    #[test]
    fn test_alignment_and_slots() {
        let step = TimeStep::new(30).unwrap();
        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();

        assert!(step.is_aligned(at("2024-01-01 00:30:00")));
        assert!(!step.is_aligned(at("2024-01-01 00:15:00")));
        assert!(!step.is_aligned(at("2024-01-01 00:30:10")));
        assert_eq!(
            step.slots_between(at("2024-01-01 00:00:00"), at("2024-01-01 02:00:00")),
            5
        );
    }

    #[test]
    fn test_missing_values() {
        let config = ConditionerConfig::default();
        assert!(config.is_missing("NAN"));
        assert!(config.is_missing(" -9999 "));
        assert!(config.is_missing(""));
        assert!(!config.is_missing("0"));
    }

    #[test]
    fn test_unit_aliases() {
        let config = ConditionerConfig::default();
        assert!(config.units_compatible("degC", "degC"));
        assert!(config.units_compatible("degC", "C"));
        assert!(config.units_compatible("n", "samples"));
        assert!(!config.units_compatible("C", "degC"));
        assert!(!config.units_compatible("degC", "K"));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(ConditionerConfig::default().validate().is_ok());
    }
}
