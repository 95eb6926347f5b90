//! Structured QC corrections on a site's control record.
//!
//! The editor is a value: it is loaded once, each `set_*` call consumes it and
//! returns the edited record, and [`CorrectionsEditor::write`] serialises it
//! in a single atomic step. Exclusion windows are re-validated in full before
//! every merge and again on write.
//!
//! - [`record`] - persisted control-record types
//! - [`input`] - correction input documents

pub mod input;
pub mod record;

pub use input::{CorrectionInput, VariableCorrections};
pub use record::{ControlRecord, IntervalSet, RangeCheckRecord, RangeLimit, StoredExclusions, VariableRecord};

use crate::config::TimeStep;
use crate::constants::{CONTROL_LEVEL, CONTROL_VERSION_SUFFIX};
use crate::dataset::ConditionedDataset;
use crate::error::{ConditionerError, InputKind, Result};
use crate::legality::same_file;
use crate::writer::write_atomic;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CorrectionsEditor {
    path: PathBuf,
    site: String,
    step: TimeStep,
    record: ControlRecord,
}

impl CorrectionsEditor {
    /// Load an L2 control record; the site is the file stem
    pub fn load(path: &Path, step: TimeStep) -> Result<Self> {
        if !path.exists() {
            return Err(ConditionerError::MissingInput {
                kind: InputKind::ControlFile,
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let record: ControlRecord = serde_json::from_str(&content)?;
        if record.level != CONTROL_LEVEL {
            return Err(ConditionerError::InvalidCorrections {
                reason: format!(
                    "control file level is '{}', only {CONTROL_LEVEL} files can be edited",
                    record.level
                ),
            });
        }

        let site = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(
            "Loaded control file {} for {} ({} variables)",
            path.display(),
            site,
            record.variables.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            site,
            step,
            record,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn record(&self) -> &ControlRecord {
        &self.record
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.record.variables.keys().map(String::as_str)
    }

    fn variable(&self, name: &str) -> Result<&VariableRecord> {
        self.record
            .variables
            .get(name)
            .ok_or_else(|| ConditionerError::UnknownVariable {
                variable: name.to_string(),
            })
    }

    fn variable_mut(&mut self, name: &str) -> Result<&mut VariableRecord> {
        self.record
            .variables
            .get_mut(name)
            .ok_or_else(|| ConditionerError::UnknownVariable {
                variable: name.to_string(),
            })
    }

    pub fn range_limit(&self, variable: &str) -> Result<Option<RangeLimit>> {
        self.variable(variable)?
            .range_check
            .as_ref()
            .map(RangeCheckRecord::to_limit)
            .transpose()
    }

    /// The variable's stored exclusion windows, validated
    pub fn exclusions(&self, variable: &str) -> Result<IntervalSet> {
        match &self.variable(variable)?.exclude_dates {
            Some(stored) => IntervalSet::validate(stored, self.step),
            None => Ok(IntervalSet::default()),
        }
    }

    /// Replace a variable's range limit. Both bounds must be numeric.
    pub fn set_range_limit(mut self, variable: &str, lower: &str, upper: &str) -> Result<Self> {
        let range = RangeCheckRecord {
            lower: lower.trim().to_string(),
            upper: upper.trim().to_string(),
        };
        range.to_limit()?;

        self.variable_mut(variable)?.range_check = Some(range);
        debug!("{variable}: range limit set to [{lower}, {upper}]");
        Ok(self)
    }

    /// Merge a new exclusion window into a variable's existing windows
    pub fn set_exclusion(mut self, variable: &str, start: &str, end: &str) -> Result<Self> {
        let existing = self.exclusions(variable)?;
        let window = record::parse_window(start, end, self.step)?;

        let mut intervals = existing.intervals().to_vec();
        intervals.push(window);
        let merged = IntervalSet::from_merged(intervals);

        debug!(
            "{variable}: exclusion {window} merged into {} windows",
            merged.intervals().len()
        );
        self.variable_mut(variable)?.exclude_dates = Some(merged.to_stored());
        Ok(self)
    }

    /// Apply a correction document: every exclusion window, then the range limit
    pub fn apply_corrections(mut self, input: &CorrectionInput) -> Result<Self> {
        if input.site != self.site {
            return Err(ConditionerError::InvalidCorrections {
                reason: format!(
                    "corrections are for site '{}', control file is for '{}'",
                    input.site, self.site
                ),
            });
        }
        if let Some(unknown) = input
            .variables
            .keys()
            .find(|name| !self.record.variables.contains_key(*name))
        {
            return Err(ConditionerError::UnknownVariable {
                variable: unknown.clone(),
            });
        }

        for (variable, corrections) in &input.variables {
            for (start, end) in &corrections.exclude_dates {
                self = self.set_exclusion(variable, start, end)?;
            }
            if let Some((lower, upper)) = &corrections.range_check {
                self = self.set_range_limit(
                    variable,
                    &input::bound_text(lower)?,
                    &input::bound_text(upper)?,
                )?;
            }
        }
        info!(
            "Applied corrections for {} variables to {}",
            input.variables.len(),
            self.site
        );
        Ok(self)
    }

    /// `<stem>_v2.json` beside the input
    pub fn default_output_path(&self) -> PathBuf {
        let extension = self
            .path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "json".to_string());
        self.path
            .with_file_name(format!("{}{CONTROL_VERSION_SUFFIX}.{extension}", self.site))
    }

    /// Serialise the record to a new file. Refuses to overwrite the input.
    pub fn write(&self, output: &Path) -> Result<()> {
        if output == self.path || same_file(output, &self.path) {
            return Err(ConditionerError::OverwriteRefused {
                path: output.to_path_buf(),
            });
        }

        for (name, variable) in &self.record.variables {
            if let Some(stored) = &variable.exclude_dates {
                IntervalSet::validate(stored, self.step).map_err(|e| {
                    debug!("{name}: exclusion windows failed validation");
                    e
                })?;
            }
        }

        write_atomic(output, |file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.record)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            Ok(())
        })?;
        info!("Wrote control file {}", output.display());
        Ok(())
    }

    /// Mask every variable of `dataset` this record has limits or windows for.
    /// Variables absent from the dataset are ignored.
    pub fn mask_dataset(&self, dataset: &mut ConditionedDataset) -> Result<usize> {
        let mut limits = BTreeMap::new();
        let mut windows = BTreeMap::new();
        for name in self.variables() {
            if dataset.column(name).is_none() {
                continue;
            }
            if let Some(limit) = self.range_limit(name)? {
                limits.insert(name.to_string(), limit);
            }
            let set = self.exclusions(name)?;
            if !set.is_empty() {
                windows.insert(name.to_string(), set);
            }
        }
        Ok(apply_range_limits(dataset, &limits)? + apply_exclusions(dataset, &windows)?)
    }
}

/// Null every value outside its column's range limit. Returns the count masked.
pub fn apply_range_limits(
    dataset: &mut ConditionedDataset,
    limits: &BTreeMap<String, RangeLimit>,
) -> Result<usize> {
    let mut masked = 0;
    for (column, limit) in limits {
        masked += dataset.mask_values(column, |_, value| limit.rejects(value))?;
    }
    Ok(masked)
}

/// Null every value inside its column's exclusion windows. Returns the count masked.
pub fn apply_exclusions(
    dataset: &mut ConditionedDataset,
    windows: &BTreeMap<String, IntervalSet>,
) -> Result<usize> {
    let mut masked = 0;
    for (column, set) in windows {
        masked += dataset.mask_values(column, |timestamp, _| set.contains(timestamp))?;
    }
    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONTROL: &str = r#"{
  "level": "L2",
  "Variables": {
    "Fc": {"Attr": {"units": "umol/m^2/s"}, "RangeCheck": {"lower": "-50", "upper": "50"}},
    "Ta": {}
  }
}"#;

    fn editor(dir: &TempDir) -> CorrectionsEditor {
        let path = dir.path().join("Calperum.json");
        std::fs::write(&path, CONTROL).unwrap();
        CorrectionsEditor::load(&path, TimeStep::default()).unwrap()
    }

    #[test]
    fn test_load_takes_site_from_stem() {
        let dir = TempDir::new().unwrap();
        let editor = editor(&dir);
        assert_eq!(editor.site(), "Calperum");
        assert_eq!(editor.variables().collect::<Vec<_>>(), vec!["Fc", "Ta"]);
        assert_eq!(
            editor.default_output_path(),
            dir.path().join("Calperum_v2.json")
        );
    }

    #[test]
    fn test_non_l2_record_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Calperum.json");
        std::fs::write(&path, r#"{"level": "L3", "Variables": {}}"#).unwrap();

        let err = CorrectionsEditor::load(&path, TimeStep::default()).unwrap_err();
        assert!(matches!(err, ConditionerError::InvalidCorrections { .. }));
    }

    #[test]
    fn test_set_range_limit() {
        let dir = TempDir::new().unwrap();
        let editor = editor(&dir).set_range_limit("Ta", "-10", "45").unwrap();

        assert_eq!(
            editor.range_limit("Ta").unwrap(),
            Some(RangeLimit { lower: -10.0, upper: 45.0 })
        );

        let err = editor.clone().set_range_limit("Ta", "low", "45").unwrap_err();
        assert!(matches!(err, ConditionerError::InvalidCorrections { .. }));
        let err = editor.set_range_limit("CO2", "0", "1").unwrap_err();
        assert!(matches!(err, ConditionerError::UnknownVariable { .. }));
    }

    #[test]
    fn test_set_exclusion_merges_touching_windows() {
        let dir = TempDir::new().unwrap();
        let editor = editor(&dir)
            .set_exclusion("Fc", "2024-06-01 00:00", "2024-06-01 00:30")
            .unwrap()
            .set_exclusion("Fc", "2024-06-01 00:30", "2024-06-01 01:00")
            .unwrap();

        let stored = editor.record().variables["Fc"].exclude_dates.clone().unwrap();
        assert_eq!(
            stored.0,
            vec![(
                "0".to_string(),
                ["2024-06-01 00:00".to_string(), "2024-06-01 01:00".to_string()]
            )]
        );
    }

    #[test]
    fn test_set_exclusion_rejects_corrupt_existing_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Calperum.json");
        std::fs::write(
            &path,
            r#"{"level": "L2", "Variables": {"Fc": {"ExcludeDates": {
                "0": ["2024-06-02 00:00", "2024-06-02 01:00"],
                "1": ["2024-06-01 00:00", "2024-06-01 01:00"]}}}}"#,
        )
        .unwrap();

        let editor = CorrectionsEditor::load(&path, TimeStep::default()).unwrap();
        let err = editor
            .set_exclusion("Fc", "2024-07-01 00:00", "2024-07-01 01:00")
            .unwrap_err();
        assert!(matches!(err, ConditionerError::Alignment { .. }));
    }

    #[test]
    fn test_write_refuses_input_path() {
        let dir = TempDir::new().unwrap();
        let editor = editor(&dir);
        let input = editor.path().to_path_buf();

        let err = editor.write(&input).unwrap_err();
        assert!(matches!(err, ConditionerError::OverwriteRefused { .. }));
        assert_eq!(std::fs::read_to_string(&input).unwrap(), CONTROL);
    }

    #[test]
    fn test_write_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let editor = editor(&dir)
            .set_exclusion("Ta", "2024-06-01 00:00", "2024-06-01 12:00")
            .unwrap();
        let output = editor.default_output_path();
        editor.write(&output).unwrap();

        let reloaded = CorrectionsEditor::load(&output, TimeStep::default()).unwrap();
        assert!(reloaded.record().variables["Fc"].extra.contains_key("Attr"));
        assert_eq!(reloaded.exclusions("Ta").unwrap().intervals().len(), 1);
    }
}
