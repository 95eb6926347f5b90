//! Core data structures and types for logger file conditioning.
//!
//! Defines the supported file dialects, per-column header metadata, the
//! parsed representation of a raw file and the column selection supplied
//! to the merge aligner.

use crate::constants::{EDDYPRO_FILENAME, TOA5_RECORD};
use crate::error::{ConditionerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Logger file dialects understood by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileFormat {
    /// Continuous fixed-format logger stream (Campbell TOA5)
    Toa5,
    /// Periodic processing summary, one row per run (EddyPro summary)
    EddyProSummary,
}

impl FileFormat {
    /// Map the tag strings used by the site metadata onto a dialect
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "TOA5" => Some(FileFormat::Toa5),
            "EddyPro" => Some(FileFormat::EddyProSummary),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FileFormat::Toa5 => "TOA5",
            FileFormat::EddyProSummary => "EddyPro",
        }
    }

    /// Columns that carry file bookkeeping rather than measurements
    pub fn bookkeeping_columns(&self) -> &'static [&'static str] {
        match self {
            FileFormat::Toa5 => &[TOA5_RECORD],
            FileFormat::EddyProSummary => &[EDDYPRO_FILENAME],
        }
    }

    /// Whether a column name is bookkeeping in any dialect
    pub fn is_bookkeeping(name: &str) -> bool {
        [FileFormat::Toa5, FileFormat::EddyProSummary]
            .iter()
            .any(|format| format.bookkeeping_columns().contains(&name))
    }

    /// Whether rows are guaranteed one per fixed-step interval
    pub fn is_continuous(&self) -> bool {
        matches!(self, FileFormat::Toa5)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// TOA5 environment line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub format: String,
    pub station_name: String,
    pub logger_type: String,
    pub serial_num: String,
    pub os_version: String,
    pub program_name: String,
    pub program_sig: String,
    pub table_name: String,
}

impl FileInfo {
    pub fn to_fields(&self) -> [&str; 8] {
        [
            &self.format,
            &self.station_name,
            &self.logger_type,
            &self.serial_num,
            &self.os_version,
            &self.program_name,
            &self.program_sig,
            &self.table_name,
        ]
    }
}

/// Per-column header metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableHeader {
    pub name: String,
    pub units: String,
    /// Sampling/statistic type (Avg, Smp, Tot, ...)
    pub sampling: String,
    pub instrument: Option<String>,
}

impl VariableHeader {
    pub fn new(name: impl Into<String>, units: impl Into<String>, sampling: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            sampling: sampling.into(),
            instrument: None,
        }
    }

    pub fn with_instrument(mut self, instrument: Option<String>) -> Self {
        self.instrument = instrument;
        self
    }
}

/// One data row as read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the source file
    pub line: usize,
    pub timestamp: String,
    pub values: Vec<String>,
}

/// A parsed logger file. Timestamp columns are held on each row, not in `columns`.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    pub format: FileFormat,
    pub info: Option<FileInfo>,
    pub header_lines: Vec<String>,
    pub columns: Vec<VariableHeader>,
    pub rows: Vec<RawRow>,
}

impl RawFile {
    pub fn schema(&self) -> TableSchema {
        TableSchema {
            format: self.format,
            columns: self.columns.clone(),
        }
    }

    pub fn into_block(self) -> DataBlock {
        DataBlock {
            columns: self.columns,
            rows: self.rows,
        }
    }
}

/// Column names and units of a table, used for concatenation legality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub format: FileFormat,
    pub columns: Vec<VariableHeader>,
}

impl TableSchema {
    pub fn units_of(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.units.as_str())
    }
}

/// Tabular rows plus their column headers, prior to index normalisation
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    pub columns: Vec<VariableHeader>,
    pub rows: Vec<RawRow>,
}

impl DataBlock {
    /// Append another block's rows, realigned to this block's column order.
    ///
    /// Columns absent from `other` are filled with empty (missing) fields.
    /// Columns in `other` that this block lacks are an error; run the
    /// legality check first.
    pub fn append(&mut self, other: DataBlock) -> Result<()> {
        let positions = self
            .columns
            .iter()
            .map(|c| other.columns.iter().position(|o| o.name == c.name))
            .collect::<Vec<_>>();

        if let Some(extra) = other
            .columns
            .iter()
            .find(|o| !self.columns.iter().any(|c| c.name == o.name))
        {
            return Err(ConditionerError::UnknownColumn {
                column: extra.name.clone(),
            });
        }

        self.rows.extend(other.rows.into_iter().map(|row| {
            let values = positions
                .iter()
                .map(|pos| {
                    pos.and_then(|i| row.values.get(i).cloned())
                        .unwrap_or_default()
                })
                .collect();
            RawRow {
                line: row.line,
                timestamp: row.timestamp,
                values,
            }
        }));
        Ok(())
    }
}

/// Column selection for one merge input
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "columns", rename_all = "snake_case")]
pub enum MergeSpec {
    /// Keep every column under its own name
    #[default]
    All,
    /// Keep only the listed columns
    Select(Vec<String>),
    /// Keep the listed columns, renamed (source, destination)
    Rename(Vec<(String, String)>),
}

impl MergeSpec {
    /// (source, destination) pairs for the given available columns
    pub fn resolve(&self, available: &[&str]) -> Result<Vec<(String, String)>> {
        let pairs: Vec<(String, String)> = match self {
            MergeSpec::All => available
                .iter()
                .map(|c| (c.to_string(), c.to_string()))
                .collect(),
            MergeSpec::Select(columns) => columns.iter().map(|c| (c.clone(), c.clone())).collect(),
            MergeSpec::Rename(pairs) => pairs.clone(),
        };

        if let Some((missing, _)) = pairs
            .iter()
            .find(|(source, _)| !available.contains(&source.as_str()))
        {
            return Err(ConditionerError::UnknownColumn {
                column: missing.clone(),
            });
        }
        Ok(pairs)
    }
}

/// Parses `a,b,c` as a selection and `a=x,b=y` as a rename; empty means all columns
impl FromStr for MergeSpec {
    type Err = ConditionerError;

    fn from_str(s: &str) -> Result<Self> {
        let items: Vec<&str> = s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect();
        if items.is_empty() {
            return Ok(MergeSpec::All);
        }

        let renames = items.iter().filter(|item| item.contains('=')).count();
        if renames == 0 {
            return Ok(MergeSpec::Select(
                items.iter().map(|item| item.to_string()).collect(),
            ));
        }
        if renames != items.len() {
            return Err(ConditionerError::Configuration {
                message: format!("cannot mix selected and renamed columns in '{s}'"),
            });
        }

        let pairs = items
            .iter()
            .filter_map(|item| item.split_once('='))
            .map(|(from, to)| (from.trim().to_string(), to.trim().to_string()))
            .collect();
        Ok(MergeSpec::Rename(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(names: &[&str], rows: &[(&str, &[&str])]) -> DataBlock {
        DataBlock {
            columns: names
                .iter()
                .map(|n| VariableHeader::new(*n, "u", "Avg"))
                .collect(),
            rows: rows
                .iter()
                .enumerate()
                .map(|(i, (ts, values))| RawRow {
                    line: i + 1,
                    timestamp: ts.to_string(),
                    values: values.iter().map(|v| v.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_append_realigns_columns() {
        let mut master = block(&["a", "b", "c"], &[("t1", &["1", "2", "3"])]);
        let backup = block(&["c", "a"], &[("t2", &["30", "10"])]);

        master.append(backup).unwrap();

        assert_eq!(master.rows.len(), 2);
        assert_eq!(master.rows[1].values, vec!["10", "", "30"]);
    }

    #[test]
    fn test_append_rejects_unknown_column() {
        let mut master = block(&["a"], &[]);
        let backup = block(&["a", "z"], &[]);

        let err = master.append(backup).unwrap_err();
        assert!(matches!(err, ConditionerError::UnknownColumn { column } if column == "z"));
    }

    #[test]
    fn test_merge_spec_parsing() {
        assert_eq!("".parse::<MergeSpec>().unwrap(), MergeSpec::All);
        assert_eq!(
            "Ta, RH".parse::<MergeSpec>().unwrap(),
            MergeSpec::Select(vec!["Ta".to_string(), "RH".to_string()])
        );
        assert_eq!(
            "AirTC_Avg=Ta".parse::<MergeSpec>().unwrap(),
            MergeSpec::Rename(vec![("AirTC_Avg".to_string(), "Ta".to_string())])
        );
        assert!("a,b=c".parse::<MergeSpec>().is_err());
    }

    #[test]
    fn test_merge_spec_resolve_unknown_column() {
        let spec = MergeSpec::Select(vec!["missing".to_string()]);
        assert!(spec.resolve(&["Ta"]).is_err());
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(FileFormat::from_tag("TOA5"), Some(FileFormat::Toa5));
        assert_eq!(FileFormat::from_tag("EddyPro"), Some(FileFormat::EddyProSummary));
        assert_eq!(FileFormat::from_tag("TOB3"), None);
    }
}
