//! Logger file parser
//!
//! Classifies an input file by dialect and splits it into a header block and
//! a tabular data block. A file that matches no known dialect is a hard
//! error; there is no fallback reader.
//!
//! - [`toa5`] - continuous Campbell TOA5 streams (four header lines)
//! - [`summary`] - periodic EddyPro summaries (single field-name row)

pub mod summary;
pub mod toa5;

use crate::constants::{EDDYPRO_DATE, EDDYPRO_TIME, TOA5_TAG};
use crate::error::{ConditionerError, InputKind, Result};
use crate::models::{FileFormat, RawFile};
use std::path::Path;
use tracing::{debug, info};

/// Parser for logger time-series files
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatParser;

impl FormatParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a file, detecting its dialect from the first line
    pub fn parse_file(&self, path: &Path) -> Result<RawFile> {
        self.parse_input(path, InputKind::Master)
    }

    /// Parse a file, reporting absence as the given kind of missing input
    pub fn parse_input(&self, path: &Path, kind: InputKind) -> Result<RawFile> {
        if !path.exists() {
            return Err(ConditionerError::MissingInput {
                kind,
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let raw = self.parse_str(path, &content)?;
        info!(
            "Parsed {} file {}: {} columns, {} rows",
            raw.format,
            path.display(),
            raw.columns.len(),
            raw.rows.len()
        );
        Ok(raw)
    }

    /// Parse already-loaded file content
    pub fn parse_str(&self, path: &Path, content: &str) -> Result<RawFile> {
        let first_line = content
            .lines()
            .next()
            .ok_or_else(|| ConditionerError::invalid_format(path, "file is empty"))?;

        let format = detect_format(first_line).ok_or_else(|| {
            ConditionerError::invalid_format(
                path,
                format!("first line matches no known dialect: '{}'", truncate(first_line)),
            )
        })?;
        debug!("Detected {} dialect for {}", format, path.display());

        match format {
            FileFormat::Toa5 => toa5::parse(path, content),
            FileFormat::EddyProSummary => summary::parse(path, content),
        }
    }
}

/// Classify a file from its first line
pub fn detect_format(first_line: &str) -> Option<FileFormat> {
    let line = first_line.trim_start_matches('\u{feff}');

    let first_field = line
        .split(',')
        .next()
        .map(|f| f.trim().trim_matches('"'))
        .unwrap_or_default();
    if first_field == TOA5_TAG {
        return Some(FileFormat::Toa5);
    }

    let fields = split_fields(line, summary::detect_delimiter(line));
    let has = |name: &str| fields.iter().any(|f| f == name);
    if has(EDDYPRO_DATE) && has(EDDYPRO_TIME) {
        return Some(FileFormat::EddyProSummary);
    }

    None
}

fn split_fields(line: &str, delimiter: u8) -> Vec<String> {
    line.split(delimiter as char)
        .map(|f| f.trim().trim_matches('"').to_string())
        .collect()
}

fn truncate(line: &str) -> String {
    line.chars().take(60).collect()
}

/// Line number of a csv record, 1-based
pub(crate) fn record_line(record: &csv::StringRecord) -> usize {
    record
        .position()
        .map(|p| p.line() as usize)
        .unwrap_or_default()
}
