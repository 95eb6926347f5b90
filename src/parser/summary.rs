//! EddyPro periodic summary files.
//!
//! One header row of field names, optionally followed by a bracketed units
//! row, then one row per processing run. Timestamps are split across the
//! `date` and `time` columns.

use super::record_line;
use crate::constants::{EDDYPRO_DATE, EDDYPRO_TIME};
use crate::error::{ConditionerError, Result};
use crate::models::{FileFormat, RawFile, RawRow, VariableHeader};
use std::path::Path;

/// Summaries are tab-separated unless the header line has no tabs
pub(crate) fn detect_delimiter(line: &str) -> u8 {
    if line.contains('\t') { b'\t' } else { b',' }
}

pub(super) fn parse(path: &Path, content: &str) -> Result<RawFile> {
    let first_line = content.lines().next().unwrap_or_default();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(detect_delimiter(first_line))
        .from_reader(content.as_bytes());
    let mut records = reader.records().peekable();

    let names: Vec<String> = match records.next() {
        Some(record) => record?
            .iter()
            .map(|f| f.trim().trim_start_matches('\u{feff}').to_string())
            .collect(),
        None => return Err(ConditionerError::invalid_format(path, "no field name row")),
    };

    let position = |name: &str| {
        names.iter().position(|n| n == name).ok_or_else(|| {
            ConditionerError::invalid_format(path, format!("no '{name}' column"))
        })
    };
    let date_idx = position(EDDYPRO_DATE)?;
    let time_idx = position(EDDYPRO_TIME)?;

    let mut header_lines: Vec<String> = content.lines().take(1).map(str::to_string).collect();
    let units_row: Option<Vec<String>> = match records.peek() {
        Some(Ok(record)) if record.get(0).is_some_and(|f| f.trim().starts_with('[')) => Some(
            record
                .iter()
                .map(|u| u.trim().trim_start_matches('[').trim_end_matches(']').to_string())
                .collect(),
        ),
        _ => None,
    };
    if units_row.is_some() {
        records.next();
        header_lines.extend(content.lines().nth(1).map(str::to_string));
    }
    let units = units_row.unwrap_or_default();

    let value_indices: Vec<usize> = (0..names.len())
        .filter(|&i| i != date_idx && i != time_idx)
        .collect();
    let columns = value_indices
        .iter()
        .map(|&i| {
            VariableHeader::new(
                &names[i],
                units.get(i).cloned().unwrap_or_default(),
                "",
            )
        })
        .collect();

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.len() != names.len() {
            return Err(ConditionerError::invalid_format(
                path,
                format!(
                    "line {} has {} fields, expected {}",
                    record_line(&record),
                    record.len(),
                    names.len()
                ),
            ));
        }
        rows.push(RawRow {
            line: record_line(&record),
            timestamp: format!("{} {}", record[date_idx].trim(), record[time_idx].trim()),
            values: value_indices.iter().map(|&i| record[i].to_string()).collect(),
        });
    }

    Ok(RawFile {
        path: path.to_path_buf(),
        format: FileFormat::EddyProSummary,
        info: None,
        header_lines,
        columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_summary_with_units_row() {
        let content = "filename\tdate\ttime\tH\tLE\n\
                       [none]\t[yyyy-mm-dd]\t[HH:MM]\t[W+1m-2]\t[W+1m-2]\n\
                       run1.ghg\t2024-01-01\t00:30\t12.1\t40.2\n\
                       run2.ghg\t2024-01-01\t01:00\t-9999\t38.0\n";

        let raw = parse(Path::new("EP-Summary.txt"), content).unwrap();

        let names: Vec<_> = raw.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["filename", "H", "LE"]);
        assert_eq!(raw.columns[1].units, "W+1m-2");
        assert_eq!(raw.header_lines.len(), 2);
        assert_eq!(raw.rows.len(), 2);
        assert_eq!(raw.rows[0].timestamp, "2024-01-01 00:30");
        assert_eq!(raw.rows[1].values, vec!["run2.ghg", "-9999", "38.0"]);
    }

    #[test]
    fn test_parse_summary_without_units_row() {
        let content = "filename,date,time,H\nrun1,2024-01-01,00:30,1.5\n";
        let raw = parse(Path::new("summary.csv"), content).unwrap();

        assert_eq!(raw.columns[1].units, "");
        assert_eq!(raw.header_lines.len(), 1);
        assert_eq!(raw.rows.len(), 1);
        assert_eq!(raw.rows[0].line, 2);
    }
}
