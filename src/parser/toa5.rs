//! TOA5 continuous logger files.
//!
//! Layout: environment line, field names, units, sampling types, then one
//! quoted-timestamp row per logging interval.

use super::record_line;
use crate::constants::{TOA5_HEADER_LINES, TOA5_TAG, TOA5_TIMESTAMP, TOA5_TIMESTAMP_UNITS};
use crate::error::{ConditionerError, Result};
use crate::models::{FileFormat, FileInfo, RawFile, RawRow, VariableHeader};
use csv::StringRecord;
use std::path::Path;

pub(super) fn parse(path: &Path, content: &str) -> Result<RawFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut records = reader.records();

    let mut next_header = |what: &str| -> Result<StringRecord> {
        match records.next() {
            Some(record) => Ok(record?),
            None => Err(ConditionerError::invalid_format(
                path,
                format!("truncated header: no {what} line"),
            )),
        }
    };

    let info = parse_info(&next_header("environment")?);
    let names = next_header("field name")?;
    let units = next_header("units")?;
    let sampling = next_header("sampling")?;

    if info.format != TOA5_TAG {
        return Err(ConditionerError::invalid_format(path, "environment line is not TOA5"));
    }
    if names.get(0) != Some(TOA5_TIMESTAMP) {
        return Err(ConditionerError::invalid_format(
            path,
            format!("first field name must be {TOA5_TIMESTAMP}"),
        ));
    }
    if units.get(0) != Some(TOA5_TIMESTAMP_UNITS) {
        return Err(ConditionerError::invalid_format(
            path,
            format!("timestamp units must be {TOA5_TIMESTAMP_UNITS}"),
        ));
    }
    if units.len() != names.len() || sampling.len() != names.len() {
        return Err(ConditionerError::invalid_format(
            path,
            format!(
                "header lines disagree: {} names, {} units, {} sampling types",
                names.len(),
                units.len(),
                sampling.len()
            ),
        ));
    }

    let instrument = Some(info.logger_type.clone()).filter(|s| !s.is_empty());
    let columns = (1..names.len())
        .map(|i| {
            VariableHeader::new(&names[i], &units[i], &sampling[i])
                .with_instrument(instrument.clone())
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
            timestamp: record[0].trim().to_string(),
            values: record.iter().skip(1).map(str::to_string).collect(),
        });
    }

    Ok(RawFile {
        path: path.to_path_buf(),
        format: FileFormat::Toa5,
        info: Some(info),
        header_lines: content
            .lines()
            .take(TOA5_HEADER_LINES)
            .map(str::to_string)
            .collect(),
        columns,
        rows,
    })
}

fn parse_info(record: &StringRecord) -> FileInfo {
    let field = |i: usize| record.get(i).unwrap_or_default().trim().to_string();
    FileInfo {
        format: field(0).trim_start_matches('\u{feff}').to_string(),
        station_name: field(1),
        logger_type: field(2),
        serial_num: field(3),
        os_version: field(4),
        program_name: field(5),
        program_sig: field(6),
        table_name: field(7),
    }
}
