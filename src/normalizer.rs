//! Index normalisation onto the fixed-step grid.
//!
//! Turns a [`DataBlock`] of raw rows into a [`ConditionedDataset`]: timestamps
//! are parsed, exact-duplicate timestamps collapse to their first occurrence,
//! rows are sorted ascending and every timestamp must sit on the grid. Off-grid
//! timestamps fail; nothing is rounded.

use crate::config::ConditionerConfig;
use crate::constants::{MINUTE_FORMAT, TIMESTAMP_FORMAT, TIMESTAMP_FORMAT_FRACTIONAL};
use crate::dataset::{ColumnData, ConditionedDataset, DataColumn};
use crate::error::{ConditionerError, Result};
use crate::models::{DataBlock, FileFormat, FileInfo, RawRow};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::{debug, warn};

/// What normalisation had to do to the block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationReport {
    pub input_rows: usize,
    pub output_rows: usize,
    /// Repeated timestamps whose values matched the kept row
    pub duplicate_records: usize,
    /// Repeated timestamps whose values differed from the kept row
    pub conflicting_duplicates: Vec<NaiveDateTime>,
    /// Whether the input was not already in ascending order
    pub reordered: bool,
}

impl NormalizationReport {
    pub fn dropped_rows(&self) -> usize {
        self.input_rows - self.output_rows
    }
}

/// Parse a logger timestamp (`YYYY-MM-DD HH:MM[:SS[.f]]`, optionally quoted)
pub fn parse_timestamp(text: &str, line: usize) -> Result<NaiveDateTime> {
    let trimmed = text.trim().trim_matches('"');
    [TIMESTAMP_FORMAT, TIMESTAMP_FORMAT_FRACTIONAL, MINUTE_FORMAT]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| ConditionerError::InvalidTimestamp {
            value: trimmed.to_string(),
            line,
        })
}

/// Parse the timestamps of a set of rows, in row order
pub fn parse_timestamps(rows: &[RawRow]) -> Result<Vec<NaiveDateTime>> {
    rows.iter()
        .map(|row| parse_timestamp(&row.timestamp, row.line))
        .collect()
}

/// Modal positive spacing of a sorted index, in minutes.
///
/// Ties go to the smaller spacing. `None` when fewer than two distinct
/// timestamps are present.
pub fn infer_step(index: &[NaiveDateTime]) -> Option<u32> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for pair in index.windows(2) {
        let minutes = (pair[1] - pair[0]).num_minutes();
        if minutes > 0 {
            *counts.entry(minutes).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(a_step, a_count), (b_step, b_count)| {
            a_count.cmp(b_count).then(b_step.cmp(a_step))
        })
        .and_then(|(minutes, _)| u32::try_from(minutes).ok())
}

/// Coerces raw rows onto a unique, ascending, grid-aligned index
#[derive(Debug, Clone)]
pub struct IndexNormalizer {
    config: ConditionerConfig,
}

impl IndexNormalizer {
    pub fn new(config: ConditionerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    pub fn normalize(&self, block: DataBlock, info: Option<FileInfo>) -> Result<ConditionedDataset> {
        self.normalize_with_report(block, info)
            .map(|(dataset, _)| dataset)
    }

    pub fn normalize_with_report(
        &self,
        block: DataBlock,
        info: Option<FileInfo>,
    ) -> Result<(ConditionedDataset, NormalizationReport)> {
        let step = self.config.step;
        let timestamps = parse_timestamps(&block.rows)?;

        if let Some(position) = timestamps.iter().position(|ts| !step.is_aligned(*ts)) {
            return Err(ConditionerError::alignment(
                format!(
                    "timestamp at data line {} is not on the {step} grid",
                    block.rows[position].line
                ),
                timestamps[position],
            ));
        }

        let mut report = NormalizationReport {
            input_rows: block.rows.len(),
            reordered: timestamps.windows(2).any(|pair| pair[1] < pair[0]),
            ..Default::default()
        };

        // Stable sort keeps the first occurrence of each timestamp in front
        let mut order: Vec<usize> = (0..timestamps.len()).collect();
        order.sort_by_key(|&i| timestamps[i]);

        // Record counters restart with the logger program, so they do not
        // decide whether two rows for one timestamp agree
        let compared: Vec<usize> = block
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !FileFormat::is_bookkeeping(&c.name))
            .map(|(j, _)| j)
            .collect();

        let mut kept: Vec<usize> = Vec::with_capacity(order.len());
        for i in order {
            match kept.last() {
                Some(&last) if timestamps[last] == timestamps[i] => {
                    if self.same_values(&block.rows[last], &block.rows[i], &compared) {
                        report.duplicate_records += 1;
                    } else {
                        report.conflicting_duplicates.push(timestamps[i]);
                    }
                }
                _ => kept.push(i),
            }
        }
        report.output_rows = kept.len();

        if !report.conflicting_duplicates.is_empty() {
            let first = report.conflicting_duplicates[0];
            if self.config.reject_conflicting_duplicates {
                return Err(ConditionerError::alignment(
                    "timestamp repeated with different values",
                    first,
                ));
            }
            warn!(
                "{} repeated timestamps carried different values; kept first occurrence (first at {})",
                report.conflicting_duplicates.len(),
                first
            );
        }
        if report.duplicate_records > 0 {
            debug!("Dropped {} duplicate records", report.duplicate_records);
        }

        let index: Vec<NaiveDateTime> = kept.iter().map(|&i| timestamps[i]).collect();
        let columns = block
            .columns
            .into_iter()
            .enumerate()
            .map(|(j, header)| {
                let fields: Vec<Option<&str>> = kept
                    .iter()
                    .map(|&i| {
                        block.rows[i]
                            .values
                            .get(j)
                            .map(String::as_str)
                            .filter(|v| !self.config.is_missing(v))
                    })
                    .collect();
                DataColumn {
                    header,
                    data: self.coerce(&fields),
                }
            })
            .collect();

        let dataset = ConditionedDataset::new(step, info, index, columns)?;
        Ok((dataset, report))
    }

    /// Numeric when every present value parses as a float, text otherwise
    fn coerce(&self, fields: &[Option<&str>]) -> ColumnData {
        let numeric: Option<Vec<Option<f64>>> = fields
            .iter()
            .map(|field| match field {
                Some(v) => v.trim().parse::<f64>().ok().map(Some),
                None => Some(None),
            })
            .collect();

        match numeric {
            Some(values) => ColumnData::Numeric(values),
            None => ColumnData::Text(
                fields
                    .iter()
                    .map(|field| field.map(|v| v.trim().to_string()))
                    .collect(),
            ),
        }
    }

    fn same_values(&self, a: &RawRow, b: &RawRow, compared: &[usize]) -> bool {
        fn present<'a>(config: &ConditionerConfig, value: Option<&'a String>) -> Option<&'a str> {
            value.map(|s| s.trim()).filter(|s| !config.is_missing(s))
        }
        compared.iter().all(|&j| {
            present(&self.config, a.values.get(j)) == present(&self.config, b.values.get(j))
        })
    }
}
