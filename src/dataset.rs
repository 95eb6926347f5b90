//! Conditioned, time-indexed datasets.
//!
//! A [`ConditionedDataset`] holds a unique, strictly increasing, grid-aligned
//! index plus one column per variable, each carrying the header metadata of
//! the file it came from. Every constructor re-checks those invariants.

use crate::config::TimeStep;
use crate::constants::TOA5_TIMESTAMP;
use crate::error::{ConditionerError, Result};
use crate::interval::Interval;
use crate::models::{FileInfo, MergeSpec, VariableHeader};
use chrono::NaiveDateTime;
use polars::prelude::{Column, DataFrame, DataType, PlSmallStr, TimeUnit};
use std::collections::{BTreeMap, HashSet};

/// Values of one column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnData::Numeric(_))
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match self {
            ColumnData::Numeric(values) => Some(values),
            ColumnData::Text(_) => None,
        }
    }

    /// Number of non-missing values
    pub fn valid_count(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.iter().filter(|v| v.is_some()).count(),
            ColumnData::Text(values) => values.iter().filter(|v| v.is_some()).count(),
        }
    }

    /// Gather rows by position; `None` yields a missing value
    pub(crate) fn take(&self, positions: &[Option<usize>]) -> ColumnData {
        match self {
            ColumnData::Numeric(values) => ColumnData::Numeric(
                positions
                    .iter()
                    .map(|p| p.and_then(|i| values[i]))
                    .collect(),
            ),
            ColumnData::Text(values) => ColumnData::Text(
                positions
                    .iter()
                    .map(|p| p.and_then(|i| values[i].clone()))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    pub header: VariableHeader,
    pub data: ColumnData,
}

impl DataColumn {
    pub fn name(&self) -> &str {
        &self.header.name
    }
}

/// Share of the grid with no record at all
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissingRecords {
    pub n_missing: usize,
    pub pct_missing: f64,
}

/// A run of absent grid slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub n_records: usize,
    pub last_preceding: NaiveDateTime,
    pub first_succeeding: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedDataset {
    step: TimeStep,
    info: Option<FileInfo>,
    index: Vec<NaiveDateTime>,
    columns: Vec<DataColumn>,
}

impl ConditionedDataset {
    /// Build a dataset, checking index order, grid alignment, column lengths
    /// and column-name uniqueness.
    pub fn new(
        step: TimeStep,
        info: Option<FileInfo>,
        index: Vec<NaiveDateTime>,
        columns: Vec<DataColumn>,
    ) -> Result<Self> {
        if let Some(off_grid) = index.iter().find(|ts| !step.is_aligned(**ts)) {
            return Err(ConditionerError::alignment(
                format!("timestamp not on the {step} grid"),
                off_grid,
            ));
        }
        if let Some(pair) = index.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(ConditionerError::alignment(
                "index is not strictly increasing",
                pair[1],
            ));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.data.len() != index.len() {
                return Err(ConditionerError::alignment(
                    format!(
                        "column length {} differs from index length {}",
                        column.data.len(),
                        index.len()
                    ),
                    column.name(),
                ));
            }
            if !seen.insert(column.name()) {
                return Err(ConditionerError::Collision {
                    column: column.name().to_string(),
                    sources: Vec::new(),
                });
            }
        }

        Ok(Self {
            step,
            info,
            index,
            columns,
        })
    }

    pub fn step(&self) -> TimeStep {
        self.step
    }

    pub fn info(&self) -> Option<&FileInfo> {
        self.info.as_ref()
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<DataColumn> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&DataColumn> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(DataColumn::name).collect()
    }

    pub fn header(&self, name: &str) -> Option<&VariableHeader> {
        self.column(name).map(|c| &c.header)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    /// Coverage window of the dataset
    pub fn date_span(&self) -> Option<Interval> {
        match (self.first_timestamp(), self.last_timestamp()) {
            (Some(first), Some(last)) => Interval::new(first, last).ok(),
            _ => None,
        }
    }

    /// Grid slots between the first and last timestamp, inclusive
    pub fn grid_slots(&self) -> usize {
        match (self.first_timestamp(), self.last_timestamp()) {
            (Some(first), Some(last)) => self.step.slots_between(first, last),
            _ => 0,
        }
    }

    /// Grid slots with no record at all
    pub fn missing_records(&self) -> MissingRecords {
        let slots = self.grid_slots();
        let n_missing = slots - self.len();
        let pct_missing = if slots == 0 {
            0.0
        } else {
            (n_missing as f64 / slots as f64 * 10_000.0).round() / 100.0
        };
        MissingRecords {
            n_missing,
            pct_missing,
        }
    }

    /// Grid slots in the dataset's span with no valid value for `column`
    pub fn missing_count(&self, column: &str) -> Result<usize> {
        let column = self
            .column(column)
            .ok_or_else(|| ConditionerError::UnknownColumn {
                column: column.to_string(),
            })?;
        Ok(self.grid_slots() - column.data.valid_count())
    }

    /// Gaps between consecutive records
    pub fn gap_bounds(&self) -> Vec<Gap> {
        let step = self.step.duration();
        self.index
            .windows(2)
            .filter(|pair| pair[1] - pair[0] > step)
            .map(|pair| Gap {
                n_records: self.step.slots_between(pair[0], pair[1]) - 2,
                last_preceding: pair[0],
                first_succeeding: pair[1],
            })
            .collect()
    }

    /// Gap size (missing records) -> number of gaps of that size
    pub fn gap_distribution(&self) -> BTreeMap<usize, usize> {
        let mut distribution = BTreeMap::new();
        for gap in self.gap_bounds() {
            *distribution.entry(gap.n_records).or_insert(0) += 1;
        }
        distribution
    }

    /// Reindex onto the full grid between the first and last timestamp
    pub fn regularize(&self) -> ConditionedDataset {
        let Some(span) = self.date_span() else {
            return self.clone();
        };
        let grid = grid_between(span.start(), span.end(), self.step);
        self.reindexed(grid)
    }

    /// Reindex onto `index`, which must be sorted and on this dataset's grid
    pub(crate) fn reindexed(&self, index: Vec<NaiveDateTime>) -> ConditionedDataset {
        let positions: Vec<Option<usize>> = index
            .iter()
            .map(|ts| self.index.binary_search(ts).ok())
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|c| DataColumn {
                header: c.header.clone(),
                data: c.data.take(&positions),
            })
            .collect();
        ConditionedDataset {
            step: self.step,
            info: self.info.clone(),
            index,
            columns,
        }
    }

    /// Columns chosen by a merge spec, renamed, with their headers
    pub fn select(&self, spec: &MergeSpec) -> Result<Vec<DataColumn>> {
        let pairs = spec.resolve(&self.column_names())?;
        Ok(pairs
            .into_iter()
            .filter_map(|(source, destination)| {
                self.column(&source).map(|c| DataColumn {
                    header: VariableHeader {
                        name: destination,
                        ..c.header.clone()
                    },
                    data: c.data.clone(),
                })
            })
            .collect())
    }

    /// Set values of a numeric column to missing where `mask` holds.
    /// Returns how many values were masked.
    pub fn mask_values(
        &mut self,
        column: &str,
        mask: impl Fn(NaiveDateTime, f64) -> bool,
    ) -> Result<usize> {
        let index = &self.index;
        let target = self
            .columns
            .iter_mut()
            .find(|c| c.header.name == column)
            .ok_or_else(|| ConditionerError::UnknownColumn {
                column: column.to_string(),
            })?;

        let ColumnData::Numeric(values) = &mut target.data else {
            return Err(ConditionerError::Configuration {
                message: format!("column '{column}' is not numeric"),
            });
        };

        let mut masked = 0;
        for (ts, value) in index.iter().zip(values.iter_mut()) {
            if value.is_some_and(|v| mask(*ts, v)) {
                *value = None;
                masked += 1;
            }
        }
        Ok(masked)
    }

    /// Apply a unit conversion to a numeric column and record its new units.
    /// Missing values stay missing.
    pub fn convert_column(
        &mut self,
        column: &str,
        convert: impl Fn(f64) -> f64,
        units: impl Into<String>,
    ) -> Result<()> {
        let target = self
            .columns
            .iter_mut()
            .find(|c| c.header.name == column)
            .ok_or_else(|| ConditionerError::UnknownColumn {
                column: column.to_string(),
            })?;

        let ColumnData::Numeric(values) = &mut target.data else {
            return Err(ConditionerError::Configuration {
                message: format!("cannot convert units of text column '{column}'"),
            });
        };
        for value in values.iter_mut().flatten() {
            *value = convert(*value);
        }
        target.header.units = units.into();
        Ok(())
    }

    /// Convert to a polars frame with a leading TIMESTAMP column
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut frame_columns = Vec::with_capacity(self.columns.len() + 1);
        let millis: Vec<i64> = self
            .index
            .iter()
            .map(|ts| ts.and_utc().timestamp_millis())
            .collect();
        frame_columns.push(
            Column::new(TOA5_TIMESTAMP.into(), millis)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        );

        for column in &self.columns {
            let name: PlSmallStr = column.name().into();
            frame_columns.push(match &column.data {
                ColumnData::Numeric(values) => Column::new(name, values.as_slice()),
                ColumnData::Text(values) => Column::new(name, values.as_slice()),
            });
        }

        Ok(DataFrame::new(frame_columns)?)
    }
}

/// Every grid slot in `[first, last]`
pub fn grid_between(first: NaiveDateTime, last: NaiveDateTime, step: TimeStep) -> Vec<NaiveDateTime> {
    let mut grid = Vec::with_capacity(step.slots_between(first, last));
    let mut current = first;
    while current <= last {
        grid.push(current);
        current += step.duration();
    }
    grid
}
