//! Output formatting for conditioned datasets.
//!
//! Every write is whole-file and atomic: the output is rendered into a
//! temporary file beside the target and only then renamed over it, so a
//! failed write leaves any existing file untouched.

use crate::constants::{
    EDDYPRO_DATE, EDDYPRO_FILENAME, EDDYPRO_TIME, TIMESTAMP_FORMAT, TOA5_MISSING, TOA5_TAG,
    TOA5_TIMESTAMP, TOA5_TIMESTAMP_UNITS,
};
use crate::dataset::{ColumnData, ConditionedDataset, DataColumn};
use crate::error::Result;
use crate::models::{FileFormat, FileInfo};
use csv::{QuoteStyle, WriterBuilder};
use polars::prelude::{CsvWriter, ParquetCompression, ParquetWriter, SerWriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Missing-value marker written to summary output
const SUMMARY_MISSING: &str = "-9999";

/// Output dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// TOA5 logger file with four header lines
    Toa5,
    /// Tab-separated EddyPro summary
    #[value(name = "eddypro")]
    EddyProSummary,
    /// Plain CSV with a TIMESTAMP column
    Csv,
    /// Snappy-compressed Parquet
    Parquet,
}

impl OutputFormat {
    /// The output dialect that round-trips a given input dialect
    pub fn native(format: FileFormat) -> Self {
        match format {
            FileFormat::Toa5 => OutputFormat::Toa5,
            FileFormat::EddyProSummary => OutputFormat::EddyProSummary,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Toa5 => "dat",
            OutputFormat::EddyProSummary => "txt",
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Toa5 => "TOA5",
            OutputFormat::EddyProSummary => "EddyPro summary",
            OutputFormat::Csv => "CSV",
            OutputFormat::Parquet => "Parquet",
        };
        f.write_str(name)
    }
}

/// Write a dataset in the given dialect
pub fn write_dataset(dataset: &ConditionedDataset, path: &Path, format: OutputFormat) -> Result<()> {
    write_atomic(path, |file| match format {
        OutputFormat::Toa5 => write_toa5(dataset, file),
        OutputFormat::EddyProSummary => write_summary(dataset, file),
        OutputFormat::Csv => {
            let mut frame = dataset.to_dataframe()?;
            CsvWriter::new(file)
                .include_header(true)
                .with_datetime_format(Some(TIMESTAMP_FORMAT.to_string()))
                .finish(&mut frame)?;
            Ok(())
        }
        OutputFormat::Parquet => {
            let mut frame = dataset.to_dataframe()?;
            ParquetWriter::new(file)
                .with_compression(ParquetCompression::Snappy)
                .finish(&mut frame)?;
            Ok(())
        }
    })?;

    info!(
        "Wrote {} rows x {} columns to {} ({})",
        dataset.len(),
        dataset.columns().len(),
        path.display(),
        format
    );
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, render: impl FnOnce(&mut File) -> Result<()>) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    render(temp.as_file_mut())?;
    temp.as_file_mut().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn render_value(column: &DataColumn, row: usize, missing: &str) -> String {
    let value = match &column.data {
        ColumnData::Numeric(values) => values[row].map(|v| v.to_string()),
        ColumnData::Text(values) => values[row].clone(),
    };
    value.unwrap_or_else(|| missing.to_string())
}

fn write_toa5(dataset: &ConditionedDataset, file: &mut File) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::NonNumeric)
        .flexible(true)
        .from_writer(BufWriter::new(file));

    let info = dataset.info().cloned().unwrap_or_else(|| FileInfo {
        format: TOA5_TAG.to_string(),
        ..Default::default()
    });
    writer.write_record(info.to_fields())?;

    let columns = dataset.columns();
    writer.write_record(
        std::iter::once(TOA5_TIMESTAMP).chain(columns.iter().map(|c| c.header.name.as_str())),
    )?;
    writer.write_record(
        std::iter::once(TOA5_TIMESTAMP_UNITS)
            .chain(columns.iter().map(|c| c.header.units.as_str())),
    )?;
    writer.write_record(
        std::iter::once("").chain(columns.iter().map(|c| c.header.sampling.as_str())),
    )?;

    for (row, timestamp) in dataset.index().iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(timestamp.format(TIMESTAMP_FORMAT).to_string());
        record.extend(columns.iter().map(|c| render_value(c, row, TOA5_MISSING)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_summary(dataset: &ConditionedDataset, file: &mut File) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(file));

    // filename leads, then date and time, then the measurements
    let columns = dataset.columns();
    let (leading, rest): (Vec<&DataColumn>, Vec<&DataColumn>) =
        columns.iter().partition(|c| c.header.name == EDDYPRO_FILENAME);

    let mut names: Vec<&str> = leading.iter().map(|c| c.name()).collect();
    names.extend([EDDYPRO_DATE, EDDYPRO_TIME]);
    names.extend(rest.iter().map(|c| c.name()));
    writer.write_record(&names)?;

    if columns.iter().any(|c| !c.header.units.is_empty()) {
        let bracket = |units: &str| format!("[{units}]");
        let mut units: Vec<String> = leading.iter().map(|c| bracket(&c.header.units)).collect();
        units.extend([bracket("yyyy-mm-dd"), bracket("HH:MM")]);
        units.extend(rest.iter().map(|c| bracket(&c.header.units)));
        writer.write_record(&units)?;
    }

    for (row, timestamp) in dataset.index().iter().enumerate() {
        let mut record: Vec<String> = leading
            .iter()
            .map(|c| render_value(c, row, SUMMARY_MISSING))
            .collect();
        record.push(timestamp.format("%Y-%m-%d").to_string());
        record.push(timestamp.format("%H:%M").to_string());
        record.extend(rest.iter().map(|c| render_value(c, row, SUMMARY_MISSING)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
