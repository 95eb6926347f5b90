//! Logger Conditioner Library
//!
//! Conditions environmental-logger time series (Campbell TOA5 streams and
//! EddyPro summaries) into contiguous, deduplicated, fixed-step datasets.
//!
//! This library provides tools for:
//! - Parsing logger files by dialect into header and data blocks
//! - Extending master files with newer backup snapshots, after checking the
//!   two share a compatible column and unit schema
//! - Normalising timestamps onto a fixed-step grid with first-seen duplicates kept
//! - Outer-joining several datasets into one wide table, with per-column headers
//! - Editing QC range limits and exclusion windows in site control files
//! - Writing TOA5, EddyPro summary, CSV and Parquet output

pub mod cli;
pub mod concatenation;
pub mod config;
pub mod constants;
pub mod corrections;
pub mod dataset;
pub mod error;
pub mod interval;
pub mod legality;
pub mod merge;
pub mod models;
pub mod normalizer;
pub mod parser;
pub mod writer;

// Re-export commonly used types
pub use concatenation::{ConcatenationEngine, Conditioned, MasterUpdate};
pub use config::{ConditionerConfig, TimeStep};
pub use corrections::{CorrectionInput, CorrectionsEditor, IntervalSet, RangeLimit};
pub use dataset::{ColumnData, ConditionedDataset, DataColumn, Gap, MissingRecords};
pub use error::{ConditionerError, InputKind, Result};
pub use interval::{Interval, merge_intervals};
pub use legality::{LegalityChecker, MergeReport};
pub use merge::MergeAligner;
pub use models::{FileFormat, FileInfo, MergeSpec, RawFile, VariableHeader};
pub use normalizer::{IndexNormalizer, NormalizationReport};
pub use parser::FormatParser;
pub use writer::{OutputFormat, write_dataset};
