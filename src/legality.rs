//! Concatenation legality checks.
//!
//! Before a backup's rows are appended to a master the two must agree on
//! dialect, sampling interval, column names and units. The checker never
//! repairs a mismatch; it reports it.

use crate::config::ConditionerConfig;
use crate::error::{ConditionerError, Result};
use crate::interval::Interval;
use crate::models::{FileFormat, TableSchema};
use std::fmt;
use std::path::{Path, PathBuf};

/// What the checker needs to know about one side of a concatenation
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub path: PathBuf,
    pub schema: TableSchema,
    pub coverage: Option<Interval>,
    /// Modal record spacing in minutes
    pub step: Option<u32>,
}

/// A candidate unit that differs from the master's
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDifference {
    pub column: String,
    pub master: String,
    pub candidate: String,
}

/// Outcome of checking one candidate file against its master
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub master: PathBuf,
    pub candidate: PathBuf,
    pub master_format: FileFormat,
    pub candidate_format: FileFormat,
    pub master_coverage: Option<Interval>,
    pub candidate_coverage: Option<Interval>,
    pub master_step: Option<u32>,
    pub candidate_step: Option<u32>,
    /// Columns the master has that the candidate lacks (filled as missing)
    pub master_only: Vec<String>,
    /// Columns the candidate has that the master lacks
    pub candidate_only: Vec<String>,
    /// Units equal only through an alias; the master's spelling is kept
    pub aliased_units: Vec<UnitDifference>,
    pub unit_mismatches: Vec<UnitDifference>,
}

impl MergeReport {
    pub fn format_legal(&self) -> bool {
        self.master_format == self.candidate_format
    }

    /// Whether the candidate carries data past the master's last timestamp
    pub fn dates_legal(&self) -> bool {
        match (self.master_coverage, self.candidate_coverage) {
            (Some(master), Some(candidate)) => candidate.extends_beyond(master.end()),
            (None, Some(_)) => true,
            _ => false,
        }
    }

    /// Sampling intervals match, or one side has too few rows to tell
    pub fn interval_legal(&self) -> bool {
        match (self.master_step, self.candidate_step) {
            (Some(master), Some(candidate)) => master == candidate,
            _ => true,
        }
    }

    pub fn variables_legal(&self) -> bool {
        self.candidate_only.is_empty()
    }

    pub fn units_legal(&self) -> bool {
        self.unit_mismatches.is_empty()
    }

    /// Whether the candidate may be appended. Date legality is not part of
    /// this; a candidate that adds nothing is skipped, not rejected.
    pub fn is_legal(&self) -> bool {
        self.format_legal() && self.interval_legal() && self.variables_legal() && self.units_legal()
    }

    /// Columns responsible for an illegal report
    pub fn offending_columns(&self) -> Vec<String> {
        self.candidate_only
            .iter()
            .cloned()
            .chain(self.unit_mismatches.iter().map(|d| d.column.clone()))
            .collect()
    }

    /// The report, or a `SchemaMismatch` describing why it is illegal
    pub fn into_result(self) -> Result<Self> {
        if self.is_legal() {
            return Ok(self);
        }

        let mut reasons = Vec::new();
        if !self.format_legal() {
            reasons.push(format!(
                "dialect {} differs from master's {}",
                self.candidate_format, self.master_format
            ));
        }
        if !self.interval_legal() {
            reasons.push(format!(
                "sampling interval {:?} min differs from master's {:?} min",
                self.candidate_step, self.master_step
            ));
        }
        if !self.variables_legal() {
            reasons.push("columns not present in master".to_string());
        }
        if !self.units_legal() {
            reasons.push("units differ from master".to_string());
        }

        Err(ConditionerError::SchemaMismatch {
            file: self.candidate.clone(),
            reason: reasons.join("; "),
            columns: self.offending_columns(),
        })
    }
}

fn legality(legal: bool) -> &'static str {
    if legal { "legal" } else { "illegal" }
}

fn span(coverage: Option<Interval>) -> String {
    coverage.map_or_else(|| "no data".to_string(), |c| c.to_string())
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Merge report for {}", self.candidate.display())?;
        writeln!(f, "  master: {}", self.master.display())?;
        writeln!(f, "  format: {}", legality(self.format_legal()))?;
        writeln!(
            f,
            "  dates: {} (master {}, candidate {})",
            legality(self.dates_legal()),
            span(self.master_coverage),
            span(self.candidate_coverage)
        )?;
        writeln!(f, "  interval: {}", legality(self.interval_legal()))?;
        writeln!(f, "  variables: {}", legality(self.variables_legal()))?;
        if !self.master_only.is_empty() {
            writeln!(f, "    master only: {}", self.master_only.join(", "))?;
        }
        if !self.candidate_only.is_empty() {
            writeln!(f, "    candidate only: {}", self.candidate_only.join(", "))?;
        }
        writeln!(f, "  units: {}", legality(self.units_legal()))?;
        for d in &self.aliased_units {
            writeln!(f, "    aliased: {} ({} ~ {})", d.column, d.master, d.candidate)?;
        }
        for d in &self.unit_mismatches {
            writeln!(f, "    mismatch: {} ({} vs {})", d.column, d.master, d.candidate)?;
        }
        Ok(())
    }
}

/// Verifies two data blocks can be concatenated without misaligning columns
#[derive(Debug, Clone)]
pub struct LegalityChecker {
    config: ConditionerConfig,
}

impl LegalityChecker {
    pub fn new(config: ConditionerConfig) -> Self {
        Self { config }
    }

    /// Compare a candidate against its master
    pub fn check(&self, master: &SourceSummary, candidate: &SourceSummary) -> MergeReport {
        let master_cols = &master.schema.columns;
        let candidate_cols = &candidate.schema.columns;

        let master_only = master_cols
            .iter()
            .filter(|m| !candidate_cols.iter().any(|c| c.name == m.name))
            .map(|m| m.name.clone())
            .collect();
        let candidate_only = candidate_cols
            .iter()
            .filter(|c| !master_cols.iter().any(|m| m.name == c.name))
            .map(|c| c.name.clone())
            .collect();

        let mut aliased_units = Vec::new();
        let mut unit_mismatches = Vec::new();
        for column in candidate_cols {
            let Some(master_units) = master.schema.units_of(&column.name) else {
                continue;
            };
            if master_units == column.units {
                continue;
            }
            let difference = UnitDifference {
                column: column.name.clone(),
                master: master_units.to_string(),
                candidate: column.units.clone(),
            };
            if self.config.units_compatible(master_units, &column.units) {
                aliased_units.push(difference);
            } else {
                unit_mismatches.push(difference);
            }
        }

        MergeReport {
            master: master.path.clone(),
            candidate: candidate.path.clone(),
            master_format: master.schema.format,
            candidate_format: candidate.schema.format,
            master_coverage: master.coverage,
            candidate_coverage: candidate.coverage,
            master_step: master.step,
            candidate_step: candidate.step,
            master_only,
            candidate_only,
            aliased_units,
            unit_mismatches,
        }
    }

    /// Check and fail with `SchemaMismatch` when illegal
    pub fn require_legal(&self, master: &SourceSummary, candidate: &SourceSummary) -> Result<MergeReport> {
        self.check(master, candidate).into_result()
    }
}

/// Whether two paths name the same file on disk
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
