//! Master/backup concatenation.
//!
//! A master file is extended by the backup snapshots whose coverage reaches
//! past its last timestamp. Backups are taken in ascending order of coverage
//! end, so the result does not depend on directory listing order. Each one
//! that adds data must pass the legality check before its rows are appended,
//! and the combined block is normalised once at the end.

use crate::config::ConditionerConfig;
use crate::dataset::ConditionedDataset;
use crate::error::{ConditionerError, InputKind, Result};
use crate::interval::Interval;
use crate::legality::{LegalityChecker, MergeReport, SourceSummary, same_file};
use crate::models::{FileFormat, RawFile};
use crate::normalizer::{IndexNormalizer, NormalizationReport, infer_step, parse_timestamps};
use crate::parser::FormatParser;
use crate::writer::{OutputFormat, write_atomic, write_dataset};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of conditioning a master with its backups
#[derive(Debug, Clone)]
pub struct Conditioned {
    pub master: PathBuf,
    pub dataset: ConditionedDataset,
    pub format: FileFormat,
    pub normalization: NormalizationReport,
    /// One report per backup that extended the master
    pub merge_reports: Vec<MergeReport>,
    /// Backups skipped because they end at or before the master's last timestamp
    pub skipped: Vec<PathBuf>,
}

impl Conditioned {
    pub fn appended(&self) -> impl Iterator<Item = &Path> {
        self.merge_reports.iter().map(|r| r.candidate.as_path())
    }

    pub fn has_new_data(&self) -> bool {
        !self.merge_reports.is_empty()
    }

    /// Write the concatenation report (run summary plus one legality report
    /// per appended backup) to `path`
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let text = self.to_string();
        write_atomic(path, |file| {
            file.write_all(text.as_bytes())?;
            Ok(())
        })?;
        info!("Wrote concatenation report {}", path.display());
        Ok(())
    }
}

impl fmt::Display for Conditioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Concatenation report for {}", self.master.display())?;
        writeln!(f, "  format: {}", self.format)?;
        writeln!(f, "  rows: {}", self.dataset.len())?;
        writeln!(f, "  backups appended: {}", self.merge_reports.len())?;
        writeln!(f, "  backups skipped: {}", self.skipped.len())?;
        for path in &self.skipped {
            writeln!(f, "    {}", path.display())?;
        }
        writeln!(
            f,
            "  duplicate records dropped: {}",
            self.normalization.duplicate_records
        )?;
        writeln!(
            f,
            "  conflicting duplicate timestamps: {}",
            self.normalization.conflicting_duplicates.len()
        )?;
        for report in &self.merge_reports {
            write!(f, "\n{report}")?;
        }
        Ok(())
    }
}

/// What `update_master` did to the master file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterUpdate {
    /// Rows from backups were appended to an existing master
    Appended { backups: usize, rows_added: usize },
    /// No master existed; one was created from the backups
    Created { seed: PathBuf, rows: usize },
    /// No backup extended the master; the file was left untouched
    NoNewData,
}

struct ParsedSource {
    raw: RawFile,
    summary: SourceSummary,
}

/// Ascending coverage end, ties broken by path
fn sort_by_coverage_end(sources: &mut [ParsedSource]) {
    sources.sort_by(|a, b| {
        let end = |s: &ParsedSource| s.summary.coverage.map(|span| span.end());
        end(a).cmp(&end(b)).then_with(|| a.summary.path.cmp(&b.summary.path))
    });
}

/// Produces one conditioned dataset from a master and its backups
#[derive(Debug, Clone)]
pub struct ConcatenationEngine {
    config: ConditionerConfig,
    parser: FormatParser,
    checker: LegalityChecker,
    normalizer: IndexNormalizer,
}

impl ConcatenationEngine {
    pub fn new(config: ConditionerConfig) -> Self {
        Self {
            parser: FormatParser::new(),
            checker: LegalityChecker::new(config.clone()),
            normalizer: IndexNormalizer::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    /// Condition a master file, extending it with any backups that add data
    pub fn condition(&self, master: &Path, backups: &[PathBuf]) -> Result<ConditionedDataset> {
        self.condition_detailed(master, backups)
            .map(|conditioned| conditioned.dataset)
    }

    pub fn condition_detailed(&self, master: &Path, backups: &[PathBuf]) -> Result<Conditioned> {
        let master_source = self.load(master, InputKind::Master)?;
        let format = master_source.raw.format;
        let info = master_source.raw.info.clone();

        if backups.is_empty() {
            let (dataset, normalization) = self
                .normalizer
                .normalize_with_report(master_source.raw.into_block(), info)?;
            return Ok(Conditioned {
                master: master.to_path_buf(),
                dataset,
                format,
                normalization,
                merge_reports: Vec::new(),
                skipped: Vec::new(),
            });
        }

        let mut candidates = Vec::with_capacity(backups.len());
        for backup in backups {
            if same_file(master, backup) {
                return Err(ConditionerError::Configuration {
                    message: format!("backup {} is the master file itself", backup.display()),
                });
            }
            candidates.push(self.load(backup, InputKind::Backup)?);
        }
        sort_by_coverage_end(&mut candidates);

        let master_summary = master_source.summary.clone();
        let mut trailing_edge = master_summary.coverage.map(|span| span.end());
        let mut block = master_source.raw.into_block();
        let mut merge_reports = Vec::new();
        let mut skipped = Vec::new();

        for candidate in candidates {
            let extends = match (candidate.summary.coverage, trailing_edge) {
                (Some(span), Some(edge)) => span.extends_beyond(edge),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !extends {
                debug!(
                    "Skipping {}: no data past the master's last timestamp",
                    candidate.summary.path.display()
                );
                skipped.push(candidate.summary.path);
                continue;
            }

            let report = self.checker.require_legal(&master_summary, &candidate.summary)?;
            debug!("{report}");

            info!(
                "Appending {} rows from {}",
                candidate.raw.rows.len(),
                candidate.summary.path.display()
            );
            trailing_edge = candidate.summary.coverage.map(|span| span.end());
            block.append(candidate.raw.into_block())?;
            merge_reports.push(report);
        }

        let (dataset, normalization) = self.normalizer.normalize_with_report(block, info)?;
        Ok(Conditioned {
            master: master.to_path_buf(),
            dataset,
            format,
            normalization,
            merge_reports,
            skipped,
        })
    }

    /// Backups next to the master matching the configured pattern, sorted by path
    pub fn discover_backups(&self, master: &Path) -> Result<Vec<PathBuf>> {
        let stem = master
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = master
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let pattern = dir
            .join(self.config.backup_pattern.replace("{stem}", &glob::Pattern::escape(&stem)))
            .to_string_lossy()
            .into_owned();

        let entries = glob::glob(&pattern).map_err(|e| ConditionerError::Configuration {
            message: format!("invalid backup pattern '{pattern}': {e}"),
        })?;

        let mut backups = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() && !same_file(&path, master) => backups.push(path),
                Ok(_) => {}
                Err(e) => warn!("Unreadable backup candidate: {}", e),
            }
        }
        backups.sort();
        debug!("Found {} backups for {}", backups.len(), master.display());
        Ok(backups)
    }

    /// Append new backup data to the master file in place, creating the
    /// master from the backups when it does not exist yet.
    pub fn update_master(&self, master: &Path, backups: &[PathBuf]) -> Result<MasterUpdate> {
        self.update_master_detailed(master, backups)
            .map(|(update, _)| update)
    }

    /// As [`update_master`](Self::update_master), also returning the
    /// conditioning run behind the update for reporting
    pub fn update_master_detailed(
        &self,
        master: &Path,
        backups: &[PathBuf],
    ) -> Result<(MasterUpdate, Conditioned)> {
        match self.condition_detailed(master, backups) {
            Ok(conditioned) => {
                if !conditioned.has_new_data() {
                    info!("No new data for {}", master.display());
                    return Ok((MasterUpdate::NoNewData, conditioned));
                }
                let rows_added = conditioned
                    .normalization
                    .output_rows
                    .saturating_sub(self.master_rows(master)?);
                write_dataset(
                    &conditioned.dataset,
                    master,
                    OutputFormat::native(conditioned.format),
                )?;
                let update = MasterUpdate::Appended {
                    backups: conditioned.merge_reports.len(),
                    rows_added,
                };
                Ok((update, conditioned))
            }
            Err(e) if e.is_missing_master() => self.create_master(master, backups),
            Err(e) => Err(e),
        }
    }

    fn create_master(&self, master: &Path, backups: &[PathBuf]) -> Result<(MasterUpdate, Conditioned)> {
        let mut sources = Vec::with_capacity(backups.len());
        for backup in backups {
            sources.push(self.load(backup, InputKind::Backup)?);
        }
        sort_by_coverage_end(&mut sources);

        // The earliest-ending backup seeds the master; later ones extend it
        let Some(seed) = sources.first() else {
            return Err(ConditionerError::MissingInput {
                kind: InputKind::Master,
                path: master.to_path_buf(),
            });
        };
        let seed = seed.summary.path.clone();
        warn!(
            "Master {} not found; creating it from {}",
            master.display(),
            seed.display()
        );

        let rest: Vec<PathBuf> = sources
            .iter()
            .skip(1)
            .map(|s| s.summary.path.clone())
            .collect();
        let conditioned = self.condition_detailed(&seed, &rest)?;
        write_dataset(
            &conditioned.dataset,
            master,
            OutputFormat::native(conditioned.format),
        )?;
        let update = MasterUpdate::Created {
            seed,
            rows: conditioned.dataset.len(),
        };
        Ok((update, conditioned))
    }

    fn master_rows(&self, master: &Path) -> Result<usize> {
        Ok(self.condition(master, &[])?.len())
    }

    fn load(&self, path: &Path, kind: InputKind) -> Result<ParsedSource> {
        let raw = self.parser.parse_input(path, kind)?;
        let mut timestamps = parse_timestamps(&raw.rows)?;
        timestamps.sort_unstable();
        timestamps.dedup();

        let coverage = match (timestamps.first(), timestamps.last()) {
            (Some(&first), Some(&last)) => Some(Interval::new(first, last)?),
            _ => None,
        };
        let summary = SourceSummary {
            path: path.to_path_buf(),
            schema: raw.schema(),
            coverage,
            step: infer_step(&timestamps),
        };
        Ok(ParsedSource { raw, summary })
    }
}
