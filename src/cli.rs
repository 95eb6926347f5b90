//! Command-line interface components.

use crate::concatenation::{ConcatenationEngine, MasterUpdate};
use crate::config::{ConditionerConfig, TimeStep};
use crate::corrections::{CorrectionInput, CorrectionsEditor};
use crate::dataset::ConditionedDataset;
use crate::error::ConditionerError;
use crate::merge::MergeAligner;
use crate::models::MergeSpec;
use crate::writer::{OutputFormat, write_dataset};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, warn};

#[derive(Parser, Debug)]
#[command(name = "logger_conditioner")]
#[command(about = "Condition, concatenate and merge environmental logger time series")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Grid step in minutes
    #[arg(long, global = true, default_value_t = 30)]
    pub step: u32,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Condition master files, extending each with its backups
    Condition {
        /// Master files to condition
        #[arg(required = true, value_name = "MASTER")]
        masters: Vec<PathBuf>,

        /// Backup files (applies to a single master)
        #[arg(short, long = "backup", value_name = "FILE")]
        backups: Vec<PathBuf>,

        /// Find backups next to each master using the backup pattern
        #[arg(long)]
        discover_backups: bool,

        /// Backup pattern; {stem} is replaced by the master's file stem
        #[arg(long)]
        backup_pattern: Option<String>,

        /// Output file (single master) or directory (several masters)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Parquet)]
        format: OutputFormat,

        /// Concatenation report file (single master) or directory (several masters)
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Append backup data to a master file, creating it if missing
    UpdateMaster {
        master: PathBuf,

        #[arg(short, long = "backup", value_name = "FILE")]
        backups: Vec<PathBuf>,

        /// Find backups next to the master using the backup pattern
        #[arg(long)]
        discover_backups: bool,

        /// Write the concatenation report to this file
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Merge conditioned files into one wide table
    Merge {
        /// Input as FILE or FILE:SPEC, where SPEC is `a,b` or `a=x,b=y`
        #[arg(short, long = "input", required = true, value_name = "FILE[:SPEC]")]
        inputs: Vec<MergeInput>,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Parquet)]
        format: OutputFormat,

        /// Keep text and bookkeeping columns
        #[arg(long)]
        keep_non_numeric: bool,
    },

    /// Apply a corrections document to a control file, writing a new version
    Correct {
        control_file: PathBuf,
        corrections: PathBuf,

        /// Output path (defaults to <stem>_v2.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report coverage and gaps of a logger file
    Report { file: PathBuf },
}

/// One `--input` argument of the merge command
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub path: PathBuf,
    pub spec: MergeSpec,
}

impl FromStr for MergeInput {
    type Err = ConditionerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Split on the last ':' that is followed by a spec, not a path separator
        match s.rsplit_once(':') {
            Some((path, spec)) if !path.is_empty() && !spec.contains(['/', '\\']) => Ok(Self {
                path: PathBuf::from(path),
                spec: spec.parse()?,
            }),
            _ => Ok(Self {
                path: PathBuf::from(s),
                spec: MergeSpec::All,
            }),
        }
    }
}

impl Args {
    pub fn config(&self) -> Result<ConditionerConfig> {
        let mut config = ConditionerConfig::default().with_step(TimeStep::new(self.step)?);
        match &self.command {
            Command::Condition {
                backup_pattern: Some(pattern),
                ..
            } => config = config.with_backup_pattern(pattern.clone()),
            Command::Merge {
                keep_non_numeric: true,
                ..
            } => config = config.keeping_non_numeric(),
            _ => {}
        }
        config.validate()?;
        Ok(config)
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

/// Run the selected command
pub fn run(args: Args) -> Result<()> {
    let config = args.config()?;
    match args.command {
        Command::Condition {
            masters,
            backups,
            discover_backups,
            output,
            format,
            report,
            ..
        } => run_condition(
            config,
            &masters,
            &backups,
            discover_backups,
            Outputs { output, format, report },
        ),
        Command::UpdateMaster {
            master,
            backups,
            discover_backups,
            report,
        } => run_update_master(config, &master, backups, discover_backups, report.as_deref()),
        Command::Merge {
            inputs,
            output,
            format,
            ..
        } => run_merge(config, &inputs, &output, format),
        Command::Correct {
            control_file,
            corrections,
            output,
        } => run_correct(config, &control_file, &corrections, output),
        Command::Report { file } => run_report(config, &file),
    }
}

fn output_path(master: &Path, output: Option<&Path>, format: OutputFormat, batch: bool) -> PathBuf {
    let file_name = master
        .file_stem()
        .map(|s| format!("{}.{}", s.to_string_lossy(), format.extension()))
        .unwrap_or_else(|| format!("conditioned.{}", format.extension()));
    match output {
        Some(dir) if batch => dir.join(file_name),
        Some(path) => path.to_path_buf(),
        None => master.with_file_name(format!("conditioned_{file_name}")),
    }
}

/// Where `condition` puts its results
struct Outputs {
    output: Option<PathBuf>,
    format: OutputFormat,
    report: Option<PathBuf>,
}

/// `--report` names a file for one master and a directory for a batch
fn report_path(master: &Path, report: &Path, batch: bool) -> PathBuf {
    if !batch {
        return report.to_path_buf();
    }
    let stem = master
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conditioned".to_string());
    report.join(format!("{stem}_report.txt"))
}

fn run_condition(
    config: ConditionerConfig,
    masters: &[PathBuf],
    backups: &[PathBuf],
    discover: bool,
    outputs: Outputs,
) -> Result<()> {
    let Outputs {
        output,
        format,
        report,
    } = outputs;
    let batch = masters.len() > 1;
    if batch && !backups.is_empty() {
        anyhow::bail!("--backup applies to a single master; use --discover-backups for batches");
    }
    if batch {
        for dir in [&output, &report].into_iter().flatten() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    let engine = ConcatenationEngine::new(config);
    let progress = ProgressBar::new(masters.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    if !batch {
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    let mut failed = 0;
    for master in masters {
        progress.set_message(master.display().to_string());
        let result = (|| -> Result<()> {
            let backups = if discover {
                engine.discover_backups(master)?
            } else {
                backups.to_vec()
            };
            let conditioned = engine.condition_detailed(master, &backups)?;
            let target = output_path(master, output.as_deref(), format, batch);
            write_dataset(&conditioned.dataset, &target, format)?;
            if let Some(report) = &report {
                conditioned.write_report(&report_path(master, report, batch))?;
            }

            progress.suspend(|| {
                println!(
                    "{} {} -> {}",
                    "Conditioned".bright_green().bold(),
                    master.display(),
                    target.display()
                );
                println!(
                    "  {} {}",
                    "Rows:".bright_cyan(),
                    conditioned.dataset.len().to_string().bright_white()
                );
                for report in &conditioned.merge_reports {
                    println!("  {} {}", "Appended:".bright_cyan(), report.candidate.display());
                }
                if !conditioned.skipped.is_empty() {
                    println!(
                        "  {} {}",
                        "Skipped backups:".bright_cyan(),
                        conditioned.skipped.len().to_string().bright_white()
                    );
                }
                if !conditioned.normalization.conflicting_duplicates.is_empty() {
                    println!(
                        "  {} {}",
                        "Conflicting duplicates:".bright_yellow(),
                        conditioned.normalization.conflicting_duplicates.len()
                    );
                }
            });
            Ok(())
        })();

        // one failed master does not stop the batch
        if let Err(e) = result {
            failed += 1;
            error!("Failed to condition {}: {:#}", master.display(), e);
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    if failed > 0 {
        println!(
            "{} {}",
            "Masters failed:".bright_red(),
            failed.to_string().bright_red().bold()
        );
        if failed == masters.len() {
            anyhow::bail!("all {failed} masters failed");
        }
    }
    Ok(())
}

fn run_update_master(
    config: ConditionerConfig,
    master: &Path,
    backups: Vec<PathBuf>,
    discover: bool,
    report: Option<&Path>,
) -> Result<()> {
    let engine = ConcatenationEngine::new(config);
    let backups = if discover {
        engine.discover_backups(master)?
    } else {
        backups
    };

    let (update, conditioned) = engine.update_master_detailed(master, &backups)?;
    if let Some(report) = report {
        conditioned.write_report(report)?;
    }

    match update {
        MasterUpdate::Appended { backups, rows_added } => println!(
            "{} {} rows from {} backups to {}",
            "Appended".bright_green().bold(),
            rows_added.to_string().bright_white(),
            backups,
            master.display()
        ),
        MasterUpdate::Created { seed, rows } => println!(
            "{} {} from {} ({} rows)",
            "Created".bright_green().bold(),
            master.display(),
            seed.display(),
            rows
        ),
        MasterUpdate::NoNewData => println!(
            "{} for {}",
            "No new data".bright_yellow(),
            master.display()
        ),
    }
    Ok(())
}

fn run_merge(
    config: ConditionerConfig,
    inputs: &[MergeInput],
    output: &Path,
    format: OutputFormat,
) -> Result<()> {
    let engine = ConcatenationEngine::new(config.clone());
    let mut datasets = Vec::with_capacity(inputs.len());
    let mut specs = Vec::with_capacity(inputs.len());
    let mut labels = Vec::with_capacity(inputs.len());
    for input in inputs {
        let dataset = engine
            .condition(&input.path, &[])
            .with_context(|| format!("Failed to condition {}", input.path.display()))?;
        datasets.push(dataset);
        specs.push(input.spec.clone());
        labels.push(input.path.display().to_string());
    }

    let merged = MergeAligner::new(config).merge_labelled(&datasets, &specs, &labels)?;
    write_dataset(&merged, output, format)?;

    println!("{}", "Merge Summary".bright_green().bold());
    println!("  {} {}", "Inputs:".bright_cyan(), inputs.len().to_string().bright_white());
    println!("  {} {}", "Rows:".bright_cyan(), merged.len().to_string().bright_white());
    println!(
        "  {} {}",
        "Columns:".bright_cyan(),
        merged.columns().len().to_string().bright_white()
    );
    println!("  {} {}", "Output:".bright_cyan(), output.display());
    Ok(())
}

fn run_correct(
    config: ConditionerConfig,
    control_file: &Path,
    corrections: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let input = CorrectionInput::from_path(corrections)?;
    let editor = CorrectionsEditor::load(control_file, config.step)?.apply_corrections(&input)?;
    let output = output.unwrap_or_else(|| editor.default_output_path());
    editor.write(&output)?;

    println!(
        "{} {} variables for {} -> {}",
        "Corrected".bright_green().bold(),
        input.variables.len(),
        editor.site(),
        output.display()
    );
    Ok(())
}

fn run_report(config: ConditionerConfig, file: &Path) -> Result<()> {
    let dataset = ConcatenationEngine::new(config).condition(file, &[])?;
    print_report(file, &dataset);
    Ok(())
}

fn print_report(file: &Path, dataset: &ConditionedDataset) {
    println!("{} {}", "Report for".bright_green().bold(), file.display());
    match dataset.date_span() {
        Some(span) => println!("  {} {}", "Span:".bright_cyan(), span),
        None => {
            warn!("{} has no data rows", file.display());
            println!("  {} none", "Span:".bright_cyan());
            return;
        }
    }

    let missing = dataset.missing_records();
    println!(
        "  {} {} of {} ({:.2}%)",
        "Missing records:".bright_cyan(),
        missing.n_missing.to_string().bright_white(),
        dataset.grid_slots(),
        missing.pct_missing
    );

    let distribution = dataset.gap_distribution();
    if !distribution.is_empty() {
        println!("  {}", "Gap distribution (records: count):".bright_cyan());
        for (size, count) in &distribution {
            println!("    {size}: {count}");
        }
        if let Some(largest) = dataset.gap_bounds().iter().max_by_key(|g| g.n_records) {
            println!(
                "  {} {} records after {}",
                "Largest gap:".bright_cyan(),
                largest.n_records,
                largest.last_preceding
            );
        }
    }

    println!("  {}", "Missing values by column:".bright_cyan());
    for column in dataset.columns() {
        if let Ok(count) = dataset.missing_count(column.name()) {
            println!("    {}: {}", column.name(), count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_input_parsing() {
        let plain: MergeInput = "data/met.dat".parse().unwrap();
        assert_eq!(plain.path, PathBuf::from("data/met.dat"));
        assert_eq!(plain.spec, MergeSpec::All);

        let renamed: MergeInput = "data/met.dat:Ta_Avg=Ta".parse().unwrap();
        assert_eq!(renamed.path, PathBuf::from("data/met.dat"));
        assert_eq!(
            renamed.spec,
            MergeSpec::Rename(vec![("Ta_Avg".to_string(), "Ta".to_string())])
        );
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from([
            "logger_conditioner",
            "merge",
            "-i",
            "a.dat:Ta",
            "-i",
            "b.dat",
            "-o",
            "out.parquet",
            "--step",
            "60",
        ])
        .unwrap();

        assert_eq!(args.step, 60);
        assert!(matches!(args.command, Command::Merge { ref inputs, .. } if inputs.len() == 2));
        assert_eq!(args.config().unwrap().step.minutes(), 60);
    }

    #[test]
    fn test_report_option() {
        let args = Args::try_parse_from([
            "logger_conditioner",
            "update-master",
            "flux.dat",
            "-b",
            "flux_1.backup",
            "--report",
            "flux_report.txt",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::UpdateMaster { report: Some(ref path), .. } if path == Path::new("flux_report.txt")
        ));

        let master = Path::new("/data/flux.dat");
        assert_eq!(
            report_path(master, Path::new("/reports"), true),
            PathBuf::from("/reports/flux_report.txt")
        );
        assert_eq!(
            report_path(master, Path::new("/reports/one.txt"), false),
            PathBuf::from("/reports/one.txt")
        );
    }

    #[test]
    fn test_invalid_step_rejected() {
        let args = Args::try_parse_from(["logger_conditioner", "--step", "7", "report", "x.dat"]).unwrap();
        assert!(args.config().is_err());
    }

    #[test]
    fn test_output_path() {
        let master = Path::new("/data/flux.dat");
        assert_eq!(
            output_path(master, None, OutputFormat::Csv, false),
            PathBuf::from("/data/conditioned_flux.csv")
        );
        assert_eq!(
            output_path(master, Some(Path::new("/out")), OutputFormat::Parquet, true),
            PathBuf::from("/out/flux.parquet")
        );
    }
}
