//! Wide-table merging of conditioned datasets.
//!
//! Each input contributes the columns its [`MergeSpec`] selects, renamed
//! as it asks. The output index is the union of the input indexes (an
//! outer join). A destination column produced by two inputs is a collision
//! and fails; no source silently overwrites another.

use crate::config::ConditionerConfig;
use crate::dataset::{ConditionedDataset, DataColumn, grid_between};
use crate::error::{ConditionerError, Result};
use crate::models::{FileFormat, MergeSpec};
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Joins per-file datasets along the canonical time axis
#[derive(Debug, Clone)]
pub struct MergeAligner {
    config: ConditionerConfig,
}

impl MergeAligner {
    pub fn new(config: ConditionerConfig) -> Self {
        Self { config }
    }

    pub fn merge(&self, datasets: &[ConditionedDataset], specs: &[MergeSpec]) -> Result<ConditionedDataset> {
        let labels: Vec<String> = (0..datasets.len()).map(|i| format!("input {i}")).collect();
        self.merge_labelled(datasets, specs, &labels)
    }

    /// Merge, naming each input by `labels` in collision errors
    pub fn merge_labelled(
        &self,
        datasets: &[ConditionedDataset],
        specs: &[MergeSpec],
        labels: &[String],
    ) -> Result<ConditionedDataset> {
        if datasets.len() != specs.len() || datasets.len() != labels.len() {
            return Err(ConditionerError::Configuration {
                message: format!(
                    "{} datasets but {} merge specs and {} labels",
                    datasets.len(),
                    specs.len(),
                    labels.len()
                ),
            });
        }

        let step = self.config.step;
        if let Some(other) = datasets.iter().find(|d| d.step() != step) {
            return Err(ConditionerError::Configuration {
                message: format!("cannot merge a {} dataset onto a {step} grid", other.step()),
            });
        }

        // Which input supplied each destination column
        let mut owners: HashMap<String, &str> = HashMap::new();
        let mut selected: Vec<(&ConditionedDataset, Vec<DataColumn>)> = Vec::new();
        for ((dataset, spec), label) in datasets.iter().zip(specs).zip(labels) {
            let columns: Vec<DataColumn> = dataset
                .select(spec)?
                .into_iter()
                .filter(|column| self.keeps(column, spec))
                .collect();

            for column in &columns {
                if let Some(first) = owners.insert(column.name().to_string(), label.as_str()) {
                    return Err(ConditionerError::Collision {
                        column: column.name().to_string(),
                        sources: vec![first.to_string(), label.clone()],
                    });
                }
            }
            debug!("{label}: {} columns selected", columns.len());
            selected.push((dataset, columns));
        }

        let union: BTreeSet<NaiveDateTime> = datasets
            .iter()
            .flat_map(|d| d.index().iter().copied())
            .collect();
        let bounds = union.first().copied().zip(union.last().copied());
        let index: Vec<NaiveDateTime> = match bounds {
            Some((first, last)) if self.config.regularize_merged => {
                grid_between(first, last, step)
            }
            _ => union.into_iter().collect(),
        };

        let mut columns = Vec::new();
        for (dataset, chosen) in selected {
            let source = ConditionedDataset::new(step, None, dataset.index().to_vec(), chosen)?;
            columns.extend(source.reindexed(index.clone()).into_columns());
        }

        info!(
            "Merged {} datasets into {} rows x {} columns",
            datasets.len(),
            index.len(),
            columns.len()
        );
        ConditionedDataset::new(step, None, index, columns)
    }

    /// Bookkeeping and text columns are dropped unless the configuration
    /// keeps them. Columns named explicitly in a selection always stay.
    fn keeps(&self, column: &DataColumn, spec: &MergeSpec) -> bool {
        if !self.config.drop_non_numeric || !matches!(spec, MergeSpec::All) {
            return true;
        }
        column.data.is_numeric() && !FileFormat::is_bookkeeping(column.name())
    }
}
