/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::reducer::RunResult;
use anyhow::Context;
use colored::*;
use itertools::Itertools;
use serde::Serialize;
use std::{fs::File, io::BufWriter, path::Path};
use term_table::{row::Row, table_cell::TableCell, Table, TableStyle};

/// Aggregate over every repetition of one factor combination. Means skip unavailable metrics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CombinationSummary {
    pub values: Vec<(String, String)>,
    pub runs: usize,
    pub failed: usize,
    pub execution_time_s: Option<f64>,
    pub cpu_utilization_mean: Option<f64>,
    pub cpu_frequency_mean_mhz: Option<f64>,
    pub energy_j: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ExperimentSummary<'a> {
    pub experiment: &'a str,
    pub seed: u64,
    pub runs: usize,
    pub failed: usize,
    pub combinations: Vec<CombinationSummary>,
    pub results: &'a [RunResult],
}
impl<'a> ExperimentSummary<'a> {
    pub fn new(experiment: &'a str, seed: u64, results: &'a [RunResult]) -> Self {
        Self {
            experiment,
            seed,
            runs: results.len(),
            failed: results.iter().filter(|r| r.is_failed()).count(),
            combinations: summarize(results),
            results,
        }
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).context(format!("Unable to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn print(&self) {
        println!("\n{}", " Summary ".reversed().green());
        println!(
            "{} runs, {}",
            self.runs,
            match self.failed {
                0 => "none failed".green(),
                n => format!("{n} failed").red(),
            }
        );

        if self.combinations.is_empty() {
            return;
        }

        let mut header = self
            .combinations
            .first()
            .map(|c| {
                c.values
                    .iter()
                    .map(|(name, _)| TableCell::new(name.bold()))
                    .collect_vec()
            })
            .unwrap_or_default();
        header.extend([
            TableCell::new("Runs".bold()),
            TableCell::new("Failed".bold()),
            TableCell::new("Duration (s)".bold()),
            TableCell::new("CPU util".bold()),
            TableCell::new("Freq (MHz)".bold()),
            TableCell::new("Energy (J)".bold()),
        ]);

        let mut rows = vec![Row::new(header)];
        for combination in self.combinations.iter() {
            let mut cells = combination
                .values
                .iter()
                .map(|(_, value)| TableCell::new(value.green()))
                .collect_vec();
            cells.extend([
                TableCell::new(combination.runs),
                TableCell::new(match combination.failed {
                    0 => "0".normal(),
                    n => n.to_string().red(),
                }),
                TableCell::new(format_mean(combination.execution_time_s)),
                TableCell::new(format_mean(combination.cpu_utilization_mean)),
                TableCell::new(format_mean(combination.cpu_frequency_mean_mhz)),
                TableCell::new(format_mean(combination.energy_j)),
            ]);
            rows.push(Row::new(cells));
        }

        let table = Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build();
        println!("{}", table.render());
    }
}

fn format_mean(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.3}"))
        .unwrap_or("--".to_string())
}

fn mean(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let values = values.flatten().collect_vec();
    match values.len() {
        0 => None,
        n => Some(values.iter().sum::<f64>() / n as f64),
    }
}

/// Groups results by factor values, ordered by those values.
pub fn summarize(results: &[RunResult]) -> Vec<CombinationSummary> {
    results
        .iter()
        .sorted_by(|a, b| a.combination().values().cmp(b.combination().values()))
        .chunk_by(|r| r.combination().values().to_vec())
        .into_iter()
        .map(|(values, group)| {
            let group = group.collect_vec();
            CombinationSummary {
                values,
                runs: group.len(),
                failed: group.iter().filter(|r| r.is_failed()).count(),
                execution_time_s: mean(group.iter().map(|r| r.execution_time_s())),
                cpu_utilization_mean: mean(group.iter().map(|r| r.cpu_utilization_mean())),
                cpu_frequency_mean_mhz: mean(group.iter().map(|r| r.cpu_frequency_mean_mhz())),
                energy_j: mean(group.iter().map(|r| r.energy_j())),
            }
        })
        .collect_vec()
}
