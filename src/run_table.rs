/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::reducer::RunResult;
use anyhow::Context;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};
use tracing::debug;

const METRIC_COLUMNS: [&str; 6] = [
    "status",
    "execution_time_s",
    "cpu_utilization_mean",
    "cpu_frequency_mean_mhz",
    "energy_j",
    "notes",
];

/// The experiment's results, persisted as csv. Rows are only ever appended and every row is
/// flushed as soon as it is written. The table is owned by whoever appends to it, so there is
/// exactly one writer.
#[derive(Debug)]
pub struct RunTable {
    path: PathBuf,
    factor_names: Vec<String>,
    writer: csv::Writer<File>,
    rows: usize,
}
impl RunTable {
    /// Opens the table at `path` for appending, writing the header if the file is new or empty.
    pub fn open(path: &Path, factor_names: &[String]) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Unable to create directory {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Unable to open run table {}", path.display()))?;
        let is_empty = file.metadata()?.len() == 0;

        let mut table = Self {
            path: path.to_path_buf(),
            factor_names: factor_names.to_vec(),
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(file),
            rows: 0,
        };

        if is_empty {
            let header = table.header();
            table.writer.write_record(&header)?;
            table.writer.flush()?;
        }

        Ok(table)
    }

    /// `run, repetition, <factors...>, status, <metrics...>, notes`
    pub fn header(&self) -> Vec<String> {
        ["run", "repetition"]
            .into_iter()
            .map(String::from)
            .chain(self.factor_names.iter().cloned())
            .chain(METRIC_COLUMNS.into_iter().map(String::from))
            .collect()
    }

    /// Appends one result and returns its run number (1 based, counted from when this table was
    /// opened).
    pub fn append(&mut self, result: &RunResult) -> anyhow::Result<usize> {
        let run = self.rows + 1;
        let combination = result.combination();

        let mut record = vec![
            run.to_string(),
            (combination.repetition() + 1).to_string(),
        ];
        record.extend(
            self.factor_names
                .iter()
                .map(|name| combination.value(name).unwrap_or_default().to_string()),
        );
        record.extend([
            result.status().as_str().to_string(),
            format_metric(result.execution_time_s()),
            format_metric(result.cpu_utilization_mean()),
            format_metric(result.cpu_frequency_mean_mhz()),
            format_metric(result.energy_j()),
            result.notes().join("; "),
        ]);

        self.writer
            .write_record(&record)
            .context(format!("Unable to append to {}", self.path.display()))?;
        self.writer.flush()?;
        self.rows = run;

        debug!("appended run {} to {}", run, self.path.display());
        Ok(run)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Unavailable metrics are written as empty cells so they cannot be mistaken for zero.
fn format_metric(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.3}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration_space::Combination,
        reducer::{RunResult, RunStatus},
    };

    fn factor_names() -> Vec<String> {
        vec!["governor".to_string(), "workload".to_string()]
    }

    fn completed() -> RunResult {
        RunResult::new(
            Combination::new(&[("governor", "powersave"), ("workload", "low")], 1),
            RunStatus::Completed,
            Some(121.5),
            Some(0.35),
            None,
            Some(0.0),
            vec![],
        )
    }

    #[test]
    fn rows_follow_the_declared_column_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("run_table.csv");

        let mut table = RunTable::open(&path, &factor_names())?;
        assert_eq!(table.append(&completed())?, 1);
        let failed = RunResult::failed(
            Combination::new(&[("governor", "performance"), ("workload", "high")], 0),
            "DriverFailed: boom",
        );
        assert_eq!(table.append(&failed)?, 2);

        let contents = fs::read_to_string(&path)?;
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "run,repetition,governor,workload,status,execution_time_s,cpu_utilization_mean,cpu_frequency_mean_mhz,energy_j,notes"
        );
        // missing frequency is empty, a measured zero is 0.000
        assert_eq!(lines[1], "1,2,powersave,low,completed,121.500,0.350,,0.000,");
        assert_eq!(lines[2], "2,1,performance,high,failed,,,,,DriverFailed: boom");
        assert_eq!(table.len(), 2);
        Ok(())
    }

    #[test]
    fn reopening_does_not_repeat_the_header() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run_table.csv");

        RunTable::open(&path, &factor_names())?.append(&completed())?;
        RunTable::open(&path, &factor_names())?.append(&completed())?;

        let contents = fs::read_to_string(&path)?;
        let headers = contents.lines().filter(|l| l.starts_with("run,")).count();
        assert_eq!(headers, 1);
        assert_eq!(contents.lines().count(), 3);
        Ok(())
    }
}
