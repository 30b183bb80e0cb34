/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Offline merging of finished power logs into one table for analysis.
//!
//! Input files are expected to be named `<governor> - <workload>.csv`. Every cleaned row is
//! tagged with those two labels and with its elapsed time since the first row of its file.

use crate::telemetry::{self, CleanedSeries, PowerSample, PowerSchema};
use anyhow::Context;
use itertools::Itertools;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub const DURATION_COLUMN: &str = "Duration";
pub const GOVERNOR_COLUMN: &str = "governor";
pub const WORKLOAD_COLUMN: &str = "workload";

/// A cleaned power log and the labels taken from its file name.
#[derive(Debug)]
pub struct TaggedSeries {
    pub path: PathBuf,
    pub governor: String,
    pub workload: String,
    pub series: CleanedSeries<PowerSample>,
}

/// Splits `performance - high.csv` into `("performance", "high")`.
pub fn tags_from_file_name(path: &Path) -> Option<(String, String)> {
    let stem = path.file_stem()?.to_str()?;
    match stem.split('-').map(str::trim).collect_vec()[..] {
        [governor, workload] if !governor.is_empty() && !workload.is_empty() => {
            Some((governor.to_string(), workload.to_string()))
        }
        _ => None,
    }
}

/// Cleans one file. Returns `None`, after logging why, if the file cannot be used.
pub fn combine_one(path: &Path, schema: &PowerSchema) -> Option<TaggedSeries> {
    let Some((governor, workload)) = tags_from_file_name(path) else {
        warn!(
            "skipping {}: file name is not '<governor> - <workload>'",
            path.display()
        );
        return None;
    };

    match telemetry::read(path, schema) {
        Ok(series) => {
            debug!(
                "{}: {} rows kept, {} skipped",
                path.display(),
                series.len(),
                series.skipped()
            );
            Some(TaggedSeries {
                path: path.to_path_buf(),
                governor,
                workload,
                series,
            })
        }
        Err(err) => {
            warn!("skipping {}: {}: {}", path.display(), err.kind(), err);
            None
        }
    }
}

/// Cleans and concatenates every usable file. Inputs are processed in path order, so the same
/// set of files always produces the same table.
pub fn combine(paths: &[PathBuf], schema: &PowerSchema) -> CombinedTable {
    let tagged = paths
        .iter()
        .sorted()
        .dedup()
        .filter_map(|path| combine_one(path, schema))
        .collect_vec();

    let table = CombinedTable::from_series(&tagged);
    info!(
        "combined {} of {} file(s) into {} rows",
        tagged.len(),
        paths.len(),
        table.len()
    );
    table
}

/// Expands directories into the `.csv` files they contain. Other paths are kept as given.
pub fn collect_inputs(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = vec![];
    for input in inputs {
        if input.is_dir() {
            for entry in fs::read_dir(input)
                .context(format!("Unable to read directory {}", input.display()))?
            {
                let path = entry?.path();
                let is_csv = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
                if path.is_file() && is_csv {
                    paths.push(path);
                }
            }
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

/// Rows of every input file under the union of their columns. A cell is empty when its file has
/// no such column. The position of a row is its index.
#[derive(Debug, Default, PartialEq)]
pub struct CombinedTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}
impl CombinedTable {
    pub fn from_series(tagged: &[TaggedSeries]) -> Self {
        let tag_columns = [DURATION_COLUMN, GOVERNOR_COLUMN, WORKLOAD_COLUMN];

        let data_columns = tagged
            .iter()
            .flat_map(|t| t.series.columns().iter())
            .filter(|column| !tag_columns.contains(&column.as_str()))
            .unique()
            .cloned()
            .collect_vec();

        let mut rows = vec![];
        for t in tagged {
            let positions = data_columns
                .iter()
                .map(|column| t.series.columns().iter().position(|c| c == column))
                .collect_vec();

            for (elapsed, sample) in t.series.points() {
                let mut row = positions
                    .iter()
                    .map(|pos| {
                        pos.and_then(|pos| sample.cells.get(pos))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect_vec();
                row.extend([
                    elapsed.to_string(),
                    t.governor.clone(),
                    t.workload.clone(),
                ]);
                rows.push(row);
            }
        }

        let columns = data_columns
            .into_iter()
            .chain(tag_columns.into_iter().map(String::from))
            .collect_vec();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .context(format!("Unable to create {}", path.display()))?;
        writer.write_record(&self.columns)?;
        for row in self.rows.iter() {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
