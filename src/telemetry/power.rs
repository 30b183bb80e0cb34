/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{finite_or_zero, parse_timestamp, ParsedRows, Sample, Schema};
use crate::errors::ExperimentError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{trace, warn};

/// Names of the columns a power log is read from. Defaults match the headers PowerJoular
/// writes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerColumns {
    #[serde(rename = "timestamp_column")]
    pub timestamp: String,
    #[serde(rename = "power_column")]
    pub power: String,
    #[serde(rename = "utilization_column")]
    pub utilization: String,
}
impl Default for PowerColumns {
    fn default() -> Self {
        Self {
            timestamp: "Date".to_string(),
            power: "Total Power".to_string(),
            utilization: "CPU Utilization".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    pub timestamp: NaiveDateTime,
    /// Instantaneous power in watts.
    pub power: f64,
    /// `None` when the log has no utilization column.
    pub cpu_utilization: Option<f64>,
    /// Every cell of the source row, with non-finite numbers rewritten to `0`.
    pub cells: Vec<String>,
}
impl Sample for PowerSample {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Tabular power/utilization log.
#[derive(Debug, Clone, Default)]
pub struct PowerSchema {
    pub columns: PowerColumns,
}
impl PowerSchema {
    pub fn new(columns: PowerColumns) -> Self {
        Self { columns }
    }
}

impl Schema for PowerSchema {
    type Sample = PowerSample;

    fn parse(&self, path: &Path) -> Result<ParsedRows<PowerSample>, ExperimentError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ExperimentError::malformed(path, e.to_string()))?;

        let headers = reader
            .headers()
            .map_err(|e| ExperimentError::malformed(path, e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>();

        let find = |name: &str| headers.iter().position(|h| h == name);
        let ts_idx = find(&self.columns.timestamp).ok_or_else(|| {
            ExperimentError::malformed(path, format!("missing column '{}'", self.columns.timestamp))
        })?;
        let pow_idx = find(&self.columns.power).ok_or_else(|| {
            ExperimentError::malformed(path, format!("missing column '{}'", self.columns.power))
        })?;
        let util_idx = find(&self.columns.utilization);
        if util_idx.is_none() {
            warn!(
                "{} has no '{}' column, utilization will be unavailable",
                path.display(),
                self.columns.utilization
            );
        }

        let mut samples = vec![];
        let mut skipped = 0;
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) if record.len() == headers.len() => record,
                Ok(record) => {
                    trace!(
                        "row {} of {} has {} fields, expected {}",
                        line + 1,
                        path.display(),
                        record.len(),
                        headers.len()
                    );
                    skipped += 1;
                    continue;
                }
                Err(err) => {
                    trace!("unreadable row in {}: {}", path.display(), err);
                    skipped += 1;
                    continue;
                }
            };

            match parse_row(&record, ts_idx, pow_idx, util_idx) {
                Some(sample) => samples.push(sample),
                None => skipped += 1,
            }
        }

        Ok(ParsedRows {
            columns: headers,
            samples,
            skipped,
        })
    }
}

/// Turns a csv row into a sample. Rows with an unusable timestamp, an unparsable or negative
/// power reading are dropped. An unreadable utilization cell only leaves utilization unset.
fn parse_row(
    record: &csv::StringRecord,
    ts_idx: usize,
    pow_idx: usize,
    util_idx: Option<usize>,
) -> Option<PowerSample> {
    let timestamp = parse_timestamp(record.get(ts_idx)?)?;
    let power = finite_or_zero(record.get(pow_idx)?.parse::<f64>().ok()?);
    if power < 0.0 {
        return None;
    }

    let cpu_utilization = util_idx
        .and_then(|idx| record.get(idx))
        .and_then(|cell| cell.parse::<f64>().ok())
        .map(finite_or_zero);

    let cells = record
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            if idx == ts_idx {
                return cell.to_string();
            }
            match cell.parse::<f64>() {
                Ok(x) if !x.is_finite() => "0".to_string(),
                _ => cell.to_string(),
            }
        })
        .collect();

    Some(PowerSample {
        timestamp,
        power,
        cpu_utilization,
        cells,
    })
}
