/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod run_result;

use crate::{
    configuration_space::Combination,
    energy,
    errors::ExperimentError,
    telemetry::{self, FrequencySchema, PowerColumns, PowerSchema},
};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{debug, warn};

pub use run_result::{RunResult, RunStatus};

/// Local paths of the telemetry retrieved for a run. A source that was not captured is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryFiles {
    pub power: Option<PathBuf>,
    pub frequency: Option<PathBuf>,
}

/// Collapses the telemetry of one run into a `RunResult`.
#[derive(Debug, Clone, Default)]
pub struct RunReducer {
    power: PowerSchema,
}
impl RunReducer {
    pub fn new(columns: PowerColumns) -> Self {
        Self {
            power: PowerSchema::new(columns),
        }
    }

    /// Reduces one run.
    ///
    /// Each source is cleaned on its own, the power and frequency samplers do not share a clock.
    /// A source that is missing leaves its metrics unset. A source that exists but cannot be
    /// read leaves its metrics unset and marks the run as failed. Too few power samples only
    /// leaves energy unset.
    ///
    /// # Errors
    ///
    /// `ClockAnomaly` when `end` is earlier than `start`.
    pub fn reduce(
        &self,
        files: &TelemetryFiles,
        start: Instant,
        end: Instant,
        combination: &Combination,
    ) -> Result<RunResult, ExperimentError> {
        let execution_time = end.checked_duration_since(start).ok_or_else(|| {
            ExperimentError::ClockAnomaly {
                skew_ms: start.duration_since(end).as_millis(),
            }
        })?;

        let mut notes = vec![];
        let mut issues = vec![];

        let mut cpu_utilization_mean = None;
        let mut energy_j = None;
        match existing(files.power.as_deref()) {
            Some(path) => match telemetry::read(path, &self.power) {
                Ok(series) => {
                    cpu_utilization_mean = series.mean_of(|s| s.cpu_utilization);
                    match energy::integrate(&series) {
                        Ok(joules) => energy_j = Some(joules),
                        Err(err) => issues.push(err),
                    }
                }
                Err(err) => issues.push(err),
            },
            None => {
                warn!("[{}] no power log was retrieved", combination.label());
                notes.push("power log missing".to_string());
            }
        }

        let mut cpu_frequency_mean_mhz = None;
        match existing(files.frequency.as_deref()) {
            Some(path) => match telemetry::read(path, &FrequencySchema) {
                Ok(series) => {
                    cpu_frequency_mean_mhz = series.mean_of(|s| Some(s.frequency_mhz as f64))
                }
                Err(err) => issues.push(err),
            },
            None => debug!("[{}] no frequency log for this run", combination.label()),
        }

        let status = if issues
            .iter()
            .any(|err| matches!(err, ExperimentError::MalformedInput { .. }))
        {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        for err in issues {
            warn!("[{}] {}", combination.label(), err);
            notes.push(format!("{}: {}", err.kind(), err));
        }

        Ok(RunResult::new(
            combination.clone(),
            status,
            Some(execution_time.as_secs_f64()),
            cpu_utilization_mean,
            cpu_frequency_mean_mhz,
            energy_j,
            notes,
        ))
    }
}

fn existing(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| p.exists())
}
