/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::configuration_space::Combination;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}
impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Read-only record of one run. A metric is `None` when it could not be derived, which is
/// distinct from a measured zero.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    combination: Combination,
    status: RunStatus,
    execution_time_s: Option<f64>,
    cpu_utilization_mean: Option<f64>,
    cpu_frequency_mean_mhz: Option<f64>,
    energy_j: Option<f64>,
    notes: Vec<String>,
}
impl RunResult {
    pub(crate) fn new(
        combination: Combination,
        status: RunStatus,
        execution_time_s: Option<f64>,
        cpu_utilization_mean: Option<f64>,
        cpu_frequency_mean_mhz: Option<f64>,
        energy_j: Option<f64>,
        notes: Vec<String>,
    ) -> Self {
        Self {
            combination,
            status,
            execution_time_s,
            cpu_utilization_mean,
            cpu_frequency_mean_mhz,
            energy_j,
            notes,
        }
    }

    /// A run that produced no metrics at all.
    pub fn failed(combination: Combination, reason: impl Into<String>) -> Self {
        Self::new(
            combination,
            RunStatus::Failed,
            None,
            None,
            None,
            None,
            vec![reason.into()],
        )
    }

    /// Marks the run as failed, keeping whatever metrics were derived.
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.notes.push(reason.into());
        self
    }

    pub fn with_notes(mut self, notes: impl IntoIterator<Item = String>) -> Self {
        self.notes.extend(notes);
        self
    }

    pub fn combination(&self) -> &Combination {
        &self.combination
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    pub fn execution_time_s(&self) -> Option<f64> {
        self.execution_time_s
    }

    pub fn cpu_utilization_mean(&self) -> Option<f64> {
        self.cpu_utilization_mean
    }

    pub fn cpu_frequency_mean_mhz(&self) -> Option<f64> {
        self.cpu_frequency_mean_mhz
    }

    pub fn energy_j(&self) -> Option<f64> {
        self.energy_j
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}
