/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring, running or reducing an experiment.
///
/// Running out of combinations is not represented here, `CombinationQueue::next_combination`
/// reports it by returning `None`.
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("experiment has no factors to vary")]
    EmptyFactorSet,

    #[error("factor '{0}' has no values")]
    EmptyFactor(String),

    #[error("factor '{factor}' lists the value '{value}' more than once")]
    DuplicateFactorValue { factor: String, value: String },

    #[error("factor '{0}' is not declared")]
    UnknownFactor(String),

    #[error("workload '{0}' has no entry in the workload table")]
    UnknownWorkload(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("benchmark driver failed (exit code {exit_code:?}): {reason}")]
    DriverFailed {
        exit_code: Option<i32>,
        reason: String,
    },

    #[error("malformed input {}: {reason}", path.display())]
    MalformedInput { path: PathBuf, reason: String },

    #[error("insufficient data: {points} valid point(s), at least 2 are required")]
    InsufficientData { points: usize },

    #[error("clock anomaly: run stopped {skew_ms}ms before it started")]
    ClockAnomaly { skew_ms: u128 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExperimentError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ExperimentError::MalformedInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine readable name, used when a failure is written to the run table.
    pub fn kind(&self) -> &'static str {
        match self {
            ExperimentError::EmptyFactorSet
            | ExperimentError::EmptyFactor(_)
            | ExperimentError::DuplicateFactorValue { .. }
            | ExperimentError::UnknownFactor(_)
            | ExperimentError::UnknownWorkload(_) => "ConfigurationInvalid",
            ExperimentError::PreconditionFailed(_) => "PreconditionFailed",
            ExperimentError::DriverFailed { .. } => "DriverFailed",
            ExperimentError::MalformedInput { .. } => "MalformedInput",
            ExperimentError::InsufficientData { .. } => "InsufficientData",
            ExperimentError::ClockAnomaly { .. } => "ClockAnomaly",
            ExperimentError::Io(_) => "Io",
        }
    }
}
