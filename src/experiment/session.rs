/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    config::Workload,
    configuration_space::Combination,
    errors::ExperimentError,
    reducer::{RunReducer, RunResult, TelemetryFiles},
};
use std::{path::PathBuf, time::Instant};
use tracing::warn;

/// Everything that belongs to the run currently in flight. Created when a combination is
/// dequeued and consumed when its result is recorded, so nothing leaks into the next run.
pub struct Session<T, C> {
    pub(crate) run: usize,
    pub(crate) combination: Combination,
    pub(crate) run_dir: PathBuf,
    pub(crate) workload: Option<Workload>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) stopped_at: Option<Instant>,
    pub(crate) target: Option<T>,
    pub(crate) capture: Option<C>,
    pub(crate) files: TelemetryFiles,
    failures: Vec<String>,
    notes: Vec<String>,
}
impl<T, C> Session<T, C> {
    pub fn new(run: usize, combination: Combination, run_dir: PathBuf) -> Self {
        Self {
            run,
            combination,
            run_dir,
            workload: None,
            started_at: None,
            stopped_at: None,
            target: None,
            capture: None,
            files: TelemetryFiles::default(),
            failures: vec![],
            notes: vec![],
        }
    }

    pub fn run(&self) -> usize {
        self.run
    }

    pub fn combination(&self) -> &Combination {
        &self.combination
    }

    pub fn run_dir(&self) -> &PathBuf {
        &self.run_dir
    }

    pub fn has_failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Marks the run as failed. The run still goes through every remaining phase so that
    /// whatever was started gets torn down.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("[run {}] {}", self.run, reason);
        self.failures.push(reason);
    }

    pub fn fail_with(&mut self, err: &ExperimentError) {
        self.fail(format!("{}: {}", err.kind(), err));
    }

    /// Records something worth knowing about the run without failing it.
    pub fn note(&mut self, note: impl Into<String>) {
        let note = note.into();
        warn!("[run {}] {}", self.run, note);
        self.notes.push(note);
    }

    pub fn note_error(&mut self, err: &ExperimentError) {
        self.note(format!("{}: {}", err.kind(), err));
    }

    /// Reduces the run's telemetry and folds in everything that went wrong along the way.
    pub fn into_result(self, reducer: &RunReducer) -> RunResult {
        let result = match (self.started_at, self.stopped_at) {
            (Some(start), Some(end)) => reducer
                .reduce(&self.files, start, end, &self.combination)
                .unwrap_or_else(|err| {
                    warn!("[run {}] {}", self.run, err);
                    RunResult::failed(self.combination.clone(), format!("{}: {}", err.kind(), err))
                }),
            _ => RunResult::failed(self.combination.clone(), "run was never started"),
        };

        self.failures
            .into_iter()
            .fold(result.with_notes(self.notes), |result, failure| {
                result.with_failure(failure)
            })
    }
}
