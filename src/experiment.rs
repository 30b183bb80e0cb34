/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod session;

use crate::{
    collaborators::{BenchmarkDriver, MeasurementCapture, TargetControl, TargetHandle},
    config::{Config, Timing, Workload},
    configuration_space::{Combination, CombinationQueue},
    errors::ExperimentError,
    reducer::{RunReducer, RunResult},
    run_table::RunTable,
    summary::ExperimentSummary,
    telemetry::PowerColumns,
};
use anyhow::anyhow;
use colored::*;
use itertools::Itertools;
use std::{fs, path::PathBuf, time::Instant};
use tracing::{debug, error, info};

pub use session::Session;

pub const RUN_TABLE_FILE: &str = "run_table.csv";
pub const SUMMARY_FILE: &str = "summary.json";

/// The phases of an experiment, in the order they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    BeforeExperiment,
    BeforeRun,
    StartRun,
    StartMeasurement,
    Interact,
    StopMeasurement,
    StopRun,
    PopulateRunData,
    AfterExperiment,
    Finished,
}
impl RunnerState {
    pub fn successors(self) -> &'static [RunnerState] {
        use RunnerState::*;
        match self {
            BeforeExperiment => &[BeforeRun, AfterExperiment],
            BeforeRun => &[StartRun],
            StartRun => &[StartMeasurement],
            StartMeasurement => &[Interact],
            Interact => &[StopMeasurement],
            StopMeasurement => &[StopRun],
            StopRun => &[PopulateRunData],
            PopulateRunData => &[BeforeRun, AfterExperiment],
            AfterExperiment => &[Finished],
            Finished => &[],
        }
    }

    pub fn can_advance_to(self, next: RunnerState) -> bool {
        self.successors().contains(&next)
    }
}

/// What the state machine needs to know about the experiment besides its collaborators.
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub name: String,
    pub mode_factor: String,
    pub workload_factor: String,
    pub workloads: Vec<Workload>,
    pub timing: Timing,
    pub columns: PowerColumns,
    /// Receives the run table, the summary and one directory per run.
    pub output_dir: PathBuf,
}
impl ExperimentPlan {
    pub fn from_config(config: &Config, output_dir: PathBuf) -> Self {
        Self {
            name: config.experiment.name.clone(),
            mode_factor: config.experiment.mode_factor.clone(),
            workload_factor: config.experiment.workload_factor.clone(),
            workloads: config.workloads.clone(),
            timing: config.timing.clone(),
            columns: config.telemetry.columns.clone(),
            output_dir,
        }
    }

    pub fn workload_for(&self, combination: &Combination) -> Result<&Workload, ExperimentError> {
        let name = combination
            .value(&self.workload_factor)
            .ok_or_else(|| ExperimentError::UnknownFactor(self.workload_factor.clone()))?;

        self.workloads
            .iter()
            .find(|workload| workload.name == name)
            .ok_or_else(|| ExperimentError::UnknownWorkload(name.to_string()))
    }

    /// `run_007_performance_high_r2`
    pub fn run_dir(&self, run: usize, combination: &Combination) -> PathBuf {
        let values = combination
            .values()
            .iter()
            .map(|(_, value)| {
                value
                    .chars()
                    .map(|c| match c {
                        'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' => c,
                        _ => '-',
                    })
                    .collect::<String>()
            })
            .join("_");

        self.output_dir.join(format!(
            "run_{:03}_{}_r{}",
            run,
            values,
            combination.repetition() + 1
        ))
    }
}

/// Drives every combination of the queue through the run lifecycle, one run at a time.
///
/// A failing run is recorded and the experiment moves on. Only problems with the experiment's
/// own output (the run table or the summary) stop it.
pub struct ExperimentRunner<T, M, B>
where
    T: TargetControl,
    M: MeasurementCapture,
    B: BenchmarkDriver,
{
    plan: ExperimentPlan,
    queue: CombinationQueue,
    target: T,
    capture: M,
    driver: B,
    reducer: RunReducer,
    table: RunTable,
    state: Option<RunnerState>,
    history: Vec<RunnerState>,
    results: Vec<RunResult>,
}

impl<T, M, B> ExperimentRunner<T, M, B>
where
    T: TargetControl,
    M: MeasurementCapture,
    B: BenchmarkDriver,
{
    pub fn new(
        plan: ExperimentPlan,
        queue: CombinationQueue,
        target: T,
        capture: M,
        driver: B,
    ) -> anyhow::Result<Self> {
        let table = RunTable::open(&plan.output_dir.join(RUN_TABLE_FILE), queue.factor_names())?;
        let reducer = RunReducer::new(plan.columns.clone());

        Ok(Self {
            plan,
            queue,
            target,
            capture,
            driver,
            reducer,
            table,
            state: None,
            history: vec![],
            results: vec![],
        })
    }

    pub fn state(&self) -> Option<RunnerState> {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[RunnerState] {
        &self.history
    }

    pub fn results(&self) -> &[RunResult] {
        &self.results
    }

    pub fn table(&self) -> &RunTable {
        &self.table
    }

    /// Runs the whole experiment. Can only be called once.
    pub async fn run(&mut self) -> anyhow::Result<&[RunResult]> {
        self.before_experiment()?;

        while let Some(mut session) = self.before_run().await? {
            self.start_run(&mut session).await?;
            self.start_measurement(&mut session).await?;
            self.interact(&mut session).await?;
            self.stop_measurement(&mut session).await?;
            self.stop_run(&mut session).await?;
            self.populate_run_data(session)?;
        }

        self.after_experiment()?;
        Ok(&self.results)
    }

    fn enter(&mut self, next: RunnerState) -> anyhow::Result<()> {
        let allowed = match self.state {
            None => next == RunnerState::BeforeExperiment,
            Some(current) => current.can_advance_to(next),
        };
        if !allowed {
            return Err(anyhow!(
                "Experiment cannot move from {:?} to {:?}",
                self.state,
                next
            ));
        }

        debug!("entering {:?}", next);
        self.state = Some(next);
        self.history.push(next);
        Ok(())
    }

    fn before_experiment(&mut self) -> anyhow::Result<()> {
        self.enter(RunnerState::BeforeExperiment)?;

        println!(
            "> running experiment {} - {} runs over {} (seed {})",
            self.plan.name.green(),
            self.queue.len(),
            self.queue.factor_names().join(" × "),
            self.queue.seed()
        );
        info!(
            "writing results to {}",
            self.plan.output_dir.display()
        );
        Ok(())
    }

    /// Dequeues the next combination and brings the target into the requested mode. Returns
    /// `None` once the queue is exhausted.
    async fn before_run(&mut self) -> anyhow::Result<Option<Session<T::Handle, M::Handle>>> {
        let Some(combination) = self.queue.next_combination() else {
            return Ok(None);
        };
        self.enter(RunnerState::BeforeRun)?;

        let run = self.queue.cursor();
        println!(
            "> run {}/{} {} - repetition {}",
            run,
            self.queue.len(),
            combination.label().green(),
            combination.repetition() + 1
        );

        let run_dir = self.plan.run_dir(run, &combination);
        let mut session = Session::new(run, combination, run_dir);

        if let Err(err) = fs::create_dir_all(&session.run_dir) {
            session.fail_with(&ExperimentError::Io(err));
        }
        match self.plan.workload_for(&session.combination) {
            Ok(workload) => session.workload = Some(workload.clone()),
            Err(err) => session.fail_with(&err),
        }

        if let Some(mode) = session
            .combination
            .value(&self.plan.mode_factor)
            .map(String::from)
        {
            match self.target.apply_mode(&mode).await {
                Ok(()) => info!("[run {}] applied mode {}", run, mode),
                Err(err) => session.note_error(&ExperimentError::PreconditionFailed(format!(
                    "unable to apply mode {mode}: {err:#}"
                ))),
            }
            tokio::time::sleep(self.plan.timing.mode_settle()).await;
        }

        Ok(Some(session))
    }

    async fn start_run(&mut self, session: &mut Session<T::Handle, M::Handle>) -> anyhow::Result<()> {
        self.enter(RunnerState::StartRun)?;
        session.started_at = Some(Instant::now());

        if session.has_failed() {
            return Ok(());
        }
        match self.target.start().await {
            Ok(handle) => session.target = Some(handle),
            Err(err) => session.fail(format!("target failed to start: {err:#}")),
        }
        Ok(())
    }

    async fn start_measurement(
        &mut self,
        session: &mut Session<T::Handle, M::Handle>,
    ) -> anyhow::Result<()> {
        self.enter(RunnerState::StartMeasurement)?;

        let Some(target_id) = session.target.as_ref().map(|target| target.id()) else {
            return Ok(());
        };
        match self.capture.start(&target_id).await {
            Ok(handle) => {
                session.capture = Some(handle);
                tokio::time::sleep(self.plan.timing.measurement_settle()).await;
            }
            Err(err) => session.fail(format!("measurement failed to start: {err:#}")),
        }
        Ok(())
    }

    async fn interact(&mut self, session: &mut Session<T::Handle, M::Handle>) -> anyhow::Result<()> {
        self.enter(RunnerState::Interact)?;

        let workload = match (&session.target, &session.capture, &session.workload) {
            (Some(_), Some(_), Some(workload)) => workload.clone(),
            _ => {
                debug!("[run {}] nothing to drive", session.run);
                return Ok(());
            }
        };

        let started = Instant::now();
        match self.driver.run(&workload).await {
            Ok(output) if output.success() => {
                info!(
                    "[run {}] benchmark finished after {:.1}s",
                    session.run,
                    started.elapsed().as_secs_f64()
                );
                debug!("{}", output.stdout);

                if !workload.hold().is_zero() {
                    println!("> holding target for {}s", workload.hold_secs);
                    tokio::time::sleep(workload.hold()).await;
                }
            }
            Ok(output) => session.fail_with(&ExperimentError::DriverFailed {
                exit_code: output.exit_code,
                reason: output
                    .stderr
                    .lines()
                    .last()
                    .unwrap_or("no output")
                    .to_string(),
            }),
            Err(err) => session.fail_with(&ExperimentError::DriverFailed {
                exit_code: None,
                reason: format!("{err:#}"),
            }),
        }
        Ok(())
    }

    async fn stop_measurement(
        &mut self,
        session: &mut Session<T::Handle, M::Handle>,
    ) -> anyhow::Result<()> {
        self.enter(RunnerState::StopMeasurement)?;

        let Some(handle) = session.capture.take() else {
            return Ok(());
        };
        if let Err(err) = self.capture.stop(handle).await {
            session.note(format!("measurement did not stop cleanly: {err:#}"));
        }

        tokio::time::sleep(self.plan.timing.flush_delay()).await;
        match self.capture.retrieve(&session.run_dir).await {
            Ok(files) => session.files = files,
            Err(err) => session.note(format!("telemetry retrieval failed: {err:#}")),
        }
        Ok(())
    }

    async fn stop_run(&mut self, session: &mut Session<T::Handle, M::Handle>) -> anyhow::Result<()> {
        self.enter(RunnerState::StopRun)?;
        session.stopped_at = Some(Instant::now());

        if let Some(handle) = session.target.take() {
            if let Err(err) = self.target.stop(handle).await {
                session.note(format!("target did not stop cleanly: {err:#}"));
            }
        }

        if !self.queue.is_exhausted() && !self.plan.timing.cooldown().is_zero() {
            println!(
                "> cooling down for {}s",
                self.plan.timing.cooldown().as_secs_f64()
            );
            tokio::time::sleep(self.plan.timing.cooldown()).await;
        }
        Ok(())
    }

    fn populate_run_data(&mut self, session: Session<T::Handle, M::Handle>) -> anyhow::Result<()> {
        self.enter(RunnerState::PopulateRunData)?;

        let run = session.run;
        let result = session.into_result(&self.reducer);
        self.table.append(&result)?;

        if result.is_failed() {
            error!("run {} failed: {}", run, result.notes().join("; "));
            println!("> run {} {}", run, "✗".red());
        } else {
            println!(
                "> run {} {}\t{}",
                run,
                "✓".green(),
                result
                    .energy_j()
                    .map(|j| format!("{j:.3}J"))
                    .unwrap_or("--".to_string())
                    .bright_black()
            );
        }

        self.results.push(result);
        Ok(())
    }

    fn after_experiment(&mut self) -> anyhow::Result<()> {
        self.enter(RunnerState::AfterExperiment)?;

        {
            let summary = ExperimentSummary::new(&self.plan.name, self.queue.seed(), &self.results);
            summary.write_json(&self.plan.output_dir.join(SUMMARY_FILE))?;
            summary.print();
        }
        println!(
            "> results written to {}",
            self.table.path().display().to_string().bright_black()
        );

        self.enter(RunnerState::Finished)
    }
}
