/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use async_trait::async_trait;
use govlab::{
    collaborators::{
        BenchmarkDriver, DriverOutput, MeasurementCapture, TargetControl, TargetHandle,
    },
    config::{Timing, Workload},
    configuration_space::{CombinationQueue, Factor},
    experiment::{ExperimentPlan, ExperimentRunner, RunnerState, RUN_TABLE_FILE, SUMMARY_FILE},
    reducer::{RunStatus, TelemetryFiles},
    telemetry::PowerColumns,
};
use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

const POWER_LOG: &str = "Date,CPU Utilization,Total Power\n\
                         2024-10-14 13:00:00,0.5,10\n\
                         2024-10-14 13:00:10,0.5,10\n";

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<(Instant, String)>>>);
impl Log {
    fn push(&self, event: impl Into<String>) {
        self.0
            .lock()
            .expect("log lock")
            .push((Instant::now(), event.into()));
    }

    fn events(&self) -> Vec<String> {
        self.0
            .lock()
            .expect("log lock")
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn first_after(&self, prefix: &str, after: Instant) -> Option<Instant> {
        self.0
            .lock()
            .expect("log lock")
            .iter()
            .find(|(at, e)| *at >= after && e.starts_with(prefix))
            .map(|(at, _)| *at)
    }

    fn first(&self, prefix: &str) -> Option<Instant> {
        self.0
            .lock()
            .expect("log lock")
            .iter()
            .find(|(_, e)| e.starts_with(prefix))
            .map(|(at, _)| *at)
    }
}

struct FakeHandle(u32);
impl TargetHandle for FakeHandle {
    fn id(&self) -> String {
        self.0.to_string()
    }
}

struct FakeTarget {
    log: Log,
    rejected_mode: Option<&'static str>,
    fails_to_start: bool,
}

#[async_trait]
impl TargetControl for FakeTarget {
    type Handle = FakeHandle;

    async fn apply_mode(&mut self, mode: &str) -> anyhow::Result<()> {
        self.log.push(format!("apply_mode:{mode}"));
        if self.rejected_mode == Some(mode) {
            anyhow::bail!("governor {mode} not available");
        }
        Ok(())
    }

    async fn start(&mut self) -> anyhow::Result<FakeHandle> {
        self.log.push("target.start");
        if self.fails_to_start {
            anyhow::bail!("target exited right after starting");
        }
        Ok(FakeHandle(42))
    }

    async fn stop(&mut self, handle: FakeHandle) -> anyhow::Result<()> {
        self.log.push(format!("target.stop:{}", handle.0));
        Ok(())
    }
}

struct FakeCapture {
    log: Log,
    power_log: &'static str,
    fails_to_start: bool,
}

#[async_trait]
impl MeasurementCapture for FakeCapture {
    type Handle = ();

    async fn start(&mut self, target: &str) -> anyhow::Result<()> {
        self.log.push(format!("capture.start:{target}"));
        if self.fails_to_start {
            anyhow::bail!("sampler not installed");
        }
        Ok(())
    }

    async fn stop(&mut self, _handle: ()) -> anyhow::Result<()> {
        self.log.push("capture.stop");
        Ok(())
    }

    async fn retrieve(&mut self, run_dir: &Path) -> anyhow::Result<TelemetryFiles> {
        self.log.push("capture.retrieve");
        let power = run_dir.join("power.csv");
        fs::write(&power, self.power_log)?;
        Ok(TelemetryFiles {
            power: Some(power),
            frequency: None,
        })
    }
}

struct FakeDriver {
    log: Log,
    failing_workload: Option<&'static str>,
}

#[async_trait]
impl BenchmarkDriver for FakeDriver {
    async fn run(&mut self, workload: &Workload) -> anyhow::Result<DriverOutput> {
        self.log.push(format!("driver.run:{}", workload.name));
        if self.failing_workload == Some(workload.name.as_str()) {
            return Ok(DriverOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "socket errors\nconnection refused\n".to_string(),
            });
        }
        Ok(DriverOutput {
            exit_code: Some(0),
            stdout: "Requests/sec: 10.00".to_string(),
            stderr: String::new(),
        })
    }
}

fn workload(name: &str) -> Workload {
    Workload {
        name: name.to_string(),
        threads: 1,
        connections: 10,
        duration_secs: 1,
        rate: 1,
        hold_secs: 0,
    }
}

struct Setup {
    timing: Timing,
    workloads: Vec<&'static str>,
    repetitions: u32,
    rejected_mode: Option<&'static str>,
    failing_workload: Option<&'static str>,
    power_log: &'static str,
    target_fails: bool,
    capture_fails: bool,
}
impl Default for Setup {
    fn default() -> Self {
        Self {
            timing: Timing::immediate(),
            workloads: vec!["low"],
            repetitions: 1,
            rejected_mode: None,
            failing_workload: None,
            power_log: POWER_LOG,
            target_fails: false,
            capture_fails: false,
        }
    }
}

type Runner = ExperimentRunner<FakeTarget, FakeCapture, FakeDriver>;

fn runner(dir: &Path, setup: Setup, log: &Log) -> anyhow::Result<Runner> {
    let queue = CombinationQueue::build(
        &[
            Factor::new("governor", &["performance", "powersave"]),
            Factor::new("workload", &setup.workloads),
        ],
        setup.repetitions,
        Some(11),
    )?;

    let plan = ExperimentPlan {
        name: "fake".to_string(),
        mode_factor: "governor".to_string(),
        workload_factor: "workload".to_string(),
        workloads: vec![workload("low"), workload("high")],
        timing: setup.timing,
        columns: PowerColumns::default(),
        output_dir: dir.to_path_buf(),
    };

    ExperimentRunner::new(
        plan,
        queue,
        FakeTarget {
            log: log.clone(),
            rejected_mode: setup.rejected_mode,
            fails_to_start: setup.target_fails,
        },
        FakeCapture {
            log: log.clone(),
            power_log: setup.power_log,
            fails_to_start: setup.capture_fails,
        },
        FakeDriver {
            log: log.clone(),
            failing_workload: setup.failing_workload,
        },
    )
}

#[tokio::test]
async fn every_combination_runs_through_the_full_lifecycle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            repetitions: 2,
            ..Setup::default()
        },
        &log,
    )?;

    let results = runner.run().await?;
    assert_eq!(results.len(), 4);
    for result in results {
        assert_eq!(result.status(), RunStatus::Completed);
        assert_eq!(result.energy_j(), Some(100.0));
        assert_eq!(result.cpu_utilization_mean(), Some(0.5));
        assert!(result.execution_time_s().is_some());
    }

    let events = log.events();
    assert_eq!(events.len(), 4 * 7);
    for run in events.chunks(7) {
        assert!(run[0].starts_with("apply_mode:"));
        assert_eq!(
            &run[1..],
            &[
                "target.start",
                "capture.start:42",
                "driver.run:low",
                "capture.stop",
                "capture.retrieve",
                "target.stop:42",
            ]
        );
    }

    let history = runner.history();
    assert_eq!(history.first(), Some(&RunnerState::BeforeExperiment));
    assert_eq!(history.last(), Some(&RunnerState::Finished));
    let count = |state: RunnerState| history.iter().filter(|s| **s == state).count();
    assert_eq!(count(RunnerState::BeforeExperiment), 1);
    assert_eq!(count(RunnerState::AfterExperiment), 1);
    assert_eq!(count(RunnerState::BeforeRun), 4);
    assert_eq!(count(RunnerState::PopulateRunData), 4);

    let table = fs::read_to_string(dir.path().join(RUN_TABLE_FILE))?;
    assert_eq!(table.lines().count(), 5);
    assert!(dir.path().join(SUMMARY_FILE).exists());

    // each run got its own directory holding its telemetry
    let run_dirs = fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("power.csv").exists())
        .count();
    assert_eq!(run_dirs, 4);
    Ok(())
}

#[tokio::test]
async fn an_experiment_can_only_run_once() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(dir.path(), Setup::default(), &log)?;

    runner.run().await?;
    assert!(runner.run().await.is_err());
    assert_eq!(runner.results().len(), 2);
    Ok(())
}

#[tokio::test]
async fn driver_failure_still_tears_the_run_down() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            workloads: vec!["low", "high"],
            failing_workload: Some("high"),
            ..Setup::default()
        },
        &log,
    )?;

    let results = runner.run().await?;
    assert_eq!(results.len(), 4);

    for result in results {
        let workload = result.combination().value("workload");
        if workload == Some("high") {
            assert!(result.is_failed());
            assert!(result
                .notes()
                .iter()
                .any(|n| n.starts_with("DriverFailed") && n.contains("connection refused")));
        } else {
            assert_eq!(result.status(), RunStatus::Completed);
        }
    }

    let events = log.events();
    assert_eq!(events.iter().filter(|e| *e == "capture.stop").count(), 4);
    assert_eq!(events.iter().filter(|e| e.starts_with("target.stop")).count(), 4);
    Ok(())
}

#[tokio::test]
async fn rejected_mode_is_noted_and_the_run_continues() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            rejected_mode: Some("powersave"),
            ..Setup::default()
        },
        &log,
    )?;

    let results = runner.run().await?;
    let powersave = results
        .iter()
        .find(|r| r.combination().value("governor") == Some("powersave"))
        .expect("powersave run");

    assert_eq!(powersave.status(), RunStatus::Completed);
    assert_eq!(powersave.energy_j(), Some(100.0));
    assert!(powersave
        .notes()
        .iter()
        .any(|n| n.starts_with("PreconditionFailed")));
    Ok(())
}

#[tokio::test]
async fn malformed_telemetry_fails_runs_without_stopping_the_experiment() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            power_log: "this is not a power log\n",
            ..Setup::default()
        },
        &log,
    )?;

    let results = runner.run().await?;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_failed() && r.energy_j().is_none()));
    assert_eq!(runner.state(), Some(RunnerState::Finished));

    let table = fs::read_to_string(dir.path().join(RUN_TABLE_FILE))?;
    assert_eq!(table.lines().filter(|l| l.contains(",failed,")).count(), 2);
    Ok(())
}

#[tokio::test]
async fn cooldown_separates_consecutive_runs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            timing: Timing {
                cooldown_ms: 50,
                ..Timing::immediate()
            },
            ..Setup::default()
        },
        &log,
    )?;

    runner.run().await?;

    let first_stop = log.first("target.stop").expect("first run stopped");
    let events = log.events();
    assert_eq!(events.iter().filter(|e| e.starts_with("apply_mode")).count(), 2);

    // the second apply_mode is the first one logged after the first run stopped
    let second_start = log
        .first_after("apply_mode", first_stop)
        .expect("second run started");
    assert!(second_start.duration_since(first_stop) >= Duration::from_millis(50));
    Ok(())
}

#[tokio::test]
async fn target_that_fails_to_start_is_never_measured_or_driven() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            target_fails: true,
            ..Setup::default()
        },
        &log,
    )?;

    let results = runner.run().await?;
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(result.is_failed());
        assert!(result
            .notes()
            .iter()
            .any(|n| n.starts_with("target failed to start")));
    }

    let events = log.events();
    assert_eq!(events.iter().filter(|e| *e == "target.start").count(), 2);
    assert!(!events.iter().any(|e| e.starts_with("capture.")));
    assert!(!events.iter().any(|e| e.starts_with("driver.run")));
    assert!(!events.iter().any(|e| e.starts_with("target.stop")));
    assert_eq!(runner.state(), Some(RunnerState::Finished));
    Ok(())
}

#[tokio::test]
async fn capture_that_fails_to_start_still_stops_the_target() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = Log::default();
    let mut runner = runner(
        dir.path(),
        Setup {
            capture_fails: true,
            ..Setup::default()
        },
        &log,
    )?;

    let results = runner.run().await?;
    assert_eq!(results.len(), 2);
    for result in results {
        assert!(result.is_failed());
        assert!(result
            .notes()
            .iter()
            .any(|n| n.starts_with("measurement failed to start")));
    }

    let events = log.events();
    assert!(!events.iter().any(|e| e.starts_with("driver.run")));
    assert!(!events.iter().any(|e| e == "capture.stop" || e == "capture.retrieve"));
    assert_eq!(events.iter().filter(|e| *e == "target.stop:42").count(), 2);

    let table = fs::read_to_string(dir.path().join(RUN_TABLE_FILE))?;
    assert_eq!(table.lines().filter(|l| l.contains(",failed,")).count(), 2);
    Ok(())
}
