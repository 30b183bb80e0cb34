/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The side effects of an experiment. The state machine only ever talks to the target, the
//! telemetry samplers and the benchmark through these traits, which keeps it testable with
//! fakes. Handles are opaque to the state machine.

use crate::{config::Workload, reducer::TelemetryFiles};
use async_trait::async_trait;
use std::path::Path;

/// Something that identifies a running target to the telemetry samplers.
pub trait TargetHandle: Send {
    fn id(&self) -> String;
}

#[async_trait]
pub trait TargetControl: Send {
    type Handle: TargetHandle;

    /// Switches a system wide operating mode (e.g. the cpu frequency governor). Returns once the
    /// change has been acknowledged.
    async fn apply_mode(&mut self, mode: &str) -> anyhow::Result<()>;

    async fn start(&mut self) -> anyhow::Result<Self::Handle>;

    async fn stop(&mut self, handle: Self::Handle) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MeasurementCapture: Send {
    type Handle: Send;

    async fn start(&mut self, target: &str) -> anyhow::Result<Self::Handle>;

    /// Asks the samplers to shut down gracefully and waits for them to exit.
    async fn stop(&mut self, handle: Self::Handle) -> anyhow::Result<()>;

    /// Copies whatever logs the samplers produced into `run_dir`.
    async fn retrieve(&mut self, run_dir: &Path) -> anyhow::Result<TelemetryFiles>;
}

/// What the benchmark printed and how it exited. `exit_code` is `None` if it was killed by a
/// signal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriverOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}
impl DriverOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait BenchmarkDriver: Send {
    /// Runs the benchmark at the intensity and for the duration the workload describes. Blocks
    /// until the benchmark exits.
    async fn run(&mut self, workload: &Workload) -> anyhow::Result<DriverOutput>;
}
