/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{configuration_space::Factor, errors::ExperimentError, telemetry::PowerColumns};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

static EXAMPLE_CONFIG: &str = include_str!("templates/experiment.toml");

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub experiment: Experiment,
    #[serde(rename(serialize = "factor", deserialize = "factor"))]
    pub factors: Vec<Factor>,
    #[serde(rename(serialize = "workload", deserialize = "workload"))]
    pub workloads: Vec<Workload>,
    #[serde(default)]
    pub timing: Timing,
    pub target: Target,
    #[serde(rename(serialize = "capture", deserialize = "capture"), default)]
    pub captures: Vec<Capture>,
    pub driver: Driver,
    #[serde(default)]
    pub telemetry: Telemetry,
}
impl Config {
    /// Writes the example configuration to `path`. Never overwrites an existing file.
    pub fn write_example_to_file(path: &Path) -> anyhow::Result<File> {
        let mut file = File::create_new(path)?;
        File::write_all(&mut file, EXAMPLE_CONFIG.as_bytes())?;
        Ok(file)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<Config> {
        let mut config_str = String::new();
        fs::File::open(path)
            .context(format!("Unable to open config {}", path.display()))?
            .read_to_string(&mut config_str)?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> anyhow::Result<Config> {
        toml::from_str::<Config>(conf_str).map_err(|e| anyhow::anyhow!("TOML parsing error: {}", e))
    }

    /// Checks everything that would make the experiment impossible to run. These are the only
    /// errors that stop an experiment before it starts.
    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.factors.is_empty() {
            return Err(ExperimentError::EmptyFactorSet);
        }

        for factor_name in [&self.experiment.mode_factor, &self.experiment.workload_factor] {
            if self.find_factor(factor_name).is_none() {
                return Err(ExperimentError::UnknownFactor(factor_name.clone()));
            }
        }

        if let Some(workload_factor) = self.find_factor(&self.experiment.workload_factor) {
            for value in workload_factor.values.iter() {
                if self.find_workload(value).is_none() {
                    return Err(ExperimentError::UnknownWorkload(value.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn find_factor(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|factor| factor.name == name)
    }

    pub fn find_workload(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|workload| workload.name == name)
    }

    /// Directory holding everything one invocation of the experiment produces.
    pub fn experiment_dir(&self, run_id: &str) -> PathBuf {
        self.experiment
            .output_dir
            .join(format!("{}_{}", self.experiment.name, run_id))
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_repetitions() -> u32 {
    1
}

fn default_mode_factor() -> String {
    "governor".to_string()
}

fn default_workload_factor() -> String {
    "workload".to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Experiment {
    pub name: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    pub seed: Option<u64>,
    /// Factor whose value is applied to the target as its operating mode before each run.
    #[serde(default = "default_mode_factor")]
    pub mode_factor: String,
    /// Factor whose value selects the entry of the workload table.
    #[serde(default = "default_workload_factor")]
    pub workload_factor: String,
}

/// How hard, and for how long, the benchmark driver pushes the target.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct Workload {
    pub name: String,
    pub threads: u32,
    pub connections: u32,
    pub duration_secs: u64,
    pub rate: u32,
    /// Time to keep the target running after the driver returns.
    #[serde(default)]
    pub hold_secs: u64,
}
impl Workload {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct Timing {
    pub mode_settle_ms: u64,
    pub measurement_settle_ms: u64,
    pub flush_delay_ms: u64,
    pub cooldown_ms: u64,
    pub capture_stop_timeout_ms: u64,
    pub driver_grace_ms: u64,
    pub target_start_check_ms: u64,
}
impl Default for Timing {
    fn default() -> Self {
        Self {
            mode_settle_ms: 2000,
            measurement_settle_ms: 1000,
            flush_delay_ms: 2000,
            cooldown_ms: 30000,
            capture_stop_timeout_ms: 10000,
            driver_grace_ms: 60000,
            target_start_check_ms: 500,
        }
    }
}
impl Timing {
    /// No waiting at all, handy for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            mode_settle_ms: 0,
            measurement_settle_ms: 0,
            flush_delay_ms: 0,
            cooldown_ms: 0,
            capture_stop_timeout_ms: 1000,
            driver_grace_ms: 1000,
            target_start_check_ms: 0,
        }
    }

    pub fn mode_settle(&self) -> Duration {
        Duration::from_millis(self.mode_settle_ms)
    }

    pub fn measurement_settle(&self) -> Duration {
        Duration::from_millis(self.measurement_settle_ms)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn capture_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_stop_timeout_ms)
    }

    pub fn driver_grace(&self) -> Duration {
        Duration::from_millis(self.driver_grace_ms)
    }

    /// How long a freshly started target must stay up before it counts as running.
    pub fn target_start_check(&self) -> Duration {
        Duration::from_millis(self.target_start_check_ms)
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Redirect {
    Null,
    Parent,
    File,
}

/// Commands controlling the system under test. `{mode}` and `{pid}` are substituted.
#[derive(Debug, Deserialize, PartialEq, Serialize, Clone)]
pub struct Target {
    pub apply_mode: String,
    pub up: String,
    pub down: Option<String>,
    pub redirect: Option<Redirect>,
}

/// A telemetry sampler. `{target}` in `up` is the id of the running target. `down` defaults to
/// sending SIGINT to the sampler, `retrieve` copies its log into `{run_dir}`.
#[derive(Debug, Deserialize, PartialEq, Serialize, Clone)]
pub struct Capture {
    pub name: String,
    pub up: String,
    pub down: Option<String>,
    pub retrieve: Option<String>,
}

/// Benchmark command. `{threads}`, `{connections}`, `{duration}`, `{rate}` and `{workload}` are
/// substituted from the workload table.
#[derive(Debug, Deserialize, PartialEq, Serialize, Clone)]
pub struct Driver {
    pub command: String,
}

fn default_power_file() -> String {
    "powerjoular.csv".to_string()
}

#[derive(Debug, Deserialize, PartialEq, Serialize, Clone)]
pub struct Telemetry {
    #[serde(default = "default_power_file")]
    pub power_file: String,
    pub frequency_file: Option<String>,
    #[serde(flatten)]
    pub columns: PowerColumns,
}
impl Default for Telemetry {
    fn default() -> Self {
        Self {
            power_file: default_power_file(),
            frequency_file: None,
            columns: PowerColumns::default(),
        }
    }
}
