/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod clap_args;
pub mod collaborators;
pub mod combiner;
pub mod config;
pub mod configuration_space;
pub mod energy;
pub mod errors;
pub mod experiment;
pub mod process_control;
pub mod reducer;
pub mod run_table;
pub mod summary;
pub mod telemetry;

use chrono::Local;
use config::Config;
use configuration_space::CombinationQueue;
use experiment::{ExperimentPlan, ExperimentRunner};
use nanoid::nanoid;
use process_control::{ShellCapture, ShellDriver, ShellTarget};
use reducer::RunResult;
use std::path::Path;
use tracing::info;

/// Loads and validates the config at `path`. Configuration problems are the only errors that
/// stop an experiment before its first run.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::try_from_path(path)?;
    config.validate()?;
    Ok(config)
}

/// Runs a whole experiment against the shell collaborators described by `config`.
pub async fn run_experiment(config: Config, seed: Option<u64>) -> anyhow::Result<Vec<RunResult>> {
    let seed = seed.or(config.experiment.seed);
    let queue = CombinationQueue::build(&config.factors, config.experiment.repetitions, seed)?;

    let run_id = format!(
        "{}_{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        nanoid!(5, &nanoid::alphabet::SAFE)
    );
    let output_dir = config.experiment_dir(&run_id);
    info!("experiment output goes to {}", output_dir.display());

    let plan = ExperimentPlan::from_config(&config, output_dir);
    let target = ShellTarget::new(config.target, &config.timing);
    let capture = ShellCapture::new(config.captures, config.telemetry, &config.timing);
    let driver = ShellDriver::new(config.driver, &config.timing);

    let mut runner = ExperimentRunner::new(plan, queue, target, capture, driver)?;
    let results = runner.run().await?;
    Ok(results.to_vec())
}
