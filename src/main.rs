/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::{anyhow, Context};
use colored::*;
use govlab::{
    clap_args::{self, Commands},
    combiner,
    config::Config,
    energy, load_config, run_experiment,
    telemetry::{self, PowerSchema},
};
use tracing::{info, subscriber::set_global_default, warn, Subscriber};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = clap_args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    init_subscriber(get_subscriber(level.to_string()))?;

    match args.command {
        Commands::Run { config, seed } => {
            let config = load_config(&config)?;

            tokio::select! {
                res = run_experiment(config, seed) => {
                    let results = res?;
                    let failed = results.iter().filter(|r| r.is_failed()).count();
                    info!("experiment finished, {} of {} runs failed", failed, results.len());
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, the run in flight is lost and will not be resumed");
                    return Err(anyhow!("Experiment interrupted"));
                }
            }
        }

        Commands::Combine { inputs, output } => {
            let paths = combiner::collect_inputs(&inputs)?;
            let table = combiner::combine(&paths, &PowerSchema::default());
            table.write_csv(&output)?;

            println!(
                "> wrote {} rows to {}",
                table.len(),
                output.display().to_string().green()
            );
        }

        Commands::Energy { file } => {
            let series = telemetry::read(&file, &PowerSchema::default())?;
            let joules = energy::integrate(&series)?;

            println!(
                "{}: {} over {} samples ({} skipped)",
                file.display(),
                format!("{joules:.3}J").green(),
                series.len(),
                series.skipped()
            );
        }

        Commands::Init { path } => {
            Config::write_example_to_file(&path)
                .context(format!("Unable to write example config to {}", path.display()))?;
            println!("> wrote example config to {}", path.display());
        }
    }

    Ok(())
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) -> anyhow::Result<()> {
    set_global_default(subscriber).context("Failed to set subscriber")
}
