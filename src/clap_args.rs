/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Verbose mode (-v, --verbose)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every factor combination of an experiment
    Run {
        /// Path to the experiment config
        #[arg(short, long, default_value = "experiment.toml")]
        config: PathBuf,

        /// Shuffle seed, overrides the one in the config
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Merge finished power logs named `<governor> - <workload>.csv` into one table
    Combine {
        /// Files, or directories whose csv files should be merged
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Where to write the merged table
        #[arg(short, long, default_value = "combined.csv")]
        output: PathBuf,
    },

    /// Integrate the energy of a single power log
    Energy {
        file: PathBuf,
    },

    /// Write an example experiment config
    Init {
        #[arg(default_value = "experiment.toml")]
        path: PathBuf,
    },
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_seed() {
        let args = Args::parse_from(["govlab", "-v", "run", "--seed", "42"]);
        assert!(args.verbose);
        match args.command {
            Commands::Run { config, seed } => {
                assert_eq!(config, PathBuf::from("experiment.toml"));
                assert_eq!(seed, Some(42));
            }
            cmd => panic!("unexpected command {:?}", cmd),
        }
    }

    #[test]
    fn combine_requires_inputs() {
        assert!(Args::try_parse_from(["govlab", "combine"]).is_err());

        let args = Args::try_parse_from(["govlab", "combine", "out", "-o", "all.csv"])
            .expect("valid args");
        assert!(matches!(
            args.command,
            Commands::Combine { inputs, output } if inputs.len() == 1 && output == PathBuf::from("all.csv")
        ));
    }
}
