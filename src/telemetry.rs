/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod frequency;
pub mod power;

use crate::errors::ExperimentError;
use chrono::{DateTime, NaiveDateTime};
use itertools::Itertools;
use std::path::Path;
use tracing::debug;

pub use frequency::{FrequencySample, FrequencySchema};
pub use power::{PowerColumns, PowerSample, PowerSchema};

/// A single observation taken from a telemetry source.
pub trait Sample {
    fn timestamp(&self) -> NaiveDateTime;
}

/// Rows a schema managed to parse out of a source, before ordering.
#[derive(Debug)]
pub struct ParsedRows<S> {
    pub columns: Vec<String>,
    pub samples: Vec<S>,
    pub skipped: usize,
}

/// Describes how to pull samples out of one kind of telemetry file. Parsing is permissive: rows
/// which cannot be understood are counted in `ParsedRows::skipped`, never returned as errors.
pub trait Schema {
    type Sample: Sample;

    fn parse(&self, path: &Path) -> Result<ParsedRows<Self::Sample>, ExperimentError>;
}

/// Valid samples of one source, ordered by timestamp, with the elapsed time of every sample
/// measured in seconds from the first one.
#[derive(Debug, Clone)]
pub struct CleanedSeries<S> {
    columns: Vec<String>,
    samples: Vec<S>,
    elapsed: Vec<f64>,
    skipped: usize,
}
impl<S: Sample> CleanedSeries<S> {
    pub fn new(columns: Vec<String>, mut samples: Vec<S>, skipped: usize) -> Self {
        // input order is whatever the sampler flushed, ties keep their file order
        samples.sort_by_key(|s| s.timestamp());

        let elapsed = match samples.first() {
            Some(first) => {
                let start = first.timestamp();
                samples
                    .iter()
                    .map(|s| elapsed_seconds(start, s.timestamp()))
                    .collect_vec()
            }
            None => vec![],
        };

        Self {
            columns,
            samples,
            elapsed,
            skipped,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn samples(&self) -> &[S] {
        &self.samples
    }

    pub fn elapsed(&self) -> &[f64] {
        &self.elapsed
    }

    /// Number of rows dropped while cleaning.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Pairs every sample with its elapsed time.
    pub fn points(&self) -> impl Iterator<Item = (f64, &S)> {
        self.elapsed.iter().copied().zip(self.samples.iter())
    }

    /// Arithmetic mean of the values selected by `f`, `None` if no sample provides one.
    pub fn mean_of(&self, f: impl Fn(&S) -> Option<f64>) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter_map(f)
            .fold((0_f64, 0_usize), |(sum, count), x| (sum + x, count + 1));

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Reads and cleans a telemetry file.
///
/// # Errors
///
/// `MalformedInput` when the file cannot be read or when no valid row survives cleaning.
pub fn read<T: Schema>(path: &Path, schema: &T) -> Result<CleanedSeries<T::Sample>, ExperimentError> {
    let parsed = schema.parse(path)?;
    if parsed.samples.is_empty() {
        return Err(ExperimentError::malformed(
            path,
            format!("no valid rows ({} skipped)", parsed.skipped),
        ));
    }

    debug!(
        "read {} samples from {} ({} rows skipped)",
        parsed.samples.len(),
        path.display(),
        parsed.skipped
    );
    Ok(CleanedSeries::new(
        parsed.columns,
        parsed.samples,
        parsed.skipped,
    ))
}

/// Infinities and NaN are replaced by zero.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0_f64
    }
}

pub fn elapsed_seconds(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000_f64,
        None => delta.num_milliseconds() as f64 / 1000_f64,
    }
}

const TIMESTAMP_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Coerces a timestamp-like cell into a point in time. Accepts RFC 3339, the usual
/// `YYYY-MM-DD HH:MM:SS[.fff]` variants and unix epoch seconds. Returns `None` for anything
/// else.
pub fn parse_timestamp(cell: &str) -> Option<NaiveDateTime> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.naive_utc());
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cell, format) {
            return Some(dt);
        }
    }

    // epoch seconds
    let secs = cell.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)?;
    let whole = secs.trunc();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999)).map(|dt| dt.naive_utc())
}
