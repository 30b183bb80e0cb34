/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{finite_or_zero, ParsedRows, Sample, Schema};
use crate::errors::ExperimentError;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::{fs, path::Path, sync::OnceLock};
use tracing::warn;

/// Matches `<hh:mm:ss> <AM|PM> all ... <frequency>`, the per-interval summary line `sar -m CPU`
/// prints. Headers and `Average:` lines do not match.
fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d{1,2}:\d{2}:\d{2})\s+((?i:AM|PM))\s+all\s+(?:.*\s)?(\S+)\s*$")
            .expect("frequency line pattern should compile")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySample {
    pub timestamp: NaiveDateTime,
    pub frequency_mhz: u64,
}
impl Sample for FrequencySample {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

/// Line oriented CPU frequency log.
///
/// The sampler only prints a time of day, so samples are anchored to an arbitrary day. A clock
/// that jumps back by more than twelve hours is taken to have crossed midnight.
#[derive(Debug, Clone, Default)]
pub struct FrequencySchema;

impl Schema for FrequencySchema {
    type Sample = FrequencySample;

    fn parse(&self, path: &Path) -> Result<ParsedRows<FrequencySample>, ExperimentError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ExperimentError::malformed(path, e.to_string()))?;

        let anchor = NaiveDate::default();
        let mut day = 0_i64;
        let mut previous: Option<NaiveTime> = None;

        let mut samples = vec![];
        let mut skipped = 0;
        let mut unparsable = 0;
        for line in contents.lines() {
            let Some(caps) = line_pattern().captures(line) else {
                skipped += 1;
                continue;
            };

            let time = format!("{} {}", &caps[1], caps[2].to_uppercase());
            let Ok(time) = NaiveTime::parse_from_str(&time, "%I:%M:%S %p") else {
                skipped += 1;
                continue;
            };

            let Ok(frequency) = caps[3].parse::<f64>() else {
                unparsable += 1;
                skipped += 1;
                continue;
            };

            if let Some(prev) = previous {
                if prev - time > Duration::hours(12) {
                    day += 1;
                }
            }
            previous = Some(time);

            let frequency_mhz = finite_or_zero(frequency).max(0.0).trunc() as u64;
            samples.push(FrequencySample {
                timestamp: anchor.and_time(time) + Duration::days(day),
                frequency_mhz,
            });
        }

        if unparsable > 0 {
            warn!(
                "{} frequency value(s) in {} could not be parsed and were skipped",
                unparsable,
                path.display()
            );
        }

        Ok(ParsedRows {
            columns: vec!["time".to_string(), "frequency_mhz".to_string()],
            samples,
            skipped,
        })
    }
}
