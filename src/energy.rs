/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    errors::ExperimentError,
    telemetry::{CleanedSeries, PowerSample},
};
use itertools::Itertools;

/// Integrates instantaneous power over the elapsed time axis of the series with the trapezoidal
/// rule. The result is in joules when power is in watts.
///
/// # Errors
///
/// `InsufficientData` when the series holds fewer than two samples.
pub fn integrate(series: &CleanedSeries<PowerSample>) -> Result<f64, ExperimentError> {
    let points = series
        .points()
        .map(|(t, sample)| (t, sample.power))
        .collect_vec();

    trapezoid(&points)
}

/// Trapezoidal integral of `(x, y)` points. Points are ordered by `x` first, spacing does not
/// need to be uniform.
pub fn trapezoid(points: &[(f64, f64)]) -> Result<f64, ExperimentError> {
    if points.len() < 2 {
        return Err(ExperimentError::InsufficientData {
            points: points.len(),
        });
    }

    let area: f64 = points
        .iter()
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
        .tuple_windows()
        .map(|(a, b)| 0.5 * (a.1 + b.1) * (b.0 - a.0))
        .sum();

    Ok(area)
}
