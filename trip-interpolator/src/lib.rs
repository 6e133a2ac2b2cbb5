//! Reconstruction of a dense physical state signal from sparse telemetry.
//!
//! [`TripInterpolator`] owns a time-sorted copy of the raw samples and
//! answers state queries at arbitrary timestamps within the trace bounds.
//! Traces are classified once at construction as sparse or high-frequency;
//! the two regimes use different strategies to fill in acceleration values
//! that the recorder did not measure.

use trip_types::{
    FrequencyMode, GForceRange, GeoCoord, InterpolatedState, TrajectorySample, STANDARD_GRAVITY,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("query time {query} outside trace domain [{start}, {end}]")]
    OutOfDomain { query: f64, start: f64, end: f64 },
    #[error("trace contains no samples")]
    EmptyTrace,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Number of evenly spaced probe points used by [`TripInterpolator::g_force_range`].
const G_RANGE_SCAN_POINTS: usize = 100;

/// Fraction of the observed G span added as headroom on each side.
const G_RANGE_PADDING: f64 = 0.2;

/// Smallest allowed total span of a [`GForceRange`].
const G_RANGE_MIN_SPAN: f64 = 0.2;

/// Interpolation engine over one trip's telemetry trace.
///
/// Read-only after construction; safe to share across concurrent readers.
pub struct TripInterpolator {
    samples: Vec<TrajectorySample>,
    mode: FrequencyMode,
    /// Effective per-sample (longitudinal, lateral) G values, index-aligned
    /// with `samples`. Present in high-frequency mode only.
    g_table: Option<Vec<(f64, f64)>>,
}

impl TripInterpolator {
    /// Build an engine from samples in any order.
    ///
    /// Samples are sorted by timestamp. An empty input is accepted and
    /// yields a zero-width domain where every query fails.
    pub fn new(mut samples: Vec<TrajectorySample>) -> Self {
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let mode = match mean_interval(&samples) {
            Some(mean) => FrequencyMode::classify(mean),
            None => FrequencyMode::Sparse,
        };

        let g_table = match mode {
            FrequencyMode::HighFrequency => Some(build_g_table(&samples)),
            FrequencyMode::Sparse => None,
        };

        tracing::debug!(
            "trace with {} samples classified as {:?}",
            samples.len(),
            mode
        );

        Self {
            samples,
            mode,
            g_table,
        }
    }

    pub fn mode(&self) -> FrequencyMode {
        self.mode
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    /// The closed time interval this engine can answer queries for.
    pub fn domain(&self) -> Option<(f64, f64)> {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Reconstruct the physical state at time `t`.
    ///
    /// Fails with [`Error::OutOfDomain`] outside the trace bounds. No
    /// extrapolation is ever performed.
    pub fn state_at(&self, t: f64) -> Result<InterpolatedState> {
        let (start, end) = self.domain().ok_or(Error::EmptyTrace)?;
        if t < start || t > end {
            return Err(Error::OutOfDomain {
                query: t,
                start,
                end,
            });
        }

        // First sample with timestamp >= t. Queries at the first sample's
        // own timestamp degenerate to a zero-width bracket below.
        let i2 = self.samples.partition_point(|s| s.timestamp < t);
        let i1 = i2.saturating_sub(1);
        let p1 = &self.samples[i1];
        let p2 = &self.samples[i2];

        let dt = p2.timestamp - p1.timestamp;
        let lin = if dt > 0.0 { (t - p1.timestamp) / dt } else { 0.0 };
        // Cubic ease so speed decelerates/accelerates smoothly into each
        // waypoint instead of changing slope abruptly.
        let eased = lin * lin * (3.0 - 2.0 * lin);

        let speed = p1.speed + (p2.speed - p1.speed) * eased;
        let coordinate = GeoCoord {
            latitude: p1.latitude + (p2.latitude - p1.latitude) * lin,
            longitude: p1.longitude + (p2.longitude - p1.longitude) * lin,
        };

        let g_longitudinal = self.longitudinal_g(i1, i2, lin, dt);
        let g_lateral = self.lateral_g(i1, i2, lin, dt, speed);

        Ok(InterpolatedState {
            timestamp: t,
            coordinate,
            speed,
            g_longitudinal,
            g_lateral,
        })
    }

    /// Observed G extent over the whole trip, padded and floored so a nearly
    /// static trip still yields a usable chart scale.
    ///
    /// Deterministic for a fixed input trace.
    pub fn g_force_range(&self) -> GForceRange {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        if let Some((start, end)) = self.domain() {
            let span = end - start;
            for i in 0..G_RANGE_SCAN_POINTS {
                let frac = i as f64 / (G_RANGE_SCAN_POINTS - 1) as f64;
                let t = start + span * frac;
                if let Ok(state) = self.state_at(t) {
                    min = min.min(state.g_longitudinal).min(state.g_lateral);
                    max = max.max(state.g_longitudinal).max(state.g_lateral);
                }
            }
        }

        if !min.is_finite() || !max.is_finite() {
            min = 0.0;
            max = 0.0;
        }

        let padding = G_RANGE_PADDING * (max - min);
        let mut padded = GForceRange {
            min: min - padding,
            max: max + padding,
        };

        if padded.span() < G_RANGE_MIN_SPAN {
            let center = 0.5 * (padded.min + padded.max);
            padded = GForceRange {
                min: center - 0.5 * G_RANGE_MIN_SPAN,
                max: center + 0.5 * G_RANGE_MIN_SPAN,
            };
        }

        padded
    }

    fn longitudinal_g(&self, i1: usize, i2: usize, lin: f64, dt: f64) -> f64 {
        let p1 = &self.samples[i1];
        let p2 = &self.samples[i2];

        if let (Some(a1), Some(a2)) = (p1.accel_longitudinal, p2.accel_longitudinal) {
            return a1 + (a2 - a1) * lin;
        }

        // Measured data is trusted over derived estimates: in high-frequency
        // mode the table already substituted the nearest measured value.
        if let Some(table) = &self.g_table {
            let (a1, _) = table[i1];
            let (a2, _) = table[i2];
            return a1 + (a2 - a1) * lin;
        }

        finite_difference_g(p1.speed, p2.speed, dt)
    }

    fn lateral_g(&self, i1: usize, i2: usize, lin: f64, dt: f64, speed: f64) -> f64 {
        let p1 = &self.samples[i1];
        let p2 = &self.samples[i2];

        if let (Some(a1), Some(a2)) = (p1.accel_lateral, p2.accel_lateral) {
            return a1 + (a2 - a1) * lin;
        }

        if let Some(table) = &self.g_table {
            let (_, a1) = table[i1];
            let (_, a2) = table[i2];
            return a1 + (a2 - a1) * lin;
        }

        let heading_now = heading_degrees(p1.coord(), p2.coord());
        // The pair preceding p1, falling back to the bracketing pair itself
        // when none precedes (which makes the angular rate zero).
        let heading_prev = if i1 > 0 {
            let p0 = &self.samples[i1 - 1];
            heading_degrees(p0.coord(), p1.coord())
        } else {
            heading_now
        };

        angular_rate_g(heading_prev, heading_now, dt, speed)
    }
}

fn mean_interval(samples: &[TrajectorySample]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let first = samples.first().unwrap().timestamp;
    let last = samples.last().unwrap().timestamp;
    Some((last - first) / (samples.len() - 1) as f64)
}

/// Longitudinal G from the finite difference of speed over an interval.
fn finite_difference_g(speed1: f64, speed2: f64, dt: f64) -> f64 {
    if dt > 0.0 {
        ((speed2 - speed1) / dt) / STANDARD_GRAVITY
    } else {
        0.0
    }
}

/// Lateral G from the angular rate between two segment headings.
fn angular_rate_g(heading_prev: f64, heading_now: f64, dt: f64, speed: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    let delta = wrap_degrees(heading_now - heading_prev);
    let omega = delta.to_radians() / dt;
    (speed * omega) / STANDARD_GRAVITY
}

/// Initial great-circle bearing from `from` to `to`, in degrees in
/// (-180°, 180°]. 0° is north, 90° is east.
pub fn heading_degrees(from: GeoCoord, to: GeoCoord) -> f64 {
    let phi1 = from.latitude.to_radians();
    let phi2 = to.latitude.to_radians();
    let dlambda = (to.longitude - from.longitude).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    y.atan2(x).to_degrees()
}

/// Signed shortest angular difference, wrapped into [-180°, 180°].
fn wrap_degrees(mut degrees: f64) -> f64 {
    while degrees > 180.0 {
        degrees -= 360.0;
    }
    while degrees < -180.0 {
        degrees += 360.0;
    }
    degrees
}

/// Effective per-sample G values for high-frequency traces.
///
/// Index-aligned with the sorted sample array so lookups never go through a
/// floating-point timestamp key. Missing measured values are substituted
/// from the nearest sample carrying one; only when no sample on either side
/// measured the axis does the derived estimate fill in.
fn build_g_table(samples: &[TrajectorySample]) -> Vec<(f64, f64)> {
    (0..samples.len())
        .map(|i| {
            let longitudinal = samples[i]
                .accel_longitudinal
                .or_else(|| nearest_measured(samples, i, |s| s.accel_longitudinal))
                .unwrap_or_else(|| estimate_longitudinal(samples, i));
            let lateral = samples[i]
                .accel_lateral
                .or_else(|| nearest_measured(samples, i, |s| s.accel_lateral))
                .unwrap_or_else(|| estimate_lateral(samples, i));
            (longitudinal, lateral)
        })
        .collect()
}

/// Value of `axis` from the sample nearest to index `i` (by index distance,
/// earlier sample winning ties) that measured it.
fn nearest_measured<F>(samples: &[TrajectorySample], i: usize, axis: F) -> Option<f64>
where
    F: Fn(&TrajectorySample) -> Option<f64>,
{
    for distance in 1..samples.len() {
        if distance <= i {
            if let Some(v) = axis(&samples[i - distance]) {
                return Some(v);
            }
        }
        if i + distance < samples.len() {
            if let Some(v) = axis(&samples[i + distance]) {
                return Some(v);
            }
        }
    }
    None
}

fn estimate_longitudinal(samples: &[TrajectorySample], i: usize) -> f64 {
    let (j1, j2) = bracketing_indices(samples.len(), i);
    let p1 = &samples[j1];
    let p2 = &samples[j2];
    finite_difference_g(p1.speed, p2.speed, p2.timestamp - p1.timestamp)
}

fn estimate_lateral(samples: &[TrajectorySample], i: usize) -> f64 {
    if i == 0 || i + 1 >= samples.len() {
        return 0.0;
    }
    let prev = heading_degrees(samples[i - 1].coord(), samples[i].coord());
    let next = heading_degrees(samples[i].coord(), samples[i + 1].coord());
    let dt = samples[i + 1].timestamp - samples[i].timestamp;
    angular_rate_g(prev, next, dt, samples[i].speed)
}

/// Forward interval at `i`, degrading to the backward interval at the end.
fn bracketing_indices(len: usize, i: usize) -> (usize, usize) {
    if i + 1 < len {
        (i, i + 1)
    } else if i > 0 {
        (i - 1, i)
    } else {
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(timestamp: f64, latitude: f64, longitude: f64, speed: f64) -> TrajectorySample {
        TrajectorySample {
            timestamp,
            latitude,
            longitude,
            speed,
            accel_longitudinal: None,
            accel_lateral: None,
        }
    }

    #[test]
    fn sparse_classification_from_intervals() {
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 0.0),
            sample(1.0, 0.0, 0.0, 1.0),
            sample(2.0, 0.0, 0.0, 2.0),
        ]);
        assert_eq!(engine.mode(), FrequencyMode::Sparse);

        let engine = TripInterpolator::new(
            (0..20)
                .map(|i| sample(i as f64 * 0.1, 0.0, 0.0, 1.0))
                .collect(),
        );
        assert_eq!(engine.mode(), FrequencyMode::HighFrequency);
    }

    #[test]
    fn unsorted_input_is_sorted() {
        let engine = TripInterpolator::new(vec![
            sample(10.0, 0.0, 0.0, 20.0),
            sample(0.0, 0.0, 0.0, 0.0),
        ]);
        assert_eq!(engine.domain(), Some((0.0, 10.0)));
    }

    #[test]
    fn query_at_exact_sample_returns_sample_values() {
        let mut s1 = sample(0.0, 10.0, 20.0, 5.0);
        s1.accel_longitudinal = Some(0.3);
        s1.accel_lateral = Some(-0.1);
        let mut s2 = sample(2.0, 10.1, 20.1, 7.0);
        s2.accel_longitudinal = Some(0.5);
        s2.accel_lateral = Some(0.2);

        let engine = TripInterpolator::new(vec![s1, s2]);
        let state = engine.state_at(2.0).unwrap();
        assert_relative_eq!(state.coordinate.latitude, 10.1);
        assert_relative_eq!(state.coordinate.longitude, 20.1);
        assert_relative_eq!(state.speed, 7.0);
        assert_relative_eq!(state.g_longitudinal, 0.5);
        assert_relative_eq!(state.g_lateral, 0.2);

        let state = engine.state_at(0.0).unwrap();
        assert_relative_eq!(state.speed, 5.0);
        assert_relative_eq!(state.g_longitudinal, 0.3);
    }

    #[test]
    fn midpoint_speed_is_arithmetic_mean() {
        // The smoothstep ease at t=0.5 is exactly 0.5, so the midpoint speed
        // is the arithmetic mean of the bracketing samples.
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 0.0),
            sample(10.0, 0.001, 0.0, 20.0),
        ]);
        assert_eq!(engine.mode(), FrequencyMode::Sparse);

        let state = engine.state_at(5.0).unwrap();
        assert_relative_eq!(state.speed, 10.0);
        assert_relative_eq!(
            state.g_longitudinal,
            (20.0 / 10.0) / STANDARD_GRAVITY,
            epsilon = 1e-12
        );
    }

    #[test]
    fn speed_never_overshoots_bracketing_samples() {
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 3.0),
            sample(4.0, 0.0, 0.0, 9.0),
        ]);
        let mut previous = 3.0;
        for i in 0..=100 {
            let t = 4.0 * i as f64 / 100.0;
            let speed = engine.state_at(t).unwrap().speed;
            assert!(speed >= 3.0 && speed <= 9.0, "speed {speed} at t {t}");
            assert!(speed >= previous, "speed not monotonic at t {t}");
            previous = speed;
        }
        assert_relative_eq!(engine.state_at(0.0).unwrap().speed, 3.0);
        assert_relative_eq!(engine.state_at(4.0).unwrap().speed, 9.0);
    }

    #[test]
    fn out_of_domain_query_fails() {
        let engine = TripInterpolator::new(vec![
            sample(1.0, 0.0, 0.0, 0.0),
            sample(2.0, 0.0, 0.0, 0.0),
        ]);
        assert!(matches!(
            engine.state_at(0.5),
            Err(Error::OutOfDomain { .. })
        ));
        assert!(matches!(
            engine.state_at(2.5),
            Err(Error::OutOfDomain { .. })
        ));
    }

    #[test]
    fn single_sample_trace_has_zero_width_domain() {
        let engine = TripInterpolator::new(vec![sample(5.0, 1.0, 2.0, 3.0)]);
        assert_eq!(engine.domain(), Some((5.0, 5.0)));

        let state = engine.state_at(5.0).unwrap();
        assert_relative_eq!(state.speed, 3.0);
        assert_relative_eq!(state.g_longitudinal, 0.0);
        assert_relative_eq!(state.g_lateral, 0.0);

        assert!(engine.state_at(4.999).is_err());
        assert!(engine.state_at(5.001).is_err());
    }

    #[test]
    fn empty_trace_never_answers() {
        let engine = TripInterpolator::new(vec![]);
        assert!(engine.domain().is_none());
        assert!(matches!(engine.state_at(0.0), Err(Error::EmptyTrace)));
    }

    #[test]
    fn duplicate_timestamps_do_not_divide_by_zero() {
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 1.0),
            sample(1.0, 0.0, 0.0, 2.0),
            sample(1.0, 0.0, 0.0, 4.0),
            sample(2.0, 0.0, 0.0, 6.0),
        ]);
        let state = engine.state_at(1.0).unwrap();
        assert!(state.speed.is_finite());
        assert!(state.g_longitudinal.is_finite());
        assert!(state.g_lateral.is_finite());
    }

    #[test]
    fn g_range_is_ordered_and_contains_observations() {
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 0.0),
            sample(10.0, 0.001, 0.0, 20.0),
            sample(20.0, 0.002, 0.001, 5.0),
        ]);
        let range = engine.g_force_range();
        assert!(range.max >= range.min);

        let (start, end) = engine.domain().unwrap();
        for i in 0..100 {
            let t = start + (end - start) * i as f64 / 99.0;
            let state = engine.state_at(t).unwrap();
            assert!(range.contains(state.g_longitudinal));
            assert!(range.contains(state.g_lateral));
        }
    }

    #[test]
    fn g_range_has_minimum_span_for_static_trips() {
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 5.0),
            sample(1.0, 0.0, 0.0, 5.0),
            sample(2.0, 0.0, 0.0, 5.0),
        ]);
        let range = engine.g_force_range();
        assert!(range.span() >= 0.2 - 1e-12);
    }

    #[test]
    fn heading_cardinal_directions() {
        let origin = GeoCoord {
            latitude: 0.0,
            longitude: 0.0,
        };
        let north = GeoCoord {
            latitude: 1.0,
            longitude: 0.0,
        };
        let east = GeoCoord {
            latitude: 0.0,
            longitude: 1.0,
        };
        let south = GeoCoord {
            latitude: -1.0,
            longitude: 0.0,
        };
        assert_relative_eq!(heading_degrees(origin, north), 0.0);
        assert_relative_eq!(heading_degrees(origin, east), 90.0);
        assert_relative_eq!(heading_degrees(origin, south), 180.0);
    }

    #[test]
    fn wrap_degrees_shortest_difference() {
        assert_relative_eq!(wrap_degrees(190.0), -170.0);
        assert_relative_eq!(wrap_degrees(-190.0), 170.0);
        assert_relative_eq!(wrap_degrees(45.0), 45.0);
    }

    #[test]
    fn high_frequency_prefers_nearest_measured_value() {
        // Only one sample measured the longitudinal axis; its value should
        // win over the finite-difference estimate everywhere.
        let mut samples: Vec<TrajectorySample> = (0..20)
            .map(|i| sample(i as f64 * 0.1, 0.0, 0.0, i as f64))
            .collect();
        samples[10].accel_longitudinal = Some(0.7);

        let engine = TripInterpolator::new(samples);
        assert_eq!(engine.mode(), FrequencyMode::HighFrequency);

        let state = engine.state_at(0.45).unwrap();
        assert_relative_eq!(state.g_longitudinal, 0.7);
    }

    #[test]
    fn sparse_mode_estimates_lateral_from_heading_rate() {
        // 90° turn over one second at constant speed: the heading change
        // between successive segments produces a nonzero lateral G.
        let engine = TripInterpolator::new(vec![
            sample(0.0, 0.0, 0.0, 10.0),
            sample(1.0, 0.001, 0.0, 10.0),
            sample(2.0, 0.001, 0.001, 10.0),
        ]);
        let state = engine.state_at(1.5).unwrap();
        assert!(state.g_lateral > 0.0);

        // Before any heading history exists the angular rate is zero.
        let state = engine.state_at(0.5).unwrap();
        assert_relative_eq!(state.g_lateral, 0.0);
    }
}
