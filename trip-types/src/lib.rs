//! Shared value types for trip telemetry processing.

use serde::{Deserialize, Serialize};

/// Standard gravity, in m/s².
pub const STANDARD_GRAVITY: f64 = 9.81;

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoord {
    /// latitude in degrees
    pub latitude: f64,
    /// longitude in degrees
    pub longitude: f64,
}

/// One raw telemetry reading.
///
/// The optional acceleration fields carry already-measured G values. When
/// absent, downstream consumers estimate them from position and speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    /// seconds, relative to an arbitrary trip epoch
    pub timestamp: f64,
    /// latitude in degrees
    pub latitude: f64,
    /// longitude in degrees
    pub longitude: f64,
    /// speed over ground in m/s
    pub speed: f64,
    /// measured longitudinal acceleration in G, if the recorder provided one
    #[serde(default)]
    pub accel_longitudinal: Option<f64>,
    /// measured lateral acceleration in G, if the recorder provided one
    #[serde(default)]
    pub accel_lateral: Option<f64>,
}

impl TrajectorySample {
    pub fn coord(&self) -> GeoCoord {
        GeoCoord {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Sampling-density classification of a trace, chosen once at construction.
///
/// Governs which estimation strategy fills missing acceleration values and
/// which chart time-window/step size is used when rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyMode {
    /// Mean inter-sample interval of 0.25 s or more (typically ~1 Hz GPS).
    Sparse,
    /// Mean inter-sample interval below 0.25 s (typically ≥4 Hz loggers).
    HighFrequency,
}

impl FrequencyMode {
    /// Mean inter-sample intervals below this many seconds classify as
    /// [`FrequencyMode::HighFrequency`].
    pub const HIGH_FREQUENCY_THRESHOLD: f64 = 0.25;

    /// Classify from the mean inter-sample interval in seconds.
    pub fn classify(mean_interval: f64) -> Self {
        if mean_interval < Self::HIGH_FREQUENCY_THRESHOLD {
            FrequencyMode::HighFrequency
        } else {
            FrequencyMode::Sparse
        }
    }

    /// Trailing chart window in seconds.
    pub fn chart_window(&self) -> f64 {
        match self {
            FrequencyMode::Sparse => 100.0,
            FrequencyMode::HighFrequency => 20.0,
        }
    }

    /// Chart sampling step in seconds.
    pub fn chart_step(&self) -> f64 {
        match self {
            FrequencyMode::Sparse => 0.1,
            FrequencyMode::HighFrequency => 0.033,
        }
    }
}

/// The reconstructed physical state at one query timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolatedState {
    /// seconds, same epoch as the source samples
    pub timestamp: f64,
    pub coordinate: GeoCoord,
    /// speed over ground in m/s
    pub speed: f64,
    /// longitudinal acceleration in G (positive forward)
    pub g_longitudinal: f64,
    /// lateral acceleration in G (positive rightward)
    pub g_lateral: f64,
}

impl InterpolatedState {
    pub fn speed_kmh(&self) -> f64 {
        self.speed * 3.6
    }
}

/// Observed G-force extent over a whole trip, used as a fixed chart scale.
///
/// Computed once per export session and immutable thereafter so that chart
/// scale and color mapping do not jitter frame-to-frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GForceRange {
    pub min: f64,
    pub max: f64,
}

impl GForceRange {
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, g: f64) -> bool {
        g >= self.min && g <= self.max
    }
}

/// An event recorded alongside the trace, placed as a marker when rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// seconds, same epoch as the trace
    pub timestamp: f64,
    pub event_type: String,
}
