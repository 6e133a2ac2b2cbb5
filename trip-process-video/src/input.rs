use anyhow::{Context, Result};

use trip_types::{RecordedEvent, TrajectorySample};

/// Load a telemetry trace from a CSV file.
///
/// Expected columns: `timestamp, latitude, longitude, speed,
/// accel_longitudinal, accel_lateral`, with the acceleration columns
/// optional or empty when the recorder did not measure them.
pub fn load_trace_csv(path: &str) -> Result<Vec<TrajectorySample>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("opening trace CSV \"{path}\""))?;
    let mut samples = Vec::new();
    for row in rdr.deserialize() {
        let sample: TrajectorySample =
            row.with_context(|| format!("reading trace CSV \"{path}\""))?;
        samples.push(sample);
    }
    tracing::info!("loaded {} samples from {}", samples.len(), path);
    Ok(samples)
}

/// Load recorded events from a CSV file with columns `timestamp, event_type`.
pub fn load_events_csv(path: &str) -> Result<Vec<RecordedEvent>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("opening events CSV \"{path}\""))?;
    let mut events = Vec::new();
    for row in rdr.deserialize() {
        let event: RecordedEvent =
            row.with_context(|| format!("reading events CSV \"{path}\""))?;
        events.push(event);
    }
    tracing::info!("loaded {} events from {}", events.len(), path);
    Ok(events)
}
