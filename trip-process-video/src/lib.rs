//! Parallel export of telemetry overlay video.
//!
//! The export pipeline precomputes the interpolated state of every output
//! frame, renders frames in fixed-size batches across blocking worker
//! tasks, restores presentation order, and drains the results into a
//! [`FrameSink`] under backpressure. Batches run sequentially relative to
//! each other, so peak memory stays bounded by one batch of in-flight
//! buffers plus the sink queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use movie_writer::FrameSink;
use overlay_frame::{FramePool, PooledFrame};
use overlay_render::{OverlayResources, SceneContext};
use trip_interpolator::TripInterpolator;
use trip_types::{InterpolatedState, RecordedEvent, TrajectorySample};

mod config;
pub use config::{
    ExportConfig, Valid, DEFAULT_BATCH_SIZE, DEFAULT_FRAME_RATE, DEFAULT_HISTORY_FRAMES,
    DEFAULT_SINK_QUEUE_FRAMES,
};

mod input;
pub use input::{load_events_csv, load_trace_csv};

/// How long to suspend between readiness re-checks.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// No remaining-time estimate is reported below this completed fraction.
const PROGRESS_REPORT_THRESHOLD: f64 = 0.01;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("interpolation failed: {source}")]
    Interpolate {
        #[from]
        source: trip_interpolator::Error,
    },
    #[error("render failed: {source}")]
    Render {
        #[from]
        source: overlay_render::Error,
    },
    #[error("sink failed: {source}")]
    Sink {
        #[from]
        source: movie_writer::SinkError,
    },
    #[error(transparent)]
    Frame(#[from] overlay_frame::Error),
    #[error("render worker terminated unexpectedly")]
    WorkerLost,
    #[error("export cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Cooperative cancellation handle for a running export.
///
/// Cheap to clone; setting it stops the pipeline at the next suspension
/// point without finalizing the sink.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress snapshot reported after each drained batch.
#[derive(Debug, Clone, Copy)]
pub struct ExportProgress {
    pub frames_delivered: u64,
    pub total_frames: u64,
    /// Completed fraction in `[0, 1]`.
    pub fraction: f64,
    pub elapsed: Duration,
    /// Linear extrapolation of the remaining wall time. `None` until enough
    /// of the export completed for the estimate to mean anything.
    pub remaining: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExportSummary {
    pub frames_delivered: u64,
    pub elapsed: Duration,
}

/// Everything precomputed before the first frame renders.
///
/// The interpolated state of every output frame and the trip-wide G range
/// are fixed here, so every render sees the same chart scale no matter when
/// it runs.
pub struct ExportPlan {
    states: Arc<Vec<InterpolatedState>>,
    scene: Arc<SceneContext>,
    pool: Arc<FramePool>,
    /// Index of the last output frame; the export delivers
    /// `0..=last_frame_index`.
    last_frame_index: u64,
    batch_size: u64,
    history_frames: usize,
    frame_rate: f64,
}

impl ExportPlan {
    pub fn new(
        samples: Vec<TrajectorySample>,
        events: Vec<RecordedEvent>,
        resources: OverlayResources,
        cfg: &Valid<ExportConfig>,
    ) -> Result<Self> {
        let cfg = cfg.valid();
        let engine = TripInterpolator::new(samples);
        let (trace_start, trace_end) = engine.domain().ok_or(ExportError::Interpolate {
            source: trip_interpolator::Error::EmptyTrace,
        })?;

        let start = cfg.range_start.unwrap_or(trace_start).max(trace_start);
        let end = cfg.range_end.unwrap_or(trace_end).min(trace_end).max(start);
        let frame_rate = cfg.frame_rate();
        let last_frame_index = ((end - start) * frame_rate).floor() as u64;

        tracing::info!(
            "planning {} frames over [{start}, {end}] at {frame_rate} fps ({:?} trace)",
            last_frame_index + 1,
            engine.mode(),
        );

        let mut states = Vec::with_capacity(last_frame_index as usize + 1);
        for fno in 0..=last_frame_index {
            let t = start + fno as f64 / frame_rate;
            let state = match engine.state_at(t) {
                Ok(state) => state,
                // A query can land a float rounding error past the trace
                // edge; recover to the bound. The engine itself never
                // extrapolates.
                Err(trip_interpolator::Error::OutOfDomain { .. }) => {
                    engine.state_at(t.clamp(trace_start, trace_end))?
                }
                Err(e) => return Err(e.into()),
            };
            states.push(state);
        }

        let g_range = engine.g_force_range();
        let scene = SceneContext::new(
            cfg.layout.clone(),
            g_range,
            engine.mode(),
            events,
            resources,
        );

        // One batch rendering while the previous batch drains through the
        // sink queue.
        let pool_capacity = cfg.batch_size() * 2;
        let pool = FramePool::new(cfg.layout.width, cfg.layout.height, pool_capacity)?;

        Ok(Self {
            states: Arc::new(states),
            scene: Arc::new(scene),
            pool,
            last_frame_index,
            batch_size: cfg.batch_size() as u64,
            history_frames: cfg.history_frames(),
            frame_rate,
        })
    }

    /// Number of frames the export will deliver.
    pub fn frame_count(&self) -> u64 {
        self.last_frame_index + 1
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn states(&self) -> &[InterpolatedState] {
        &self.states
    }

    pub fn scene(&self) -> &SceneContext {
        &self.scene
    }

    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }
}

/// Render every planned frame and drain them, in order, into `sink`.
///
/// On success the sink was finalized after frame `frame_count() - 1`. On
/// [`ExportError::Cancelled`] or any sink failure the sink is left
/// unfinalized and no valid output artifact exists.
pub async fn run_export<S: FrameSink>(
    plan: &ExportPlan,
    sink: &mut S,
    cancel: &CancelFlag,
    mut on_progress: impl FnMut(ExportProgress),
) -> Result<ExportSummary> {
    let started = Instant::now();
    let total_frames = plan.frame_count();
    let mut frames_delivered: u64 = 0;

    let mut batch_start: u64 = 0;
    while batch_start < total_frames {
        // The final batch clamps to the end of the frame range.
        let batch_end = (batch_start + plan.batch_size).min(total_frames);

        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        wait_until_ready(sink, cancel).await?;

        let mut handles = Vec::with_capacity((batch_end - batch_start) as usize);
        for fno in batch_start..batch_end {
            let mut frame = acquire_frame(&plan.pool, cancel).await?;
            let scene = plan.scene.clone();
            let states = plan.states.clone();
            let history_frames = plan.history_frames;
            handles.push(tokio::task::spawn_blocking(move || {
                let idx = fno as usize;
                let history_start = idx.saturating_sub(history_frames);
                overlay_render::render_frame(
                    &scene,
                    &states[idx],
                    &states[history_start..idx],
                    &mut frame,
                )?;
                Ok::<_, overlay_render::Error>((fno, frame))
            }));
        }

        let mut rendered: Vec<(u64, PooledFrame)> = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            let item = joined.map_err(|_| ExportError::WorkerLost)??;
            rendered.push(item);
        }

        // Workers complete in arbitrary order; restore presentation order
        // before touching the sink.
        rendered.sort_by_key(|(fno, _)| *fno);

        for (fno, frame) in rendered {
            if cancel.is_cancelled() {
                // Remaining frames drop here and recycle into the pool.
                return Err(ExportError::Cancelled);
            }
            wait_until_ready(sink, cancel).await?;
            sink.append(frame, fno)?;
            frames_delivered += 1;
        }

        batch_start = batch_end;

        let elapsed = started.elapsed();
        let fraction = frames_delivered as f64 / total_frames as f64;
        let remaining = if fraction > PROGRESS_REPORT_THRESHOLD {
            let total_estimate = elapsed.as_secs_f64() / fraction;
            Some(Duration::from_secs_f64(
                (total_estimate - elapsed.as_secs_f64()).max(0.0),
            ))
        } else {
            None
        };
        on_progress(ExportProgress {
            frames_delivered,
            total_frames,
            fraction,
            elapsed,
            remaining,
        });
    }

    sink.finish()?;

    let summary = ExportSummary {
        frames_delivered,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        "export finished: {} frames in {:.1}s",
        summary.frames_delivered,
        summary.elapsed.as_secs_f64()
    );
    Ok(summary)
}

/// Poll the sink's readiness, suspending briefly between re-checks.
async fn wait_until_ready<S: FrameSink>(sink: &S, cancel: &CancelFlag) -> Result<()> {
    while !sink.is_ready() {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
    Ok(())
}

/// Take a frame buffer from the pool, suspending until one is free.
async fn acquire_frame(pool: &Arc<FramePool>, cancel: &CancelFlag) -> Result<PooledFrame> {
    loop {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        if let Some(frame) = pool.try_acquire() {
            return Ok(frame);
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}
