//! Per-frame rendering of telemetry overlays.
//!
//! [`render_frame`] is a pure function of its inputs: one interpolated
//! state, a bounded trailing history, and a shared read-only
//! [`SceneContext`]. Identical inputs always produce an identical buffer,
//! which lets the export pipeline run renders concurrently and collect
//! results in any order.

use serde::{Deserialize, Serialize};

use overlay_frame::RgbaFrame;
use smooth_path::{smooth_polyline, Point};
use trip_types::{FrequencyMode, GForceRange, InterpolatedState, RecordedEvent};

mod resources;
pub use resources::OverlayResources;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Frame(#[from] overlay_frame::Error),
    #[error("could not allocate {width}x{height} pixmap")]
    PixmapAllocation { width: u32, height: u32 },
    #[error("frame is {width}x{height} but layout needs {expected_width}x{expected_height}")]
    FrameSizeMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Geometry and colors of the rendered overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Output frame width in pixels.
    pub width: u32,
    /// Output frame height in pixels.
    pub height: u32,
    /// Space between frame edge and overlay elements, in pixels.
    pub margin: f32,
    /// Height of the G-force chart as a fraction of the frame height.
    pub chart_height_fraction: f32,
    /// Height of the speed bar in pixels.
    pub speed_bar_height: f32,
    /// Speed at which the speed bar reaches full width.
    pub max_speed_kmh: f64,
    /// Stroke width of the chart traces, in pixels.
    pub trace_width: f32,
    pub background_color: [u8; 4],
    pub chart_background_color: [u8; 4],
    pub lateral_trace_color: [u8; 4],
    pub longitudinal_trace_color: [u8; 4],
    pub marker_color: [u8; 4],
    pub event_marker_color: [u8; 4],
    pub speed_bar_color: [u8; 4],
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            margin: 24.0,
            chart_height_fraction: 0.28,
            speed_bar_height: 18.0,
            max_speed_kmh: 250.0,
            trace_width: 3.0,
            background_color: [18, 18, 20, 255],
            chart_background_color: [30, 30, 34, 255],
            lateral_trace_color: [0, 191, 255, 255],
            longitudinal_trace_color: [255, 165, 0, 255],
            marker_color: [240, 240, 240, 255],
            event_marker_color: [255, 80, 80, 255],
            speed_bar_color: [0, 220, 120, 255],
        }
    }
}

/// Everything a render worker needs beyond the frame's own state.
///
/// Constructed once per export and shared read-only across workers. The
/// G-force range is fixed here so the chart scale cannot jitter
/// frame-to-frame.
pub struct SceneContext {
    pub layout: LayoutConfig,
    pub g_range: GForceRange,
    pub mode: FrequencyMode,
    /// Events of the whole trip, ordered by timestamp.
    pub events: Vec<RecordedEvent>,
    pub resources: OverlayResources,
}

impl SceneContext {
    pub fn new(
        layout: LayoutConfig,
        g_range: GForceRange,
        mode: FrequencyMode,
        mut events: Vec<RecordedEvent>,
        resources: OverlayResources,
    ) -> Self {
        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self {
            layout,
            g_range,
            mode,
            events,
            resources,
        }
    }
}

struct ChartRect {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl ChartRect {
    fn from_layout(layout: &LayoutConfig) -> Self {
        let height = layout.height as f32 * layout.chart_height_fraction;
        Self {
            left: layout.margin,
            top: layout.height as f32 - layout.margin - height,
            width: layout.width as f32 - 2.0 * layout.margin,
            height,
        }
    }

    fn x_for(&self, t: f64, t_start: f64, window: f64) -> f32 {
        self.left + ((t - t_start) / window) as f32 * self.width
    }

    fn y_for(&self, g: f64, range: &GForceRange) -> f32 {
        let frac = ((range.max - g) / range.span()) as f32;
        self.top + frac.clamp(0.0, 1.0) * self.height
    }
}

/// Render one output frame.
///
/// `history` holds the states of prior frames in ascending time order; the
/// chart looks back through it over the mode's time window. The function
/// only writes into `frame` and reads everything else, so identical inputs
/// yield identical output buffers.
pub fn render_frame(
    scene: &SceneContext,
    state: &InterpolatedState,
    history: &[InterpolatedState],
    frame: &mut RgbaFrame,
) -> Result<()> {
    let layout = &scene.layout;
    let pixmap = frame.pixmap_mut();
    if pixmap.width() != layout.width || pixmap.height() != layout.height {
        return Err(Error::FrameSizeMismatch {
            expected_width: layout.width,
            expected_height: layout.height,
            width: pixmap.width(),
            height: pixmap.height(),
        });
    }

    pixmap.fill(color(layout.background_color));

    let chart = ChartRect::from_layout(layout);
    let window = scene.mode.chart_window();
    let step = scene.mode.chart_step();
    let t_end = state.timestamp;
    let t_start = t_end - window;

    // Chart background.
    if let Some(rect) =
        tiny_skia::Rect::from_xywh(chart.left, chart.top, chart.width, chart.height)
    {
        let mut paint = tiny_skia::Paint::default();
        paint.set_color(color(layout.chart_background_color));
        pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), None);
    }

    // G traces, sampled backwards through the history at the chart step.
    let mut lateral = Vec::new();
    let mut longitudinal = Vec::new();
    let n_steps = (window / step).round() as usize;
    let mut last_ts = f64::NEG_INFINITY;
    for k in 0..=n_steps {
        let t = t_start + k as f64 * step;
        if let Some(s) = state_near(history, state, t) {
            // Nearby probe times can snap to the same state; keep one point.
            if s.timestamp <= last_ts {
                continue;
            }
            last_ts = s.timestamp;
            let x = chart.x_for(s.timestamp, t_start, window) as f64;
            lateral.push(Point::new(x, chart.y_for(s.g_lateral, &scene.g_range) as f64));
            longitudinal.push(Point::new(
                x,
                chart.y_for(s.g_longitudinal, &scene.g_range) as f64,
            ));
        }
    }
    // The final probe can drift past t_end; always end at the current state.
    if last_ts < state.timestamp {
        let x = chart.x_for(state.timestamp, t_start, window) as f64;
        lateral.push(Point::new(
            x,
            chart.y_for(state.g_lateral, &scene.g_range) as f64,
        ));
        longitudinal.push(Point::new(
            x,
            chart.y_for(state.g_longitudinal, &scene.g_range) as f64,
        ));
    }

    stroke_smoothed(
        pixmap,
        &longitudinal,
        layout.longitudinal_trace_color,
        layout.trace_width,
    );
    stroke_smoothed(
        pixmap,
        &lateral,
        layout.lateral_trace_color,
        layout.trace_width,
    );

    // Vertical markers for events inside the chart window.
    for event in &scene.events {
        if event.timestamp < t_start || event.timestamp > t_end {
            continue;
        }
        let x = chart.x_for(event.timestamp, t_start, window);
        let mut pb = tiny_skia::PathBuilder::new();
        pb.move_to(x, chart.top);
        pb.line_to(x, chart.top + chart.height);
        if let Some(path) = pb.finish() {
            let mut paint = tiny_skia::Paint::default();
            paint.set_color(color(layout.event_marker_color));
            paint.anti_alias = true;
            let stroke = tiny_skia::Stroke {
                width: 1.5,
                ..Default::default()
            };
            pixmap.stroke_path(&path, &paint, &stroke, tiny_skia::Transform::identity(), None);
        }
        if let Some(icon) = scene.resources.icon_for(&event.event_type) {
            let ix = x as i32 - icon.width() as i32 / 2;
            let iy = chart.top as i32 - icon.height() as i32;
            pixmap.draw_pixmap(
                ix,
                iy,
                icon.as_ref(),
                &tiny_skia::PixmapPaint::default(),
                tiny_skia::Transform::identity(),
                None,
            );
        }
    }

    // Current lateral G marker at the chart's leading edge.
    let mut pb = tiny_skia::PathBuilder::new();
    pb.push_circle(
        chart.left + chart.width,
        chart.y_for(state.g_lateral, &scene.g_range),
        layout.trace_width * 2.0,
    );
    if let Some(path) = pb.finish() {
        let mut paint = tiny_skia::Paint::default();
        paint.set_color(color(layout.marker_color));
        paint.anti_alias = true;
        pixmap.fill_path(
            &path,
            &paint,
            tiny_skia::FillRule::Winding,
            tiny_skia::Transform::identity(),
            None,
        );
    }

    // Speed bar across the top.
    let bar_width = layout.width as f32 - 2.0 * layout.margin;
    let filled = bar_width * (state.speed_kmh() / layout.max_speed_kmh).clamp(0.0, 1.0) as f32;
    if filled > 0.0 {
        if let Some(rect) = tiny_skia::Rect::from_xywh(
            layout.margin,
            layout.margin,
            filled,
            layout.speed_bar_height,
        ) {
            let mut paint = tiny_skia::Paint::default();
            paint.set_color(color(layout.speed_bar_color));
            pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), None);
        }
    }

    // Logo in the top-right corner.
    if let Some(logo) = &scene.resources.logo {
        let x = layout.width as i32 - logo.width() as i32 - layout.margin as i32;
        pixmap.draw_pixmap(
            x,
            layout.margin as i32,
            logo.as_ref(),
            &tiny_skia::PixmapPaint::default(),
            tiny_skia::Transform::identity(),
            None,
        );
    }

    frame.demultiply()?;
    Ok(())
}

/// The state nearest to `t`, looking through the history and the current
/// state. `None` outside the recorded span.
fn state_near(
    history: &[InterpolatedState],
    current: &InterpolatedState,
    t: f64,
) -> Option<InterpolatedState> {
    let earliest = history.first().unwrap_or(current).timestamp;
    if t < earliest || t > current.timestamp {
        return None;
    }
    let i = history.partition_point(|s| s.timestamp < t);
    let after = history.get(i).copied().unwrap_or(*current);
    let best = match i.checked_sub(1).and_then(|j| history.get(j)) {
        Some(before) if (t - before.timestamp) <= (after.timestamp - t) => *before,
        _ => after,
    };
    Some(best)
}

fn stroke_smoothed(
    pixmap: &mut tiny_skia::Pixmap,
    points: &[Point],
    rgba: [u8; 4],
    width: f32,
) {
    let segments = smooth_polyline(points);
    let Some(first) = segments.first() else {
        return;
    };

    let mut pb = tiny_skia::PathBuilder::new();
    pb.move_to(first.from.x as f32, first.from.y as f32);
    for segment in &segments {
        pb.cubic_to(
            segment.ctrl1.x as f32,
            segment.ctrl1.y as f32,
            segment.ctrl2.x as f32,
            segment.ctrl2.y as f32,
            segment.to.x as f32,
            segment.to.y as f32,
        );
    }
    let Some(path) = pb.finish() else {
        return;
    };

    let mut paint = tiny_skia::Paint::default();
    paint.set_color(color(rgba));
    paint.anti_alias = true;
    let stroke = tiny_skia::Stroke {
        width,
        line_cap: tiny_skia::LineCap::Round,
        line_join: tiny_skia::LineJoin::Round,
        ..Default::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, tiny_skia::Transform::identity(), None);
}

fn color(rgba: [u8; 4]) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3])
}
