use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use overlay_render::LayoutConfig;

pub const DEFAULT_FRAME_RATE: f64 = 30.0;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_HISTORY_FRAMES: usize = 3000;
pub const DEFAULT_SINK_QUEUE_FRAMES: usize = 16;

/// A wrapper newtype indicating the inner type has been validated.
pub struct Valid<T>(T);

impl<T> Valid<T> {
    /// Return a reference to the validated inner type.
    pub fn valid(&self) -> &T {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    /// The telemetry trace CSV to render.
    pub input_trace: String,
    /// Optional CSV of recorded events to mark in the chart.
    pub input_events: Option<String>,
    /// The YUV4MPEG2 file to write.
    pub output: String,
    /// Output frame rate, defaults to 30.
    pub frame_rate: Option<f64>,
    /// Number of frames rendered concurrently per batch, defaults to 10.
    pub batch_size: Option<usize>,
    /// Maximum number of prior states handed to each render, defaults to
    /// 3000.
    pub history_frames: Option<usize>,
    /// Start of the exported range in trace seconds. Defaults to the
    /// trace's own start.
    pub range_start: Option<f64>,
    /// End of the exported range in trace seconds. Defaults to the trace's
    /// own end.
    pub range_end: Option<f64>,
    /// Quality selector passed to the sink uninterpreted.
    pub quality: Option<String>,
    /// Number of frames the background writer queues, defaults to 16.
    pub sink_queue_frames: Option<usize>,
    /// PNG logo blitted into a frame corner.
    pub logo: Option<String>,
    /// PNG icons per event type, drawn at the event markers.
    #[serde(default)]
    pub event_icons: BTreeMap<String, String>,
    /// Geometry and colors of the rendered overlay.
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            input_trace: "trace.csv".to_string(),
            input_events: None,
            output: "overlay.y4m".to_string(),
            frame_rate: None,
            batch_size: None,
            history_frames: None,
            range_start: None,
            range_end: None,
            quality: None,
            sink_queue_frames: None,
            logo: None,
            event_icons: BTreeMap::new(),
            layout: LayoutConfig::default(),
        }
    }
}

impl ExportConfig {
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate.unwrap_or(DEFAULT_FRAME_RATE)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn history_frames(&self) -> usize {
        self.history_frames.unwrap_or(DEFAULT_HISTORY_FRAMES)
    }

    pub fn sink_queue_frames(&self) -> usize {
        self.sink_queue_frames.unwrap_or(DEFAULT_SINK_QUEUE_FRAMES)
    }

    /// Validate the configuration.
    ///
    /// If `basedir` is not `None`, it specifies the directory in which
    /// relative filenames are searched.
    pub fn validate(self, basedir: Option<&std::path::Path>) -> Result<Valid<Self>> {
        // Validate `output`.
        if !self.output.to_lowercase().ends_with(".y4m") {
            anyhow::bail!(
                "Output filename \"{}\" does not end with \".y4m\".",
                self.output
            );
        }
        let output = base_join_inner(self.output, basedir)?;

        // Validate `frame_rate`.
        if let Some(rate) = self.frame_rate {
            if !(rate > 0.0) || !rate.is_finite() {
                anyhow::bail!("Frame rate {} is not a positive number.", rate);
            }
        }

        // Validate `batch_size` and `sink_queue_frames`.
        if self.batch_size == Some(0) {
            anyhow::bail!("Batch size must be at least 1.");
        }
        if self.sink_queue_frames == Some(0) {
            anyhow::bail!("Sink queue must hold at least 1 frame.");
        }

        // Validate the range.
        if let (Some(start), Some(end)) = (self.range_start, self.range_end) {
            if start >= end {
                anyhow::bail!("Export range start {} is not before end {}.", start, end);
            }
        }

        // Validate `layout`.
        if self.layout.width == 0 || self.layout.height == 0 {
            anyhow::bail!(
                "Layout size {}x{} is not drawable.",
                self.layout.width,
                self.layout.height
            );
        }

        // Validate file paths.
        let input_trace = base_join_inner(self.input_trace, basedir)?;
        let input_events = base_join(self.input_events, basedir)?;
        let logo = base_join(self.logo, basedir)?;
        let event_icons = self
            .event_icons
            .into_iter()
            .map(|(event_type, path)| Ok((event_type, base_join_inner(path, basedir)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Valid(Self {
            input_trace,
            input_events,
            output,
            logo,
            event_icons,
            ..self
        }))
    }
}

/// If `filename` is relative, join it to `basedir` if possible.
fn base_join_inner(filename: String, basedir: Option<&std::path::Path>) -> Result<String> {
    fn path_to_string(p: std::path::PathBuf) -> Result<String> {
        p.into_os_string()
            .into_string()
            .map_err(|os_str| anyhow::anyhow!("path \"{}\" is not UTF8", os_str.to_string_lossy()))
    }

    fn maybe_join(filename: String, basedir: Option<&std::path::Path>) -> std::path::PathBuf {
        let p = std::path::PathBuf::from(filename);
        match (p.is_relative(), basedir) {
            (true, Some(dirpath)) => dirpath.join(p),
            _ => p,
        }
    }

    path_to_string(maybe_join(filename, basedir))
}

/// If `filename` is not None and is relative, join it to `basedir` if possible.
fn base_join(
    filename: Option<String>,
    basedir: Option<&std::path::Path>,
) -> Result<Option<String>> {
    let fname = filename.map(|s| base_join_inner(s, basedir)).transpose()?;
    Ok(fname)
}

#[test]
fn test_default_config_is_valid_and_serializable() -> Result<()> {
    let cfg = ExportConfig::default().validate(None)?;
    toml::to_string_pretty(&cfg.valid())?;
    Ok(())
}

#[test]
fn test_invalid_configs_are_rejected() {
    let cfg = ExportConfig {
        output: "overlay.mp4".to_string(),
        ..Default::default()
    };
    assert!(cfg.validate(None).is_err());

    let cfg = ExportConfig {
        batch_size: Some(0),
        ..Default::default()
    };
    assert!(cfg.validate(None).is_err());

    let cfg = ExportConfig {
        range_start: Some(5.0),
        range_end: Some(5.0),
        ..Default::default()
    };
    assert!(cfg.validate(None).is_err());
}

#[test]
fn test_relative_paths_join_basedir() -> Result<()> {
    let cfg = ExportConfig::default().validate(Some(std::path::Path::new("/data/trip")))?;
    assert_eq!(cfg.valid().input_trace, "/data/trip/trace.csv");
    assert_eq!(cfg.valid().output, "/data/trip/overlay.y4m");
    Ok(())
}
