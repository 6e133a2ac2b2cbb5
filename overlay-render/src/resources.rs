use std::collections::BTreeMap;
use std::path::Path;

use crate::{Error, Result};

/// Immutable images shared by every render worker.
///
/// Loaded once before an export starts and passed by shared reference into
/// each render call; nothing here is mutated afterwards.
#[derive(Default)]
pub struct OverlayResources {
    /// Brand logo, blitted into a frame corner.
    pub logo: Option<tiny_skia::Pixmap>,
    /// Event marker icons keyed by event type.
    pub event_icons: BTreeMap<String, tiny_skia::Pixmap>,
}

impl OverlayResources {
    /// Load the logo and per-event-type icons from PNG files.
    pub fn load(logo: Option<&str>, event_icons: &BTreeMap<String, String>) -> Result<Self> {
        let logo = logo.map(|p| load_png(Path::new(p))).transpose()?;
        let event_icons = event_icons
            .iter()
            .map(|(event_type, path)| Ok((event_type.clone(), load_png(Path::new(path))?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { logo, event_icons })
    }

    pub fn icon_for(&self, event_type: &str) -> Option<&tiny_skia::Pixmap> {
        self.event_icons.get(event_type)
    }
}

/// Decode a PNG into a premultiplied pixmap suitable for `draw_pixmap`.
fn load_png(path: &Path) -> Result<tiny_skia::Pixmap> {
    let img = image::open(path)?.to_rgba8();
    let (width, height) = img.dimensions();
    let mut pixmap =
        tiny_skia::Pixmap::new(width, height).ok_or(Error::PixmapAllocation { width, height })?;
    for (pixel, rgba) in pixmap
        .pixels_mut()
        .iter_mut()
        .zip(img.as_raw().chunks_exact(4))
    {
        *pixel = tiny_skia::ColorU8::from_rgba(rgba[0], rgba[1], rgba[2], rgba[3]).premultiply();
    }
    tracing::debug!("loaded {}x{} image from {}", width, height, path.display());
    Ok(pixmap)
}
