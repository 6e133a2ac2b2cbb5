//! RGBA frame buffers and a pooled allocator for concurrent rendering.

use std::sync::Arc;

use machine_vision_formats::{
    pixel_format::RGBA8, ImageBuffer, ImageBufferRef, ImageData, Stride,
};
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("could not demultiply pixmap. (Hint: draw a background color.)")]
    Demultiply,
}

pub type Result<T> = std::result::Result<T, Error>;

/// An owned RGBA8 image backed by a [`tiny_skia::Pixmap`].
///
/// The pixmap stores premultiplied alpha while drawing;
/// [`RgbaFrame::demultiply`] converts the buffer to straight RGBA in place
/// once drawing is finished, after which the raw data can be handed to
/// consumers expecting plain RGBA bytes.
pub struct RgbaFrame {
    pixmap: tiny_skia::Pixmap,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or(Error::InvalidDimensions { width, height })?;
        Ok(Self { pixmap })
    }

    pub fn pixmap(&self) -> &tiny_skia::Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut tiny_skia::Pixmap {
        &mut self.pixmap
    }

    /// Convert the premultiplied buffer to straight RGBA in place.
    ///
    /// This pixel conversion is based on that of
    /// `tiny_skia::Pixmap::encode_png`. Fails on translucent pixels whose
    /// straight components cannot be stored, which cannot happen once a
    /// background color was painted.
    pub fn demultiply(&mut self) -> Result<()> {
        for pixel in self.pixmap.pixels_mut() {
            let c = pixel.demultiply();
            *pixel =
                tiny_skia::PremultipliedColorU8::from_rgba(c.red(), c.green(), c.blue(), c.alpha())
                    .ok_or(Error::Demultiply)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RgbaFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "RgbaFrame {{ {}x{} }}",
            self.pixmap.width(),
            self.pixmap.height()
        )
    }
}

impl ImageData<RGBA8> for RgbaFrame {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }
    fn height(&self) -> u32 {
        self.pixmap.height()
    }
    fn buffer_ref(&self) -> ImageBufferRef<'_, RGBA8> {
        ImageBufferRef {
            pixel_format: std::marker::PhantomData,
            data: self.pixmap.data(),
        }
    }
    fn buffer(self) -> ImageBuffer<RGBA8> {
        self.buffer_ref().to_buffer()
    }
}

impl Stride for RgbaFrame {
    fn stride(&self) -> usize {
        self.pixmap.width() as usize * 4
    }
}

/// A fixed-capacity pool of reusable frame buffers.
///
/// All buffers are allocated up front, bounding peak memory at
/// `capacity` frames. Acquisition is safe from concurrent callers; buffers
/// return to the pool when the [`PooledFrame`] handle drops, wherever that
/// happens.
pub struct FramePool {
    width: u32,
    height: u32,
    capacity: usize,
    free: Mutex<Vec<RgbaFrame>>,
}

impl FramePool {
    pub fn new(width: u32, height: u32, capacity: usize) -> Result<Arc<Self>> {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(RgbaFrame::new(width, height)?);
        }
        Ok(Arc::new(Self {
            width,
            height,
            capacity,
            free: Mutex::new(free),
        }))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers currently available.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Take a buffer from the pool, or `None` if all are in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<PooledFrame> {
        let frame = self.free.lock().pop()?;
        Some(PooledFrame {
            frame: Some(frame),
            pool: self.clone(),
        })
    }

    fn release(&self, frame: RgbaFrame) {
        self.free.lock().push(frame);
    }
}

/// A frame buffer on loan from a [`FramePool`].
///
/// Dropping the handle returns the buffer to its pool, so forwarding a
/// rendered frame to a sink and discarding it on cancellation release the
/// allocation the same way.
pub struct PooledFrame {
    frame: Option<RgbaFrame>,
    pool: Arc<FramePool>,
}

impl std::ops::Deref for PooledFrame {
    type Target = RgbaFrame;
    fn deref(&self) -> &RgbaFrame {
        self.frame.as_ref().expect("frame present until drop")
    }
}

impl std::ops::DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut RgbaFrame {
        self.frame.as_mut().expect("frame present until drop")
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.pool.release(frame);
        }
    }
}

impl std::fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "PooledFrame {{ {}x{} }}", self.width(), self.height())
    }
}

fn _test_pooled_frame_is_send() {
    // Compile-time test to ensure PooledFrame implements Send trait.
    fn implements<T: Send>() {}
    implements::<PooledFrame>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(RgbaFrame::new(0, 10).is_err());
        assert!(FramePool::new(16, 0, 2).is_err());
    }

    #[test]
    fn pool_bounds_outstanding_frames() {
        let pool = FramePool::new(8, 8, 2).unwrap();
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn demultiply_succeeds_on_painted_frame() {
        let mut frame = RgbaFrame::new(4, 4).unwrap();
        frame
            .pixmap_mut()
            .fill(tiny_skia::Color::from_rgba8(10, 20, 30, 255));
        frame.demultiply().unwrap();
        let data = frame.pixmap().data();
        assert_eq!(&data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn stride_matches_rgba_width() {
        let frame = RgbaFrame::new(7, 3).unwrap();
        assert_eq!(frame.stride(), 28);
        assert_eq!(ImageData::width(&frame), 7);
        assert_eq!(ImageData::height(&frame), 3);
    }
}
