//! Frame sinks for exported overlay video.
//!
//! [`FrameSink`] is the boundary the export pipeline writes through. The
//! concrete sinks here emit a YUV4MPEG2 stream: [`Y4mWriter`] writes
//! synchronously into any [`std::io::Write`], and [`BgMovieWriter`] moves the
//! conversion and writing onto a background thread behind a bounded queue so
//! the pipeline can poll readiness instead of blocking.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use overlay_frame::{PooledFrame, RgbaFrame};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("y4m error: {0}")]
    Y4m(#[from] y4m::Error),
    #[error(
        "frame size changed: expected {expected_width}x{expected_height}, got {width}x{height}"
    )]
    FrameSizeChanged {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
    #[error("frame index {got} does not follow {last}")]
    NonMonotonicFrameIndex { last: u64, got: u64 },
    #[error("sink already finished")]
    AlreadyFinished,
    #[error("inconsistent state")]
    InconsistentState,
    #[error("background writer disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, SinkError>;

/// Ordered consumer of rendered frames.
///
/// Callers must not `append` after `is_ready` returned `false` without an
/// intervening successful re-check, and must deliver strictly increasing
/// frame indices. `finish` finalizes the stream; appending afterwards fails.
pub trait FrameSink {
    fn is_ready(&self) -> bool;
    fn append(&mut self, frame: PooledFrame, frame_index: u64) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Y4mOptions {
    /// Frame rate (numerator)
    pub raten: usize,
    /// Frame rate (denominator)
    pub rated: usize,
    /// Caller-supplied quality hint. The YUV4MPEG2 container is uncompressed
    /// and has no use for it; it is accepted and ignored so that callers can
    /// pass their selector through uninterpreted.
    pub quality: Option<String>,
}

impl Default for Y4mOptions {
    fn default() -> Self {
        Self {
            raten: 30,
            rated: 1,
            quality: None,
        }
    }
}

/// Clonable handle over the output writer.
///
/// The y4m encoder takes its writer by value; keeping a second handle lets
/// [`Y4mWriter::finish`] flush without recovering the writer from the
/// encoder.
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

enum Writer {
    NotStarted(SharedWriter),
    Started(y4m::Encoder<SharedWriter>),
    Finished,
    /// Placeholder value for internal use
    Undefined,
}

/// An opinionated YUV4MPEG2 writer.
///
/// Saves progressive C444 video with full-range BT.601 color. The stream
/// header is written lazily on the first frame, which fixes the frame size
/// for the rest of the stream.
pub struct Y4mWriter {
    wtr: Writer,
    raw: SharedWriter,
    opts: Y4mOptions,
    size: Option<(u32, u32)>,
    last_frame_index: Option<u64>,
    // Plane buffers reused across frames.
    y_plane: Vec<u8>,
    u_plane: Vec<u8>,
    v_plane: Vec<u8>,
}

impl Y4mWriter {
    pub fn from_writer(wtr: Box<dyn Write + Send>, opts: Y4mOptions) -> Self {
        if let Some(quality) = &opts.quality {
            tracing::debug!("quality hint \"{quality}\" ignored by YUV4MPEG2 output");
        }
        let raw = SharedWriter(Arc::new(Mutex::new(wtr)));
        Self {
            wtr: Writer::NotStarted(raw.clone()),
            raw,
            opts,
            size: None,
            last_frame_index: None,
            y_plane: Vec::new(),
            u_plane: Vec::new(),
            v_plane: Vec::new(),
        }
    }

    /// Convert `frame` to YUV444 and write it as the next stream frame.
    pub fn write_frame(&mut self, frame: &RgbaFrame, frame_index: u64) -> Result<()> {
        match self.wtr {
            Writer::Finished => return Err(SinkError::AlreadyFinished),
            // A failed header write left no writer behind.
            Writer::Undefined => return Err(SinkError::InconsistentState),
            _ => {}
        }
        if let Some(last) = self.last_frame_index {
            if frame_index <= last {
                return Err(SinkError::NonMonotonicFrameIndex {
                    last,
                    got: frame_index,
                });
            }
        }

        let pixmap = frame.pixmap();
        let (width, height) = *self.size.get_or_insert((pixmap.width(), pixmap.height()));
        if pixmap.width() != width || pixmap.height() != height {
            return Err(SinkError::FrameSizeChanged {
                expected_width: width,
                expected_height: height,
                width: pixmap.width(),
                height: pixmap.height(),
            });
        }

        let wtr = std::mem::replace(&mut self.wtr, Writer::Undefined);
        self.wtr = match wtr {
            Writer::NotStarted(wtr) => {
                let encoder = y4m::encode(
                    width as usize,
                    height as usize,
                    y4m::Ratio::new(self.opts.raten, self.opts.rated),
                )
                .with_colorspace(y4m::Colorspace::C444)
                .write_header(wtr)?;
                Writer::Started(encoder)
            }
            started => started,
        };

        let n_pixels = width as usize * height as usize;
        self.y_plane.resize(n_pixels, 0);
        self.u_plane.resize(n_pixels, 0);
        self.v_plane.resize(n_pixels, 0);

        for (i, pixel) in pixmap.pixels().iter().enumerate() {
            let c = pixel.demultiply();
            let (y, u, v) = rgb_to_yuv444(c.red(), c.green(), c.blue());
            self.y_plane[i] = y;
            self.u_plane[i] = u;
            self.v_plane[i] = v;
        }

        let out = y4m::Frame::new(
            [
                self.y_plane.as_slice(),
                self.u_plane.as_slice(),
                self.v_plane.as_slice(),
            ],
            None,
        );
        match &mut self.wtr {
            Writer::Started(encoder) => encoder.write_frame(&out)?,
            _ => unreachable!(),
        }

        self.last_frame_index = Some(frame_index);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.wtr, Writer::Finished) {
            Writer::Finished => return Err(SinkError::AlreadyFinished),
            other => drop(other),
        }
        self.raw.flush()?;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.last_frame_index.map(|i| i + 1).unwrap_or(0)
    }
}

impl FrameSink for Y4mWriter {
    fn is_ready(&self) -> bool {
        !matches!(self.wtr, Writer::Finished)
    }

    fn append(&mut self, frame: PooledFrame, frame_index: u64) -> Result<()> {
        // The pooled buffer recycles when `frame` drops here.
        self.write_frame(&frame, frame_index)
    }

    fn finish(&mut self) -> Result<()> {
        Y4mWriter::finish(self)
    }
}

/// Full-range BT.601 RGB → YUV conversion.
fn rgb_to_yuv444(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let v = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

enum Msg {
    Append(PooledFrame, u64),
    Finish,
}

/// A [`FrameSink`] that writes on a background thread.
///
/// Frames queue through a bounded channel; `is_ready` reports whether the
/// queue has capacity, so a polling producer throttles itself instead of
/// buffering unboundedly. Writer errors surface on the next `append` or
/// `finish` call.
pub struct BgMovieWriter {
    tx: Option<crossbeam_channel::Sender<Msg>>,
    done_rx: crossbeam_channel::Receiver<Result<()>>,
}

impl BgMovieWriter {
    pub fn new(wtr: Box<dyn Write + Send>, opts: Y4mOptions, queue_size: usize) -> Self {
        let (tx, done_rx) = launch_runner(wtr, opts, queue_size);
        Self {
            tx: Some(tx),
            done_rx,
        }
    }

    /// Surface a writer-thread failure, if one happened since the last call.
    fn poll_thread(&mut self) -> Result<()> {
        if self.tx.is_none() {
            return Err(SinkError::AlreadyFinished);
        }
        match self.done_rx.try_recv() {
            // Thread ended; only legal after Finish was sent.
            Ok(Ok(())) => {
                self.tx = None;
                Err(SinkError::AlreadyFinished)
            }
            Ok(Err(e)) => {
                self.tx = None;
                Err(e)
            }
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(()),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                self.tx = None;
                Err(SinkError::Disconnected)
            }
        }
    }

    /// The thread exited before accepting a message; recover its error.
    fn recover_exit_error(&mut self) -> SinkError {
        self.tx = None;
        match self.done_rx.try_recv() {
            Ok(Err(e)) => e,
            _ => SinkError::Disconnected,
        }
    }
}

impl FrameSink for BgMovieWriter {
    fn is_ready(&self) -> bool {
        match &self.tx {
            Some(tx) => !tx.is_full(),
            None => false,
        }
    }

    fn append(&mut self, frame: PooledFrame, frame_index: u64) -> Result<()> {
        self.poll_thread()?;
        let sent = match &self.tx {
            Some(tx) => tx.send(Msg::Append(frame, frame_index)).is_ok(),
            None => return Err(SinkError::AlreadyFinished),
        };
        if !sent {
            return Err(self.recover_exit_error());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.poll_thread()?;
        let tx = self.tx.take().ok_or(SinkError::AlreadyFinished)?;
        if tx.send(Msg::Finish).is_err() {
            return Err(self.recover_exit_error());
        }
        drop(tx);
        match self.done_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(SinkError::Disconnected),
        }
    }
}

fn launch_runner(
    wtr: Box<dyn Write + Send>,
    opts: Y4mOptions,
    queue_size: usize,
) -> (
    crossbeam_channel::Sender<Msg>,
    crossbeam_channel::Receiver<Result<()>>,
) {
    let (tx, rx) = crossbeam_channel::bounded::<Msg>(queue_size);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    std::thread::spawn(move || {
        let mut y4m = Y4mWriter::from_writer(wtr, opts);
        let result = loop {
            match rx.recv() {
                Ok(Msg::Append(frame, frame_index)) => {
                    if let Err(e) = y4m.write_frame(&frame, frame_index) {
                        break Err(e);
                    }
                    // Frame drops here and returns to its pool.
                }
                Ok(Msg::Finish) => break y4m.finish(),
                // Sender dropped without Finish: an aborted export leaves no
                // valid artifact, so there is nothing left to do.
                Err(_) => break Ok(()),
            }
        };
        if let Err(e) = &result {
            tracing::error!("background movie writer failed: {e}");
        }
        let _ = done_tx.send(result);
    });
    (tx, done_rx)
}
