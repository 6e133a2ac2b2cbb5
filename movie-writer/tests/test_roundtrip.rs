// Copyright 2022-2023 Andrew D. Straw.

use anyhow::Result;

use movie_writer::{BgMovieWriter, FrameSink, Y4mOptions, Y4mWriter};
use overlay_frame::FramePool;

const WIDTH: u32 = 32;
const HEIGHT: u32 = 16;

fn solid_color(frame: &mut overlay_frame::RgbaFrame, r: u8, g: u8, b: u8) {
    frame
        .pixmap_mut()
        .fill(tiny_skia::Color::from_rgba8(r, g, b, 255));
}

#[test]
fn test_save_then_read_y4m() -> Result<()> {
    let tmpdir = tempfile::tempdir()?;
    let output_name = tmpdir.path().join("test-movie.y4m");

    let out_fd = std::fs::File::create(&output_name)?;
    let mut writer = Y4mWriter::from_writer(Box::new(out_fd), Y4mOptions::default());

    let pool = FramePool::new(WIDTH, HEIGHT, 2)?;
    let colors: &[(u8, u8, u8)] = &[(255, 0, 0), (0, 255, 0), (0, 0, 255)];
    for (fno, (r, g, b)) in colors.iter().enumerate() {
        let mut frame = pool.try_acquire().unwrap();
        solid_color(&mut frame, *r, *g, *b);
        writer.append(frame, fno as u64)?;
    }
    assert_eq!(writer.frames_written(), 3);
    FrameSink::finish(&mut writer)?;

    let in_fd = std::fs::File::open(&output_name)?;
    let mut decoder = y4m::decode(in_fd)?;
    assert_eq!(decoder.get_width(), WIDTH as usize);
    assert_eq!(decoder.get_height(), HEIGHT as usize);

    // Red frame first: Y≈76, U≈85, V=255 in full-range BT.601.
    let frame = decoder.read_frame()?;
    assert_eq!(frame.get_y_plane().len(), (WIDTH * HEIGHT) as usize);
    assert_eq!(frame.get_y_plane()[0], 76);
    assert_eq!(frame.get_u_plane()[0], 85);
    assert_eq!(frame.get_v_plane()[0], 255);

    let frame = decoder.read_frame()?;
    assert_eq!(frame.get_v_plane()[0], 21);

    let frame = decoder.read_frame()?;
    assert_eq!(frame.get_u_plane()[0], 255);

    assert!(decoder.read_frame().is_err());
    Ok(())
}

#[test]
fn frame_indices_must_increase() -> Result<()> {
    let mut writer = Y4mWriter::from_writer(Box::new(Vec::new()), Y4mOptions::default());
    let pool = FramePool::new(WIDTH, HEIGHT, 2)?;

    let mut frame = pool.try_acquire().unwrap();
    solid_color(&mut frame, 0, 0, 0);
    writer.append(frame, 5)?;

    let mut frame = pool.try_acquire().unwrap();
    solid_color(&mut frame, 0, 0, 0);
    let err = writer.append(frame, 5).unwrap_err();
    assert!(matches!(
        err,
        movie_writer::SinkError::NonMonotonicFrameIndex { last: 5, got: 5 }
    ));
    Ok(())
}

#[test]
fn append_after_finish_fails() -> Result<()> {
    let mut writer = Y4mWriter::from_writer(Box::new(Vec::new()), Y4mOptions::default());
    let pool = FramePool::new(WIDTH, HEIGHT, 1)?;

    FrameSink::finish(&mut writer)?;
    assert!(!writer.is_ready());

    let frame = pool.try_acquire().unwrap();
    assert!(matches!(
        writer.append(frame, 0),
        Err(movie_writer::SinkError::AlreadyFinished)
    ));
    Ok(())
}

#[test]
fn background_writer_roundtrip() -> Result<()> {
    let tmpdir = tempfile::tempdir()?;
    let output_name = tmpdir.path().join("bg-movie.y4m");

    let out_fd = std::fs::File::create(&output_name)?;
    let mut writer = BgMovieWriter::new(Box::new(out_fd), Y4mOptions::default(), 4);
    assert!(writer.is_ready());

    let pool = FramePool::new(WIDTH, HEIGHT, 8)?;
    for fno in 0..5u64 {
        let mut frame = pool.try_acquire().unwrap();
        solid_color(&mut frame, fno as u8, 0, 0);
        writer.append(frame, fno)?;
    }
    writer.finish()?;
    // Every buffer came back to the pool once the writer drained.
    assert_eq!(pool.available(), 8);
    assert!(!writer.is_ready());

    let in_fd = std::fs::File::open(&output_name)?;
    let mut decoder = y4m::decode(in_fd)?;
    let mut n_frames = 0;
    while decoder.read_frame().is_ok() {
        n_frames += 1;
    }
    assert_eq!(n_frames, 5);
    Ok(())
}
