use overlay_frame::RgbaFrame;
use overlay_render::{render_frame, LayoutConfig, OverlayResources, SceneContext};
use trip_interpolator::TripInterpolator;
use trip_types::{InterpolatedState, RecordedEvent, TrajectorySample};

fn small_layout() -> LayoutConfig {
    LayoutConfig {
        width: 160,
        height: 90,
        margin: 6.0,
        ..Default::default()
    }
}

fn sample(timestamp: f64, latitude: f64, speed: f64) -> TrajectorySample {
    TrajectorySample {
        timestamp,
        latitude,
        longitude: 0.0,
        speed,
        accel_longitudinal: None,
        accel_lateral: None,
    }
}

/// States at 30 fps over the trace, as the export precompute would build.
fn precomputed_states(engine: &TripInterpolator, seconds: f64) -> Vec<InterpolatedState> {
    let n = (seconds * 30.0) as usize;
    (0..=n)
        .map(|i| engine.state_at(i as f64 / 30.0).unwrap())
        .collect()
}

fn test_scene(engine: &TripInterpolator, events: Vec<RecordedEvent>) -> SceneContext {
    SceneContext::new(
        small_layout(),
        engine.g_force_range(),
        engine.mode(),
        events,
        OverlayResources::default(),
    )
}

#[test]
fn rendering_is_deterministic() {
    let engine = TripInterpolator::new(vec![
        sample(0.0, 0.0, 0.0),
        sample(5.0, 0.001, 15.0),
        sample(10.0, 0.002, 5.0),
    ]);
    let states = precomputed_states(&engine, 10.0);
    let scene = test_scene(
        &engine,
        vec![RecordedEvent {
            timestamp: 5.0,
            event_type: "lap".to_string(),
        }],
    );

    let last = states.len() - 1;
    let mut frame_a = RgbaFrame::new(160, 90).unwrap();
    let mut frame_b = RgbaFrame::new(160, 90).unwrap();
    render_frame(&scene, &states[last], &states[..last], &mut frame_a).unwrap();
    render_frame(&scene, &states[last], &states[..last], &mut frame_b).unwrap();

    assert_eq!(frame_a.pixmap().data(), frame_b.pixmap().data());
}

#[test]
fn first_frame_has_no_history_and_paints_background() {
    let engine = TripInterpolator::new(vec![sample(0.0, 0.0, 0.0), sample(10.0, 0.001, 20.0)]);
    let states = precomputed_states(&engine, 10.0);
    let scene = test_scene(&engine, vec![]);

    let mut frame = RgbaFrame::new(160, 90).unwrap();
    render_frame(&scene, &states[0], &[], &mut frame).unwrap();

    // Top-left pixel is outside every overlay element.
    let bg = scene.layout.background_color;
    assert_eq!(&frame.pixmap().data()[0..4], &bg[..]);
}

#[test]
fn frame_size_must_match_layout() {
    let engine = TripInterpolator::new(vec![sample(0.0, 0.0, 0.0), sample(1.0, 0.0, 1.0)]);
    let states = precomputed_states(&engine, 1.0);
    let scene = test_scene(&engine, vec![]);

    let mut frame = RgbaFrame::new(64, 64).unwrap();
    let err = render_frame(&scene, &states[0], &[], &mut frame).unwrap_err();
    assert!(matches!(
        err,
        overlay_render::Error::FrameSizeMismatch { .. }
    ));
}

#[test]
fn reused_buffer_renders_identically() {
    // A pooled buffer arrives with stale pixels from a previous frame; the
    // render must fully overwrite them.
    let engine = TripInterpolator::new(vec![sample(0.0, 0.0, 0.0), sample(10.0, 0.001, 20.0)]);
    let states = precomputed_states(&engine, 10.0);
    let scene = test_scene(&engine, vec![]);

    let last = states.len() - 1;
    let mut fresh = RgbaFrame::new(160, 90).unwrap();
    render_frame(&scene, &states[last], &states[..last], &mut fresh).unwrap();

    let mut reused = RgbaFrame::new(160, 90).unwrap();
    render_frame(&scene, &states[10], &states[..10], &mut reused).unwrap();
    render_frame(&scene, &states[last], &states[..last], &mut reused).unwrap();

    assert_eq!(fresh.pixmap().data(), reused.pixmap().data());
}
