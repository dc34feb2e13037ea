//! Texture capture path tests: single-slot hand-off, front-camera mirror,
//! and deferred surface release.

mod common;

use std::sync::Arc;
use std::time::Duration;

use camera_driver::testing::{FakeDriver, FakeDriverHandle, IDENTITY_MATRIX};
use capture_pipeline::{CameraCapturer, PipelineConfig};
use texture_channel::{horizontal_flip_matrix, multiply_matrices};

use common::{fast_config, init_test_tracing, wait_for, RecordingEvents, RecordingObserver, RecordingSwitch};

const WAIT: Duration = Duration::from_secs(2);

fn texture_config() -> PipelineConfig {
    PipelineConfig {
        capture_to_texture: true,
        ..fast_config()
    }
}

fn texture_capturer(
    initial_device: usize,
) -> (CameraCapturer, FakeDriverHandle, RecordingEvents) {
    init_test_tracing();
    let (driver, handle) = FakeDriver::with_two_cameras();
    let events = RecordingEvents::new();
    let capturer = CameraCapturer::new(
        Box::new(driver),
        initial_device,
        Arc::new(events.clone()),
        texture_config(),
    )
    .unwrap();
    (capturer, handle, events)
}

#[test]
fn test_single_texture_slot() {
    let (capturer, handle, events) = texture_capturer(0);
    let observer = RecordingObserver::new();

    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));
    assert!(handle.surface_created());

    assert!(handle.deliver_texture_frame(1_000));
    assert!(wait_for(|| observer.texture_frame_count() == 1, WAIT));
    let frame = &observer.texture_frames()[0];
    assert_eq!(frame.texture_id, 42);
    assert_eq!(frame.timestamp_ns, 1_000);
    assert_eq!(frame.transform_matrix, IDENTITY_MATRIX);
    assert_eq!(frame.rotation_degrees, 90);
    assert_eq!(events.first_frames(), 1);

    // A second update while the first frame is out is dropped.
    assert!(handle.deliver_texture_frame(2_000));
    capturer.request_output_format(1, 1, 1).unwrap();
    assert!(wait_for(|| observer.format_requests().len() == 1, WAIT));
    assert_eq!(observer.texture_frame_count(), 1);

    // Returning the frame re-arms delivery.
    capturer.return_texture_frame(frame.channel_id).unwrap();
    assert!(handle.deliver_texture_frame(3_000));
    assert!(wait_for(|| observer.texture_frame_count() == 2, WAIT));
    assert_eq!(observer.texture_frames()[1].timestamp_ns, 3_000);
}

#[test]
fn test_front_camera_transform_is_mirrored() {
    let (capturer, handle, _events) = texture_capturer(1);
    let observer = RecordingObserver::new();

    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    assert!(handle.deliver_texture_frame(1_000));
    assert!(wait_for(|| observer.texture_frame_count() == 1, WAIT));

    let frame = &observer.texture_frames()[0];
    let expected = multiply_matrices(&IDENTITY_MATRIX, &horizontal_flip_matrix());
    assert_eq!(frame.transform_matrix, expected);
    assert_eq!(frame.rotation_degrees, 270);
}

#[test]
fn test_stop_while_idle_releases_surface() {
    let (capturer, handle, _events) = texture_capturer(0);
    capturer
        .start_capture(1280, 720, 30, Box::new(RecordingObserver::new()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    capturer.stop_capture().unwrap();
    assert!(handle.surface_released());
    assert_eq!(handle.closed_devices(), 1);
}

#[test]
fn test_stop_with_outstanding_frame_defers_surface_release() {
    let (capturer, handle, _events) = texture_capturer(0);
    let observer = RecordingObserver::new();
    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    assert!(handle.deliver_texture_frame(1_000));
    assert!(wait_for(|| observer.texture_frame_count() == 1, WAIT));
    let channel_id = observer.texture_frames()[0].channel_id;

    // Stop returns without waiting for the consumer.
    capturer.stop_capture().unwrap();
    assert!(!handle.surface_released());

    capturer.return_texture_frame(channel_id).unwrap();
    assert!(wait_for(|| handle.surface_released(), WAIT));
}

#[test]
fn test_late_return_resolves_old_channel_not_the_new_one() {
    let (capturer, handle, _events) = texture_capturer(0);
    let observer = RecordingObserver::new();
    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    assert!(handle.deliver_texture_frame(1_000));
    assert!(wait_for(|| observer.texture_frame_count() == 1, WAIT));
    let old_id = observer.texture_frames()[0].channel_id;

    // Restart while the consumer still holds the frame.
    capturer.stop_capture().unwrap();
    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    assert!(handle.deliver_texture_frame(2_000));
    assert!(wait_for(|| observer.texture_frame_count() == 2, WAIT));
    let new_id = observer.texture_frames()[1].channel_id;
    assert_ne!(old_id, new_id);

    // The late return releases the old session's surface and must not
    // re-arm the new channel, which still has its frame out.
    capturer.return_texture_frame(old_id).unwrap();
    assert!(wait_for(|| handle.surface_released_at(0), WAIT));
    assert!(!handle.surface_released());

    assert!(handle.deliver_texture_frame(3_000));
    capturer.request_output_format(1, 1, 1).unwrap();
    assert!(wait_for(|| observer.format_requests().len() == 1, WAIT));
    assert_eq!(observer.texture_frame_count(), 2);

    // Returning the new frame re-arms delivery as usual.
    capturer.return_texture_frame(new_id).unwrap();
    assert!(handle.deliver_texture_frame(4_000));
    assert!(wait_for(|| observer.texture_frame_count() == 3, WAIT));
    assert_eq!(observer.texture_frames()[2].timestamp_ns, 4_000);
}

#[test]
fn test_change_format_drops_next_texture_frame() {
    let (capturer, handle, _events) = texture_capturer(0);
    let observer = RecordingObserver::new();
    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    capturer.change_capture_format(640, 480, 30).unwrap();
    assert!(wait_for(|| handle.configured_formats().len() == 2, WAIT));
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    // First frame after the restart may carry old settings; it is dropped.
    assert!(handle.deliver_texture_frame(1_000));
    assert!(handle.deliver_texture_frame(2_000));
    assert!(wait_for(|| observer.texture_frame_count() == 1, WAIT));
    let frame = &observer.texture_frames()[0];
    assert_eq!(frame.timestamp_ns, 2_000);
    assert_eq!((frame.width, frame.height), (640, 480));
}

#[test]
fn test_switch_creates_fresh_surface() {
    let (capturer, handle, _events) = texture_capturer(0);
    let observer = RecordingObserver::new();
    let switch = RecordingSwitch::new();

    capturer
        .start_capture(1280, 720, 30, Box::new(observer.clone()))
        .unwrap();
    assert!(wait_for(|| handle.is_streaming(), WAIT));

    capturer.switch_camera(Box::new(switch.clone())).unwrap();
    assert!(wait_for(|| switch.done() == vec![true], WAIT));
    // The new device brought its own surface; the old one was released.
    assert!(handle.surface_created());
    assert!(handle.surface_released_at(0));
    assert!(!handle.surface_released());

    assert!(handle.deliver_texture_frame(1_000));
    assert!(wait_for(|| observer.texture_frame_count() == 1, WAIT));
    assert_eq!(observer.texture_frames()[0].rotation_degrees, 270);
}
