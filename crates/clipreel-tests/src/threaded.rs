//! Controller running on its own thread, fed by a producer worker.

use clipreel_capture::{CaptureController, CaptureError, CaptureState, ControllerEvent, StopMode, SyntheticSource};
use clipreel_core::{CaptureConfig, CaptureRate, CpuFrameHandle, ReleaseLedger};
use crossbeam_channel::Receiver;
use std::thread::JoinHandle;
use std::time::Duration;

fn spawn(
    config: CaptureConfig,
    source: SyntheticSource,
) -> (
    clipreel_capture::ControllerHandle<CpuFrameHandle>,
    Receiver<ControllerEvent>,
    JoinHandle<CaptureController<CpuFrameHandle>>,
) {
    let mut controller = CaptureController::new(config).unwrap();
    controller.start_source(source).unwrap();
    let handle = controller.handle();
    let events = controller.events();
    let thread = std::thread::spawn(move || {
        controller.run();
        controller
    });
    (handle, events, thread)
}

fn wait_for(events: &Receiver<ControllerEvent>, wanted: impl Fn(&ControllerEvent) -> bool) -> ControllerEvent {
    loop {
        let event = events
            .recv_timeout(Duration::from_secs(5))
            .expect("controller event");
        if wanted(&event) {
            return event;
        }
    }
}

#[test]
fn exhausted_source_stops_and_preserves() {
    let ledger = ReleaseLedger::new();
    let mut config = CaptureConfig::new(CaptureRate::Fps60, 1);
    config.failure_threshold = 3;
    let source = SyntheticSource::new(16, 16, &ledger).fail_from(4);
    let (handle, events, thread) = spawn(config, source);

    let event = wait_for(&events, |e| matches!(e, ControllerEvent::ResourceExhausted { .. }));
    assert_eq!(event, ControllerEvent::ResourceExhausted { failures: 3 });

    let stats = handle.stats().unwrap();
    assert_eq!(stats.state, CaptureState::Stopped);
    assert_eq!(stats.buffer.frame_count, 4);
    assert!(matches!(handle.resume(), Err(CaptureError::InvalidTransition { .. })));

    // Preserved frames can still be edited after the failure
    let lease = handle.hand_off_to_edit().unwrap();
    assert_eq!(lease.len(), 4);
    drop(lease);

    handle.shutdown().unwrap();
    let controller = thread.join().unwrap();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 4);
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn ended_track_stops_capture() {
    let ledger = ReleaseLedger::new();
    let source = SyntheticSource::new(8, 8, &ledger).end_after(6);
    let (handle, events, thread) = spawn(CaptureConfig::new(CaptureRate::Fps60, 1), source);

    wait_for(&events, |e| *e == ControllerEvent::TrackEnded);
    let stats = handle.stats().unwrap();
    assert_eq!(stats.state, CaptureState::Stopped);
    assert_eq!(stats.buffer.frame_count, 6);

    handle.shutdown().unwrap();
    let controller = thread.join().unwrap();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 6);
}

#[test]
fn pause_resume_stop_over_handle() {
    let ledger = ReleaseLedger::new();
    let source = SyntheticSource::new(8, 8, &ledger);
    let (handle, events, thread) = spawn(CaptureConfig::new(CaptureRate::Fps60, 1), source);

    std::thread::sleep(Duration::from_millis(100));
    handle.pause().unwrap();
    wait_for(&events, |e| {
        *e == ControllerEvent::StateChanged {
            from: CaptureState::Capturing,
            to: CaptureState::Paused,
        }
    });
    let paused = handle.stats().unwrap();
    assert_eq!(paused.state, CaptureState::Paused);
    assert!(matches!(handle.pause(), Err(CaptureError::InvalidTransition { .. })));

    // Paused buffers keep their frames
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.stats().unwrap().buffer.frame_count, paused.buffer.frame_count);

    handle.resume().unwrap();
    handle.stop(StopMode::Discard).unwrap();
    let stopped = handle.stats().unwrap();
    assert_eq!(stopped.state, CaptureState::Stopped);
    assert_eq!(stopped.buffer.frame_count, 0);
    assert_eq!(stopped.pool.total_entries, 0);

    handle.shutdown().unwrap();
    thread.join().unwrap();
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn handle_reports_controller_gone() {
    let mut controller = CaptureController::<CpuFrameHandle>::new(CaptureConfig::default()).unwrap();
    let handle = controller.handle();
    handle.shutdown().unwrap();
    controller.pump();
    drop(controller);

    assert!(matches!(handle.stats(), Err(CaptureError::ControllerGone)));
}
