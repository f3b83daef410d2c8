//! Ownership across capture, edit and export without a producer thread.

use clipreel_capture::{
    CaptureController, CaptureError, CaptureState, ControllerEvent, OwnerTag, OwnershipPool, StopMode,
};
use clipreel_core::{CaptureConfig, CaptureRate, CpuFrameHandle, FrameRecord, RawFrame, ReleaseLedger};
use std::collections::BTreeSet;

fn controller(seconds: u32) -> CaptureController<CpuFrameHandle> {
    let mut controller = CaptureController::new(CaptureConfig::new(CaptureRate::Fps15, seconds)).unwrap();
    controller.start().unwrap();
    controller
}

fn feed(controller: &mut CaptureController<CpuFrameHandle>, ledger: &ReleaseLedger, frames: u64) {
    let handle = controller.handle();
    for i in 0..frames {
        let raw = RawFrame::with_timestamp(CpuFrameHandle::blank(8, 8, ledger), i * 66_666);
        handle.frame_produced(Ok(raw)).unwrap();
    }
    controller.pump();
}

#[test]
fn pool_cross_stage_release() {
    let ledger = ReleaseLedger::new();
    let mut pool = OwnershipPool::new();
    let f1 = FrameRecord::new(CpuFrameHandle::blank(4, 4, &ledger), 0);
    let id = f1.id;

    pool.register(f1, OwnerTag::Capture);
    assert!(pool.acquire(id, OwnerTag::Edit).is_some());
    assert!(!pool.release(id, OwnerTag::Capture));
    assert_eq!(pool.owners(id), Some(BTreeSet::from([OwnerTag::Edit])));
    assert_eq!(ledger.count(), 0);

    assert_eq!(pool.release_all(OwnerTag::Edit), 1);
    assert!(pool.is_empty());
    assert_eq!(ledger.count(), 1);
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn edit_keeps_frames_alive_through_eviction() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 15);

    let lease = controller.hand_off_to_edit().unwrap();
    assert_eq!(lease.len(), 15);

    // A full window of new frames evicts everything the editor holds
    feed(&mut controller, &ledger, 15);
    assert_eq!(controller.ring().len(), 15);
    assert_eq!(ledger.count(), 0);
    for frame in lease.frames() {
        assert!(!frame.handle.is_released());
        assert_eq!(controller.pool().owners(frame.id), Some(BTreeSet::from([OwnerTag::Edit])));
    }

    lease.release();
    controller.pump();
    assert_eq!(ledger.count(), 15);
    assert_eq!(controller.pool().len(), 15);

    controller.shutdown();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 30);
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn capture_edit_export_release_order() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(2);
    feed(&mut controller, &ledger, 20);

    controller.pause().unwrap();
    let edit = controller.hand_off_to_edit().unwrap();
    let selected: Vec<_> = edit.ids()[5..12].to_vec();

    // Capture goes away first; edit still owns all 20
    controller.stop(StopMode::Discard).unwrap();
    assert_eq!(controller.state(), CaptureState::Stopped);
    assert!(controller.ring().is_empty());
    assert_eq!(ledger.count(), 0);

    let export = controller.hand_off_to_export(&selected).unwrap();
    assert_eq!(export.len(), 7);
    let stats = controller.pool().stats();
    assert_eq!(stats.per_owner_counts.get(&OwnerTag::Edit), Some(&20));
    assert_eq!(stats.per_owner_counts.get(&OwnerTag::Export), Some(&7));

    // Edit closes before export finishes: only the unselected frames go
    edit.release();
    controller.pump();
    assert_eq!(ledger.count(), 13);
    assert!(export.frames().iter().all(|f| !f.handle.is_released()));

    export.release();
    controller.pump();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 20);
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn dropped_lease_releases_stage() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 5);
    let events = controller.events();

    {
        let _lease = controller.hand_off_to_edit().unwrap();
    }
    controller.stop(StopMode::Discard).unwrap();
    // The dropped lease's release is still queued
    assert_eq!(controller.pool().len(), 5);
    assert_eq!(ledger.count(), 0);

    controller.pump();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 5);
    let released: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            ControllerEvent::StageReleased { stage, destroyed } => Some((stage, destroyed)),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec![(OwnerTag::Edit, 5)]);
}

#[test]
fn snapshot_survives_buffer_discard() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(2);
    feed(&mut controller, &ledger, 30);

    let snapshot = controller.snapshot_recent(OwnerTag::Export, 1000).unwrap();
    assert_eq!(snapshot.len(), 15);
    let buffered: BTreeSet<_> = controller.ring().ids().into_iter().collect();
    assert!(snapshot.ids().iter().all(|id| !buffered.contains(id)));

    controller.stop(StopMode::Discard).unwrap();
    assert_eq!(ledger.count(), 30);
    assert!(snapshot.frames().iter().all(|f| !f.handle.is_released()));

    drop(snapshot);
    controller.pump();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 45);
}

#[test]
fn restart_discards_preserved_buffer() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 10);
    controller.stop(StopMode::Preserve).unwrap();
    assert_eq!(controller.ring().len(), 10);

    controller.start().unwrap();
    assert!(controller.ring().is_empty());
    assert_eq!(ledger.count(), 10);
    assert_eq!(controller.state(), CaptureState::Capturing);
}

#[test]
fn reconfigure_keeps_leased_frames() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 15);
    let lease = controller.hand_off_to_edit().unwrap();

    controller
        .reconfigure(CaptureConfig::new(CaptureRate::Fps60, 2))
        .unwrap();
    assert_eq!(controller.ring().capacity(), 120);
    assert!(controller.ring().is_empty());
    assert_eq!(ledger.count(), 0);

    drop(lease);
    controller.pump();
    assert_eq!(ledger.count(), 15);
}

#[test]
fn leases_outlive_dropped_controller() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(2);
    feed(&mut controller, &ledger, 20);
    controller.pause().unwrap();
    let edit = controller.hand_off_to_edit().unwrap();
    let selected: Vec<_> = edit.ids()[..8].to_vec();
    let export = controller.hand_off_to_export(&selected).unwrap();

    drop(controller);
    // Capture tag is gone; edit and export still hold their frames
    assert_eq!(ledger.count(), 0);
    assert!(edit.frames().iter().all(|f| !f.handle.is_released()));

    drop(edit);
    assert_eq!(ledger.count(), 12);
    assert!(export.frames().iter().all(|f| !f.handle.is_released()));

    export.release();
    assert_eq!(ledger.count(), 20);
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn dropped_controller_releases_unpumped_frames() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 4);
    let handle = controller.handle();
    handle
        .frame_produced(Ok(RawFrame::new(CpuFrameHandle::blank(8, 8, &ledger))))
        .unwrap();

    drop(controller);
    assert_eq!(ledger.count(), 5);

    // Late frames are released on the spot
    let late = handle.frame_produced(Ok(RawFrame::new(CpuFrameHandle::blank(8, 8, &ledger))));
    assert!(matches!(late, Err(CaptureError::ControllerGone)));
    assert_eq!(ledger.count(), 6);
    assert_eq!(ledger.rejected(), 0);
}

#[test]
fn snapshot_with_unbounded_duration_takes_whole_buffer() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 9);

    let lease = controller.snapshot_recent(OwnerTag::Export, u64::MAX).unwrap();
    assert_eq!(lease.len(), 9);
    assert_eq!(controller.ring().len(), 9);

    lease.release();
    controller.pump();
    assert_eq!(ledger.count(), 9);
    assert_eq!(controller.pool().len(), 9);
}

#[test]
fn shutdown_refuses_further_leases() {
    let ledger = ReleaseLedger::new();
    let mut controller = controller(1);
    feed(&mut controller, &ledger, 5);
    let ids = controller.ring().ids();
    controller.handle().shutdown().unwrap();

    assert!(matches!(controller.hand_off_to_edit(), Err(CaptureError::ControllerGone)));
    assert!(matches!(controller.hand_off_to_export(&ids), Err(CaptureError::ControllerGone)));
    assert!(matches!(
        controller.snapshot_recent(OwnerTag::Edit, 1000),
        Err(CaptureError::ControllerGone)
    ));
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 5);
}
