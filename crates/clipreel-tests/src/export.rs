//! Edit selection flowing into the export stage.

use clipreel_capture::{
    run_export, CaptureController, CaptureError, CaptureResult, EditSession, ExportArtifact, ExportProgress,
    FrameEncoder, StopMode,
};
use clipreel_core::{CaptureConfig, CaptureRate, CpuFrameHandle, FrameRecord, RawFrame, ReleaseLedger};
use tokio::sync::watch;

/// Reads every pixel buffer, failing if any handle was already freed.
struct PixelReader {
    delay: std::time::Duration,
}

impl FrameEncoder<CpuFrameHandle> for PixelReader {
    async fn encode(
        &mut self,
        frames: &[FrameRecord<CpuFrameHandle>],
        progress: &mut dyn FnMut(ExportProgress),
    ) -> CaptureResult<ExportArtifact> {
        let mut bytes = 0;
        for (i, frame) in frames.iter().enumerate() {
            tokio::time::sleep(self.delay).await;
            bytes += frame
                .handle
                .with_pixels(|p| p.data.len() as u64)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
            progress(ExportProgress {
                current_frame: i as u64 + 1,
                total_frames: frames.len() as u64,
            });
        }
        Ok(ExportArtifact {
            path: None,
            frame_count: frames.len(),
            bytes,
        })
    }
}

fn recorded(ledger: &ReleaseLedger, frames: u64) -> CaptureController<CpuFrameHandle> {
    let mut controller = CaptureController::new(CaptureConfig::new(CaptureRate::Fps30, 1)).unwrap();
    controller.start().unwrap();
    let handle = controller.handle();
    for i in 0..frames {
        let raw = RawFrame::with_timestamp(CpuFrameHandle::blank(16, 4, ledger), i * 33_333);
        handle.frame_produced(Ok(raw)).unwrap();
    }
    controller.pump();
    controller
}

#[tokio::test]
async fn trimmed_selection_exports_after_capture_discard() {
    let ledger = ReleaseLedger::new();
    let mut controller = recorded(&ledger, 30);

    let mut edit = EditSession::new(controller.hand_off_to_edit().unwrap());
    edit.trim(10, 25);
    controller.stop(StopMode::Discard).unwrap();

    let lease = controller.hand_off_to_export(&edit.selected_ids()).unwrap();
    edit.close();
    controller.pump();
    assert_eq!(ledger.count(), 15);

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let mut last = None;
    let artifact = run_export(
        lease,
        &mut PixelReader {
            delay: std::time::Duration::ZERO,
        },
        cancel_rx,
        |p| last = Some(p),
    )
    .await
    .unwrap();

    assert_eq!(artifact.frame_count, 15);
    assert_eq!(artifact.bytes, 15 * 64 * 4);
    assert_eq!(last.map(|p| p.fraction()), Some(1.0));

    controller.pump();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 30);
    assert_eq!(ledger.rejected(), 0);
}

#[tokio::test]
async fn cancelled_export_releases_selection() {
    let ledger = ReleaseLedger::new();
    let mut controller = recorded(&ledger, 12);

    let edit = controller.hand_off_to_edit().unwrap();
    let lease = controller.hand_off_to_export(&edit.ids()).unwrap();
    drop(edit);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut encoder = PixelReader {
        delay: std::time::Duration::from_millis(50),
    };
    let canceller = async {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel_tx.send(true).unwrap();
    };
    let (result, _) = tokio::join!(run_export(lease, &mut encoder, cancel_rx, |_| {}), canceller);
    assert!(matches!(result, Err(CaptureError::Cancelled)));

    // Capture still holds all twelve
    controller.pump();
    assert_eq!(controller.pool().len(), 12);
    assert_eq!(ledger.count(), 0);

    controller.shutdown();
    assert!(controller.pool().is_empty());
    assert_eq!(ledger.count(), 12);
}

#[tokio::test]
async fn second_export_waits_for_release() {
    let ledger = ReleaseLedger::new();
    let mut controller = recorded(&ledger, 5);
    let ids = controller.ring().ids();

    let first = controller.hand_off_to_export(&ids).unwrap();
    assert!(matches!(
        controller.hand_off_to_export(&ids),
        Err(CaptureError::StageActive(_))
    ));

    first.release();
    let second = controller.hand_off_to_export(&ids).unwrap();
    assert_eq!(second.len(), 5);
}
