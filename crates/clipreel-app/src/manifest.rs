//! JSON manifest encoder.
//!
//! Stands in for a real image encoder: records which frames were exported,
//! their timing and a pixel checksum, and writes that as JSON.

use clipreel_capture::{CaptureError, CaptureResult, ExportArtifact, ExportProgress, FrameEncoder};
use clipreel_core::{CaptureRate, CpuFrameHandle, FrameId, FrameRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestFrame {
    pub id: FrameId,
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub checksum: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub fps: u32,
    pub duration_seconds: f64,
    pub frames: Vec<ManifestFrame>,
}

pub struct ManifestEncoder {
    path: PathBuf,
    rate: CaptureRate,
}

impl ManifestEncoder {
    pub fn new(path: impl Into<PathBuf>, rate: CaptureRate) -> Self {
        Self {
            path: path.into(),
            rate,
        }
    }
}

impl FrameEncoder<CpuFrameHandle> for ManifestEncoder {
    async fn encode(
        &mut self,
        frames: &[FrameRecord<CpuFrameHandle>],
        progress: &mut dyn FnMut(ExportProgress),
    ) -> CaptureResult<ExportArtifact> {
        let total = frames.len() as u64;
        let mut entries = Vec::with_capacity(frames.len());

        for (i, frame) in frames.iter().enumerate() {
            let checksum = frame
                .handle
                .with_pixels(|p| p.data.iter().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u64)))
                .map_err(|e| CaptureError::Encode(format!("frame {}: {e}", frame.id)))?;
            entries.push(ManifestFrame {
                id: frame.id,
                timestamp_us: frame.timestamp_us,
                width: frame.width,
                height: frame.height,
                checksum,
            });
            progress(ExportProgress {
                current_frame: i as u64 + 1,
                total_frames: total,
            });
        }

        let manifest = Manifest {
            fps: self.rate.fps(),
            duration_seconds: frames.len() as f64 / self.rate.fps() as f64,
            frames: entries,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        std::fs::write(&self.path, &json).map_err(|e| CaptureError::Encode(e.to_string()))?;

        Ok(ExportArtifact {
            path: Some(self.path.clone()),
            frame_count: frames.len(),
            bytes: json.len() as u64,
        })
    }
}
