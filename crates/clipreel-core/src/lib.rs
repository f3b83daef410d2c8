//! clipreel core - foundation types for the capture pipeline
//!
//! This crate provides the types shared by every pipeline stage:
//! - Frame records and the external resource handle trait
//! - A CPU-backed handle for synthetic sources and tests
//! - Capture configuration
//! - Error types

pub mod config;
pub mod error;
pub mod frame;
pub mod pixels;

pub use config::{CaptureConfig, CaptureRate, MAX_BUFFER_SECONDS, MIN_BUFFER_SECONDS};
pub use error::{ClipError, HandleError, Result};
pub use frame::{memory_estimate, FrameHandle, FrameId, FrameRecord, RawFrame};
pub use pixels::{CpuFrameHandle, FrameBuffer, ReleaseLedger};
