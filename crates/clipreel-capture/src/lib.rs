//! clipreel capture - frame lifecycle for the capture → edit → export pipeline
//!
//! This crate handles:
//! - The ownership pool that decides when a frame handle is released
//! - The fixed-capacity rolling window of captured frames
//! - The capture controller, its command queue and producer thread
//! - Stage leases handed to the edit and export stages
//!
//! Frames are never copied between stages. A hand-off adds the receiving
//! stage's tag to each frame in the pool; each stage releases its tag once
//! on teardown, and a handle is freed when the last tag goes.

pub mod command;
pub mod controller;
pub mod edit;
pub mod error;
pub mod export;
pub mod lease;
pub mod pool;
pub mod producer;
pub mod ring;
pub mod source;

pub use command::{Command, ControlAction, ControllerEvent, ControllerHandle};
pub use controller::{CaptureController, CaptureState, PipelineStats, StopMode};
pub use edit::EditSession;
pub use error::{CaptureError, CaptureResult};
pub use export::{run_export, ExportArtifact, ExportProgress, FrameEncoder};
pub use lease::StageLease;
pub use pool::{OwnerTag, OwnershipPool, PoolStats, SharedPool};
pub use producer::{ProducerWorker, PRODUCER_BACKLOG};
pub use ring::{BufferStats, ExtractedClip, FrameRing, PartialExtract};
pub use source::{FrameSource, ReadySource, SourceError, SourceProvider, SyntheticSource};
