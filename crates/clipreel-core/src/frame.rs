//! Frame records and the external resource handles they wrap.
//!
//! A decoded frame payload lives outside normal memory management (device
//! memory, a shared texture, a hardware surface) and must be released
//! explicitly, at most once. [`FrameHandle`] is the seam to that resource;
//! [`FrameRecord`] pairs a handle with its identity and metadata.

use crate::error::HandleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a captured frame, stable for the frame's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub Uuid);

impl FrameId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque decoded-frame payload with an explicit release operation.
///
/// Implementations must report [`HandleError::AlreadyReleased`] when
/// `release` is called a second time, mirroring device APIs that raise on
/// double-close. Dimensions are fixed for the handle's lifetime.
pub trait FrameHandle: Send + Sync + 'static {
    /// Pixel dimensions as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Free the underlying resource.
    fn release(&self) -> Result<(), HandleError>;

    /// Produce an independent copy backed by its own resource.
    fn duplicate(&self) -> Result<Self, HandleError>
    where
        Self: Sized;
}

/// Estimated resident size of a frame in bytes.
///
/// Device-resident frames are assumed to occupy one tenth of their raw RGBA
/// footprint. The ratio is fixed, not measured, so insert and evict always
/// agree on the amount.
#[inline]
pub fn memory_estimate(width: u32, height: u32) -> u64 {
    (width as u64 * height as u64 * 4) / 10
}

/// A raw frame as delivered by a capture source, before it gets an identity.
#[derive(Debug)]
pub struct RawFrame<H> {
    pub handle: H,
    /// Source timestamp in microseconds, if the producer supplies one.
    pub timestamp_us: Option<u64>,
}

impl<H> RawFrame<H> {
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            timestamp_us: None,
        }
    }

    pub fn with_timestamp(handle: H, timestamp_us: u64) -> Self {
        Self {
            handle,
            timestamp_us: Some(timestamp_us),
        }
    }
}

/// One captured frame: identity, handle and metadata.
///
/// Cloning a record clones the `Arc`, not the resource. Use
/// [`FrameRecord::duplicate`] for an independent copy.
#[derive(Debug)]
pub struct FrameRecord<H> {
    pub id: FrameId,
    pub handle: Arc<H>,
    /// Capture time in microseconds since the session started.
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
}

impl<H> Clone for FrameRecord<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handle: Arc::clone(&self.handle),
            timestamp_us: self.timestamp_us,
            width: self.width,
            height: self.height,
        }
    }
}

impl<H: FrameHandle> FrameRecord<H> {
    /// Wrap a handle under a fresh id, reading dimensions from the handle.
    pub fn new(handle: H, timestamp_us: u64) -> Self {
        let (width, height) = handle.dimensions();
        Self {
            id: FrameId::new(),
            handle: Arc::new(handle),
            timestamp_us,
            width,
            height,
        }
    }

    /// Copy the record onto a freshly duplicated handle with a new id.
    pub fn duplicate(&self) -> Result<Self, HandleError> {
        let handle = self.handle.duplicate()?;
        Ok(Self {
            id: FrameId::new(),
            handle: Arc::new(handle),
            timestamp_us: self.timestamp_us,
            width: self.width,
            height: self.height,
        })
    }
}

impl<H> FrameRecord<H> {
    /// Memory estimate computed from this record's own stored dimensions.
    #[inline]
    pub fn memory_estimate(&self) -> u64 {
        memory_estimate(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::{CpuFrameHandle, ReleaseLedger};

    #[test]
    fn test_memory_estimate_1080p() {
        // 1920 * 1080 * 4 = 8_294_400, one tenth of that
        assert_eq!(memory_estimate(1920, 1080), 829_440);
        assert_eq!(memory_estimate(0, 1080), 0);
    }

    #[test]
    fn test_memory_estimate_truncates() {
        assert_eq!(memory_estimate(1, 1), 0);
        assert_eq!(memory_estimate(3, 1), 1);
    }

    #[test]
    fn test_record_reads_dimensions_from_handle() {
        let ledger = ReleaseLedger::new();
        let record = FrameRecord::new(CpuFrameHandle::blank(64, 32, &ledger), 10);
        assert_eq!((record.width, record.height), (64, 32));
        assert_eq!(record.memory_estimate(), memory_estimate(64, 32));
    }

    #[test]
    fn test_clone_shares_handle() {
        let ledger = ReleaseLedger::new();
        let record = FrameRecord::new(CpuFrameHandle::blank(8, 8, &ledger), 0);
        let copy = record.clone();
        assert_eq!(copy.id, record.id);
        assert!(Arc::ptr_eq(&copy.handle, &record.handle));
    }

    #[test]
    fn test_duplicate_is_independent() {
        let ledger = ReleaseLedger::new();
        let record = FrameRecord::new(CpuFrameHandle::blank(8, 8, &ledger), 42);
        let dup = record.duplicate().unwrap();
        assert_ne!(dup.id, record.id);
        assert_eq!(dup.timestamp_us, 42);

        record.handle.release().unwrap();
        assert!(dup.handle.with_pixels(|_| ()).is_ok());
        assert_eq!(ledger.count(), 1);
    }
}
