//! CPU-resident frame payloads.
//!
//! [`CpuFrameHandle`] implements [`FrameHandle`] over an RGBA8 buffer in main
//! memory. It behaves like a device handle: pixels are freed on `release`,
//! and a second `release` fails with [`HandleError::AlreadyReleased`].
//! Used by the synthetic capture source and throughout the tests.

use crate::error::HandleError;
use crate::frame::FrameHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// RGBA8 pixel storage with a 64-byte aligned stride.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    /// Bytes per row (may include padding)
    pub stride: usize,
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Create a zeroed buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let min_stride = width as usize * 4;
        let stride = (min_stride + 63) & !63;
        Self {
            width,
            height,
            stride,
            data: vec![0u8; stride * height as usize],
        }
    }

    /// Get a row of pixel data.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * 4]
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.width as usize * 4]
    }

    /// Colour bars scrolled horizontally by `phase` pixels.
    pub fn test_pattern(width: u32, height: u32, phase: u32) -> Self {
        const BARS: [[u8; 4]; 8] = [
            [255, 255, 255, 255],
            [255, 255, 0, 255],
            [0, 255, 255, 255],
            [0, 255, 0, 255],
            [255, 0, 255, 255],
            [255, 0, 0, 255],
            [0, 0, 255, 255],
            [0, 0, 0, 255],
        ];

        let mut frame = Self::new(width, height);
        if width == 0 {
            return frame;
        }
        for y in 0..height {
            let row = frame.row_mut(y);
            for x in 0..width {
                let bar = (((x + phase) % width) * 8 / width) as usize;
                let i = x as usize * 4;
                row[i..i + 4].copy_from_slice(&BARS[bar]);
            }
        }
        frame
    }
}

/// Shared counter of successful and rejected releases.
///
/// Clones observe the same counts, so a test can hand one ledger to every
/// handle it creates and assert totals afterwards.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLedger {
    released: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
}

impl ReleaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles actually freed.
    pub fn count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of release calls that hit an already-freed handle.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

/// A frame handle backed by main memory.
#[derive(Debug)]
pub struct CpuFrameHandle {
    width: u32,
    height: u32,
    pixels: Mutex<Option<FrameBuffer>>,
    ledger: ReleaseLedger,
}

impl CpuFrameHandle {
    pub fn new(buffer: FrameBuffer, ledger: &ReleaseLedger) -> Self {
        Self {
            width: buffer.width,
            height: buffer.height,
            pixels: Mutex::new(Some(buffer)),
            ledger: ledger.clone(),
        }
    }

    /// A zeroed handle of the given size.
    pub fn blank(width: u32, height: u32, ledger: &ReleaseLedger) -> Self {
        Self::new(FrameBuffer::new(width, height), ledger)
    }

    /// Run `f` against the pixels, failing if the handle was released.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&FrameBuffer) -> R) -> Result<R, HandleError> {
        let guard = self.pixels.lock();
        guard.as_ref().map(f).ok_or(HandleError::AlreadyReleased)
    }

    pub fn is_released(&self) -> bool {
        self.pixels.lock().is_none()
    }
}

impl FrameHandle for CpuFrameHandle {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn release(&self) -> Result<(), HandleError> {
        match self.pixels.lock().take() {
            Some(_) => {
                self.ledger.released.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => {
                self.ledger.rejected.fetch_add(1, Ordering::SeqCst);
                Err(HandleError::AlreadyReleased)
            }
        }
    }

    fn duplicate(&self) -> Result<Self, HandleError> {
        let buffer = self.with_pixels(FrameBuffer::clone)?;
        Ok(Self::new(buffer, &self.ledger))
    }
}
