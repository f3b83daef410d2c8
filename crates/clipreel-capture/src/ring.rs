//! Fixed-capacity rolling window of captured frames.
//!
//! Insertion, eviction and statistics are all O(1): the ring keeps a running
//! memory total that is adjusted on every insert and evict rather than
//! recomputed by scanning.
//!
//! The ring knows nothing about the ownership pool. When `insert` evicts a
//! record it hands it back, and the caller releases the `capture` tag for it
//! in the same step.

use clipreel_core::{CaptureRate, ClipError, FrameHandle, FrameId, FrameRecord, HandleError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Snapshot of the ring's size and footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub frame_count: usize,
    pub duration_seconds: f64,
    pub memory_mb: f64,
}

/// Independent copies of the most recent frames.
#[derive(Debug)]
pub struct ExtractedClip<H> {
    pub frames: Vec<FrameRecord<H>>,
    pub duration_seconds: f64,
    pub captured_at: SystemTime,
}

/// A duplication that failed part-way.
///
/// The copies made before the failure never reached the pool; the caller
/// owns them and must release them through it.
pub struct PartialExtract<H> {
    pub error: HandleError,
    pub copies: Vec<FrameRecord<H>>,
}

impl<H> fmt::Debug for PartialExtract<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialExtract")
            .field("error", &self.error)
            .field("copies", &self.copies.len())
            .finish()
    }
}

/// Circular buffer of frame records, oldest at `head`.
pub struct FrameRing<H> {
    slots: Box<[Option<FrameRecord<H>>]>,
    head: usize,
    tail: usize,
    len: usize,
    total_memory_bytes: u64,
}

impl<H> FrameRing<H> {
    /// Create an empty ring. A zero capacity is rejected.
    pub fn new(capacity: usize) -> Result<Self, ClipError> {
        if capacity == 0 {
            return Err(ClipError::InvalidCapacity(capacity));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
            total_memory_bytes: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Running sum of per-frame memory estimates over the live records.
    pub fn total_memory_bytes(&self) -> u64 {
        self.total_memory_bytes
    }

    /// Insert a record, returning the evicted oldest record if the ring was full.
    pub fn insert(&mut self, record: FrameRecord<H>) -> Option<FrameRecord<H>> {
        debug_assert!(
            self.newest()
                .map_or(true, |newest| newest.timestamp_us <= record.timestamp_us),
            "frame timestamps must be non-decreasing"
        );

        let capacity = self.capacity();
        self.total_memory_bytes += record.memory_estimate();

        let evicted = if self.len == capacity {
            // Full: head and tail coincide on the oldest slot
            let old = self.slots[self.head].replace(record);
            self.head = (self.head + 1) % capacity;
            if let Some(old) = &old {
                self.total_memory_bytes -= old.memory_estimate();
            }
            debug_assert!(old.is_some(), "full ring had an empty head slot");
            old
        } else {
            let displaced = self.slots[self.tail].replace(record);
            debug_assert!(displaced.is_none(), "tail slot was occupied");
            self.len += 1;
            None
        };

        self.tail = (self.tail + 1) % capacity;
        evicted
    }

    /// The record the next insert would evict, if the ring is full.
    pub fn next_eviction(&self) -> Option<&FrameRecord<H>> {
        if self.is_full() {
            self.slots[self.head].as_ref()
        } else {
            None
        }
    }

    pub fn oldest(&self) -> Option<&FrameRecord<H>> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    pub fn newest(&self) -> Option<&FrameRecord<H>> {
        if self.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        self.slots[(self.tail + capacity - 1) % capacity].as_ref()
    }

    /// Live records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &FrameRecord<H>> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    /// Ids of the live records, oldest first.
    pub fn ids(&self) -> Vec<FrameId> {
        self.iter().map(|record| record.id).collect()
    }

    /// Empty the ring, returning every live record oldest first so the caller
    /// can release their `capture` ownership. Capacity is kept.
    pub fn drain(&mut self) -> Vec<FrameRecord<H>> {
        let capacity = self.capacity();
        let mut records = Vec::with_capacity(self.len);
        for i in 0..self.len {
            if let Some(record) = self.slots[(self.head + i) % capacity].take() {
                records.push(record);
            }
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
        self.total_memory_bytes = 0;
        records
    }

    pub fn stats(&self, rate: CaptureRate) -> BufferStats {
        BufferStats {
            frame_count: self.len,
            duration_seconds: self.len as f64 / rate.fps() as f64,
            memory_mb: self.total_memory_bytes as f64 / (1024.0 * 1024.0),
        }
    }
}

impl<H: FrameHandle> FrameRing<H> {
    /// Duplicate the most recent `ceil(max_duration_ms / 1000 × fps)` records.
    ///
    /// Each returned record has its own freshly duplicated handle and a new
    /// id; the ring and its handles are untouched. A duration too large to
    /// count in frames selects every record. If any duplication fails, the
    /// copies already made are handed back in the error.
    pub fn extract_recent(
        &self,
        rate: CaptureRate,
        max_duration_ms: u64,
    ) -> Result<ExtractedClip<H>, PartialExtract<H>> {
        let wanted = max_duration_ms.saturating_mul(rate.fps() as u64).div_ceil(1000);
        let wanted = usize::try_from(wanted).unwrap_or(usize::MAX);
        let skip = self.len.saturating_sub(wanted);

        let mut frames = Vec::with_capacity(self.len - skip);
        for record in self.iter().skip(skip) {
            match record.duplicate() {
                Ok(copy) => frames.push(copy),
                Err(error) => {
                    return Err(PartialExtract {
                        error,
                        copies: frames,
                    })
                }
            }
        }

        Ok(ExtractedClip {
            duration_seconds: frames.len() as f64 / rate.fps() as f64,
            frames,
            captured_at: SystemTime::now(),
        })
    }
}
