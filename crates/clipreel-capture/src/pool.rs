//! Ownership pool for captured frame handles.
//!
//! Every live frame handle is registered here together with the set of
//! pipeline stages that hold it. A handle is released the moment its owner
//! set becomes empty, and only the pool ever calls [`FrameHandle::release`].
//!
//! Owners are named tags rather than a bare count so each stage can tear
//! down by tag, in any order relative to the others.

use clipreel_core::{FrameHandle, FrameId, FrameRecord, HandleError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Pipeline stage holding a reference to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerTag {
    Capture,
    Edit,
    Export,
}

impl OwnerTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Edit => "edit",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate view of the pool for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_entries: usize,
    pub per_owner_counts: BTreeMap<OwnerTag, usize>,
}

struct PoolEntry<H> {
    record: FrameRecord<H>,
    owners: BTreeSet<OwnerTag>,
}

/// Registry mapping frame ids to their handle and owner set.
///
/// An entry never exists with zero owners.
pub struct OwnershipPool<H: FrameHandle> {
    entries: HashMap<FrameId, PoolEntry<H>>,
}

impl<H: FrameHandle> Default for OwnershipPool<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: FrameHandle> OwnershipPool<H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a frame under `owner`.
    ///
    /// A known id only gains `owner`; registering the same owner twice is a
    /// no-op and the originally registered handle is kept.
    pub fn register(&mut self, record: FrameRecord<H>, owner: OwnerTag) {
        let id = record.id;
        match self.entries.get_mut(&id) {
            Some(entry) => {
                if !Arc::ptr_eq(&entry.record.handle, &record.handle) {
                    warn!(%id, %owner, "re-registration with a different handle, keeping the original");
                }
                entry.owners.insert(owner);
            }
            None => {
                self.entries.insert(
                    id,
                    PoolEntry {
                        record,
                        owners: BTreeSet::from([owner]),
                    },
                );
            }
        }
        trace!(%id, %owner, "registered");
    }

    /// Add `owner` to a frame and return its record, or `None` if the id is
    /// unknown (never registered, or already fully released).
    pub fn acquire(&mut self, id: FrameId, owner: OwnerTag) -> Option<FrameRecord<H>> {
        let entry = self.entries.get_mut(&id)?;
        entry.owners.insert(owner);
        trace!(%id, %owner, "acquired");
        Some(entry.record.clone())
    }

    /// Drop `owner` from a frame. Returns `true` only if this released the
    /// underlying handle.
    pub fn release(&mut self, id: FrameId, owner: OwnerTag) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        if !entry.owners.remove(&owner) {
            return false;
        }
        trace!(%id, %owner, "released");
        if !entry.owners.is_empty() {
            return false;
        }
        if let Some(entry) = self.entries.remove(&id) {
            destroy(id, &entry.record);
        }
        true
    }

    /// Release `owner` from every frame it holds. Returns the number of
    /// handles destroyed; frames still held by another stage are not counted.
    pub fn release_all(&mut self, owner: OwnerTag) -> usize {
        let ids: Vec<FrameId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.owners.contains(&owner))
            .map(|(id, _)| *id)
            .collect();

        let destroyed = ids
            .into_iter()
            .filter(|id| self.release(*id, owner))
            .count();
        debug!(%owner, destroyed, remaining = self.entries.len(), "released stage");
        destroyed
    }

    /// Snapshot of a frame's current owners.
    pub fn owners(&self, id: FrameId) -> Option<BTreeSet<OwnerTag>> {
        self.entries.get(&id).map(|entry| entry.owners.clone())
    }

    /// Whether `owner` currently holds `id`.
    pub fn holds(&self, id: FrameId, owner: OwnerTag) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.owners.contains(&owner))
    }

    pub fn stats(&self) -> PoolStats {
        let mut per_owner_counts = BTreeMap::new();
        for owner in self.entries.values().flat_map(|entry| entry.owners.iter()) {
            *per_owner_counts.entry(*owner).or_insert(0) += 1;
        }
        PoolStats {
            total_entries: self.entries.len(),
            per_owner_counts,
        }
    }

    /// Release a handle that never entered the pool, such as a frame that
    /// arrived after capture stopped or a copy that lost its stage.
    pub fn release_unregistered(&mut self, record: FrameRecord<H>) {
        debug_assert!(!self.entries.contains_key(&record.id), "frame {} is registered", record.id);
        destroy(record.id, &record);
    }

    /// Destroy every entry regardless of owners. Returns the count destroyed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (id, entry) in self.entries.drain() {
            destroy(id, &entry.record);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: FrameHandle> Drop for OwnershipPool<H> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(entries = self.entries.len(), "ownership pool dropped with live frames, forcing release");
            self.clear();
        }
    }
}

/// A pool shared by the controller and the stage leases it hands out, so
/// that frames leased to a stage outlive the controller.
pub type SharedPool<H> = Arc<Mutex<OwnershipPool<H>>>;

pub(crate) fn shared<H: FrameHandle>(pool: OwnershipPool<H>) -> SharedPool<H> {
    Arc::new(Mutex::new(pool))
}

/// An empty pool reachable only through the returned handle.
#[cfg(test)]
pub(crate) fn detached<H: FrameHandle>() -> Arc<dyn Reclaim<H>> {
    shared(OwnershipPool::<H>::new())
}

/// Pool access for leases and handles once the command queue is closed.
pub(crate) trait Reclaim<H>: Send + Sync {
    /// Drop `stage`'s tag from every frame. Returns the handles destroyed.
    fn release_stage(&self, stage: OwnerTag) -> usize;

    fn release_unregistered(&self, record: FrameRecord<H>);
}

impl<H: FrameHandle> Reclaim<H> for Mutex<OwnershipPool<H>> {
    fn release_stage(&self, stage: OwnerTag) -> usize {
        self.lock().release_all(stage)
    }

    fn release_unregistered(&self, record: FrameRecord<H>) {
        self.lock().release_unregistered(record);
    }
}

/// Release a handle, swallowing a double release.
fn destroy<H: FrameHandle>(id: FrameId, record: &FrameRecord<H>) {
    match record.handle.release() {
        Ok(()) => debug!(%id, "frame handle released"),
        Err(HandleError::AlreadyReleased) => {
            warn!(%id, "frame handle was already released outside the pool")
        }
        Err(e) => warn!(%id, error = %e, "frame handle release failed"),
    }
}
