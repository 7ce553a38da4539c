//! Reference counts for native handles shared between wrappers.
//!
//! A handle is present iff its count is at least one. The entry is
//! removed in the same step that takes the count from one to zero, under
//! the shard lock of the underlying `DashMap`, so a concurrent `acquire`
//! either lands before the decrement or recreates the entry afterwards.
//!
//! The shard lock is held only for one counter update and never across
//! an engine call, so contention is bounded by a few instructions per
//! operation on the same shard.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use podbridge_core::NativeHandle;
use tracing::warn;

#[derive(Debug, Default)]
pub struct HandleRegistry {
    counts: DashMap<NativeHandle, usize>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Increment the count for `handle`, creating it at one. Returns the
    /// new count.
    pub fn acquire(&self, handle: NativeHandle) -> usize {
        let mut count = self.counts.entry(handle).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the count for `handle`. Returns `true` when this call
    /// removed the last reference; the caller must then delete the native
    /// object.
    pub fn release(&self, handle: NativeHandle) -> bool {
        match self.counts.entry(handle) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => {
                warn!(%handle, "release of a handle with no live references");
                false
            }
        }
    }

    pub fn count(&self, handle: NativeHandle) -> usize {
        self.counts.get(&handle).map(|c| *c).unwrap_or(0)
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.counts.contains_key(&handle)
    }

    /// Number of distinct live handles.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
