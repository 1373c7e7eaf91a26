// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deferred command buffer.
//!
//! While deferred mode is active, structural mutations (destroy, add,
//! remove) do not touch archetype storage. Instead each entity gets a
//! [`CmdBucket`] recording what should happen to it, and the bucket's
//! index is pushed onto a dirty list in first-touch order. `World::flush`
//! walks the dirty list once and applies every bucket through the same
//! immediate-mode mutators used outside deferred mode.
//!
//! Staged component payloads (for `add`) live in a dedicated arena so a
//! whole deferred session can be reclaimed with a single rewind instead of
//! per-component frees.

use std::ptr::NonNull;

use crate::arena::Arena;
use crate::archetype::{comp_bit, Mask};
use crate::component::{ComponentId, MAX_COMPONENTS};

/// Per-entity pending-mutation record. Indexed by entity slot, not handle —
/// a stale bucket belonging to a freed-then-reused slot is caught by the
/// caller checking entity liveness before applying it.
pub(crate) struct CmdBucket {
    active: bool,
    pub destroy: bool,
    pub add_mask: Mask,
    pub remove_mask: Mask,
    data: [Option<NonNull<u8>>; MAX_COMPONENTS],
}

impl CmdBucket {
    fn new() -> Self {
        Self {
            active: false,
            destroy: false,
            add_mask: 0,
            remove_mask: 0,
            data: [None; MAX_COMPONENTS],
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_empty(&self) -> bool {
        !self.destroy && self.add_mask == 0 && self.remove_mask == 0
    }

    pub fn staged_ptr(&self, comp: ComponentId) -> Option<*mut u8> {
        self.data[comp as usize].map(NonNull::as_ptr)
    }
}

/// Deferred mutation staging area: one bucket per entity slot, a dirty
/// list in insertion order, and a rewindable arena for staged add payloads.
pub(crate) struct CommandBuffer {
    buckets: Box<[CmdBucket]>,
    dirty: Vec<u32>,
    arena: Arena,
    active: bool,
}

impl CommandBuffer {
    pub fn new(entity_capacity: usize, arena_capacity: usize) -> Self {
        let mut buckets = Vec::with_capacity(entity_capacity);
        buckets.resize_with(entity_capacity, CmdBucket::new);
        Self {
            buckets: buckets.into_boxed_slice(),
            dirty: Vec::new(),
            arena: Arena::new(arena_capacity),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enter deferred mode. A no-op if already deferred, matching the
    /// original's idempotent `deferBegin`.
    pub fn begin(&mut self) {
        if self.active {
            return;
        }
        self.dirty.clear();
        self.active = true;
    }

    pub fn dirty(&self) -> &[u32] {
        &self.dirty
    }

    pub fn bucket(&self, index: u32) -> &CmdBucket {
        &self.buckets[index as usize]
    }

    fn mark_dirty(&mut self, index: u32) {
        let bucket = &mut self.buckets[index as usize];
        if !bucket.active {
            bucket.active = true;
            self.dirty.push(index);
        }
    }

    pub fn stage_destroy(&mut self, index: u32) {
        let bucket = &mut self.buckets[index as usize];
        if bucket.destroy {
            return;
        }
        bucket.destroy = true;
        bucket.add_mask = 0;
        bucket.remove_mask = 0;
        self.mark_dirty(index);
    }

    /// Stage `comp` for addition, returning scratch storage for its value.
    /// If the component was already staged for addition, returns the same
    /// pointer so repeated `add::<T>` calls in one deferred session
    /// overwrite rather than double-allocate.
    pub fn stage_add(&mut self, index: u32, comp: ComponentId, size: usize, alignment: usize) -> *mut u8 {
        let bit = comp_bit(comp);
        if self.buckets[index as usize].add_mask & bit != 0 {
            return self.buckets[index as usize].data[comp as usize].unwrap().as_ptr();
        }

        let ptr = self.arena.alloc(size, alignment);
        let bucket = &mut self.buckets[index as usize];
        bucket.data[comp as usize] = NonNull::new(ptr);
        bucket.add_mask |= bit;
        bucket.remove_mask &= !bit;
        self.mark_dirty(index);
        ptr
    }

    pub fn stage_remove(&mut self, index: u32, comp: ComponentId) {
        let bit = comp_bit(comp);
        let bucket = &mut self.buckets[index as usize];
        bucket.remove_mask |= bit;
        bucket.add_mask &= !bit;
        self.mark_dirty(index);
    }

    /// Leave deferred mode: reset every bucket touched this session,
    /// reclaim the staging arena in one shot, and clear the dirty list.
    /// The caller must have already applied every dirty bucket.
    pub fn end(&mut self) {
        for &index in &self.dirty {
            self.buckets[index as usize].reset();
        }
        self.dirty.clear();
        self.arena.reset();
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_add_marks_dirty_once() {
        let mut cmds = CommandBuffer::new(4, 1024);
        cmds.begin();
        let p1 = cmds.stage_add(2, 0, 4, 4);
        let p2 = cmds.stage_add(2, 0, 4, 4);
        assert_eq!(p1, p2);
        assert_eq!(cmds.dirty(), &[2]);
    }

    #[test]
    fn destroy_clears_pending_masks() {
        let mut cmds = CommandBuffer::new(4, 1024);
        cmds.begin();
        cmds.stage_add(1, 0, 4, 4);
        cmds.stage_destroy(1);
        assert_eq!(cmds.bucket(1).add_mask, 0);
        assert!(cmds.bucket(1).destroy);
        assert_eq!(cmds.dirty(), &[1]);
    }

    #[test]
    fn remove_cancels_pending_add() {
        let mut cmds = CommandBuffer::new(4, 1024);
        cmds.begin();
        cmds.stage_add(0, 3, 4, 4);
        cmds.stage_remove(0, 3);
        assert_eq!(cmds.bucket(0).add_mask, 0);
        assert_ne!(cmds.bucket(0).remove_mask, 0);
    }

    #[test]
    fn end_resets_only_dirty_buckets_and_reclaims_arena() {
        let mut cmds = CommandBuffer::new(4, 1024);
        cmds.begin();
        cmds.stage_add(3, 0, 4, 4);
        cmds.end();
        assert!(!cmds.is_active());
        assert!(cmds.bucket(3).is_empty());
        assert!(cmds.dirty().is_empty());

        // Arena space should be reclaimed: staging again should succeed.
        cmds.begin();
        cmds.stage_add(3, 0, 4, 4);
    }
}
