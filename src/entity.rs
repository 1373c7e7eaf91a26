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

//! Generational entity handles and the fixed-capacity entity allocator.
//!
//! An [`EntityId`] packs a slot index (high 32 bits) and a generation
//! counter (low 32 bits) into a single `u64`. Validity is a single
//! equality check against the slot's current id — no pointer, no
//! reference counting.

use std::fmt;

use crate::archetype::ArchetypeId;

/// Maximum number of live + free entity slots.
pub const MAX_ENTITIES: usize = 1024;

/// Free-list tail sentinel; also the index portion of a handle that has
/// never been issued to a live entity.
const FREE_LIST_SENTINEL: u32 = u32::MAX;

/// Opaque, generational entity handle.
///
/// `is_valid` and equality to the slot's current id are the only supported
/// tests — handles carry no other meaning to the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

impl EntityId {
    pub(crate) fn pack(index: u32, generation: u32) -> Self {
        EntityId(((index as u64) << 32) | generation as u64)
    }

    /// Slot index (high 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Generation counter (low 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

/// Per-slot bookkeeping: current handle (or free-list link), current
/// archetype, and row within that archetype.
#[derive(Clone, Copy)]
pub(crate) struct EntityDescriptor {
    /// The slot's current handle while live. While free, the index field
    /// is repurposed as the free-list link and the generation field holds
    /// the generation the *next* occupant of this slot will receive.
    pub id: EntityId,
    pub archetype: Option<ArchetypeId>,
    pub row: usize,
}

/// Fixed-capacity, free-list-backed entity handle allocator.
pub(crate) struct EntityAllocator {
    descriptors: Box<[EntityDescriptor]>,
    next_free: u32,
    live_count: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        let mut descriptors = Vec::with_capacity(MAX_ENTITIES);
        for i in 0..MAX_ENTITIES {
            let next = if i + 1 < MAX_ENTITIES {
                (i + 1) as u32
            } else {
                FREE_LIST_SENTINEL
            };
            descriptors.push(EntityDescriptor {
                id: EntityId::pack(next, 0),
                archetype: None,
                row: 0,
            });
        }

        Self {
            descriptors: descriptors.into_boxed_slice(),
            next_free: 0,
            live_count: 0,
        }
    }

    /// Allocate a fresh handle. Panics if the table is full — capacity
    /// exhaustion is a fatal, documented-cap violation (see `EcsError`).
    pub fn allocate(&mut self) -> EntityId {
        if self.next_free == FREE_LIST_SENTINEL {
            #[cfg(feature = "profiling")]
            tracing::error!(capacity = MAX_ENTITIES, "entity allocator exhausted");
            panic!("entity allocator exhausted (max {MAX_ENTITIES} entities)");
        }

        let slot = self.next_free;
        let desc = &mut self.descriptors[slot as usize];
        let next = desc.id.index();
        let generation = desc.id.generation() + 1;
        desc.id = EntityId::pack(slot, generation);
        self.next_free = next;
        self.live_count += 1;
        desc.id
    }

    /// Release a handle's slot back to the free list. The caller is
    /// responsible for having already cleared `archetype`/`row`.
    pub fn release(&mut self, id: EntityId) {
        let index = id.index();
        let generation = id.generation();
        let desc = &mut self.descriptors[index as usize];
        desc.id = EntityId::pack(self.next_free, generation);
        desc.archetype = None;
        desc.row = 0;
        self.next_free = index;
        self.live_count -= 1;
    }

    #[inline]
    pub fn is_valid(&self, id: EntityId) -> bool {
        let index = id.index() as usize;
        index < MAX_ENTITIES && self.descriptors[index].id == id
    }

    pub fn descriptor(&self, id: EntityId) -> Option<&EntityDescriptor> {
        self.is_valid(id)
            .then(|| &self.descriptors[id.index() as usize])
    }

    pub fn descriptor_mut(&mut self, id: EntityId) -> Option<&mut EntityDescriptor> {
        if self.is_valid(id) {
            Some(&mut self.descriptors[id.index() as usize])
        } else {
            None
        }
    }

    /// Descriptor lookup without a validity check, for internal use once a
    /// caller has already established the handle is live (e.g. while
    /// updating the slot of a swapped-in entity, whose handle we read
    /// straight out of the archetype's row array).
    pub fn descriptor_mut_by_index(&mut self, index: u32) -> &mut EntityDescriptor {
        &mut self.descriptors[index as usize]
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_bumps_generation_on_reuse() {
        let mut alloc = EntityAllocator::new();
        let h1 = alloc.allocate();
        let h2 = alloc.allocate();
        alloc.release(h1);
        let h3 = alloc.allocate();

        assert_eq!(h3.index(), h1.index());
        assert_eq!(h3.generation(), h1.generation() + 1);
        assert!(!alloc.is_valid(h1));
        assert!(alloc.is_valid(h3));
        assert!(alloc.is_valid(h2));
    }

    #[test]
    fn fresh_handle_has_generation_at_least_one() {
        let mut alloc = EntityAllocator::new();
        let h = alloc.allocate();
        assert!(h.generation() >= 1);
    }

    #[test]
    fn live_count_tracks_allocate_and_release() {
        let mut alloc = EntityAllocator::new();
        let h1 = alloc.allocate();
        let _h2 = alloc.allocate();
        assert_eq!(alloc.live_count(), 2);
        alloc.release(h1);
        assert_eq!(alloc.live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "entity allocator exhausted")]
    fn exhaustion_panics() {
        let mut alloc = EntityAllocator::new();
        for _ in 0..=MAX_ENTITIES {
            alloc.allocate();
        }
    }
}
