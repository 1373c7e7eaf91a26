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

//! Archetypes: one per distinct, sorted component set. Columns are raw
//! byte buffers carved out of the storage arena, structure-of-arrays
//! style, so iteration over one component across many entities stays
//! cache-linear.

use smallvec::SmallVec;

use crate::arena::Arena;
use crate::component::{ComponentId, ComponentRegistry, MAX_COMPONENTS};
use crate::entity::EntityId;
use crate::error::{EcsError, Result};

/// Max components per archetype (also the iterator column-array width for
/// queries, per spec's per-query include cap).
pub const MAX_ARCH_COMPONENTS: usize = 8;

/// Max live rows per archetype.
pub const MAX_ARCH_ROWS: usize = 256;

/// Max distinct archetypes.
pub const MAX_ARCHETYPES: usize = 128;

/// Index into the archetype store. Stable for the lifetime of the world —
/// archetypes are never destroyed before shutdown.
pub type ArchetypeId = usize;

/// 64-bit component-set signature; bit `c` set iff component `c` is present.
pub type Mask = u64;

#[inline]
pub(crate) fn comp_bit(c: ComponentId) -> Mask {
    1u64 << c
}

/// Type-erased, fixed-capacity byte column for one component.
struct Column {
    ptr: *mut u8,
    item_size: usize,
}

impl Column {
    #[inline]
    unsafe fn row_ptr(&self, row: usize) -> *mut u8 {
        self.ptr.add(row * self.item_size)
    }

    unsafe fn copy_row(&self, from: usize, to: usize) {
        if from != to {
            std::ptr::copy_nonoverlapping(self.row_ptr(from), self.row_ptr(to), self.item_size);
        }
    }

    unsafe fn zero_row(&self, row: usize) {
        std::ptr::write_bytes(self.row_ptr(row), 0, self.item_size);
    }
}

/// A single archetype: a unique, sorted component set and its column
/// storage.
pub struct Archetype {
    components: SmallVec<[ComponentId; MAX_ARCH_COMPONENTS]>,
    mask: Mask,
    columns: SmallVec<[Column; MAX_ARCH_COMPONENTS]>,
    /// Reverse index: column position of component `c`, or -1 if absent.
    column_index: [i8; MAX_COMPONENTS],
    rows: Vec<EntityId>,
}

impl Archetype {
    fn new(
        components: SmallVec<[ComponentId; MAX_ARCH_COMPONENTS]>,
        mask: Mask,
        registry: &ComponentRegistry,
        arena: &mut Arena,
    ) -> Self {
        let mut column_index = [-1i8; MAX_COMPONENTS];
        let mut columns = SmallVec::new();
        for (slot, &c) in components.iter().enumerate() {
            let desc = registry.descriptor(c);
            let ptr = arena.alloc(MAX_ARCH_ROWS * desc.size, desc.alignment.max(1));
            columns.push(Column {
                ptr,
                item_size: desc.size,
            });
            column_index[c as usize] = slot as i8;
        }

        Self {
            components,
            mask,
            columns,
            column_index,
            rows: Vec::with_capacity(MAX_ARCH_ROWS.min(16)),
        }
    }

    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    pub fn mask(&self) -> Mask {
        self.mask
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[EntityId] {
        &self.rows
    }

    #[inline]
    pub(crate) fn column_slot(&self, c: ComponentId) -> Option<usize> {
        let slot = self.column_index[c as usize];
        (slot >= 0).then_some(slot as usize)
    }

    pub(crate) fn get_ptr(&self, c: ComponentId, row: usize) -> Option<*mut u8> {
        self.column_slot(c).map(|slot| unsafe { self.columns[slot].row_ptr(row) })
    }

    pub(crate) fn zero_component(&self, c: ComponentId, row: usize) {
        if let Some(slot) = self.column_slot(c) {
            unsafe { self.columns[slot].zero_row(row) };
        }
    }

    /// Append a new, uninitialized row for `entity`. Panics when the
    /// archetype is at `MAX_ARCH_ROWS` — a documented, fatal cap.
    pub(crate) fn allocate_row(&mut self, entity: EntityId) -> usize {
        if self.rows.len() >= MAX_ARCH_ROWS {
            #[cfg(feature = "profiling")]
            tracing::error!(capacity = MAX_ARCH_ROWS, "archetype full");
            panic!("archetype full (max {MAX_ARCH_ROWS} rows)");
        }
        self.rows.push(entity);
        self.rows.len() - 1
    }

    /// Remove `row` by swapping the last live row into its place, matching
    /// every column. Returns the handle of the entity that was swapped in,
    /// if any (i.e. `row` was not already the last row).
    pub(crate) fn swap_erase(&mut self, row: usize) -> Option<EntityId> {
        let last = self.rows.len() - 1;
        if row != last {
            for col in &self.columns {
                unsafe { col.copy_row(last, row) };
            }
        }
        self.rows.swap_remove(row);
        (row < self.rows.len()).then(|| self.rows[row])
    }

    /// Copy every component this archetype shares with `dst` from `row` to
    /// `dst_row`. Components present only in one side (the one being
    /// added or removed) are naturally skipped.
    ///
    /// # Safety
    /// `row` must be a valid row in `self` and `dst_row` a valid row in
    /// `dst`.
    pub(crate) unsafe fn copy_row_into(&self, row: usize, dst: &Archetype, dst_row: usize) {
        for (slot, &c) in self.components.iter().enumerate() {
            if let Some(dst_slot) = dst.column_slot(c) {
                let src = self.columns[slot].row_ptr(row);
                let dst_ptr = dst.columns[dst_slot].row_ptr(dst_row);
                std::ptr::copy_nonoverlapping(src, dst_ptr, self.columns[slot].item_size);
            }
        }
    }
}

/// Owns every archetype and the arena their columns are carved from.
pub(crate) struct ArchetypeStore {
    archetypes: Vec<Archetype>,
    arena: Arena,
}

impl ArchetypeStore {
    pub fn new(arena_capacity: usize) -> Self {
        Self {
            archetypes: Vec::with_capacity(MAX_ARCHETYPES),
            arena: Arena::new(arena_capacity),
        }
    }

    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id]
    }

    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id]
    }

    /// Access two distinct archetypes mutably at once, for cross-archetype
    /// row migration.
    pub fn get_pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "cannot borrow the same archetype twice");
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Find the archetype for `components` (sorted ascending, deduplicated
    /// internally) or create it. Returns the id and whether it was freshly
    /// created, so the caller can register it with existing queries.
    pub fn find_or_create(
        &mut self,
        components: &[ComponentId],
        registry: &ComponentRegistry,
    ) -> Result<(ArchetypeId, bool)> {
        if components.len() > MAX_ARCH_COMPONENTS {
            return Err(EcsError::InvalidArchetypeSignature);
        }

        let mut sorted: SmallVec<[ComponentId; MAX_ARCH_COMPONENTS]> = SmallVec::from_slice(components);
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(EcsError::InvalidArchetypeSignature);
        }

        let mask = sorted.iter().fold(0u64, |m, &c| m | comp_bit(c));
        if let Some(pos) = self.archetypes.iter().position(|a| a.mask == mask) {
            return Ok((pos, false));
        }

        if self.archetypes.len() >= MAX_ARCHETYPES {
            #[cfg(feature = "profiling")]
            tracing::error!(capacity = MAX_ARCHETYPES, "archetype store exhausted");
            panic!("archetype store exhausted (max {MAX_ARCHETYPES} archetypes)");
        }

        let archetype = Archetype::new(sorted, mask, registry, &mut self.arena);
        self.archetypes.push(archetype);
        Ok((self.archetypes.len() - 1, true))
    }
}
