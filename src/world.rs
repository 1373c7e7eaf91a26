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

//! World: owns every entity, archetype, component registration and query,
//! and is the single entry point for structural mutation.
//!
//! There is no explicit init/shutdown pair — `World::new` allocates every
//! arena up front and `Drop` runs when the world goes out of scope. Every
//! byte the world owns is a plain Rust allocation (`Box<[u8]>`, `Vec<T>`),
//! so there is nothing to manually release.

use std::any::TypeId;
use std::mem;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::archetype::{comp_bit, ArchetypeId, ArchetypeStore, MAX_ARCH_COMPONENTS};
use crate::command::CommandBuffer;
use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::entity::{EntityAllocator, EntityId, MAX_ENTITIES};
use crate::error::{EcsError, Result};
use crate::query::{Cursor, QueryDesc, QueryId, QueryStore};

/// Byte capacity backing every archetype's column storage for the lifetime
/// of the world.
const ARCHETYPE_ARENA_CAPACITY: usize = 1 << 20;

/// Byte capacity for staged component payloads during one deferred session.
const CMD_ARENA_CAPACITY: usize = 64 * 1024;

/// Central ECS runtime: entity allocation, component registration,
/// archetype storage, query matching, and the deferred command buffer.
pub struct World {
    allocator: EntityAllocator,
    registry: ComponentRegistry,
    archetypes: ArchetypeStore,
    commands: CommandBuffer,
    queries: QueryStore,
    type_ids: AHashMap<TypeId, ComponentId>,
    empty_archetype: ArchetypeId,
}

impl World {
    pub fn new() -> Self {
        let registry = ComponentRegistry::new();
        let mut archetypes = ArchetypeStore::new(ARCHETYPE_ARENA_CAPACITY);
        let (empty_archetype, _) = archetypes
            .find_or_create(&[], &registry)
            .expect("the empty component set is always a valid archetype signature");

        Self {
            allocator: EntityAllocator::new(),
            registry,
            archetypes,
            commands: CommandBuffer::new(MAX_ENTITIES, CMD_ARENA_CAPACITY),
            queries: QueryStore::new(),
            type_ids: AHashMap::default(),
            empty_archetype,
        }
    }

    // ---- component registration -------------------------------------

    /// Register `T` as a component type, or return its id if already
    /// registered. Idempotent per type.
    pub fn register<T: Component>(&mut self) -> ComponentId {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.type_ids.get(&type_id) {
            return id;
        }
        let id = self.registry.register(mem::size_of::<T>(), mem::align_of::<T>());
        self.type_ids.insert(type_id, id);
        id
    }

    pub fn component_id<T: Component>(&self) -> Option<ComponentId> {
        self.type_ids.get(&TypeId::of::<T>()).copied()
    }

    /// Register a raw, untyped component with the given layout. Unlike
    /// `register::<T>()`, this has no memoization: every call allocates a
    /// fresh id, even with an identical `(size, alignment)` pair.
    pub fn register_component(&mut self, size: usize, alignment: usize) -> ComponentId {
        self.registry.register(size, alignment)
    }

    /// Find the archetype with exactly `components` (order-independent), or
    /// create it if it doesn't exist yet.
    pub fn register_archetype(&mut self, components: &[ComponentId]) -> Result<ArchetypeId> {
        let (id, created) = self.archetypes.find_or_create(components, &self.registry)?;
        if created {
            self.queries.notify_new_archetype(id, self.archetypes.get(id).mask());
        }
        Ok(id)
    }

    // ---- entity lifecycle --------------------------------------------

    /// Create a new entity with no components, in the empty archetype.
    pub fn create(&mut self) -> EntityId {
        self.new_entity_in(self.empty_archetype)
    }

    /// Create a new entity with no components, directly in `archetype`.
    /// The caller is responsible for leaving every column of the new row
    /// in a valid state before it is observed (e.g. by a query).
    pub fn new_entity_in(&mut self, archetype: ArchetypeId) -> EntityId {
        let entity = self.allocator.allocate();
        let row = self.archetypes.get_mut(archetype).allocate_row(entity);
        let desc = self
            .allocator
            .descriptor_mut(entity)
            .expect("entity was just allocated");
        desc.archetype = Some(archetype);
        desc.row = row;
        entity
    }

    /// The archetype a live entity currently belongs to, or `None` if the
    /// handle is stale or already destroyed.
    pub fn entity_archetype(&self, entity: EntityId) -> Option<ArchetypeId> {
        self.allocator.descriptor(entity)?.archetype
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.allocator.is_valid(entity)
    }

    pub fn live_count(&self) -> usize {
        self.allocator.live_count()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Destroy `entity`. Immediate outside deferred mode; staged for the
    /// next `defer_end` otherwise. A stale or already-dead handle is
    /// silently ignored.
    pub fn destroy(&mut self, entity: EntityId) {
        if !self.allocator.is_valid(entity) {
            return;
        }
        if self.commands.is_active() {
            self.commands.stage_destroy(entity.index());
        } else {
            self.destroy_immediate(entity);
        }
    }

    fn destroy_immediate(&mut self, entity: EntityId) {
        let desc = *self
            .allocator
            .descriptor(entity)
            .expect("caller already checked validity");
        let archetype_id = desc.archetype.expect("live entity always has an archetype");

        if let Some(swapped) = self.archetypes.get_mut(archetype_id).swap_erase(desc.row) {
            self.allocator.descriptor_mut_by_index(swapped.index()).row = desc.row;
        }
        self.allocator.release(entity);
    }

    // ---- typed component access ---------------------------------------

    /// Attach `value` to `entity` under component `T`, registering `T` as a
    /// side effect if this is its first use. Overwrites an already-present
    /// value in place without running its destructor, matching the byte-
    /// column storage model: components are plain data, not RAII guards.
    ///
    /// A no-op if `entity` already has a staged destroy pending in the
    /// current deferred session — destroy wins, so `value` is dropped
    /// without being written anywhere.
    pub fn add<T: Component>(&mut self, entity: EntityId, value: T) -> Result<()> {
        if !self.allocator.is_valid(entity) {
            return Err(EcsError::EntityNotFound);
        }
        let comp = self.register::<T>();
        let Some(ptr) = self.add_component(entity, comp, mem::size_of::<T>(), mem::align_of::<T>()) else {
            return Ok(());
        };
        unsafe { (ptr as *mut T).write(value) };
        Ok(())
    }

    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Result<()> {
        if !self.allocator.is_valid(entity) {
            return Err(EcsError::EntityNotFound);
        }
        let Some(comp) = self.component_id::<T>() else {
            return Err(EcsError::ComponentNotFound);
        };
        self.remove_component(entity, comp);
        Ok(())
    }

    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let comp = self.component_id::<T>()?;
        let ptr = self.component_ptr(entity, comp)?;
        Some(unsafe { &*(ptr as *const T) })
    }

    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let comp = self.component_id::<T>()?;
        let ptr = self.component_ptr(entity, comp)?;
        Some(unsafe { &mut *(ptr as *mut T) })
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        match self.component_id::<T>() {
            Some(comp) => self.component_ptr(entity, comp).is_some(),
            None => false,
        }
    }

    /// Raw component pointer, honoring deferred-mode staging. Shared by the
    /// typed accessors above.
    fn component_ptr(&self, entity: EntityId, comp: ComponentId) -> Option<*mut u8> {
        if !self.allocator.is_valid(entity) {
            return None;
        }
        let index = entity.index();

        if self.commands.is_active() {
            let bucket = self.commands.bucket(index);
            if bucket.destroy {
                return None;
            }
            if bucket.remove_mask & comp_bit(comp) != 0 {
                return None;
            }
            if bucket.add_mask & comp_bit(comp) != 0 {
                return bucket.staged_ptr(comp);
            }
        }

        let desc = self.allocator.descriptor(entity)?;
        let archetype_id = desc.archetype?;
        self.archetypes.get(archetype_id).get_ptr(comp, desc.row)
    }

    // ---- structural mutation: add / remove -----------------------------

    fn add_component(&mut self, entity: EntityId, comp: ComponentId, size: usize, alignment: usize) -> Option<*mut u8> {
        if !self.allocator.is_valid(entity) {
            return None;
        }
        if self.commands.is_active() {
            self.add_component_deferred(entity, comp, size, alignment)
        } else {
            Some(self.add_component_immediate(entity, comp))
        }
    }

    fn add_component_immediate(&mut self, entity: EntityId, comp: ComponentId) -> *mut u8 {
        let desc = *self
            .allocator
            .descriptor(entity)
            .expect("caller already checked validity");
        let old_archetype_id = desc.archetype.expect("live entity always has an archetype");

        if self.archetypes.get(old_archetype_id).column_slot(comp).is_some() {
            return self
                .archetypes
                .get(old_archetype_id)
                .get_ptr(comp, desc.row)
                .expect("column_slot confirmed presence");
        }

        let mut new_components: SmallVec<[ComponentId; MAX_ARCH_COMPONENTS]> =
            SmallVec::from_slice(self.archetypes.get(old_archetype_id).components());
        new_components.push(comp);

        let (new_archetype_id, created) = self
            .archetypes
            .find_or_create(&new_components, &self.registry)
            .expect("component set extends a valid archetype signature");
        if created {
            let mask = self.archetypes.get(new_archetype_id).mask();
            self.queries.notify_new_archetype(new_archetype_id, mask);
        }

        let old_row = desc.row;
        let new_row = self.archetypes.get_mut(new_archetype_id).allocate_row(entity);

        {
            let (old_arch, new_arch) = self.archetypes.get_pair_mut(old_archetype_id, new_archetype_id);
            unsafe { old_arch.copy_row_into(old_row, new_arch, new_row) };
            new_arch.zero_component(comp, new_row);
        }

        if let Some(swapped) = self.archetypes.get_mut(old_archetype_id).swap_erase(old_row) {
            self.allocator.descriptor_mut_by_index(swapped.index()).row = old_row;
        }

        let entity_desc = self
            .allocator
            .descriptor_mut(entity)
            .expect("caller already checked validity");
        entity_desc.archetype = Some(new_archetype_id);
        entity_desc.row = new_row;

        self.archetypes
            .get(new_archetype_id)
            .get_ptr(comp, new_row)
            .expect("component was just added to this archetype")
    }

    fn add_component_deferred(&mut self, entity: EntityId, comp: ComponentId, size: usize, alignment: usize) -> Option<*mut u8> {
        let index = entity.index();
        if self.commands.bucket(index).destroy {
            return None;
        }

        let desc = *self.allocator.descriptor(entity)?;
        let archetype_id = desc.archetype?;
        let already_present = self.archetypes.get(archetype_id).column_slot(comp).is_some();
        let marked_for_removal = self.commands.bucket(index).remove_mask & comp_bit(comp) != 0;
        if already_present && !marked_for_removal {
            return self.archetypes.get(archetype_id).get_ptr(comp, desc.row);
        }

        Some(self.commands.stage_add(index, comp, size, alignment))
    }

    fn remove_component(&mut self, entity: EntityId, comp: ComponentId) {
        if !self.allocator.is_valid(entity) {
            return;
        }
        if self.commands.is_active() {
            self.remove_component_deferred(entity, comp);
        } else {
            self.remove_component_immediate(entity, comp);
        }
    }

    fn remove_component_immediate(&mut self, entity: EntityId, comp: ComponentId) {
        let desc = *self
            .allocator
            .descriptor(entity)
            .expect("caller already checked validity");
        let old_archetype_id = desc.archetype.expect("live entity always has an archetype");

        if self.archetypes.get(old_archetype_id).column_slot(comp).is_none() {
            return;
        }

        let remaining: SmallVec<[ComponentId; MAX_ARCH_COMPONENTS]> = self
            .archetypes
            .get(old_archetype_id)
            .components()
            .iter()
            .copied()
            .filter(|&c| c != comp)
            .collect();

        let (new_archetype_id, created) = self
            .archetypes
            .find_or_create(&remaining, &self.registry)
            .expect("component set derived from a valid archetype signature");
        if created {
            let mask = self.archetypes.get(new_archetype_id).mask();
            self.queries.notify_new_archetype(new_archetype_id, mask);
        }

        let old_row = desc.row;
        let new_row = self.archetypes.get_mut(new_archetype_id).allocate_row(entity);

        {
            let (old_arch, new_arch) = self.archetypes.get_pair_mut(old_archetype_id, new_archetype_id);
            unsafe { old_arch.copy_row_into(old_row, new_arch, new_row) };
        }

        if let Some(swapped) = self.archetypes.get_mut(old_archetype_id).swap_erase(old_row) {
            self.allocator.descriptor_mut_by_index(swapped.index()).row = old_row;
        }

        let entity_desc = self
            .allocator
            .descriptor_mut(entity)
            .expect("caller already checked validity");
        entity_desc.archetype = Some(new_archetype_id);
        entity_desc.row = new_row;
    }

    fn remove_component_deferred(&mut self, entity: EntityId, comp: ComponentId) {
        let index = entity.index();
        if self.commands.bucket(index).destroy {
            return;
        }

        let Some(desc) = self.allocator.descriptor(entity) else {
            return;
        };
        let Some(archetype_id) = desc.archetype else {
            return;
        };
        let present = self.archetypes.get(archetype_id).column_slot(comp).is_some();
        let staged_add = self.commands.bucket(index).add_mask & comp_bit(comp) != 0;
        if !present && !staged_add {
            return;
        }

        self.commands.stage_remove(index, comp);
    }

    // ---- deferred mode --------------------------------------------------

    /// Enter deferred mode. Idempotent: calling it again before
    /// `defer_end` has no effect.
    pub fn defer_begin(&mut self) {
        self.commands.begin();
    }

    /// Apply every staged mutation (destroy, then remove, then add, per
    /// entity) and leave deferred mode. A no-op if not currently deferred.
    pub fn defer_end(&mut self) {
        if !self.commands.is_active() {
            return;
        }
        self.flush_commands();
        self.commands.end();
    }

    fn flush_commands(&mut self) {
        let dirty: SmallVec<[u32; 32]> = SmallVec::from_slice(self.commands.dirty());

        for index in dirty {
            // A slot whose occupant was destroyed and never recreated has
            // no archetype; its bucket is stale and skipped.
            let live = self
                .allocator
                .descriptor_mut_by_index(index)
                .archetype
                .is_some();
            if !live {
                continue;
            }

            let bucket_destroy = self.commands.bucket(index).destroy;
            let add_mask = self.commands.bucket(index).add_mask;
            let remove_mask = self.commands.bucket(index).remove_mask;
            if !bucket_destroy && add_mask == 0 && remove_mask == 0 {
                continue;
            }

            let entity = self.allocator.descriptor_mut_by_index(index).id;

            if bucket_destroy {
                self.destroy_immediate(entity);
                continue;
            }

            let mut bits = remove_mask;
            while bits != 0 {
                let comp = bits.trailing_zeros() as ComponentId;
                bits &= bits - 1;
                self.remove_component_immediate(entity, comp);
            }

            let mut bits = add_mask;
            while bits != 0 {
                let comp = bits.trailing_zeros() as ComponentId;
                bits &= bits - 1;
                let staged = self.commands.bucket(index).staged_ptr(comp);
                let dst = self.add_component_immediate(entity, comp);
                if let Some(src) = staged {
                    let size = self.registry.descriptor(comp).size;
                    unsafe { std::ptr::copy_nonoverlapping(src, dst, size) };
                }
            }
        }
    }

    // ---- queries ----------------------------------------------------

    /// Register a query. Matches every archetype that exists now; new
    /// archetypes created afterward are picked up automatically.
    pub fn make_query(&mut self, desc: &QueryDesc) -> QueryId {
        self.queries.make_query(desc, &self.archetypes)
    }

    /// Start a non-restartable iteration over `query`'s current matches.
    pub fn iter(&self, query: QueryId) -> Cursor<'_> {
        Cursor::new(self.queries.query(query), &self.archetypes)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        #[cfg(feature = "profiling")]
        tracing::debug!(live_entities = self.allocator.live_count(), "world dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Clone, Copy)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, PartialEq, Clone, Copy)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[test]
    fn create_destroy_recreate_bumps_generation() {
        let mut world = World::new();
        let e1 = world.create();
        world.destroy(e1);
        assert!(!world.is_alive(e1));

        let e2 = world.create();
        assert_eq!(e2.index(), e1.index());
        assert_eq!(e2.generation(), e1.generation() + 1);
        assert!(world.is_alive(e2));
    }

    #[test]
    fn add_component_migrates_to_new_archetype_and_preserves_value() {
        let mut world = World::new();
        let e = world.create();
        world.add(e, Position { x: 1.0, y: 2.0 }).unwrap();

        assert_eq!(world.get::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        assert!(world.archetype_count() >= 2);
    }

    #[test]
    fn remove_component_migrates_back_and_drops_value() {
        let mut world = World::new();
        let e = world.create();
        world.add(e, Position { x: 1.0, y: 2.0 }).unwrap();
        world.add(e, Velocity { dx: 0.5, dy: -0.5 }).unwrap();

        world.remove::<Position>(e).unwrap();

        assert!(!world.has::<Position>(e));
        assert_eq!(world.get::<Velocity>(e), Some(&Velocity { dx: 0.5, dy: -0.5 }));
    }

    #[test]
    fn destroy_swap_erase_updates_swapped_entity_row() {
        let mut world = World::new();
        let e1 = world.create();
        world.add(e1, Position { x: 1.0, y: 1.0 }).unwrap();
        let e2 = world.create();
        world.add(e2, Position { x: 2.0, y: 2.0 }).unwrap();
        let e3 = world.create();
        world.add(e3, Position { x: 3.0, y: 3.0 }).unwrap();

        world.destroy(e1);

        assert_eq!(world.get::<Position>(e2), Some(&Position { x: 2.0, y: 2.0 }));
        assert_eq!(world.get::<Position>(e3), Some(&Position { x: 3.0, y: 3.0 }));
    }

    #[test]
    fn deferred_flush_applies_remove_then_add() {
        let mut world = World::new();
        let e = world.create();
        world.add(e, Position { x: 0.0, y: 0.0 }).unwrap();

        world.defer_begin();
        world.remove::<Position>(e).unwrap();
        world.add(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
        // Not yet applied.
        assert!(world.has::<Position>(e));
        assert!(!world.has::<Velocity>(e));

        world.defer_end();

        assert!(!world.has::<Position>(e));
        assert_eq!(world.get::<Velocity>(e), Some(&Velocity { dx: 1.0, dy: 1.0 }));
    }

    #[test]
    fn deferred_destroy_supersedes_other_pending_commands() {
        let mut world = World::new();
        let e = world.create();

        world.defer_begin();
        world.add(e, Position { x: 9.0, y: 9.0 }).unwrap();
        world.destroy(e);
        world.defer_end();

        assert!(!world.is_alive(e));
    }

    #[test]
    fn query_iterates_matching_archetypes_in_registration_order() {
        let mut world = World::new();
        world.register::<Position>();
        let desc = QueryDesc::new().include(world.component_id::<Position>().unwrap());
        let q = world.make_query(&desc);

        let e1 = world.create();
        world.add(e1, Position { x: 1.0, y: 0.0 }).unwrap();

        let e2 = world.create();
        world.add(e2, Position { x: 2.0, y: 0.0 }).unwrap();
        world.add(e2, Velocity { dx: 0.0, dy: 0.0 }).unwrap();

        let mut seen = Vec::new();
        let mut cursor = world.iter(q);
        while let Some((entity, ptrs)) = cursor.next() {
            let pos = unsafe { *(ptrs[0] as *const Position) };
            seen.push((entity, pos));
        }

        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|&(e, _)| e == e1));
        assert!(seen.iter().any(|&(e, _)| e == e2));
    }
}
