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

//! Archetype-based entity-component-system runtime.
//!
//! Entities are generational handles into fixed-capacity slots. Each live
//! entity belongs to exactly one archetype — the set of component types it
//! carries — and an archetype's components are stored column-by-column so
//! that iterating one component across every entity that has it stays
//! linear. Adding or removing a component moves the entity's row to a
//! different archetype; destroying one swap-erases it out of its row.
//!
//! [`World`] is the single entry point: it owns entity allocation,
//! component registration, archetype storage, queries, and the deferred
//! command buffer used to stage structural mutations while iterating.
//! There is no separate init/shutdown pair — construct a `World` and let
//! it drop.
//!
//! ```
//! use archetype_ecs::World;
//!
//! struct Position { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! let e = world.create();
//! world.add(e, Position { x: 0.0, y: 0.0 }).unwrap();
//! assert!(world.has::<Position>(e));
//! ```

pub mod arena;
pub mod archetype;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub mod utils;
pub mod world;

pub use component::Component;
pub use entity::EntityId;
pub use error::{EcsError, Result};
pub use query::{Cursor, QueryDesc, QueryId};
pub use world::World;
