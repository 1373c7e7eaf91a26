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

//! Component registration.
//!
//! Components are identified by a dense `u32` id assigned in registration
//! order. The registry only records size/alignment — it has no notion of
//! Rust types; the typed convenience layer built on top (`World::register`)
//! is what remembers `TypeId -> ComponentId`.

/// Dense component id, assigned in registration order and never reused.
pub type ComponentId = u32;

/// Component id ceiling: archetype signatures fit in a single `u64` mask.
pub const MAX_COMPONENTS: usize = 64;

#[derive(Clone, Copy)]
pub(crate) struct ComponentDescriptor {
    pub size: usize,
    pub alignment: usize,
}

/// Marker trait for Rust types usable as components via the typed layer.
///
/// Blanket-implemented for any `'static` type, matching the corpus's
/// `Component` trait — the constraint is carried by `World::register::<T>`
/// needing `size_of`/`align_of`, not by anything this trait itself adds.
pub trait Component: 'static {}
impl<T: 'static> Component for T {}

pub(crate) struct ComponentRegistry {
    descriptors: Vec<ComponentDescriptor>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::with_capacity(MAX_COMPONENTS),
        }
    }

    /// Register a new component id. Panics past `MAX_COMPONENTS` —
    /// over-registration is a fatal, documented-cap violation.
    pub fn register(&mut self, size: usize, alignment: usize) -> ComponentId {
        if self.descriptors.len() >= MAX_COMPONENTS {
            #[cfg(feature = "profiling")]
            tracing::error!(capacity = MAX_COMPONENTS, "component registry exhausted");
            panic!("component registry exhausted (max {MAX_COMPONENTS} components)");
        }
        let id = self.descriptors.len() as ComponentId;
        self.descriptors.push(ComponentDescriptor { size, alignment });
        id
    }

    pub fn descriptor(&self, id: ComponentId) -> ComponentDescriptor {
        self.descriptors[id as usize]
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }
}
