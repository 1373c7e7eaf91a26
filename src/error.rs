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

//! Error types
//!
//! Capacity exhaustion (entities, archetypes, archetype rows, registered
//! components) is a programmer error against a fixed, documented cap and is
//! handled by panicking, not by an `EcsError` variant. This type only
//! covers conditions a host is expected to recover from.

use std::fmt;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity is stale: destroyed, or never issued.
    EntityNotFound,

    /// Component is not present on the entity.
    ComponentNotFound,

    /// An archetype signature had more than `MAX_ARCH_COMPONENTS` ids, or
    /// contained a duplicate id.
    InvalidArchetypeSignature,
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "entity not found"),
            EcsError::ComponentNotFound => write!(f, "component not found"),
            EcsError::InvalidArchetypeSignature => {
                write!(f, "invalid archetype signature (duplicate id or over capacity)")
            }
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
