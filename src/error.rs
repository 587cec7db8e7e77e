// Copyright 2025 Spatial ECS Contributors
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

use std::fmt;

use crate::component::ComponentTypeId;

/// ECS error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity ID allocator hit its fixed capacity
    IdExhausted,

    /// Operation referenced an entity that is not alive
    UnknownEntity,

    /// A component type was used before being registered
    UnknownComponentType(ComponentTypeId),

    /// A mask's per-row footprint exceeds the fixed chunk budget
    LayoutOversubscribed,

    /// A spawn position resolved to no partition cell
    NoChunkForPosition,

    /// A system reported a failure during a batch
    SystemError(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::IdExhausted => write!(f, "Entity ID pool exhausted"),
            EcsError::UnknownEntity => write!(f, "Entity not alive"),
            EcsError::UnknownComponentType(id) => {
                write!(f, "Component type {id} was never registered")
            }
            EcsError::LayoutOversubscribed => {
                write!(f, "Component mask does not fit a single chunk row")
            }
            EcsError::NoChunkForPosition => {
                write!(f, "Position resolved to no partition cell")
            }
            EcsError::SystemError(msg) => write!(f, "System error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
