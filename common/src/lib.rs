// Copyright (c) 2024 Botho Foundation

//! Common types shared by the entity graph crates.

#![warn(missing_docs)]

pub mod entity_id;

pub use entity_id::{EntityId, EntityIdError, GID_STORAGE_SIZE};
