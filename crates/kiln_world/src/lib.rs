//! Kiln World
//!
//! The entity store at the heart of the engine. A [`World`] owns:
//!
//! - a dense entity table with free-list slot reuse
//! - world-space [`Transform`](kiln_core::Transform)s, one per entity slot
//! - an optional parent/child hierarchy with cached local transforms
//! - entity names and load/unload partitions
//! - the [`WorldModule`]s that own components, addressed by [`ComponentType`]
//!
//! Modules are detached from the world while their callbacks run, so every
//! callback receives the world by `&mut` without aliasing the module itself.

pub mod entity;
pub mod module;
pub mod world;

pub use entity::{
    ComponentType, ComponentUid, EntityMap, EntityPtr, EntityRef, MAX_COMPONENT_TYPES, component_type,
    component_type_name, read_entity, write_entity,
};
pub use module::WorldModule;
pub use world::{Children, Partition, PartitionHandle, World};
