//! Kiln
//!
//! Umbrella crate for the Kiln engine core. Re-exports the member crates:
//!
//! - [`core`]: math, fixed-point time, binary streams, hashing, errors
//! - [`world`]: entities, transforms, hierarchy and world modules
//! - [`animation`]: resources, blend trees, IK and the animation module
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln::prelude::*;
//!
//! let resources = Arc::new(ResourceManagerHub::new());
//! let instances = Arc::new(ModelInstances::new());
//!
//! let mut world = World::new();
//! world.add_module(Box::new(ModelInstancesModule::new(instances.clone(), resources.clone())));
//! world.add_module(Box::new(AnimationModule::new(resources, instances)));
//! world.start_game();
//! world.update(1.0 / 60.0);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub use kiln_animation as animation;
pub use kiln_core as core;
pub use kiln_world as world;

pub use kiln_animation::{AnimationModule, AnimationSettings, Controller, Model, Pose, ResourceManagerHub};
pub use kiln_core::{KilnError, Path, Result, Time, Transform};
pub use kiln_world::{EntityMap, EntityPtr, EntityRef, World, WorldModule};

/// Commonly used types, for glob import.
pub mod prelude {
    pub use kiln_animation::{
        AnimationModule, AnimationSettings, Controller, IkTarget, InputType, Model, ModelInstances,
        ModelInstancesModule, Node, Pose, RenderModule, ResourceManagerHub,
    };
    pub use kiln_core::{LocalRigidTransform, Path, Time, Transform};
    pub use kiln_world::{EntityMap, EntityPtr, EntityRef, World, WorldModule, component_type};
}
