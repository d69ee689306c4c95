//! Kiln Animation
//!
//! Skeletal and property animation on top of [`kiln_world`]:
//!
//! - [`resource`]: ref-counted, polled resources and their managers
//! - [`animation`] / [`tracks`]: keyframed bone clips
//! - [`controller`]: inputs, animation sets, bone masks, IK chains and the
//!   blend tree root
//! - [`nodes`]: the blend tree, stepped over a flat per-instance byte stream
//!   ([`runtime`])
//! - [`condition`]: the guard expression language used by transitions
//! - [`ik`]: chain solver applied after the tree
//! - [`module`]: the [`AnimationModule`] world module that drives it all
//!
//! The renderer is reached only through the [`RenderModule`] trait.

pub mod animation;
pub mod condition;
pub mod controller;
pub mod events;
pub mod ik;
pub mod input;
pub mod model;
pub mod module;
pub mod nodes;
pub mod property_animation;
pub mod render;
pub mod resource;
pub mod runtime;
pub mod settings;
pub mod tracks;

pub use animation::{Animation, BoneTrack, SampleContext};
pub use condition::Condition;
pub use controller::{AnimationEntry, Controller, ControllerVersion, IkDef};
pub use events::{AnimationEvent, EventIter, EventWriter, event_type};
pub use ik::{IkTarget, solve_ik};
pub use input::{InputDecl, InputType, InputValue};
pub use model::{Bone, BoneMask, BoneNameHash, Model, Pose};
pub use module::{AnimationModule, AnimationModuleVersion, AnimatorFlags, PropertyAnimatorFlags};
pub use nodes::{Node, NodeBase, NodeType};
pub use property_animation::{Curve, PropertyAnimation};
pub use render::{ModelInstances, ModelInstancesModule, PoseLock, RenderModule};
pub use resource::{Resource, ResourceManager, ResourceManagerHub, ResourceRef, ResourceState};
pub use runtime::RuntimeContext;
pub use settings::AnimationSettings;
pub use tracks::{InterpolationMode, KeyframeTrack};
