//! Blend-tree nodes.
//!
//! A controller's tree is built from seven node kinds, all driven through
//! the same passes:
//!
//! | Pass | Reads `input_runtime` | Writes `data` |
//! |------|-----------------------|---------------|
//! | [`Node::enter`] | no | fresh state |
//! | [`Node::update`] | previous state | advanced state |
//! | [`Node::skip`] | previous state | nothing |
//! | [`Node::get_pose`] | state written by `update` | nothing |
//!
//! Every pass walks the active children in the same order, so each node
//! finds its own slice of the byte stream at the cursor. A node that drops
//! out of the active set is `skip`ped so the cursor stays aligned.
//!
//! On disk a node is its [`NodeBase`] (name and event blob) followed by a
//! kind-specific payload. Children are written as a `u32` [`NodeType`] tag
//! followed by the child's own payload.

mod animation;
mod blend1d;
mod blend2d;
mod condition;
mod group;
mod layers;
mod select;

pub use animation::{AnimationNode, AnimationNodeFlags};
pub use blend1d::{Blend1DActivePair, Blend1DChild, Blend1DNode};
pub use blend2d::{Blend2DActiveTrio, Blend2DChild, Blend2DNode, Triangle};
pub use condition::ConditionNode;
pub use group::{GroupChild, GroupChildFlags, GroupNode, Transition};
pub use layers::{Layer, LayersNode};
pub use select::{SelectChild, SelectNode};

use kiln_core::{InputMemoryStream, KilnError, LocalRigidTransform, OutputMemoryStream, Result, Time};

use crate::animation::{Animation, SampleContext};
use crate::controller::ControllerVersion;
use crate::events::{EVENT_TIME_MAX, copy_events_in_window};
use crate::input::InputDecl;
use crate::model::{BoneNameHash, Pose};
use crate::runtime::RuntimeContext;

/// Serialized node kind tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeType {
    Animation = 0,
    Group = 1,
    Blend1D = 2,
    Layers = 3,
    Condition = 4,
    Select = 5,
    Blend2D = 6,
}

impl NodeType {
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Animation,
            1 => Self::Group,
            2 => Self::Blend1D,
            3 => Self::Layers,
            4 => Self::Condition,
            5 => Self::Select,
            6 => Self::Blend2D,
            _ => return None,
        })
    }
}

/// Data shared by every node kind.
#[derive(Debug, Clone, Default)]
pub struct NodeBase {
    pub name: String,
    /// Packed event records, see [`crate::events`].
    pub events: Vec<u8>,
}

impl NodeBase {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            events: Vec::new(),
        }
    }

    fn serialize(&self, stream: &mut OutputMemoryStream) {
        stream.write_string(&self.name);
        stream.write(&(self.events.len() as u32));
        stream.write_bytes(&self.events);
    }

    fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let name = stream.read_string()?;
        let events = if ctx.newer_than(ControllerVersion::Events) {
            let size = stream.read::<u32>()? as usize;
            stream.read_bytes(size)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Self { name, events })
    }
}

/// What a node needs while being read back.
#[derive(Debug, Clone, Copy)]
pub struct DeserializeContext<'a> {
    /// Controller inputs, for compiling conditions.
    pub inputs: &'a [InputDecl],
    /// Format version from the controller header.
    pub version: u32,
}

impl DeserializeContext<'_> {
    #[must_use]
    pub fn newer_than(&self, version: ControllerVersion) -> bool {
        self.version > version as u32
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Animation(AnimationNode),
    Blend1D(Blend1DNode),
    Blend2D(Blend2DNode),
    Layers(LayersNode),
    Condition(ConditionNode),
    Select(SelectNode),
    Group(GroupNode),
}

impl Node {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Animation(_) => NodeType::Animation,
            Node::Blend1D(_) => NodeType::Blend1D,
            Node::Blend2D(_) => NodeType::Blend2D,
            Node::Layers(_) => NodeType::Layers,
            Node::Condition(_) => NodeType::Condition,
            Node::Select(_) => NodeType::Select,
            Node::Group(_) => NodeType::Group,
        }
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase {
        match self {
            Node::Animation(n) => &n.base,
            Node::Blend1D(n) => &n.base,
            Node::Blend2D(n) => &n.base,
            Node::Layers(n) => &n.base,
            Node::Condition(n) => &n.base,
            Node::Select(n) => &n.base,
            Node::Group(n) => &n.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut NodeBase {
        match self {
            Node::Animation(n) => &mut n.base,
            Node::Blend1D(n) => &mut n.base,
            Node::Blend2D(n) => &mut n.base,
            Node::Layers(n) => &mut n.base,
            Node::Condition(n) => &mut n.base,
            Node::Select(n) => &mut n.base,
            Node::Group(n) => &mut n.base,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.base().name
    }

    /// Writes fresh state for a newly activated node.
    pub fn enter(&self, ctx: &mut RuntimeContext) {
        match self {
            Node::Animation(n) => n.enter(ctx),
            Node::Blend1D(n) => n.enter(ctx),
            Node::Blend2D(n) => n.enter(ctx),
            Node::Layers(n) => n.enter(ctx),
            Node::Condition(n) => n.enter(ctx),
            Node::Select(n) => n.enter(ctx),
            Node::Group(n) => n.enter(ctx),
        }
    }

    /// Advances by `ctx.time_delta` and returns this tick's root motion.
    pub fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        match self {
            Node::Animation(n) => n.update(ctx),
            Node::Blend1D(n) => n.update(ctx),
            Node::Blend2D(n) => n.update(ctx),
            Node::Layers(n) => n.update(ctx),
            Node::Condition(n) => n.update(ctx),
            Node::Select(n) => n.update(ctx),
            Node::Group(n) => n.update(ctx),
        }
    }

    /// Consumes this node's previous state without writing new state.
    pub fn skip(&self, ctx: &mut RuntimeContext) {
        match self {
            Node::Animation(n) => n.skip(ctx),
            Node::Blend1D(n) => n.skip(ctx),
            Node::Blend2D(n) => n.skip(ctx),
            Node::Layers(n) => n.skip(ctx),
            Node::Condition(n) => n.skip(ctx),
            Node::Select(n) => n.skip(ctx),
            Node::Group(n) => n.skip(ctx),
        }
    }

    /// Samples into `pose` with `weight`, restricted to bone mask `mask`
    /// (`u32::MAX` for none).
    pub fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        match self {
            Node::Animation(n) => n.get_pose(ctx, weight, pose, mask),
            Node::Blend1D(n) => n.get_pose(ctx, weight, pose, mask),
            Node::Blend2D(n) => n.get_pose(ctx, weight, pose, mask),
            Node::Layers(n) => n.get_pose(ctx, weight, pose),
            Node::Condition(n) => n.get_pose(ctx, weight, pose, mask),
            Node::Select(n) => n.get_pose(ctx, weight, pose, mask),
            Node::Group(n) => n.get_pose(ctx, weight, pose, mask),
        }
    }

    /// Loop length. Called with the read cursor at this node's state.
    #[must_use]
    pub fn length(&self, ctx: &RuntimeContext) -> Time {
        match self {
            Node::Animation(n) => n.length(ctx),
            Node::Blend1D(n) => n.length(ctx),
            Node::Blend2D(n) => n.length(ctx),
            Node::Layers(_) | Node::Condition(_) | Node::Select(_) | Node::Group(_) => Time::ONE_SECOND,
        }
    }

    /// Playback position. Called with the read cursor at this node's state.
    #[must_use]
    pub fn time(&self, ctx: &RuntimeContext) -> Time {
        match self {
            Node::Animation(n) => n.time(ctx),
            Node::Blend1D(n) => n.time(ctx),
            Node::Blend2D(n) => n.time(ctx),
            Node::Layers(_) | Node::Condition(_) | Node::Select(_) | Node::Group(_) => Time::ZERO,
        }
    }

    /// Writes the node payload, without its type tag.
    pub fn serialize(&self, stream: &mut OutputMemoryStream) {
        match self {
            Node::Animation(n) => n.serialize(stream),
            Node::Blend1D(n) => n.serialize(stream),
            Node::Blend2D(n) => n.serialize(stream),
            Node::Layers(n) => n.serialize(stream),
            Node::Condition(n) => n.serialize(stream),
            Node::Select(n) => n.serialize(stream),
            Node::Group(n) => n.serialize(stream),
        }
    }

    /// Writes the type tag followed by the payload.
    pub fn serialize_tagged(&self, stream: &mut OutputMemoryStream) {
        stream.write(&(self.node_type() as u32));
        self.serialize(stream);
    }

    /// Reads a payload of kind `ty`.
    pub fn deserialize(ty: NodeType, stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Node> {
        Ok(match ty {
            NodeType::Animation => Node::Animation(AnimationNode::deserialize(stream, ctx)?),
            NodeType::Blend1D => Node::Blend1D(Blend1DNode::deserialize(stream, ctx)?),
            NodeType::Blend2D => Node::Blend2D(Blend2DNode::deserialize(stream, ctx)?),
            NodeType::Layers => Node::Layers(LayersNode::deserialize(stream, ctx)?),
            NodeType::Condition => Node::Condition(ConditionNode::deserialize(stream, ctx)?),
            NodeType::Select => Node::Select(SelectNode::deserialize(stream, ctx)?),
            NodeType::Group => Node::Group(GroupNode::deserialize(stream, ctx)?),
        })
    }

    /// Counterpart of [`Node::serialize_tagged`].
    pub fn deserialize_tagged(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Node> {
        let ty = read_node_type(stream)?;
        Node::deserialize(ty, stream, ctx)
    }
}

macro_rules! impl_from_node {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Node {
                fn from(node: $ty) -> Self {
                    Node::$variant(node)
                }
            }
        )*
    };
}

impl_from_node! {
    Animation => AnimationNode,
    Blend1D => Blend1DNode,
    Blend2D => Blend2DNode,
    Layers => LayersNode,
    Condition => ConditionNode,
    Select => SelectNode,
    Group => GroupNode,
}

fn read_node_type(stream: &mut InputMemoryStream<'_>) -> Result<NodeType> {
    let raw = stream.read::<u32>()?;
    NodeType::from_raw(raw).ok_or_else(|| {
        log::error!("Unknown blend-tree node type {raw}");
        KilnError::UnknownNodeType(raw)
    })
}

/// Fraction of a crossfade of length `length` completed after `elapsed`.
fn blend_fraction(elapsed: Time, length: Time) -> f32 {
    if length.is_zero() {
        return 1.0;
    }
    (elapsed / length).clamp(0.0, 1.0)
}

fn root_motion_segment(anim: &Animation, t0: Time, t1: Time, root_bone: Option<BoneNameHash>) -> LocalRigidTransform {
    debug_assert!(t0 <= t1);
    anim.get_root_motion(t0, root_bone).inverted() * anim.get_root_motion(t1, root_bone)
}

/// Root motion of `anim` between two absolute times, split in two when the
/// window crosses the loop point.
fn root_motion(anim: &Animation, t0_abs: Time, t1_abs: Time, root_bone: Option<BoneNameHash>) -> LocalRigidTransform {
    let len = anim.length();
    let t0 = t0_abs % len;
    let t1 = t1_abs % len;
    if t0 <= t1 {
        return root_motion_segment(anim, t0, t1, root_bone);
    }
    root_motion_segment(anim, t0, len, root_bone) * root_motion_segment(anim, Time::ZERO, t1, root_bone)
}

/// Same as [`root_motion`] with times given as fractions of the clip.
fn relative_root_motion(anim: &Animation, rel0: f32, rel1: f32, root_bone: Option<BoneNameHash>) -> LocalRigidTransform {
    let len = anim.length();
    root_motion(anim, len * rel0, len * rel1, root_bone)
}

/// Copies the events of `base` whose time lies in `[old_time, new_time)`,
/// wrapping at `loop_length`, into `ctx.events`.
fn emit_events(base: &NodeBase, old_time: Time, new_time: Time, loop_length: Time, ctx: &mut RuntimeContext) {
    if base.events.is_empty() || loop_length.is_zero() {
        return;
    }
    let t0 = old_time % loop_length;
    let t1 = new_time % loop_length;
    let scale = |t: Time| (u64::from(EVENT_TIME_MAX) * u64::from(t.raw()) / u64::from(loop_length.raw())) as u16;
    let (from, to) = (scale(t0), scale(t1));

    if t1 >= t0 {
        copy_events_in_window(&base.events, from, to, false, &mut ctx.events);
    } else {
        copy_events_in_window(&base.events, from, 0, true, &mut ctx.events);
        copy_events_in_window(&base.events, 0, to, false, &mut ctx.events);
    }
}

/// Samples the animation in `slot` at `time` into `pose`.
fn sample_pose(ctx: &RuntimeContext, time: Time, weight: f32, slot: u32, pose: &mut Pose, mask: u32, looped: bool) {
    let Some(anim) = ctx.animation(slot) else {
        return;
    };
    let Some(model) = ctx.model.as_deref() else {
        return;
    };
    let len = anim.length();
    let time = if looped { time % len } else { time.min(len) };
    anim.get_relative_pose(&mut SampleContext {
        pose,
        model,
        time,
        weight,
        mask: ctx.bone_mask(mask),
        root_bone: ctx.root_bone_hash,
    });
}

/// Samples the animation in `slot` at a fraction of its length, looping.
fn sample_pose_relative(ctx: &RuntimeContext, rel_time: f32, weight: f32, slot: u32, pose: &mut Pose, mask: u32) {
    let Some(anim) = ctx.animation(slot) else {
        return;
    };
    sample_pose(ctx, anim.length() * rel_time, weight, slot, pose, mask, true);
}
