use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use kiln_core::{InputMemoryStream, KilnError, LocalRigidTransform, OutputMemoryStream, Result, Time};

use super::{DeserializeContext, Node, NodeBase, blend_fraction, read_node_type};
use crate::condition::Condition;
use crate::controller::ControllerVersion;
use crate::input::InputDecl;
use crate::model::Pose;
use crate::runtime::RuntimeContext;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RuntimeData {
    from: u32,
    to: u32,
    t: Time,
    blend_length: Time,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct GroupChildFlags: u32 {
        /// The child takes part in automatic selection by its condition.
        const SELECTABLE = 1 << 0;
    }
}

/// Explicit edge between two children of a [`GroupNode`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Transition {
    /// Source child, or [`Transition::ANY`].
    pub from: u32,
    /// Target child, or [`Transition::ANY`] for "first selectable child
    /// whose condition holds".
    pub to: u32,
    pub blend_length: Time,
    /// Point in the source child's loop, as a fraction of its length, at
    /// which the transition may fire. Negative for "any time".
    pub exit_time: f32,
}

impl Transition {
    pub const ANY: u32 = u32::MAX;

    #[must_use]
    pub fn new(from: u32, to: u32, blend_length: Time) -> Self {
        Self {
            from,
            to,
            blend_length,
            exit_time: -1.0,
        }
    }

    #[must_use]
    pub fn with_exit_time(mut self, exit_time: f32) -> Self {
        self.exit_time = exit_time;
        self
    }

    fn has_exit_time(&self) -> bool {
        self.exit_time >= 0.0
    }

    fn fits(&self, child_count: u32) -> bool {
        let fits = |index: u32| index == Self::ANY || index < child_count;
        fits(self.from) && fits(self.to)
    }
}

#[derive(Debug, Clone)]
pub struct GroupChild {
    pub node: Node,
    pub flags: GroupChildFlags,
    condition_str: String,
    condition: Condition,
}

impl GroupChild {
    #[must_use]
    pub fn new(node: Node, flags: GroupChildFlags, condition: &str, inputs: &[InputDecl]) -> Self {
        Self {
            node,
            flags,
            condition_str: condition.to_owned(),
            condition: Condition::compile_or_log(condition, inputs),
        }
    }

    #[must_use]
    pub fn condition_str(&self) -> &str {
        &self.condition_str
    }

    #[inline]
    fn is_selectable(&self) -> bool {
        self.flags.contains(GroupChildFlags::SELECTABLE)
    }
}

/// State machine: one active child at a time, switched by conditions and
/// explicit transitions, with crossfades.
#[derive(Debug, Clone, Default)]
pub struct GroupNode {
    pub base: NodeBase,
    /// Crossfade length used for condition-driven switches.
    pub blend_length: Time,
    pub children: Vec<GroupChild>,
    pub transitions: Vec<Transition>,
}

impl GroupNode {
    #[must_use]
    pub fn new(blend_length: Time, children: Vec<GroupChild>, transitions: Vec<Transition>) -> Self {
        Self {
            base: NodeBase::default(),
            blend_length,
            children,
            transitions,
        }
    }

    fn child(&self, index: u32) -> &GroupChild {
        debug_assert!(
            (index as usize) < self.children.len(),
            "group child {index} out of {}",
            self.children.len()
        );
        &self.children[index as usize]
    }

    /// Whether a transition gated at `exit_time` may fire during the step
    /// starting at the current child's playback position.
    fn exit_time_reached(&self, from: u32, exit_time: f32, ctx: &RuntimeContext) -> bool {
        let node = &self.child(from).node;
        let len = node.length(ctx);
        let beg = node.time(ctx);
        let end = beg + ctx.time_delta;
        let loop_start = beg - beg % len;
        let t = loop_start + Time::from_seconds(exit_time * len.seconds());
        beg <= t && t < end
    }

    /// Starts a crossfade from the current child to `to`.
    fn start_transition(&self, ctx: &mut RuntimeContext, mut data: RuntimeData, to: u32, blend_length: Time) -> LocalRigidTransform {
        data.to = to;
        data.blend_length = blend_length;
        data.t = Time::ZERO;
        ctx.data.write(&data);
        let motion = self.child(data.from).node.update(ctx);
        self.child(data.to).node.enter(ctx);
        motion
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        let first = self
            .children
            .iter()
            .position(|c| c.is_selectable() && c.condition.eval(&ctx.inputs))
            .unwrap_or(0) as u32;
        ctx.data.write(&RuntimeData {
            from: first,
            to: first,
            t: Time::ZERO,
            blend_length: Time::ZERO,
        });
        if let Some(child) = self.children.get(first as usize) {
            child.node.enter(ctx);
        }
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        let mut data: RuntimeData = ctx.input_runtime.read();
        if self.children.is_empty() {
            ctx.data.write(&data);
            return LocalRigidTransform::IDENTITY;
        }

        if data.from != data.to {
            data.t += ctx.time_delta;
            if data.blend_length < data.t {
                self.child(data.from).node.skip(ctx);
                data.from = data.to;
                data.t = Time::ZERO;
                ctx.data.write(&data);
                return self.child(data.to).node.update(ctx);
            }

            ctx.data.write(&data);
            let from = self.child(data.from).node.update(ctx);
            let to = self.child(data.to).node.update(ctx);
            return from.interpolate(&to, blend_fraction(data.t, data.blend_length));
        }

        let current = self.child(data.from);
        let is_current_matching = current.condition.eval(&ctx.inputs);
        if !is_current_matching || !current.is_selectable() {
            let mut waiting_for_exit_time = false;
            let mut can_go_anywhere = false;
            for transition in &self.transitions {
                if transition.to == data.to {
                    continue;
                }
                if transition.from != data.from && transition.from != Transition::ANY {
                    continue;
                }
                if transition.to != Transition::ANY && !self.child(transition.to).condition.eval(&ctx.inputs) {
                    continue;
                }
                if transition.has_exit_time() {
                    waiting_for_exit_time = true;
                    if !self.exit_time_reached(data.from, transition.exit_time, ctx) {
                        continue;
                    }
                }
                if transition.to == Transition::ANY {
                    waiting_for_exit_time = false;
                    can_go_anywhere = true;
                    break;
                }
                return self.start_transition(ctx, data, transition.to, transition.blend_length);
            }

            if (!is_current_matching || can_go_anywhere) && !waiting_for_exit_time {
                let target = self.children.iter().enumerate().position(|(i, child)| {
                    i != data.from as usize && child.is_selectable() && child.condition.eval(&ctx.inputs)
                });
                if let Some(target) = target {
                    return self.start_transition(ctx, data, target as u32, self.blend_length);
                }
            }
        }

        data.t += ctx.time_delta;
        ctx.data.write(&data);
        self.child(data.from).node.update(ctx)
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        let data: RuntimeData = ctx.input_runtime.read();
        if self.children.is_empty() {
            return;
        }
        self.child(data.from).node.skip(ctx);
        if data.from != data.to {
            self.child(data.to).node.skip(ctx);
        }
    }

    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        let data: RuntimeData = ctx.input_runtime.read();
        if self.children.is_empty() {
            return;
        }
        self.child(data.from).node.get_pose(ctx, weight, pose, mask);
        if data.from != data.to {
            let t = blend_fraction(data.t, data.blend_length);
            self.child(data.to).node.get_pose(ctx, weight * t, pose, mask);
        }
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write(&self.blend_length);
        stream.write(&(self.children.len() as u32));
        for child in &self.children {
            stream.write(&(child.node.node_type() as u32));
            stream.write(&child.flags.bits());
            stream.write_string(&child.condition_str);
            child.node.serialize(stream);
        }
        stream.write_array(&self.transitions);
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let blend_length = stream.read()?;
        let has_transitions = ctx.newer_than(ControllerVersion::Transitions);

        let count = stream.read::<u32>()?;
        let mut children = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let ty = read_node_type(stream)?;
            let flags = if has_transitions {
                GroupChildFlags::from_bits_truncate(stream.read()?)
            } else {
                GroupChildFlags::SELECTABLE
            };
            let condition_str = stream.read_string()?;
            let condition = Condition::compile_or_log(&condition_str, ctx.inputs);
            let node = Node::deserialize(ty, stream, ctx)?;
            children.push(GroupChild {
                node,
                flags,
                condition_str,
                condition,
            });
        }

        let transitions: Vec<Transition> = if has_transitions { stream.read_array()? } else { Vec::new() };
        if let Some(t) = transitions.iter().find(|t| !t.fits(count)) {
            return Err(KilnError::InvalidData(format!(
                "group transition {} -> {} out of {count} children",
                t.from, t.to
            )));
        }
        Ok(Self {
            base,
            blend_length,
            children,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputType, InputValue};
    use crate::nodes::AnimationNode;
    use crate::nodes::test_support::{runtime, tick, walk};

    fn state(ctx: &RuntimeContext) -> RuntimeData {
        bytemuck::pod_read_unaligned(&ctx.data.data()[..std::mem::size_of::<RuntimeData>()])
    }

    #[test]
    fn exit_time_fires_on_the_straddling_tick_only() {
        let group = GroupNode::new(
            Time::ZERO,
            vec![
                GroupChild::new(AnimationNode::looped(0).into(), GroupChildFlags::empty(), "", &[]),
                GroupChild::new(AnimationNode::looped(1).into(), GroupChildFlags::empty(), "", &[]),
            ],
            vec![Transition::new(0, 1, Time::ZERO).with_exit_time(0.5)],
        );
        let mut ctx = runtime(group.into(), vec![], vec![walk(2.0, 1.0), walk(1.0, 1.0)]);

        // Ticks start at 0.0, 0.25, ... 1.0; the 1 s mark is crossed by the
        // tick that starts exactly there.
        for _ in 0..4 {
            tick(&mut ctx, 0.25);
            assert_eq!(state(&ctx).to, 0);
        }
        tick(&mut ctx, 0.25);
        assert_eq!(state(&ctx).to, 1);
        assert_eq!(state(&ctx).from, 0);

        tick(&mut ctx, 0.25);
        let data = state(&ctx);
        assert_eq!((data.from, data.to), (1, 1));
    }

    #[test]
    fn failing_guard_selects_next_matching_child() {
        let inputs = vec![InputDecl::new("speed", InputType::Float)];
        let group = GroupNode::new(
            Time::from_seconds(0.2),
            vec![
                GroupChild::new(AnimationNode::looped(0).into(), GroupChildFlags::SELECTABLE, "speed < 1", &inputs),
                GroupChild::new(AnimationNode::looped(1).into(), GroupChildFlags::SELECTABLE, "speed >= 1", &inputs),
            ],
            vec![],
        );
        let mut ctx = runtime(group.into(), inputs, vec![walk(1.0, 1.0), walk(1.0, 3.0)]);

        tick(&mut ctx, 0.1);
        assert_eq!(state(&ctx).to, 0);

        ctx.set_input(0, InputValue::Float(2.0));
        tick(&mut ctx, 0.1);
        let data = state(&ctx);
        assert_eq!((data.from, data.to), (0, 1));
        assert_eq!(data.blend_length, Time::from_seconds(0.2));

        for _ in 0..3 {
            tick(&mut ctx, 0.1);
        }
        let data = state(&ctx);
        assert_eq!((data.from, data.to), (1, 1));
    }

    #[test]
    fn wildcard_target_jumps_to_matching_child() {
        let inputs = vec![InputDecl::new("jump", InputType::Bool)];
        let group = GroupNode::new(
            Time::ZERO,
            vec![
                GroupChild::new(AnimationNode::looped(0).into(), GroupChildFlags::empty(), "", &inputs),
                GroupChild::new(AnimationNode::looped(1).into(), GroupChildFlags::SELECTABLE, "jump", &inputs),
            ],
            vec![Transition::new(Transition::ANY, Transition::ANY, Time::ZERO)],
        );
        let mut ctx = runtime(group.into(), inputs, vec![walk(1.0, 1.0), walk(1.0, 1.0)]);

        tick(&mut ctx, 0.1);
        assert_eq!(state(&ctx).to, 0);

        ctx.set_input(0, InputValue::Bool(true));
        tick(&mut ctx, 0.1);
        assert_eq!(state(&ctx).to, 1);
    }

    fn read_back(group: &GroupNode) -> Result<GroupNode> {
        let mut stream = OutputMemoryStream::new();
        group.serialize(&mut stream);
        let ctx = DeserializeContext {
            inputs: &[],
            version: ControllerVersion::Latest as u32,
        };
        GroupNode::deserialize(&mut InputMemoryStream::new(stream.data()), &ctx)
    }

    #[test]
    fn transition_to_missing_child_is_rejected() {
        let child = || GroupChild::new(AnimationNode::looped(0).into(), GroupChildFlags::empty(), "", &[]);
        let bad_target = GroupNode::new(Time::ZERO, vec![child()], vec![Transition::new(0, 5, Time::ZERO)]);
        assert!(matches!(read_back(&bad_target), Err(KilnError::InvalidData(_))));

        let bad_source = GroupNode::new(Time::ZERO, vec![child()], vec![Transition::new(1, 0, Time::ZERO)]);
        assert!(read_back(&bad_source).is_err());

        let wildcard = GroupNode::new(
            Time::ZERO,
            vec![child(), child()],
            vec![
                Transition::new(Transition::ANY, 1, Time::ZERO),
                Transition::new(0, Transition::ANY, Time::ZERO),
            ],
        );
        let read = read_back(&wildcard).unwrap();
        assert_eq!(read.transitions, wildcard.transitions);
        assert_eq!(read.children.len(), 2);
    }

    #[test]
    fn empty_group_keeps_its_state() {
        let mut ctx = runtime(GroupNode::default().into(), vec![], vec![]);
        let rm = tick(&mut ctx, 0.1);
        assert_eq!(rm, LocalRigidTransform::IDENTITY);
        assert_eq!(ctx.data.len(), std::mem::size_of::<RuntimeData>());
    }
}
