use bytemuck::{Pod, Zeroable};
use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Result, Time};

use super::{DeserializeContext, Node, NodeBase, blend_fraction};
use crate::condition::Condition;
use crate::input::InputDecl;
use crate::model::Pose;
use crate::runtime::RuntimeContext;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RuntimeData {
    /// Time since the last switch; `>= blend_length` once settled.
    t: Time,
    is_true: u32,
}

/// Switches between two subtrees on a boolean expression, crossfading on
/// every change.
#[derive(Debug, Clone, Default)]
pub struct ConditionNode {
    pub base: NodeBase,
    condition_str: String,
    condition: Condition,
    pub blend_length: Time,
    pub true_node: Option<Box<Node>>,
    pub false_node: Option<Box<Node>>,
}

impl ConditionNode {
    #[must_use]
    pub fn new(condition: &str, inputs: &[InputDecl], blend_length: Time, true_node: Node, false_node: Node) -> Self {
        let mut node = Self {
            base: NodeBase::default(),
            blend_length,
            true_node: Some(Box::new(true_node)),
            false_node: Some(Box::new(false_node)),
            ..Self::default()
        };
        node.set_condition(condition, inputs);
        node
    }

    #[must_use]
    pub fn condition_str(&self) -> &str {
        &self.condition_str
    }

    /// Recompiles the guard. Failures are logged and make the guard false.
    pub fn set_condition(&mut self, condition: &str, inputs: &[InputDecl]) {
        condition.clone_into(&mut self.condition_str);
        self.condition = Condition::compile_or_log(condition, inputs);
    }

    fn branches(&self) -> Option<(&Node, &Node)> {
        Some((self.true_node.as_deref()?, self.false_node.as_deref()?))
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        let Some((on_true, on_false)) = self.branches() else {
            return;
        };
        let is_true = self.condition.eval(&ctx.inputs);
        ctx.data.write(&RuntimeData {
            t: self.blend_length,
            is_true: u32::from(is_true),
        });
        (if is_true { on_true } else { on_false }).enter(ctx);
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        let Some((on_true, on_false)) = self.branches() else {
            return LocalRigidTransform::IDENTITY;
        };
        let pick = |value: bool| if value { on_true } else { on_false };

        let mut data: RuntimeData = ctx.input_runtime.read();
        let current = data.is_true != 0;

        if data.t < self.blend_length {
            data.t += ctx.time_delta;
            if data.t >= self.blend_length {
                pick(!current).skip(ctx);
                ctx.data.write(&data);
                return pick(current).update(ctx);
            }

            ctx.data.write(&data);
            let from = pick(!current).update(ctx);
            let to = pick(current).update(ctx);
            return from.interpolate(&to, blend_fraction(data.t, self.blend_length));
        }

        let next = self.condition.eval(&ctx.inputs);
        if next == current {
            ctx.data.write(&data);
            return pick(current).update(ctx);
        }

        data.is_true = u32::from(next);
        if self.blend_length.is_zero() {
            pick(current).skip(ctx);
            ctx.data.write(&data);
            pick(next).enter(ctx);
            return LocalRigidTransform::IDENTITY;
        }

        data.t = Time::ZERO;
        ctx.data.write(&data);
        let motion = pick(current).update(ctx);
        pick(next).enter(ctx);
        motion
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        let Some((on_true, on_false)) = self.branches() else {
            return;
        };
        let data: RuntimeData = ctx.input_runtime.read();
        let current = data.is_true != 0;
        if data.t < self.blend_length {
            (if current { on_false } else { on_true }).skip(ctx);
        }
        (if current { on_true } else { on_false }).skip(ctx);
    }

    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        let Some((on_true, on_false)) = self.branches() else {
            return;
        };
        let data: RuntimeData = ctx.input_runtime.read();
        let (active, previous) = if data.is_true != 0 { (on_true, on_false) } else { (on_false, on_true) };
        if data.t < self.blend_length {
            previous.get_pose(ctx, weight, pose, mask);
            let t = blend_fraction(data.t, self.blend_length);
            active.get_pose(ctx, weight * t, pose, mask);
        } else {
            active.get_pose(ctx, weight, pose, mask);
        }
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write_string(&self.condition_str);
        stream.write(&self.blend_length);
        for branch in [&self.true_node, &self.false_node] {
            stream.write_bool(branch.is_some());
            if let Some(node) = branch {
                node.serialize_tagged(stream);
            }
        }
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let condition_str = stream.read_string()?;
        let condition = Condition::compile_or_log(&condition_str, ctx.inputs);
        let blend_length = stream.read()?;
        let mut read_branch = || -> Result<Option<Box<Node>>> {
            if !stream.read_bool()? {
                return Ok(None);
            }
            Ok(Some(Box::new(Node::deserialize_tagged(stream, ctx)?)))
        };
        let true_node = read_branch()?;
        let false_node = read_branch()?;
        Ok(Self {
            base,
            condition_str,
            condition,
            blend_length,
            true_node,
            false_node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputType, InputValue};
    use crate::nodes::AnimationNode;
    use crate::nodes::test_support::{EPSILON, runtime, tick, walk};

    fn running_node(blend: f32) -> (ConditionNode, Vec<InputDecl>) {
        let inputs = vec![InputDecl::new("running", InputType::Bool)];
        let node = ConditionNode::new(
            "running",
            &inputs,
            Time::from_seconds(blend),
            AnimationNode::looped(1).into(),
            AnimationNode::looped(0).into(),
        );
        (node, inputs)
    }

    #[test]
    fn crossfade_blends_root_motion() {
        let (node, inputs) = running_node(0.5);
        let mut ctx = runtime(node.into(), inputs, vec![walk(1.0, 1.0), walk(1.0, 3.0)]);

        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.25).abs() < EPSILON);

        ctx.set_input(0, InputValue::Bool(true));
        // Switch tick: the old branch still drives root motion.
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.25).abs() < EPSILON);

        // Halfway through the fade: 0.25 walk and 0.75 run, mixed 50/50.
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.5).abs() < EPSILON);

        // Fade done, run only.
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.75).abs() < EPSILON);
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.75).abs() < EPSILON);
    }

    #[test]
    fn zero_blend_switches_immediately() {
        let (node, inputs) = running_node(0.0);
        let mut ctx = runtime(node.into(), inputs, vec![walk(1.0, 1.0), walk(1.0, 3.0)]);
        tick(&mut ctx, 0.25);

        ctx.set_input(0, InputValue::Bool(true));
        let rm = tick(&mut ctx, 0.25);
        assert!(rm.pos.length() < EPSILON);
        // Only the freshly entered run clip remains in the state.
        assert_eq!(ctx.data.len(), std::mem::size_of::<RuntimeData>() + std::mem::size_of::<Time>());

        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.75).abs() < EPSILON);
    }

    #[test]
    fn missing_branch_is_inert() {
        let node = ConditionNode {
            true_node: Some(Box::new(AnimationNode::looped(0).into())),
            ..ConditionNode::default()
        };
        let mut ctx = runtime(node.into(), vec![], vec![walk(1.0, 1.0)]);
        let rm = tick(&mut ctx, 0.25);
        assert_eq!(rm, LocalRigidTransform::IDENTITY);
        assert!(ctx.data.is_empty());
    }
}
