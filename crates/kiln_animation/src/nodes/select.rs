use bytemuck::{Pod, Zeroable};
use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Result, Time};

use super::{DeserializeContext, Node, NodeBase, blend_fraction};
use crate::model::Pose;
use crate::runtime::RuntimeContext;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RuntimeData {
    from: u32,
    to: u32,
    t: Time,
}

#[derive(Debug, Clone)]
pub struct SelectChild {
    /// Upper bound of the input range selecting this child.
    pub max_value: f32,
    pub node: Node,
}

/// Picks one of N subtrees by which bucket a numeric input falls into.
#[derive(Debug, Clone, Default)]
pub struct SelectNode {
    pub base: NodeBase,
    pub blend_length: Time,
    pub input_index: u32,
    /// Sorted by ascending `max_value`.
    pub children: Vec<SelectChild>,
}

impl SelectNode {
    #[must_use]
    pub fn new(input_index: u32, blend_length: Time, children: Vec<SelectChild>) -> Self {
        Self {
            base: NodeBase::default(),
            blend_length,
            input_index,
            children,
        }
    }

    /// First child whose `max_value` is not below `input`, else the last.
    #[must_use]
    pub fn child_index(&self, input: f32) -> usize {
        debug_assert!(!self.children.is_empty());
        self.children
            .iter()
            .position(|c| input <= c.max_value)
            .unwrap_or(self.children.len().saturating_sub(1))
    }

    fn child(&self, index: u32) -> &Node {
        debug_assert!(
            (index as usize) < self.children.len(),
            "select child {index} out of {}",
            self.children.len()
        );
        &self.children[index as usize].node
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        if self.children.is_empty() {
            return;
        }
        let selected = self.child_index(ctx.input_f32(self.input_index)) as u32;
        ctx.data.write(&RuntimeData {
            from: selected,
            to: selected,
            t: Time::ZERO,
        });
        self.child(selected).enter(ctx);
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        if self.children.is_empty() {
            return LocalRigidTransform::IDENTITY;
        }
        let mut data: RuntimeData = ctx.input_runtime.read();

        if data.from != data.to {
            data.t += ctx.time_delta;
            if self.blend_length < data.t {
                self.child(data.from).skip(ctx);
                data.from = data.to;
                data.t = Time::ZERO;
                ctx.data.write(&data);
                return self.child(data.to).update(ctx);
            }

            ctx.data.write(&data);
            let from = self.child(data.from).update(ctx);
            let to = self.child(data.to).update(ctx);
            return from.interpolate(&to, blend_fraction(data.t, self.blend_length));
        }

        let selected = self.child_index(ctx.input_f32(self.input_index)) as u32;
        if selected != data.from {
            data.to = selected;
            data.t = Time::ZERO;
            ctx.data.write(&data);
            let motion = self.child(data.from).update(ctx);
            self.child(data.to).enter(ctx);
            return motion;
        }

        data.t += ctx.time_delta;
        ctx.data.write(&data);
        self.child(data.from).update(ctx)
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        if self.children.is_empty() {
            return;
        }
        let data: RuntimeData = ctx.input_runtime.read();
        self.child(data.from).skip(ctx);
        if data.from != data.to {
            self.child(data.to).skip(ctx);
        }
    }

    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        if self.children.is_empty() {
            return;
        }
        let data: RuntimeData = ctx.input_runtime.read();
        self.child(data.from).get_pose(ctx, weight, pose, mask);
        if data.from != data.to {
            let t = blend_fraction(data.t, self.blend_length);
            self.child(data.to).get_pose(ctx, weight * t, pose, mask);
        }
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write(&self.blend_length);
        stream.write(&self.input_index);
        stream.write(&(self.children.len() as u32));
        for child in &self.children {
            stream.write(&child.max_value);
            child.node.serialize_tagged(stream);
        }
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let blend_length = stream.read()?;
        let input_index = stream.read()?;
        let count = stream.read::<u32>()?;
        let children = (0..count)
            .map(|_| -> Result<SelectChild> {
                let max_value = stream.read()?;
                let node = Node::deserialize_tagged(stream, ctx)?;
                Ok(SelectChild { max_value, node })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            base,
            blend_length,
            input_index,
            children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputDecl, InputType, InputValue};
    use crate::nodes::AnimationNode;
    use crate::nodes::test_support::{EPSILON, runtime, tick, walk};

    fn gait_select() -> SelectNode {
        SelectNode::new(
            0,
            Time::from_seconds(0.5),
            vec![
                SelectChild {
                    max_value: 0.5,
                    node: AnimationNode::looped(0).into(),
                },
                SelectChild {
                    max_value: 2.0,
                    node: AnimationNode::looped(1).into(),
                },
            ],
        )
    }

    #[test]
    fn buckets_by_max_value() {
        let node = gait_select();
        assert_eq!(node.child_index(0.0), 0);
        assert_eq!(node.child_index(0.5), 0);
        assert_eq!(node.child_index(0.51), 1);
        assert_eq!(node.child_index(10.0), 1);
    }

    #[test]
    fn switch_crossfades_then_settles() {
        let mut ctx = runtime(
            gait_select().into(),
            vec![InputDecl::new("speed", InputType::Float)],
            vec![walk(1.0, 1.0), walk(1.0, 3.0)],
        );
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.25).abs() < EPSILON);

        ctx.set_input(0, InputValue::Float(1.5));
        tick(&mut ctx, 0.25);
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.5).abs() < EPSILON);

        // 0.5 s elapsed equals the blend length, the fade is still running.
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.75).abs() < EPSILON);
        assert_eq!(ctx.data.len(), std::mem::size_of::<RuntimeData>() + 2 * std::mem::size_of::<Time>());

        tick(&mut ctx, 0.25);
        assert_eq!(ctx.data.len(), std::mem::size_of::<RuntimeData>() + std::mem::size_of::<Time>());
    }
}
