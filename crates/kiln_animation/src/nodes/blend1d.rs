use bytemuck::{Pod, Zeroable};
use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Result, Time};

use super::{DeserializeContext, NodeBase, relative_root_motion, sample_pose_relative};
use crate::model::Pose;
use crate::runtime::RuntimeContext;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Blend1DChild {
    /// Input value at which this child plays alone.
    pub value: f32,
    pub slot: u32,
}

/// The two children bracketing an input value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blend1DActivePair {
    pub a: usize,
    pub b: Option<usize>,
    /// Weight of `b`.
    pub t: f32,
}

/// Blends clips placed along one input axis.
///
/// Runtime state: playback position as a fraction of the blended length.
#[derive(Debug, Clone, Default)]
pub struct Blend1DNode {
    pub base: NodeBase,
    pub input_index: u32,
    /// Sorted by ascending `value`.
    pub children: Vec<Blend1DChild>,
}

impl Blend1DNode {
    #[must_use]
    pub fn new(input_index: u32, children: Vec<Blend1DChild>) -> Self {
        Self {
            base: NodeBase::default(),
            input_index,
            children,
        }
    }

    /// Children bracketing `input`. Outside the covered range the nearest
    /// boundary child plays alone.
    #[must_use]
    pub fn active_pair(&self, input: f32) -> Option<Blend1DActivePair> {
        let first = self.children.first()?;
        let last = self.children.len() - 1;
        let single = |a| Blend1DActivePair { a, b: None, t: 0.0 };

        if input <= first.value {
            return Some(single(0));
        }
        if input >= self.children[last].value {
            return Some(single(last));
        }
        let i = (1..self.children.len()).find(|&i| input < self.children[i].value)?;
        let (lo, hi) = (self.children[i - 1].value, self.children[i].value);
        Some(Blend1DActivePair {
            a: i - 1,
            b: Some(i),
            t: (input - lo) / (hi - lo),
        })
    }

    fn pair(&self, ctx: &RuntimeContext) -> Option<Blend1DActivePair> {
        self.active_pair(ctx.input_f32(self.input_index))
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        ctx.data.write(&0.0_f32);
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        let relt0: f32 = ctx.input_runtime.read();
        let Some(pair) = self.pair(ctx) else {
            ctx.data.write(&relt0);
            return LocalRigidTransform::IDENTITY;
        };

        let anim_a = ctx.animation(self.children[pair.a].slot);
        let anim_b = pair.b.and_then(|b| ctx.animation(self.children[b].slot));
        let weighted_len = match (&anim_a, &anim_b) {
            (Some(a), Some(b)) => Time::lerp(a.length(), b.length(), pair.t),
            (Some(a), None) => a.length(),
            (None, _) => Time::ONE_SECOND,
        };
        let relt = (relt0 + ctx.time_delta / weighted_len) % 1.0;

        let mut motion = anim_a.map_or(LocalRigidTransform::IDENTITY, |a| {
            relative_root_motion(&a, relt0, relt, ctx.root_bone_hash)
        });
        if let Some(b) = anim_b {
            let motion_b = relative_root_motion(&b, relt0, relt, ctx.root_bone_hash);
            motion = motion.interpolate(&motion_b, pair.t);
        }

        ctx.data.write(&relt);
        motion
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        ctx.input_runtime.skip(std::mem::size_of::<f32>());
    }

    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        let t: f32 = ctx.input_runtime.read();
        let Some(pair) = self.pair(ctx) else {
            return;
        };
        sample_pose_relative(ctx, t, weight, self.children[pair.a].slot, pose, mask);
        if let Some(b) = pair.b {
            sample_pose_relative(ctx, t, weight * pair.t, self.children[b].slot, pose, mask);
        }
    }

    pub(super) fn length(&self, ctx: &RuntimeContext) -> Time {
        let Some(pair) = self.pair(ctx) else {
            return Time::ONE_SECOND;
        };
        let Some(anim_a) = ctx.animation(self.children[pair.a].slot) else {
            return Time::ONE_SECOND;
        };
        match pair.b.and_then(|b| ctx.animation(self.children[b].slot)) {
            Some(anim_b) => Time::lerp(anim_a.length(), anim_b.length(), pair.t),
            None => anim_a.length(),
        }
    }

    pub(super) fn time(&self, ctx: &RuntimeContext) -> Time {
        self.length(ctx) * ctx.input_runtime.peek::<f32>()
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write(&self.input_index);
        stream.write_array(&self.children);
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let input_index = stream.read()?;
        let children = stream.read_array()?;
        Ok(Self {
            base,
            input_index,
            children,
        })
    }
}
