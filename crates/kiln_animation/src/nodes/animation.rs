use bitflags::bitflags;
use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Result, Time};

use super::{DeserializeContext, NodeBase, emit_events, root_motion, sample_pose};
use crate::model::Pose;
use crate::runtime::RuntimeContext;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AnimationNodeFlags: u32 {
        const LOOPED = 1 << 0;
    }
}

/// Leaf node playing the animation bound to one slot.
///
/// Runtime state: the absolute playback [`Time`].
#[derive(Debug, Clone, Default)]
pub struct AnimationNode {
    pub base: NodeBase,
    pub slot: u32,
    pub flags: AnimationNodeFlags,
}

impl AnimationNode {
    #[must_use]
    pub fn new(slot: u32, flags: AnimationNodeFlags) -> Self {
        Self {
            base: NodeBase::default(),
            slot,
            flags,
        }
    }

    #[must_use]
    pub fn looped(slot: u32) -> Self {
        Self::new(slot, AnimationNodeFlags::LOOPED)
    }

    #[inline]
    fn is_looped(&self) -> bool {
        self.flags.contains(AnimationNodeFlags::LOOPED)
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        ctx.data.write(&Time::ZERO);
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        let mut t: Time = ctx.input_runtime.read();
        let mut prev_t = t;
        t += ctx.time_delta;

        let motion = match ctx.animation(self.slot) {
            Some(anim) => {
                if !self.is_looped() {
                    t = t.min(anim.length());
                    prev_t = prev_t.min(anim.length());
                }
                emit_events(&self.base, prev_t, t, anim.length(), ctx);
                root_motion(&anim, prev_t, t, ctx.root_bone_hash)
            }
            None => LocalRigidTransform::IDENTITY,
        };
        ctx.data.write(&t);
        motion
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        ctx.input_runtime.skip(std::mem::size_of::<Time>());
    }

    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        let t: Time = ctx.input_runtime.read();
        sample_pose(ctx, t, weight, self.slot, pose, mask, self.is_looped());
    }

    pub(super) fn length(&self, ctx: &RuntimeContext) -> Time {
        ctx.animation(self.slot).map_or(Time::ZERO, |anim| anim.length())
    }

    pub(super) fn time(&self, ctx: &RuntimeContext) -> Time {
        ctx.input_runtime.peek()
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write(&self.slot);
        stream.write(&self.flags.bits());
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let slot = stream.read()?;
        let flags = AnimationNodeFlags::from_bits_truncate(stream.read()?);
        Ok(Self { base, slot, flags })
    }
}
