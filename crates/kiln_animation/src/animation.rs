//! Skeletal animation clips.

use glam::{Quat, Vec3};
use kiln_core::math::nlerp;
use kiln_core::{InputMemoryStream, KilnError, LocalRigidTransform, OutputMemoryStream, Result, Time};

use crate::model::{BoneMask, BoneNameHash, Model, Pose};
use crate::tracks::KeyframeTrack;

/// Animated channels of a single bone.
#[derive(Debug, Clone)]
pub struct BoneTrack {
    pub bone: BoneNameHash,
    pub translation: Option<KeyframeTrack<Vec3>>,
    pub rotation: Option<KeyframeTrack<Quat>>,
}

impl BoneTrack {
    fn sample(&self, seconds: f32) -> (Option<Vec3>, Option<Quat>) {
        (
            self.translation.as_ref().and_then(|t| t.sample(seconds)),
            self.rotation.as_ref().and_then(|t| t.sample(seconds)),
        )
    }
}

const MAGIC: u32 = u32::from_le_bytes(*b"KANI");
const VERSION: u32 = 1;

/// Inputs for [`Animation::get_relative_pose`].
pub struct SampleContext<'a> {
    pub pose: &'a mut Pose,
    pub model: &'a Model,
    pub time: Time,
    /// Below `1.0` the sample is blended into the existing pose.
    pub weight: f32,
    pub mask: Option<&'a BoneMask>,
    /// Bone whose motion is extracted as root motion instead of being
    /// applied to the pose.
    pub root_bone: Option<BoneNameHash>,
}

#[derive(Debug, Clone, Default)]
pub struct Animation {
    length: Time,
    tracks: Vec<BoneTrack>,
}

impl Animation {
    #[must_use]
    pub fn new(length: Time, tracks: Vec<BoneTrack>) -> Self {
        Self { length, tracks }
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> Time {
        self.length
    }

    #[must_use]
    pub fn tracks(&self) -> &[BoneTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn track(&self, bone: BoneNameHash) -> Option<&BoneTrack> {
        self.tracks.iter().find(|t| t.bone == bone)
    }

    /// Writes the sampled bones into a parent-relative pose.
    ///
    /// The root-motion bone is held at its first frame so that its motion is
    /// applied once, through the entity transform, rather than twice.
    pub fn get_relative_pose(&self, ctx: &mut SampleContext<'_>) {
        debug_assert!(!ctx.pose.is_absolute, "sampling into an absolute pose");
        let seconds = ctx.time.seconds();
        let blend = ctx.weight < 0.999;

        for track in &self.tracks {
            if ctx.mask.is_some_and(|m| !m.contains(track.bone)) {
                continue;
            }
            let Some(bone) = ctx.model.bone_index(track.bone) else {
                continue;
            };
            if bone >= ctx.pose.len() {
                continue;
            }

            let sample_at = if ctx.root_bone == Some(track.bone) { 0.0 } else { seconds };
            let (pos, rot) = track.sample(sample_at);
            if let Some(pos) = pos {
                let dst = &mut ctx.pose.positions[bone];
                *dst = if blend { dst.lerp(pos, ctx.weight) } else { pos };
            }
            if let Some(rot) = rot {
                let dst = &mut ctx.pose.rotations[bone];
                *dst = if blend { nlerp(*dst, rot, ctx.weight) } else { rot };
            }
        }
    }

    /// Transform of the root-motion bone at `time`, identity if the clip
    /// does not animate that bone.
    #[must_use]
    pub fn get_root_motion(&self, time: Time, root_bone: Option<BoneNameHash>) -> LocalRigidTransform {
        let Some(track) = root_bone.and_then(|bone| self.track(bone)) else {
            return LocalRigidTransform::IDENTITY;
        };
        let (pos, rot) = track.sample(time.seconds());
        LocalRigidTransform::new(pos.unwrap_or(Vec3::ZERO), rot.unwrap_or(Quat::IDENTITY))
    }

    pub fn serialize(&self, stream: &mut OutputMemoryStream) {
        stream.write(&MAGIC);
        stream.write(&VERSION);
        stream.write(&self.length);
        stream.write(&(self.tracks.len() as u32));
        for track in &self.tracks {
            stream.write(&track.bone);
            stream.write_bool(track.translation.is_some());
            if let Some(translation) = &track.translation {
                translation.serialize(stream);
            }
            stream.write_bool(track.rotation.is_some());
            if let Some(rotation) = &track.rotation {
                rotation.serialize(stream);
            }
        }
    }

    pub fn deserialize(stream: &mut InputMemoryStream<'_>) -> Result<Self> {
        let magic = stream.read::<u32>()?;
        if magic != MAGIC {
            return Err(KilnError::InvalidMagic {
                what: "animation",
                expected: MAGIC,
                found: magic,
            });
        }
        let version = stream.read::<u32>()?;
        if version > VERSION {
            return Err(KilnError::UnsupportedVersion {
                what: "animation",
                version,
            });
        }
        let length = stream.read::<Time>()?;
        let count = stream.read::<u32>()?;
        let mut tracks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let bone = stream.read()?;
            let translation = if stream.read_bool()? {
                Some(KeyframeTrack::deserialize(stream)?)
            } else {
                None
            };
            let rotation = if stream.read_bool()? {
                Some(KeyframeTrack::deserialize(stream)?)
            } else {
                None
            };
            tracks.push(BoneTrack {
                bone,
                translation,
                rotation,
            });
        }
        Ok(Self { length, tracks })
    }
}
