//! Inverse kinematics.
//!
//! Chains are solved with a fixed number of forward/backward reaching
//! passes over joint positions in model space. Joint rotations are then
//! rebuilt from how each segment's direction changed, and the result is
//! blended into the parent-relative pose by the chain weight.

use glam::{Quat, Vec3};
use kiln_core::LocalRigidTransform;
use kiln_core::math::nlerp;
use smallvec::SmallVec;

use crate::controller::{IkDef, MAX_IK_BONES};
use crate::model::{Model, Pose};

type ChainVec<T> = SmallVec<[T; 8]>;

/// Per-animator target for one IK chain.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IkTarget {
    /// `0.0` disables the chain.
    pub weight: f32,
    /// Model-space target of the end effector.
    pub target: Vec3,
}

/// Model-space transform of `bone` in a parent-relative pose.
fn absolute_transform(pose: &Pose, model: &Model, bone: usize) -> LocalRigidTransform {
    let local = pose.bone_transform(bone);
    match model.bone(bone).parent {
        Some(parent) => absolute_transform(pose, model, parent) * local,
        None => local,
    }
}

/// Rotation taking direction `from` onto direction `to`.
fn rotation_between(from: Vec3, to: Vec3) -> Quat {
    let (Some(from), Some(to)) = (from.try_normalize(), to.try_normalize()) else {
        return Quat::IDENTITY;
    };
    Quat::from_rotation_arc(from, to)
}

/// Bends `chain` towards `target` in a parent-relative `pose`.
///
/// Does nothing when the weight is zero, the chain has fewer than two bones
/// or any of its bones is missing from `model`.
pub fn solve_ik(chain: &IkDef, target: &IkTarget, pose: &mut Pose, model: &Model) {
    if target.weight <= 0.0 {
        return;
    }
    let count = chain.bones.len();
    debug_assert!(count <= MAX_IK_BONES, "IK chain of {count} bones");
    if !(2..=MAX_IK_BONES).contains(&count) {
        return;
    }
    let Some(indices) = chain
        .bones
        .iter()
        .map(|&hash| model.bone_index(hash).filter(|&i| i < pose.len()))
        .collect::<Option<ChainVec<usize>>>()
    else {
        return;
    };

    let roots_parent = model.bone(indices[0]).parent.map_or(LocalRigidTransform::IDENTITY, |parent| {
        absolute_transform(pose, model, parent)
    });

    // Bone space to model space.
    let mut transforms: ChainVec<LocalRigidTransform> = ChainVec::with_capacity(count);
    let mut lengths: ChainVec<f32> = ChainVec::with_capacity(count - 1);
    let mut parent = roots_parent;
    for &bone in &indices {
        let tr = parent * pose.bone_transform(bone);
        if let Some(prev) = transforms.last() {
            lengths.push((tr.pos - prev.pos).length());
        }
        transforms.push(tr);
        parent = tr;
    }
    let old_positions: ChainVec<Vec3> = transforms.iter().map(|t| t.pos).collect();
    let reach: f32 = lengths.iter().sum();

    let origin = transforms[0].pos;
    let mut goal = target.target;
    let to_goal = goal - origin;
    if reach * reach < to_goal.length_squared() {
        goal = origin + to_goal.normalize_or_zero() * reach;
    }

    for _ in 0..chain.max_iterations {
        transforms[count - 1].pos = goal;
        for i in (2..count).rev() {
            let dir = (transforms[i - 1].pos - transforms[i].pos).normalize_or_zero();
            transforms[i - 1].pos = transforms[i].pos + dir * lengths[i - 1];
        }
        for i in 1..count {
            let dir = (transforms[i].pos - transforms[i - 1].pos).normalize_or_zero();
            transforms[i].pos = transforms[i - 1].pos + dir * lengths[i - 1];
        }
    }

    for i in (0..count - 1).rev() {
        let old_dir = old_positions[i + 1] - old_positions[i];
        let new_dir = transforms[i + 1].pos - transforms[i].pos;
        transforms[i].rot = rotation_between(old_dir, new_dir) * transforms[i].rot;
    }

    // Model space back to bone space.
    let mut out: ChainVec<LocalRigidTransform> = ChainVec::from_elem(LocalRigidTransform::IDENTITY, count);
    for i in (1..count).rev() {
        transforms[i] = transforms[i - 1].inverted() * transforms[i];
        out[i].pos = transforms[i].pos;
    }
    for i in 1..count - 1 {
        out[i].rot = transforms[i].rot;
    }
    out[count - 1].rot = pose.rotations[indices[count - 1]];
    out[0].rot = roots_parent.rot.conjugate() * transforms[0].rot;
    out[0].pos = pose.positions[indices[0]];

    let w = target.weight.min(1.0);
    for (&bone, solved) in indices.iter().zip(&out) {
        pose.positions[bone] = pose.positions[bone].lerp(solved.pos, w);
        pose.rotations[bone] = nlerp(pose.rotations[bone], solved.rot, w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::StableHash;

    const EPSILON: f32 = 1e-4;

    fn leg() -> (Model, IkDef) {
        let model = Model::new([
            ("pelvis".to_owned(), None, LocalRigidTransform::new(Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY)),
            ("thigh".to_owned(), Some(0), LocalRigidTransform::new(Vec3::NEG_Y, Quat::IDENTITY)),
            ("calf".to_owned(), Some(1), LocalRigidTransform::new(Vec3::NEG_Y, Quat::IDENTITY)),
        ]);
        let chain = IkDef {
            bones: ["pelvis", "thigh", "calf"].iter().map(|b| StableHash::of_str(b)).collect(),
            max_iterations: 10,
        };
        (model, chain)
    }

    #[test]
    fn missing_bone_leaves_pose_alone() {
        let (model, mut chain) = leg();
        chain.bones.push(StableHash::of_str("toe"));
        let mut pose = Pose::default();
        model.get_relative_pose(&mut pose);
        let before = pose.clone();
        solve_ik(
            &chain,
            &IkTarget {
                weight: 1.0,
                target: Vec3::new(1.0, 1.0, 0.0),
            },
            &mut pose,
            &model,
        );
        assert_eq!(pose, before);
    }

    #[test]
    fn unreachable_target_stretches_chain_towards_it() {
        let (model, chain) = leg();
        let mut pose = Pose::default();
        model.get_relative_pose(&mut pose);
        solve_ik(
            &chain,
            &IkTarget {
                weight: 1.0,
                target: Vec3::new(10.0, 2.0, 0.0),
            },
            &mut pose,
            &model,
        );
        pose.compute_absolute(&model);
        // Close to fully extended along +X; reaching passes converge slowly
        // at the edge of the reachable sphere.
        let effector = pose.positions[2];
        assert!((effector - Vec3::new(2.0, 2.0, 0.0)).length() < 0.05);
        assert!(effector.distance(Vec3::new(0.0, 2.0, 0.0)) <= 2.0 + EPSILON);
    }
}
