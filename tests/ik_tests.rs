//! IK solver tests
//!
//! Tests for:
//! - Reachable targets are hit exactly
//! - Zero weight leaves the pose untouched
//! - Partial weights stay between the input and solved poses
//! - Chain length limits

use glam::{Quat, Vec3};
use kiln::animation::{IkDef, IkTarget, Model, Pose, solve_ik};
use kiln::core::{LocalRigidTransform, StableHash};

// ============================================================================
// Helper
// ============================================================================

const EPSILON: f32 = 1e-4;

fn vec3_approx(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() < EPSILON
}

/// Pelvis at height 2 with a straight leg of two unit segments below it.
fn leg() -> (Model, IkDef) {
    let model = Model::new([
        ("pelvis".to_owned(), None, LocalRigidTransform::new(Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY)),
        ("thigh".to_owned(), Some(0), LocalRigidTransform::new(Vec3::NEG_Y, Quat::IDENTITY)),
        ("calf".to_owned(), Some(1), LocalRigidTransform::new(Vec3::NEG_Y, Quat::IDENTITY)),
    ]);
    let chain = IkDef {
        bones: ["pelvis", "thigh", "calf"].iter().map(|b| StableHash::of_str(b)).collect(),
        max_iterations: 5,
    };
    (model, chain)
}

fn rest_pose(model: &Model) -> Pose {
    let mut pose = Pose::default();
    model.get_relative_pose(&mut pose);
    pose
}

fn solved_effector(weight: f32, target: Vec3) -> Vec3 {
    let (model, chain) = leg();
    let mut pose = rest_pose(&model);
    solve_ik(&chain, &IkTarget { weight, target }, &mut pose, &model);
    pose.compute_absolute(&model);
    pose.positions[2]
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn reachable_target_is_hit() {
    let target = Vec3::new(1.0, 1.0, 0.0);
    assert!(vec3_approx(solved_effector(1.0, target), target));
}

#[test]
fn solved_chain_keeps_segment_lengths() {
    let (model, chain) = leg();
    let mut pose = rest_pose(&model);
    let target = Vec3::new(1.0, 1.0, 0.0);
    solve_ik(&chain, &IkTarget { weight: 1.0, target }, &mut pose, &model);
    pose.compute_absolute(&model);

    let [pelvis, thigh, calf] = [pose.positions[0], pose.positions[1], pose.positions[2]];
    assert!(vec3_approx(pelvis, Vec3::new(0.0, 2.0, 0.0)));
    assert!((pelvis.distance(thigh) - 1.0).abs() < EPSILON);
    assert!((thigh.distance(calf) - 1.0).abs() < EPSILON);
}

#[test]
fn zero_weight_leaves_pose_unchanged() {
    let (model, chain) = leg();
    let mut pose = rest_pose(&model);
    let before = pose.clone();
    solve_ik(
        &chain,
        &IkTarget {
            weight: 0.0,
            target: Vec3::new(1.0, 1.0, 0.0),
        },
        &mut pose,
        &model,
    );
    assert_eq!(pose, before);
}

#[test]
fn partial_weight_moves_part_of_the_way() {
    let rest = Vec3::ZERO;
    let target = Vec3::new(1.0, 1.0, 0.0);
    let half = solved_effector(0.5, target);

    assert!(half.distance(rest) > EPSILON);
    assert!(half.distance(target) > EPSILON);
    assert!(half.x > 0.0 && half.x < 1.0);
}

#[test]
fn single_bone_chain_is_ignored() {
    let (model, mut chain) = leg();
    chain.bones.truncate(1);
    let mut pose = rest_pose(&model);
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
