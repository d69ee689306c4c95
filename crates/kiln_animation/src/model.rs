use glam::{Quat, Vec3};
use kiln_core::{LocalRigidTransform, StableHash};
use rustc_hash::{FxHashMap, FxHashSet};

/// Hash of a bone name, the key animations and IK chains use to find bones.
pub type BoneNameHash = StableHash;

#[derive(Debug, Clone)]
pub struct Bone {
    pub name: String,
    pub name_hash: BoneNameHash,
    /// Parents always precede their children in [`Model::bones`].
    pub parent: Option<usize>,
    /// Bind pose relative to the parent bone.
    pub relative_transform: LocalRigidTransform,
}

/// The skeleton part of a renderable model.
#[derive(Debug, Clone, Default)]
pub struct Model {
    bones: Vec<Bone>,
    bone_map: FxHashMap<BoneNameHash, usize>,
}

impl Model {
    /// Builds a model from `(name, parent index, bind pose relative to parent)`
    /// triples listed parents first.
    #[must_use]
    pub fn new(bones: impl IntoIterator<Item = (String, Option<usize>, LocalRigidTransform)>) -> Self {
        let bones: Vec<Bone> = bones
            .into_iter()
            .map(|(name, parent, relative_transform)| Bone {
                name_hash: StableHash::of_str(&name),
                name,
                parent,
                relative_transform,
            })
            .collect();
        for (i, bone) in bones.iter().enumerate() {
            debug_assert!(
                bone.parent.is_none_or(|p| p < i),
                "bone `{}` listed before its parent",
                bone.name
            );
        }
        let bone_map = bones.iter().enumerate().map(|(i, b)| (b.name_hash, i)).collect();
        Self { bones, bone_map }
    }

    #[inline]
    #[must_use]
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    #[must_use]
    pub fn bone(&self, index: usize) -> &Bone {
        &self.bones[index]
    }

    #[must_use]
    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    #[must_use]
    pub fn bone_index(&self, hash: BoneNameHash) -> Option<usize> {
        self.bone_map.get(&hash).copied()
    }

    /// Resets `pose` to the bind pose in parent-relative space.
    pub fn get_relative_pose(&self, pose: &mut Pose) {
        pose.resize(self.bones.len());
        for (i, bone) in self.bones.iter().enumerate() {
            pose.positions[i] = bone.relative_transform.pos;
            pose.rotations[i] = bone.relative_transform.rot;
        }
        pose.is_absolute = false;
    }
}

/// Per-bone positions and rotations, either relative to the parent bone or
/// absolute in model space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
    pub is_absolute: bool,
}

impl Pose {
    #[must_use]
    pub fn new(bone_count: usize) -> Self {
        Self {
            positions: vec![Vec3::ZERO; bone_count],
            rotations: vec![Quat::IDENTITY; bone_count],
            is_absolute: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn resize(&mut self, bone_count: usize) {
        self.positions.resize(bone_count, Vec3::ZERO);
        self.rotations.resize(bone_count, Quat::IDENTITY);
    }

    #[must_use]
    pub fn bone_transform(&self, index: usize) -> LocalRigidTransform {
        LocalRigidTransform::new(self.positions[index], self.rotations[index])
    }

    /// Parent-relative to model space. No-op if already absolute.
    pub fn compute_absolute(&mut self, model: &Model) {
        if self.is_absolute {
            return;
        }
        for (i, bone) in model.bones.iter().enumerate().take(self.len()) {
            if let Some(parent) = bone.parent {
                let parent_rot = self.rotations[parent];
                self.positions[i] = parent_rot * self.positions[i] + self.positions[parent];
                self.rotations[i] = parent_rot * self.rotations[i];
            }
        }
        self.is_absolute = true;
    }

    /// Model space to parent-relative. No-op if already relative.
    pub fn compute_relative(&mut self, model: &Model) {
        if !self.is_absolute {
            return;
        }
        for (i, bone) in model.bones.iter().enumerate().take(self.len()).rev() {
            if let Some(parent) = bone.parent {
                let inv_parent_rot = self.rotations[parent].conjugate();
                self.positions[i] = inv_parent_rot * (self.positions[i] - self.positions[parent]);
                self.rotations[i] = inv_parent_rot * self.rotations[i];
            }
        }
        self.is_absolute = false;
    }
}

/// Restricts sampling to a set of bones, e.g. an upper-body layer.
#[derive(Debug, Clone, Default)]
pub struct BoneMask {
    pub name: String,
    pub bones: FxHashSet<BoneNameHash>,
}

impl BoneMask {
    #[must_use]
    pub fn new(name: &str, bones: impl IntoIterator<Item = BoneNameHash>) -> Self {
        Self {
            name: name.to_owned(),
            bones: bones.into_iter().collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, bone: BoneNameHash) -> bool {
        self.bones.contains(&bone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Model {
        Model::new([
            ("root".to_owned(), None, LocalRigidTransform::new(Vec3::new(0.0, 1.0, 0.0), Quat::IDENTITY)),
            (
                "mid".to_owned(),
                Some(0),
                LocalRigidTransform::new(Vec3::Y, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2)),
            ),
            ("tip".to_owned(), Some(1), LocalRigidTransform::new(Vec3::Y, Quat::IDENTITY)),
        ])
    }

    #[test]
    fn absolute_then_relative_restores_pose() {
        let model = chain();
        let mut pose = Pose::default();
        model.get_relative_pose(&mut pose);
        let relative = pose.clone();

        pose.compute_absolute(&model);
        // The tip is rotated by the mid bone: +Y becomes -X.
        assert!((pose.positions[2] - Vec3::new(-1.0, 2.0, 0.0)).length() < 1e-5);

        pose.compute_relative(&model);
        for i in 0..3 {
            assert!((pose.positions[i] - relative.positions[i]).length() < 1e-5);
            assert!(pose.rotations[i].angle_between(relative.rotations[i]) < 1e-4);
        }
    }

    #[test]
    fn bone_lookup_by_hash() {
        let model = chain();
        assert_eq!(model.bone_index(StableHash::of_str("mid")), Some(1));
        assert_eq!(model.bone_index(StableHash::of_str("toe")), None);
    }
}
