use glam::{DQuat, DVec3, Mat4, Quat, Vec3};

/// World-space transform.
///
/// Position is double precision so that large worlds keep sub-millimeter
/// accuracy far from the origin; rotation and scale stay single precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub pos: DVec3,
    pub rot: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        pos: DVec3::ZERO,
        rot: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    #[must_use]
    pub const fn new(pos: DVec3, rot: Quat, scale: Vec3) -> Self {
        Self { pos, rot, scale }
    }

    /// Inverse transform. Exact for uniform scale.
    #[must_use]
    pub fn inverted(&self) -> Transform {
        let rot = self.rot.conjugate();
        let scale = Vec3::ONE / self.scale;
        let pos = rotate(rot, -self.pos) * scale.as_dvec3();
        Transform { pos, rot, scale }
    }

    /// Applies `self` to a point: scale, then rotate, then translate.
    #[must_use]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.pos + rotate(self.rot, point * self.scale.as_dvec3())
    }

    #[must_use]
    pub fn transform_vector(&self, v: DVec3) -> DVec3 {
        rotate(self.rot, v * self.scale.as_dvec3())
    }

    /// Builds a matrix relative to `base`, keeping the translation small
    /// enough for single precision.
    #[must_use]
    pub fn relative_matrix(&self, base: DVec3) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rot, (self.pos - base).as_vec3())
    }

    #[must_use]
    pub fn rigid_part(&self) -> RigidTransform {
        RigidTransform {
            pos: self.pos,
            rot: self.rot,
        }
    }
}

impl std::ops::Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        Transform {
            pos: self.transform_point(rhs.pos),
            rot: self.rot * rhs.rot,
            scale: self.scale * rhs.scale,
        }
    }
}

/// Rotation plus double-precision translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub pos: DVec3,
    pub rot: Quat,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self {
            pos: DVec3::ZERO,
            rot: Quat::IDENTITY,
        }
    }
}

impl RigidTransform {
    #[must_use]
    pub fn with_scale(self, scale: Vec3) -> Transform {
        Transform {
            pos: self.pos,
            rot: self.rot,
            scale,
        }
    }
}

/// Rotation plus single-precision translation, used for bone-local and
/// root-motion deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalRigidTransform {
    pub pos: Vec3,
    pub rot: Quat,
}

impl Default for LocalRigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LocalRigidTransform {
    pub const IDENTITY: LocalRigidTransform = LocalRigidTransform {
        pos: Vec3::ZERO,
        rot: Quat::IDENTITY,
    };

    #[must_use]
    pub const fn new(pos: Vec3, rot: Quat) -> Self {
        Self { pos, rot }
    }

    #[must_use]
    pub fn inverted(&self) -> LocalRigidTransform {
        let rot = self.rot.conjugate();
        LocalRigidTransform {
            pos: rot * -self.pos,
            rot,
        }
    }

    /// Position lerp plus normalized rotation lerp.
    #[must_use]
    pub fn interpolate(&self, rhs: &LocalRigidTransform, t: f32) -> LocalRigidTransform {
        LocalRigidTransform {
            pos: self.pos.lerp(rhs.pos, t),
            rot: nlerp(self.rot, rhs.rot, t),
        }
    }

    #[must_use]
    pub fn to_transform(&self) -> Transform {
        Transform {
            pos: self.pos.as_dvec3(),
            rot: self.rot,
            scale: Vec3::ONE,
        }
    }
}

impl std::ops::Mul for LocalRigidTransform {
    type Output = LocalRigidTransform;

    fn mul(self, rhs: LocalRigidTransform) -> LocalRigidTransform {
        LocalRigidTransform {
            pos: self.pos + self.rot * rhs.pos,
            rot: self.rot * rhs.rot,
        }
    }
}

/// Rotates a double-precision vector by a single-precision quaternion.
#[inline]
#[must_use]
pub fn rotate(rot: Quat, v: DVec3) -> DVec3 {
    DQuat::from_xyzw(
        f64::from(rot.x),
        f64::from(rot.y),
        f64::from(rot.z),
        f64::from(rot.w),
    ) * v
}

/// Normalized linear interpolation along the shortest arc.
#[inline]
#[must_use]
pub fn nlerp(a: Quat, b: Quat, t: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    let q = Quat::from_xyzw(
        a.x + (b.x - a.x) * t,
        a.y + (b.y - a.y) * t,
        a.z + (b.z - a.z) * t,
        a.w + (b.w - a.w) * t,
    );
    q.normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-5;

    #[test]
    fn transform_inverse_cancels() {
        let tr = Transform::new(
            DVec3::new(3.0, -2.0, 7.5),
            Quat::from_rotation_y(0.7),
            Vec3::splat(2.0),
        );
        let id = tr * tr.inverted();
        assert!(id.pos.length() < EPSILON);
        assert!(id.rot.angle_between(Quat::IDENTITY) < 1e-4);
        assert!((id.scale - Vec3::ONE).length() < 1e-5);
    }

    #[test]
    fn transform_point_applies_scale_then_rotation() {
        let tr = Transform::new(
            DVec3::new(1.0, 0.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            Vec3::splat(2.0),
        );
        let p = tr.transform_point(DVec3::X);
        assert!((p - DVec3::new(1.0, 2.0, 0.0)).length() < EPSILON);
    }

    #[test]
    fn local_rigid_inverse_cancels() {
        let tr = LocalRigidTransform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_x(1.1));
        let id = tr.inverted() * tr;
        assert!(id.pos.length() < 1e-5);
        assert!(id.rot.angle_between(Quat::IDENTITY) < 1e-4);
    }

    #[test]
    fn nlerp_takes_short_arc() {
        let a = Quat::from_rotation_y(0.1);
        let b = -Quat::from_rotation_y(0.3);
        let mid = nlerp(a, b, 0.5);
        assert!(mid.angle_between(Quat::from_rotation_y(0.2)) < 1e-3);
    }
}
