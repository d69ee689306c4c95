use bytemuck::Pod;
use glam::{Quat, Vec3, Vec4};
use kiln_core::math::nlerp;
use kiln_core::{InputMemoryStream, KilnError, OutputMemoryStream, Result};

/// Values a keyframe track can blend between.
pub trait Interpolatable: Copy {
    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self;

    /// Cubic Hermite interpolation with tangents scaled by the key spacing.
    fn interpolate_cubic(v0: Self, out_tangent0: Self, in_tangent1: Self, v1: Self, t: f32, dt: f32) -> Self;
}

/// Hermite basis weights `(v0, m0, v1, m1)` at `t`.
#[inline]
fn hermite_weights(t: f32) -> (f32, f32, f32, f32) {
    let t2 = t * t;
    let t3 = t2 * t;
    let s2 = -2.0 * t3 + 3.0 * t2;
    let s3 = t3 - t2;
    (1.0 - s2, s3 - t2 + t, s2, s3)
}

impl Interpolatable for f32 {
    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self {
        start + (end - start) * t
    }

    fn interpolate_cubic(v0: Self, out_tangent0: Self, in_tangent1: Self, v1: Self, t: f32, dt: f32) -> Self {
        let (s0, s1, s2, s3) = hermite_weights(t);
        s0 * v0 + s1 * out_tangent0 * dt + s2 * v1 + s3 * in_tangent1 * dt
    }
}

impl Interpolatable for Vec3 {
    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self {
        start.lerp(end, t)
    }

    fn interpolate_cubic(v0: Self, out_tangent0: Self, in_tangent1: Self, v1: Self, t: f32, dt: f32) -> Self {
        let (s0, s1, s2, s3) = hermite_weights(t);
        v0 * s0 + out_tangent0 * (s1 * dt) + v1 * s2 + in_tangent1 * (s3 * dt)
    }
}

impl Interpolatable for Quat {
    fn interpolate_linear(start: Self, end: Self, t: f32) -> Self {
        nlerp(start, end, t)
    }

    fn interpolate_cubic(v0: Self, out_tangent0: Self, in_tangent1: Self, v1: Self, t: f32, dt: f32) -> Self {
        let (s0, s1, s2, s3) = hermite_weights(t);
        let v = Vec4::from(v0) * s0
            + Vec4::from(out_tangent0) * (s1 * dt)
            + Vec4::from(v1) * s2
            + Vec4::from(in_tangent1) * (s3 * dt);
        Quat::from_vec4(v).normalize()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InterpolationMode {
    Linear = 0,
    Step = 1,
    /// Values are stored as `(in_tangent, value, out_tangent)` triples.
    CubicSpline = 2,
}

impl InterpolationMode {
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Linear),
            1 => Some(Self::Step),
            2 => Some(Self::CubicSpline),
            _ => None,
        }
    }

    fn values_per_key(self) -> usize {
        match self {
            Self::CubicSpline => 3,
            Self::Linear | Self::Step => 1,
        }
    }
}

/// Keyframes of one animated channel. Key times are in seconds, ascending.
#[derive(Debug, Clone)]
pub struct KeyframeTrack<T: Interpolatable> {
    pub times: Vec<f32>,
    pub values: Vec<T>,
    pub interpolation: InterpolationMode,
}

impl<T: Interpolatable> KeyframeTrack<T> {
    #[must_use]
    pub fn new(times: Vec<f32>, values: Vec<T>, interpolation: InterpolationMode) -> Self {
        debug_assert_eq!(
            values.len(),
            times.len() * interpolation.values_per_key(),
            "keyframe value count does not match key count"
        );
        Self {
            times,
            values,
            interpolation,
        }
    }

    #[must_use]
    pub fn linear(times: Vec<f32>, values: Vec<T>) -> Self {
        Self::new(times, values, InterpolationMode::Linear)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    fn value_at(&self, index: usize) -> T {
        match self.interpolation {
            InterpolationMode::CubicSpline => self.values[index * 3 + 1],
            _ => self.values[index],
        }
    }

    /// Samples the track at `time` seconds, clamping outside the key range.
    /// Empty tracks yield `None`.
    #[must_use]
    pub fn sample(&self, time: f32) -> Option<T> {
        let len = self.times.len();
        if len == 0 {
            return None;
        }
        // First key strictly after `time`.
        let next = self.times.partition_point(|&t| t <= time);
        if next == 0 {
            return Some(self.value_at(0));
        }
        if next >= len {
            return Some(self.value_at(len - 1));
        }

        let index = next - 1;
        let t0 = self.times[index];
        let dt = self.times[next] - t0;
        let t = if dt > 1e-6 { ((time - t0) / dt).clamp(0.0, 1.0) } else { 0.0 };

        Some(match self.interpolation {
            InterpolationMode::Step => self.value_at(index),
            InterpolationMode::Linear => T::interpolate_linear(self.value_at(index), self.value_at(next), t),
            InterpolationMode::CubicSpline => {
                let prev = index * 3;
                let next = next * 3;
                T::interpolate_cubic(
                    self.values[prev + 1],
                    self.values[prev + 2],
                    self.values[next],
                    self.values[next + 1],
                    t,
                    dt,
                )
            }
        })
    }
}

impl<T: Interpolatable + Pod> KeyframeTrack<T> {
    pub fn serialize(&self, stream: &mut OutputMemoryStream) {
        stream.write(&(self.interpolation as u32));
        stream.write_array(&self.times);
        stream.write_array(&self.values);
    }

    pub fn deserialize(stream: &mut InputMemoryStream<'_>) -> Result<Self> {
        let raw = stream.read::<u32>()?;
        let interpolation = InterpolationMode::from_raw(raw)
            .ok_or_else(|| KilnError::InvalidData(format!("unknown interpolation mode {raw}")))?;
        let times = stream.read_array::<f32>()?;
        let values = stream.read_array::<T>()?;
        if values.len() != times.len() * interpolation.values_per_key() {
            return Err(KilnError::InvalidData(format!(
                "{} keyframe values for {} keys",
                values.len(),
                times.len()
            )));
        }
        Ok(Self {
            times,
            values,
            interpolation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_sample_clamps_and_blends() {
        let track = KeyframeTrack::linear(vec![0.0, 1.0], vec![Vec3::ZERO, Vec3::X * 2.0]);
        assert_eq!(track.sample(-1.0), Some(Vec3::ZERO));
        assert_eq!(track.sample(0.5), Some(Vec3::X));
        assert_eq!(track.sample(3.0), Some(Vec3::X * 2.0));
    }

    #[test]
    fn step_holds_previous_key() {
        let track = KeyframeTrack::new(vec![0.0, 1.0], vec![1.0f32, 5.0], InterpolationMode::Step);
        assert_eq!(track.sample(0.99), Some(1.0));
        assert_eq!(track.sample(1.0), Some(5.0));
    }

    #[test]
    fn cubic_hits_keys() {
        let track = KeyframeTrack::new(
            vec![0.0, 1.0],
            vec![0.0f32, 1.0, 0.0, 0.0, 3.0, 0.0],
            InterpolationMode::CubicSpline,
        );
        assert!((track.sample(0.0).unwrap() - 1.0).abs() < 1e-6);
        assert!((track.sample(1.0).unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn empty_track_has_no_value() {
        let track = KeyframeTrack::<f32>::linear(Vec::new(), Vec::new());
        assert_eq!(track.sample(0.0), None);
    }
}
