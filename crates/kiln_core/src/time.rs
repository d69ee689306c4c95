//! Fixed-point animation time.
//!
//! Animation state stores time as an unsigned 32-bit count of
//! `1 / 32768` second ticks. The fixed-point representation keeps runtime
//! buffers compact and makes tick accumulation exact, so splitting one frame
//! into two half frames lands on exactly the same time.

use std::ops::{Add, AddAssign, Div, Mul, Rem, Sub, SubAssign};

use bytemuck::{Pod, Zeroable};

/// A point in time (or a duration) in fixed-point ticks.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct Time(u32);

impl Time {
    /// Number of ticks in one second.
    pub const ONE_SECOND_RAW: u32 = 1 << 15;
    pub const ZERO: Time = Time(0);
    pub const ONE_SECOND: Time = Time(Self::ONE_SECOND_RAW);

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Converts seconds to ticks. Negative input saturates to zero.
    #[inline]
    #[must_use]
    pub fn from_seconds(seconds: f32) -> Self {
        Self((f64::from(seconds) * f64::from(Self::ONE_SECOND_RAW)) as u32)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn seconds(self) -> f32 {
        (f64::from(self.0) / f64::from(Self::ONE_SECOND_RAW)) as f32
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Ratio of two durations. Dividing by a zero duration yields `0.0`.
    #[inline]
    #[must_use]
    pub fn ratio(self, rhs: Time) -> f32 {
        if rhs.0 == 0 {
            return 0.0;
        }
        (f64::from(self.0) / f64::from(rhs.0)) as f32
    }

    /// Linear interpolation between two durations.
    #[inline]
    #[must_use]
    pub fn lerp(a: Time, b: Time, t: f32) -> Time {
        let a = f64::from(a.0);
        let b = f64::from(b.0);
        Time((a + (b - a) * f64::from(t)) as u32)
    }
}

impl Add for Time {
    type Output = Time;

    #[inline]
    fn add(self, rhs: Time) -> Time {
        Time(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Time {
    #[inline]
    fn add_assign(&mut self, rhs: Time) {
        *self = *self + rhs;
    }
}

impl Sub for Time {
    type Output = Time;

    /// Saturates at zero.
    #[inline]
    fn sub(self, rhs: Time) -> Time {
        Time(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Time {
    #[inline]
    fn sub_assign(&mut self, rhs: Time) {
        *self = *self - rhs;
    }
}

impl Rem for Time {
    type Output = Time;

    /// Wraps into `[0, rhs)`. A zero-length modulus yields zero.
    #[inline]
    fn rem(self, rhs: Time) -> Time {
        if rhs.0 == 0 {
            return Time::ZERO;
        }
        Time(self.0 % rhs.0)
    }
}

impl Mul<f32> for Time {
    type Output = Time;

    #[inline]
    fn mul(self, rhs: f32) -> Time {
        Time((f64::from(self.0) * f64::from(rhs)) as u32)
    }
}

impl Div<Time> for Time {
    type Output = f32;

    #[inline]
    fn div(self, rhs: Time) -> f32 {
        self.ratio(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_trip() {
        let t = Time::from_seconds(1.5);
        assert_eq!(t.raw(), Time::ONE_SECOND_RAW * 3 / 2);
        assert!((t.seconds() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn negative_seconds_saturate() {
        assert_eq!(Time::from_seconds(-2.0), Time::ZERO);
        assert_eq!(Time::ONE_SECOND * -1.0, Time::ZERO);
    }

    #[test]
    fn half_steps_sum_to_whole() {
        let half = Time::from_seconds(0.25);
        assert_eq!(half + half, Time::from_seconds(0.5));
    }

    #[test]
    fn rem_by_zero_is_zero() {
        assert_eq!(Time::ONE_SECOND % Time::ZERO, Time::ZERO);
        assert_eq!(Time::from_seconds(2.5) % Time::ONE_SECOND, Time::from_seconds(0.5));
    }

    #[test]
    fn ratio_guards_zero() {
        assert_eq!(Time::ONE_SECOND / Time::ZERO, 0.0);
        assert!((Time::ONE_SECOND / Time::from_seconds(2.0) - 0.5).abs() < 1e-6);
    }
}
