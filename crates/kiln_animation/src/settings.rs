//! Animation module configuration.

use crate::controller::{MAX_IK_BONES, MAX_IK_CHAINS};

/// Tuning knobs of the [`AnimationModule`](crate::module::AnimationModule).
///
/// # Example
///
/// ```rust,ignore
/// use kiln_animation::AnimationSettings;
///
/// // Deterministic single-threaded stepping for a replay tool
/// let replay = AnimationSettings {
///     parallel: false,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationSettings {
    /// Run the animable and animator phases on the rayon pool.
    ///
    /// When `false` every entity is updated on the calling thread, in
    /// component creation order.
    pub parallel: bool,

    /// IK chains solved per animator. Targets beyond this are ignored.
    pub max_ik_chains: usize,

    /// Longest IK chain solved. Longer chains are skipped.
    pub max_ik_bones: usize,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            max_ik_chains: MAX_IK_CHAINS,
            max_ik_bones: MAX_IK_BONES,
        }
    }
}
