/// Keyframed curve driving one scalar property of one component type.
#[derive(Debug, Clone, Default)]
pub struct Curve {
    /// Component type name, e.g. `"transform"`.
    pub component: String,
    /// Property name within the component, e.g. `"Position X"`.
    pub property: String,
    /// Ascending frame numbers.
    pub frames: Vec<i32>,
    pub values: Vec<f32>,
}

impl Curve {
    /// Linearly interpolated value at `frame`, `None` if the curve has fewer
    /// than two keys or `frame` is past the last key.
    #[must_use]
    pub fn value_at(&self, frame: i32) -> Option<f32> {
        if self.frames.len() < 2 {
            return None;
        }
        let i = (1..self.frames.len()).find(|&i| frame <= self.frames[i])?;
        let (f0, f1) = (self.frames[i - 1], self.frames[i]);
        let t = if f1 == f0 { 1.0 } else { (frame - f0) as f32 / (f1 - f0) as f32 };
        Some(self.values[i] * t + self.values[i - 1] * (1.0 - t))
    }
}

/// Animation of component properties, sampled at a fixed frame rate.
#[derive(Debug, Clone)]
pub struct PropertyAnimation {
    pub fps: f32,
    pub curves: Vec<Curve>,
}

impl Default for PropertyAnimation {
    fn default() -> Self {
        Self {
            fps: 30.0,
            curves: Vec::new(),
        }
    }
}

impl PropertyAnimation {
    /// Frame for `time` seconds, wrapped by the last frame of the first
    /// curve. `None` when there is nothing to play.
    #[must_use]
    pub fn frame_at(&self, time: f32) -> Option<i32> {
        let last = *self.curves.first()?.frames.last()?;
        let frame = (time * self.fps + 0.5) as i32;
        Some(if last > 0 { frame.rem_euclid(last) } else { frame })
    }

    /// Values of every curve at `time`.
    pub fn sample(&self, time: f32) -> impl Iterator<Item = (&Curve, f32)> + '_ {
        let frame = self.frame_at(time);
        self.curves
            .iter()
            .filter_map(move |curve| Some((curve, curve.value_at(frame?)?)))
    }
}
