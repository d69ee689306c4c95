use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Result, Time};

use super::{DeserializeContext, NodeBase, relative_root_motion, sample_pose_relative};
use crate::model::Pose;
use crate::runtime::RuntimeContext;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Blend2DChild {
    /// Point in input space at which this child plays alone.
    pub value: Vec2,
    pub slot: u32,
}

/// One triangle of the Delaunay triangulation of the children.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub circumcircle_center: Vec2,
}

/// Children of the triangle containing the input, with barycentric
/// weights.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blend2DActiveTrio {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub ta: f32,
    pub tb: f32,
    pub tc: f32,
}

impl Blend2DActiveTrio {
    const FIRST_CHILD: Self = Self {
        a: 0,
        b: 0,
        c: 0,
        ta: 1.0,
        tb: 0.0,
        tc: 0.0,
    };
}

/// Barycentric coordinates of `p` relative to `b` and `c`, if `p` lies in
/// the triangle.
fn barycentric(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Option<Vec2> {
    let (ab, ac, ap) = (b - a, c - a, p - a);
    let d00 = ab.dot(ab);
    let d01 = ab.dot(ac);
    let d11 = ac.dot(ac);
    let d20 = ap.dot(ab);
    let d21 = ap.dot(ac);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f32::EPSILON {
        return None;
    }
    let uv = Vec2::new((d11 * d20 - d01 * d21) / denom, (d00 * d21 - d01 * d20) / denom);
    (uv.x >= 0.0 && uv.y >= 0.0 && uv.x + uv.y <= 1.0).then_some(uv)
}

fn circumcircle_center(a: Vec2, b: Vec2, c: Vec2) -> Vec2 {
    let dab = b - a;
    let dac = c - a;
    let v = dac * dab.length_squared() - dab * dac.length_squared();
    let cross = dab.x * dac.y - dab.y * dac.x;
    a + Vec2::new(v.y, -v.x) / (2.0 * cross)
}

/// Bowyer-Watson triangulation of `points`.
fn triangulate(points: &[Vec2]) -> Vec<Triangle> {
    if points.len() < 3 {
        return Vec::new();
    }
    let (min, max) = points
        .iter()
        .fold((Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    let extent = (max - min).max_element();
    if extent <= 0.0 {
        return Vec::new();
    }

    // Enclosing triangle, removed again at the end.
    let mid = (max + min) * 0.5;
    let mut points = points.to_vec();
    let count = points.len();
    points.push(Vec2::new(mid.x - 20.0 * extent, mid.y - extent));
    points.push(Vec2::new(mid.x, mid.y + 20.0 * extent));
    points.push(Vec2::new(mid.x + 20.0 * extent, mid.y - extent));

    let make = |a: usize, b: usize, c: usize| Triangle {
        a,
        b,
        c,
        circumcircle_center: circumcircle_center(points[a], points[b], points[c]),
    };
    let n = points.len();
    let mut triangles = vec![make(n - 1, n - 2, 0), make(n - 2, n - 3, 0), make(n - 3, n - 1, 0)];

    let mut edges: Vec<(usize, usize, bool)> = Vec::with_capacity(8);
    for (i, &p) in points.iter().enumerate().take(count).skip(1) {
        edges.clear();
        for ti in (0..triangles.len()).rev() {
            let t = triangles[ti];
            let center = t.circumcircle_center;
            if (p - center).length_squared() > (points[t.a] - center).length_squared() {
                continue;
            }
            edges.extend([(t.a, t.b, true), (t.b, t.c, true), (t.c, t.a, true)]);
            triangles.swap_remove(ti);
        }

        // Edges shared by two removed triangles are interior to the hole.
        for e in (1..edges.len()).rev() {
            for f in (0..e).rev() {
                let (ea, eb, _) = edges[e];
                let (fa, fb, _) = edges[f];
                if (ea == fa && eb == fb) || (ea == fb && eb == fa) {
                    edges[e].2 = false;
                    edges[f].2 = false;
                }
            }
        }

        for &(a, b, valid) in &edges {
            if valid {
                triangles.push(make(a, b, i));
            }
        }
    }

    triangles.retain(|t| t.a < count && t.b < count && t.c < count);
    triangles
}

/// Blends clips placed on a 2D input plane.
///
/// Runtime state: playback position as a fraction of the blended length.
#[derive(Debug, Clone, Default)]
pub struct Blend2DNode {
    pub base: NodeBase,
    pub x_input: u32,
    pub y_input: u32,
    children: Vec<Blend2DChild>,
    triangles: Vec<Triangle>,
}

impl Blend2DNode {
    #[must_use]
    pub fn new(x_input: u32, y_input: u32, children: Vec<Blend2DChild>) -> Self {
        let mut node = Self {
            base: NodeBase::default(),
            x_input,
            y_input,
            children: Vec::new(),
            triangles: Vec::new(),
        };
        node.set_children(children);
        node
    }

    #[must_use]
    pub fn children(&self) -> &[Blend2DChild] {
        &self.children
    }

    /// Replaces the children and rebuilds the triangulation.
    pub fn set_children(&mut self, children: Vec<Blend2DChild>) {
        self.children = children;
        let points: Vec<Vec2> = self.children.iter().map(|c| c.value).collect();
        self.triangles = triangulate(&points);
    }

    #[must_use]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// The first triangle containing `input`; the first child alone when
    /// none does.
    #[must_use]
    pub fn active_trio(&self, input: Vec2) -> Blend2DActiveTrio {
        self.triangles
            .iter()
            .find_map(|t| {
                let uv = barycentric(
                    input,
                    self.children[t.a].value,
                    self.children[t.b].value,
                    self.children[t.c].value,
                )?;
                Some(Blend2DActiveTrio {
                    a: t.a,
                    b: t.b,
                    c: t.c,
                    ta: 1.0 - uv.x - uv.y,
                    tb: uv.x,
                    tc: uv.y,
                })
            })
            .unwrap_or(Blend2DActiveTrio::FIRST_CHILD)
    }

    fn trio(&self, ctx: &RuntimeContext) -> Blend2DActiveTrio {
        self.active_trio(Vec2::new(ctx.input_f32(self.x_input), ctx.input_f32(self.y_input)))
    }

    fn slots(&self, trio: &Blend2DActiveTrio) -> [u32; 3] {
        [
            self.children[trio.a].slot,
            self.children[trio.b].slot,
            self.children[trio.c].slot,
        ]
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        ctx.data.write(&0.0_f32);
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        let relt0: f32 = ctx.input_runtime.read();
        if self.children.is_empty() {
            ctx.data.write(&relt0);
            return LocalRigidTransform::IDENTITY;
        }

        let trio = self.trio(ctx);
        let [slot_a, slot_b, slot_c] = self.slots(&trio);
        let (Some(anim_a), Some(anim_b), Some(anim_c)) =
            (ctx.animation(slot_a), ctx.animation(slot_b), ctx.animation(slot_c))
        else {
            ctx.data.write(&relt0);
            return LocalRigidTransform::IDENTITY;
        };

        let weighted_len = anim_a.length() * trio.ta + anim_b.length() * trio.tb + anim_c.length() * trio.tc;
        let relt = (relt0 + ctx.time_delta / weighted_len) % 1.0;

        let root = ctx.root_bone_hash;
        let mut motion = relative_root_motion(&anim_a, relt0, relt, root);
        if trio.tb > 0.0 {
            let motion_b = relative_root_motion(&anim_b, relt0, relt, root);
            motion = motion.interpolate(&motion_b, trio.tb / (trio.ta + trio.tb));
        }
        if trio.tc > 0.0 {
            let motion_c = relative_root_motion(&anim_c, relt0, relt, root);
            motion = motion.interpolate(&motion_c, trio.tc);
        }

        ctx.data.write(&relt);
        motion
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        ctx.input_runtime.skip(std::mem::size_of::<f32>());
    }

    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose, mask: u32) {
        let t: f32 = ctx.input_runtime.read();
        if self.children.is_empty() {
            return;
        }
        let trio = self.trio(ctx);
        let [slot_a, slot_b, slot_c] = self.slots(&trio);
        sample_pose_relative(ctx, t, weight, slot_a, pose, mask);
        if trio.tb > 0.0 {
            sample_pose_relative(ctx, t, weight * trio.tb, slot_b, pose, mask);
        }
        if trio.tc > 0.0 {
            sample_pose_relative(ctx, t, weight * trio.tc, slot_c, pose, mask);
        }
    }

    pub(super) fn length(&self, ctx: &RuntimeContext) -> Time {
        if self.children.is_empty() {
            return Time::ONE_SECOND;
        }
        let trio = self.trio(ctx);
        let [slot_a, slot_b, slot_c] = self.slots(&trio);
        match (ctx.animation(slot_a), ctx.animation(slot_b), ctx.animation(slot_c)) {
            (Some(a), Some(b), Some(c)) => a.length() * trio.ta + b.length() * trio.tb + c.length() * trio.tc,
            _ => Time::ONE_SECOND,
        }
    }

    pub(super) fn time(&self, ctx: &RuntimeContext) -> Time {
        self.length(ctx) * ctx.input_runtime.peek::<f32>()
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write(&self.x_input);
        stream.write(&self.y_input);
        stream.write_array(&self.children);
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let x_input = stream.read()?;
        let y_input = stream.read()?;
        let mut node = Self {
            base,
            x_input,
            y_input,
            children: Vec::new(),
            triangles: Vec::new(),
        };
        node.set_children(stream.read_array()?);
        Ok(node)
    }
}
