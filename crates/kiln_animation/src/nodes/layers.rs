use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Result};

use super::{DeserializeContext, Node, NodeBase};
use crate::model::Pose;
use crate::runtime::RuntimeContext;

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    /// Index into the controller's bone masks, `u32::MAX` for the whole
    /// skeleton.
    pub mask: u32,
    pub node: Node,
}

impl Layer {
    #[must_use]
    pub fn new(name: &str, mask: u32, node: Node) -> Self {
        Self {
            name: name.to_owned(),
            mask,
            node,
        }
    }
}

/// Plays every layer at once; later layers are sampled over earlier ones
/// through their bone masks. Only the first layer drives root motion.
#[derive(Debug, Clone, Default)]
pub struct LayersNode {
    pub base: NodeBase,
    pub layers: Vec<Layer>,
}

impl LayersNode {
    #[must_use]
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            base: NodeBase::default(),
            layers,
        }
    }

    pub(super) fn enter(&self, ctx: &mut RuntimeContext) {
        for layer in &self.layers {
            layer.node.enter(ctx);
        }
    }

    pub(super) fn update(&self, ctx: &mut RuntimeContext) -> LocalRigidTransform {
        let mut root_motion = LocalRigidTransform::IDENTITY;
        for (i, layer) in self.layers.iter().enumerate() {
            let motion = layer.node.update(ctx);
            if i == 0 {
                root_motion = motion;
            }
        }
        root_motion
    }

    pub(super) fn skip(&self, ctx: &mut RuntimeContext) {
        for layer in &self.layers {
            layer.node.skip(ctx);
        }
    }

    /// The mask handed down by the parent is replaced by each layer's own.
    pub(super) fn get_pose(&self, ctx: &mut RuntimeContext, weight: f32, pose: &mut Pose) {
        for layer in &self.layers {
            layer.node.get_pose(ctx, weight, pose, layer.mask);
        }
    }

    pub(super) fn serialize(&self, stream: &mut OutputMemoryStream) {
        self.base.serialize(stream);
        stream.write(&(self.layers.len() as u32));
        for layer in &self.layers {
            stream.write_string(&layer.name);
            stream.write(&layer.mask);
            layer.node.serialize_tagged(stream);
        }
    }

    pub(super) fn deserialize(stream: &mut InputMemoryStream<'_>, ctx: &DeserializeContext<'_>) -> Result<Self> {
        let base = NodeBase::deserialize(stream, ctx)?;
        let count = stream.read::<u32>()?;
        let mut layers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = stream.read_string()?;
            let mask = stream.read()?;
            let node = Node::deserialize_tagged(stream, ctx)?;
            layers.push(Layer { name, mask, node });
        }
        Ok(Self { base, layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerVersion;
    use crate::nodes::AnimationNode;
    use crate::nodes::test_support::{EPSILON, runtime, tick, walk};

    fn two_layers() -> LayersNode {
        LayersNode::new(vec![
            Layer::new("base", u32::MAX, AnimationNode::looped(0).into()),
            Layer::new("upper", 0, AnimationNode::looped(1).into()),
        ])
    }

    #[test]
    fn first_layer_drives_root_motion() {
        let mut ctx = runtime(two_layers().into(), vec![], vec![walk(1.0, 1.0), walk(1.0, 5.0)]);
        let rm = tick(&mut ctx, 0.25);
        assert!((rm.pos.z - 0.25).abs() < EPSILON);
        // Both layers keep their own playback time.
        assert_eq!(ctx.data.len(), 2 * std::mem::size_of::<kiln_core::Time>());
    }

    #[test]
    fn layer_names_and_masks_survive_serialization() {
        let mut node = two_layers();
        node.base = NodeBase::named("body");
        let mut stream = OutputMemoryStream::new();
        node.serialize(&mut stream);

        let ctx = DeserializeContext {
            inputs: &[],
            version: ControllerVersion::Latest as u32,
        };
        let mut input = InputMemoryStream::new(stream.data());
        let read = LayersNode::deserialize(&mut input, &ctx).unwrap();
        assert!(input.is_at_end());
        assert_eq!(read.base.name, "body");
        assert_eq!(read.layers.len(), 2);
        assert_eq!(read.layers[1].name, "upper");
        assert_eq!(read.layers[1].mask, 0);
        assert_eq!(read.layers[0].mask, u32::MAX);
    }
}
