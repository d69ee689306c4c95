//! Animation controllers.
//!
//! A [`Controller`] is the shared, immutable-at-runtime description of an
//! animated character: the blend tree, the typed inputs the tree reads, the
//! animation slots it samples, the sets binding clips to slots, bone masks
//! for layering and IK chain definitions. Each animator owns a
//! [`RuntimeContext`] created from it.
//!
//! # Format
//!
//! ```text
//! u32 magic, u32 version
//! string root motion bone
//! u32 count, { string name, u32 type }        inputs
//! u32 count, { string name }                  slots
//! u32 count, { u32 set, u32 slot, string path } animation entries
//! u32 count, { string name, u32 n, u64 bone[n] } bone masks
//! u32 count, { u32 max_iterations, u32 n, u64 bone[n] } IK chains
//! bool has_root, [u32 type, node]
//! ```

use std::sync::Arc;

use kiln_core::{InputMemoryStream, KilnError, OutputMemoryStream, Path, Result, StableHash};
use smallvec::SmallVec;

use crate::animation::Animation;
use crate::input::{InputDecl, InputType, find_input};
use crate::model::{BoneMask, BoneNameHash, Pose};
use crate::nodes::{DeserializeContext, Node};
use crate::resource::{ResourceManager, ResourceRef};
use crate::runtime::RuntimeContext;

const MAGIC: u32 = u32::from_le_bytes(*b"KCTL");

/// Most IK chains a controller may define.
pub const MAX_IK_CHAINS: usize = 4;
/// Most bones in one IK chain.
pub const MAX_IK_BONES: usize = 32;

/// Controller format versions. A field introduced after a version is read
/// only from data newer than that version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ControllerVersion {
    First = 0,
    /// Last version without group child flags and explicit transitions.
    Transitions = 1,
    /// Last version without node event blobs.
    Events = 2,
    Latest = 3,
}

/// Binds an animation to a slot within one set.
#[derive(Debug, Clone)]
pub struct AnimationEntry {
    pub set: u32,
    pub slot: u32,
    pub animation: ResourceRef<Animation>,
}

/// An IK chain, listed from the chain root to the end effector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IkDef {
    pub bones: SmallVec<[BoneNameHash; 8]>,
    pub max_iterations: u32,
}

#[derive(Debug, Default)]
pub struct Controller {
    root: Option<Box<Node>>,
    inputs: Vec<InputDecl>,
    animation_slots: Vec<String>,
    animation_entries: Vec<AnimationEntry>,
    bone_masks: Vec<BoneMask>,
    ik: Vec<IkDef>,
    root_motion_bone_name: String,
    root_motion_bone: Option<BoneNameHash>,
}

impl Controller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Authoring
    // ========================================================================

    /// Declares an input and returns its index.
    pub fn add_input(&mut self, name: &str, ty: InputType) -> u32 {
        self.inputs.push(InputDecl::new(name, ty));
        (self.inputs.len() - 1) as u32
    }

    pub fn add_animation_slot(&mut self, name: &str) -> u32 {
        self.animation_slots.push(name.to_owned());
        (self.animation_slots.len() - 1) as u32
    }

    /// Binds `animation` to `slot` in `set`. The controller takes over the
    /// reference; it is released by [`Controller::release_animations`].
    pub fn add_animation(&mut self, set: u32, slot: u32, animation: ResourceRef<Animation>) {
        debug_assert!((slot as usize) < self.animation_slots.len(), "unknown slot {slot}");
        self.animation_entries.push(AnimationEntry { set, slot, animation });
    }

    pub fn add_bone_mask(&mut self, mask: BoneMask) -> u32 {
        self.bone_masks.push(mask);
        (self.bone_masks.len() - 1) as u32
    }

    /// Adds an IK chain. Returns `None` when the controller already has
    /// [`MAX_IK_CHAINS`] chains.
    pub fn add_ik(&mut self, bones: &[&str], max_iterations: u32) -> Option<u32> {
        if self.ik.len() >= MAX_IK_CHAINS {
            log::warn!("Controller already has {MAX_IK_CHAINS} IK chains");
            return None;
        }
        debug_assert!(bones.len() <= MAX_IK_BONES, "IK chain too long");
        self.ik.push(IkDef {
            bones: bones.iter().take(MAX_IK_BONES).map(|b| StableHash::of_str(b)).collect(),
            max_iterations,
        });
        Some((self.ik.len() - 1) as u32)
    }

    pub fn set_root_motion_bone(&mut self, bone: Option<&str>) {
        let name = bone.unwrap_or_default();
        name.clone_into(&mut self.root_motion_bone_name);
        self.root_motion_bone = (!name.is_empty()).then(|| StableHash::of_str(name));
    }

    pub fn set_root(&mut self, root: impl Into<Node>) {
        self.root = Some(Box::new(root.into()));
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn root(&self) -> Option<&Node> {
        self.root.as_deref()
    }

    #[must_use]
    pub fn inputs(&self) -> &[InputDecl] {
        &self.inputs
    }

    #[must_use]
    pub fn input_index(&self, name: &str) -> Option<u32> {
        find_input(&self.inputs, name).map(|i| i as u32)
    }

    #[must_use]
    pub fn animation_slots(&self) -> &[String] {
        &self.animation_slots
    }

    #[must_use]
    pub fn animation_entries(&self) -> &[AnimationEntry] {
        &self.animation_entries
    }

    #[must_use]
    pub fn bone_masks(&self) -> &[BoneMask] {
        &self.bone_masks
    }

    #[must_use]
    pub fn ik(&self) -> &[IkDef] {
        &self.ik
    }

    #[must_use]
    pub fn root_motion_bone(&self) -> Option<BoneNameHash> {
        self.root_motion_bone
    }

    // ========================================================================
    // Runtime
    // ========================================================================

    /// Creates a runtime with `set` bound and the tree entered.
    #[must_use]
    pub fn create_runtime(self: &Arc<Self>, set: u32) -> RuntimeContext {
        let mut ctx = RuntimeContext::new(Arc::clone(self), set);
        if let Some(root) = self.root.as_deref() {
            root.enter(&mut ctx);
        }
        log::debug!("Created animation runtime ({} bytes of node state)", ctx.data.len());
        ctx
    }

    /// Advances the tree by `ctx.time_delta`. Root motion and events of the
    /// tick are left in `ctx`.
    pub fn update(&self, ctx: &mut RuntimeContext) {
        ctx.input_runtime.take_from(&mut ctx.data);
        ctx.events.clear();
        ctx.root_motion = kiln_core::LocalRigidTransform::IDENTITY;
        let Some(root) = self.root.as_deref() else {
            return;
        };
        ctx.root_motion = root.update(ctx);
        if !ctx.input_runtime.is_at_end() {
            log::error!(
                "Animation runtime misaligned: {} state bytes left after {} consumed",
                ctx.input_runtime.remaining(),
                ctx.input_runtime.position()
            );
        }
    }

    /// Samples the state written by the last [`Controller::update`] into
    /// `pose`.
    pub fn get_pose(&self, ctx: &mut RuntimeContext, pose: &mut Pose) {
        let Some(root) = self.root.as_deref() else {
            return;
        };
        ctx.input_runtime.copy_from(ctx.data.data());
        root.get_pose(ctx, 1.0, pose, u32::MAX);
    }

    /// Drops the references this controller took on its animations.
    pub fn release_animations(&self, animations: &ResourceManager<Animation>) {
        for entry in &self.animation_entries {
            animations.unload(&entry.animation);
        }
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    pub fn serialize(&self, stream: &mut OutputMemoryStream) {
        stream.write(&MAGIC);
        stream.write(&(ControllerVersion::Latest as u32));
        stream.write_string(&self.root_motion_bone_name);

        stream.write(&(self.inputs.len() as u32));
        for input in &self.inputs {
            stream.write_string(&input.name);
            stream.write(&(input.ty as u32));
        }

        stream.write(&(self.animation_slots.len() as u32));
        for slot in &self.animation_slots {
            stream.write_string(slot);
        }

        stream.write(&(self.animation_entries.len() as u32));
        for entry in &self.animation_entries {
            stream.write(&entry.set);
            stream.write(&entry.slot);
            stream.write_string(entry.animation.path().as_str());
        }

        stream.write(&(self.bone_masks.len() as u32));
        for mask in &self.bone_masks {
            stream.write_string(&mask.name);
            let mut bones: Vec<BoneNameHash> = mask.bones.iter().copied().collect();
            bones.sort_unstable();
            stream.write_array(&bones);
        }

        stream.write(&(self.ik.len() as u32));
        for ik in &self.ik {
            stream.write(&ik.max_iterations);
            stream.write_array(&ik.bones);
        }

        stream.write_bool(self.root.is_some());
        if let Some(root) = &self.root {
            root.serialize_tagged(stream);
        }
    }

    /// Reads a controller, loading every referenced animation through
    /// `animations`.
    pub fn deserialize(stream: &mut InputMemoryStream<'_>, animations: &ResourceManager<Animation>) -> Result<Self> {
        let magic = stream.read::<u32>()?;
        if magic != MAGIC {
            return Err(KilnError::InvalidMagic {
                what: "controller",
                expected: MAGIC,
                found: magic,
            });
        }
        let version = stream.read::<u32>()?;
        if version > ControllerVersion::Latest as u32 {
            return Err(KilnError::UnsupportedVersion {
                what: "controller",
                version,
            });
        }

        let mut controller = Self::new();
        let root_motion_bone = stream.read_string()?;
        controller.set_root_motion_bone(Some(&root_motion_bone));

        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let name = stream.read_string()?;
            let raw = stream.read::<u32>()?;
            let ty = InputType::from_raw(raw)
                .ok_or_else(|| KilnError::InvalidData(format!("input `{name}` has unknown type {raw}")))?;
            controller.add_input(&name, ty);
        }

        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let name = stream.read_string()?;
            controller.add_animation_slot(&name);
        }

        let count = stream.read::<u32>()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let set = stream.read::<u32>()?;
            let slot = stream.read::<u32>()?;
            let path = stream.read_string()?;
            if slot as usize >= controller.animation_slots.len() {
                return Err(KilnError::InvalidData(format!("animation `{path}` bound to unknown slot {slot}")));
            }
            entries.push((set, slot, Path::new(&path)));
        }

        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let name = stream.read_string()?;
            let bones = stream.read_array::<BoneNameHash>()?;
            controller.bone_masks.push(BoneMask::new(&name, bones));
        }

        let count = stream.read::<u32>()? as usize;
        if count > MAX_IK_CHAINS {
            return Err(KilnError::InvalidData(format!("{count} IK chains, at most {MAX_IK_CHAINS} allowed")));
        }
        for _ in 0..count {
            let max_iterations = stream.read::<u32>()?;
            let bones = stream.read_array::<BoneNameHash>()?;
            if bones.len() > MAX_IK_BONES {
                return Err(KilnError::InvalidData(format!("IK chain of {} bones", bones.len())));
            }
            controller.ik.push(IkDef {
                bones: bones.into_iter().collect(),
                max_iterations,
            });
        }

        if stream.read_bool()? {
            let ctx = DeserializeContext {
                inputs: &controller.inputs,
                version,
            };
            let root = Node::deserialize_tagged(stream, &ctx)?;
            controller.root = Some(Box::new(root));
        }

        // Only take references once the whole controller parsed.
        for (set, slot, path) in entries {
            let animation = animations.load(&path);
            controller.animation_entries.push(AnimationEntry { set, slot, animation });
        }
        Ok(controller)
    }
}
