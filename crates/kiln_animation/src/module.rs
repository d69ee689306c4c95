//! World module driving every animated entity.
//!
//! Three component types live here:
//!
//! - `animable`: plays a single clip on loop, no blend tree
//! - `property_animator`: drives scalar component properties from curves
//! - `animator`: runs a [`Controller`] blend tree with IK and root motion
//!
//! A frame runs the three in that order, each phase finishing before the
//! next starts. Animables and animators are independent per entity and
//! fan out over the rayon pool; property animators write through the world
//! and run serially. Nothing is updated while the game is stopped.

use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec3;
use kiln_core::math::rotate;
use kiln_core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Path, Result, Time};
use kiln_world::{
    ComponentType, EntityMap, EntityRef, World, WorldModule, component_type, read_entity, write_entity,
};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::animation::{Animation, SampleContext};
use crate::controller::{Controller, MAX_IK_CHAINS};
use crate::events::EventIter;
use crate::ik::{IkTarget, solve_ik};
use crate::input::InputValue;
use crate::property_animation::PropertyAnimation;
use crate::render::RenderModule;
use crate::resource::{ResourceManager, ResourceManagerHub, ResourceRef};
use crate::runtime::RuntimeContext;
use crate::settings::AnimationSettings;

#[must_use]
pub fn animable_type() -> ComponentType {
    component_type("animable")
}

#[must_use]
pub fn property_animator_type() -> ComponentType {
    component_type("property_animator")
}

#[must_use]
pub fn animator_type() -> ComponentType {
    component_type("animator")
}

/// Serialized layout versions of [`AnimationModule`].
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnimationModuleVersion {
    UseRootMotion = 0,
    Latest = 1,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PropertyAnimatorFlags: u32 {
        const LOOPED = 1 << 0;
        const DISABLED = 1 << 1;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AnimatorFlags: u32 {
        const USE_ROOT_MOTION = 1 << 0;
    }
}

/// Writes one animated value into a component property.
pub type PropertySetter = Box<dyn Fn(&mut World, EntityRef, f32) + Send + Sync>;

#[derive(Debug, Default)]
struct Animable {
    animation: Option<ResourceRef<Animation>>,
    time: Time,
}

#[derive(Debug)]
struct PropertyAnimator {
    animation: Option<ResourceRef<PropertyAnimation>>,
    flags: PropertyAnimatorFlags,
    time: f32,
}

impl Default for PropertyAnimator {
    fn default() -> Self {
        Self {
            animation: None,
            flags: PropertyAnimatorFlags::LOOPED,
            time: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct Animator {
    resource: Option<ResourceRef<Controller>>,
    default_set: u32,
    flags: AnimatorFlags,
    ctx: Option<RuntimeContext>,
    root_motion: LocalRigidTransform,
    ik: [IkTarget; MAX_IK_CHAINS],
}

impl Animator {
    fn destroy_runtime(&mut self, entity: EntityRef) {
        if self.ctx.take().is_some() {
            log::debug!("Destroyed animation runtime of {entity:?}");
        }
    }
}

/// Dense component storage with an entity index, removal by swap.
#[derive(Debug)]
struct ComponentTable<T> {
    entities: Vec<EntityRef>,
    items: Vec<T>,
    index: FxHashMap<EntityRef, usize>,
}

impl<T> Default for ComponentTable<T> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            items: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T> ComponentTable<T> {
    fn insert(&mut self, entity: EntityRef, item: T) -> &mut T {
        let i = match self.index.get(&entity) {
            Some(&i) => {
                self.items[i] = item;
                i
            }
            None => {
                self.index.insert(entity, self.items.len());
                self.entities.push(entity);
                self.items.push(item);
                self.items.len() - 1
            }
        };
        &mut self.items[i]
    }

    fn remove(&mut self, entity: EntityRef) -> Option<T> {
        let i = self.index.remove(&entity)?;
        self.entities.swap_remove(i);
        let item = self.items.swap_remove(i);
        if let Some(&moved) = self.entities.get(i) {
            self.index.insert(moved, i);
        }
        Some(item)
    }

    fn get(&self, entity: EntityRef) -> Option<&T> {
        self.index.get(&entity).map(|&i| &self.items[i])
    }

    fn get_mut(&mut self, entity: EntityRef) -> Option<&mut T> {
        self.index.get(&entity).map(|&i| &mut self.items[i])
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn iter(&self) -> impl Iterator<Item = (EntityRef, &T)> {
        self.entities.iter().copied().zip(&self.items)
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (EntityRef, &mut T)> {
        self.entities.iter().copied().zip(&mut self.items)
    }
}

impl<T: Send> ComponentTable<T> {
    /// Runs `f` on every item, on the rayon pool when `parallel`.
    fn for_each_mut(&mut self, parallel: bool, f: impl Fn(EntityRef, &mut T) + Sync) {
        if parallel {
            self.items
                .par_iter_mut()
                .zip(self.entities.par_iter())
                .for_each(|(item, &entity)| f(entity, item));
        } else {
            for (entity, item) in self.iter_mut() {
                f(entity, item);
            }
        }
    }
}

// ============================================================================
// Per-entity updates
// ============================================================================

fn step_animable(render: &dyn RenderModule, entity: EntityRef, animable: &mut Animable, time_delta: f32) {
    let Some(animation) = animable.animation.as_ref().and_then(|r| r.get()) else {
        return;
    };
    let Some(model) = render.model(entity).and_then(|m| m.get()) else {
        return;
    };
    let Some(mut pose) = render.lock_pose(entity) else {
        return;
    };

    model.get_relative_pose(&mut pose);
    animation.get_relative_pose(&mut SampleContext {
        pose: &mut pose,
        model: &model,
        time: animable.time,
        weight: 1.0,
        mask: None,
        root_bone: None,
    });
    pose.compute_absolute(&model);

    let length = animation.length();
    animable.time = if time_delta >= 0.0 {
        (animable.time + Time::from_seconds(time_delta)) % length
    } else {
        let back = Time::from_seconds(-time_delta) % length;
        (animable.time + length - back) % length
    };

    render.unlock_pose(entity, pose, true);
}

fn step_animator(
    render: &dyn RenderModule,
    settings: &AnimationSettings,
    is_game_running: bool,
    entity: EntityRef,
    animator: &mut Animator,
    time_delta: f32,
) {
    animator.root_motion = LocalRigidTransform::IDENTITY;
    let Some(controller) = animator.resource.as_ref().and_then(|r| r.get()) else {
        animator.destroy_runtime(entity);
        return;
    };
    if animator
        .ctx
        .as_ref()
        .is_some_and(|ctx| !Arc::ptr_eq(&ctx.controller, &controller))
    {
        animator.destroy_runtime(entity);
    }
    if !is_game_running && animator.ctx.is_none() {
        return;
    }
    let ctx = animator
        .ctx
        .get_or_insert_with(|| controller.create_runtime(animator.default_set));

    let Some(model) = render.model(entity).and_then(|m| m.get()) else {
        return;
    };
    let Some(mut pose) = render.lock_pose(entity) else {
        return;
    };

    ctx.model = Some(Arc::clone(&model));
    ctx.time_delta = Time::from_seconds(time_delta.max(0.0));
    controller.update(ctx);
    animator.root_motion = ctx.root_motion;

    model.get_relative_pose(&mut pose);
    controller.get_pose(ctx, &mut pose);

    for (chain, target) in controller
        .ik()
        .iter()
        .zip(&animator.ik)
        .take(settings.max_ik_chains)
    {
        if target.weight <= 0.0 || chain.bones.len() > settings.max_ik_bones {
            continue;
        }
        solve_ik(chain, target, &mut pose, &model);
    }

    pose.compute_absolute(&model);
    render.unlock_pose(entity, pose, true);
}

fn apply_root_motion(world: &mut World, entity: EntityRef, animator: &Animator) {
    if !animator.flags.contains(AnimatorFlags::USE_ROOT_MOTION)
        || animator.root_motion == LocalRigidTransform::IDENTITY
        || !world.has_entity(entity)
    {
        return;
    }
    let mut tr = world.transform(entity);
    tr.pos += rotate(tr.rot, animator.root_motion.pos.as_dvec3());
    tr.rot = animator.root_motion.rot * tr.rot;
    world.set_transform(entity, tr);
}

type SetterTable = FxHashMap<String, FxHashMap<String, PropertySetter>>;

fn apply_property_animator(setters: &SetterTable, world: &mut World, entity: EntityRef, animator: &PropertyAnimator) {
    let Some(animation) = animator.animation.as_ref().and_then(|r| r.get()) else {
        return;
    };
    for (curve, value) in animation.sample(animator.time) {
        match setters
            .get(curve.component.as_str())
            .and_then(|props| props.get(curve.property.as_str()))
        {
            Some(setter) => setter(world, entity, value),
            None => log::trace!("No setter for {}.{}", curve.component, curve.property),
        }
    }
}

fn builtin_setters() -> SetterTable {
    let mut transform: FxHashMap<String, PropertySetter> = FxHashMap::default();
    for (i, name) in ["X", "Y", "Z"].into_iter().enumerate() {
        transform.insert(
            format!("Position {name}"),
            Box::new(move |world: &mut World, entity: EntityRef, value: f32| {
                let mut pos = world.position(entity);
                pos[i] = f64::from(value);
                world.set_position(entity, pos);
            }),
        );
        transform.insert(
            format!("Scale {name}"),
            Box::new(move |world: &mut World, entity: EntityRef, value: f32| {
                let mut scale = world.scale(entity);
                scale[i] = value;
                world.set_scale(entity, scale);
            }),
        );
    }

    let mut setters = SetterTable::default();
    setters.insert("transform".to_owned(), transform);
    setters
}

// ============================================================================
// AnimationModule
// ============================================================================

pub struct AnimationModule {
    resources: Arc<ResourceManagerHub>,
    render: Arc<dyn RenderModule>,
    settings: AnimationSettings,
    animables: ComponentTable<Animable>,
    property_animators: ComponentTable<PropertyAnimator>,
    animators: ComponentTable<Animator>,
    property_setters: SetterTable,
    is_game_running: bool,
}

impl AnimationModule {
    #[must_use]
    pub fn new(resources: Arc<ResourceManagerHub>, render: Arc<dyn RenderModule>) -> Self {
        Self::with_settings(resources, render, AnimationSettings::default())
    }

    #[must_use]
    pub fn with_settings(
        resources: Arc<ResourceManagerHub>,
        render: Arc<dyn RenderModule>,
        settings: AnimationSettings,
    ) -> Self {
        Self {
            resources,
            render,
            settings,
            animables: ComponentTable::default(),
            property_animators: ComponentTable::default(),
            animators: ComponentTable::default(),
            property_setters: builtin_setters(),
            is_game_running: false,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &AnimationSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_game_running(&self) -> bool {
        self.is_game_running
    }

    /// Routes curves targeting `component.property` to `setter`, replacing
    /// any previous setter.
    pub fn register_property_setter(
        &mut self,
        component: &str,
        property: &str,
        setter: impl Fn(&mut World, EntityRef, f32) + Send + Sync + 'static,
    ) {
        self.property_setters
            .entry(component.to_owned())
            .or_default()
            .insert(property.to_owned(), Box::new(setter));
    }

    // ------------------------------------------------------------------------
    // Animator
    // ------------------------------------------------------------------------

    /// Points the animator at the controller at `path`. The old runtime is
    /// torn down before the new controller is installed; an empty path
    /// clears the source.
    pub fn set_animator_source(&mut self, entity: EntityRef, path: &Path) {
        let Some(animator) = self.animators.get_mut(entity) else {
            return;
        };
        animator.destroy_runtime(entity);
        if let Some(old) = animator.resource.take() {
            self.resources.unload_controller(&old);
        }
        if path.is_empty() {
            return;
        }
        let resource = self.resources.controllers.load(path);
        if self.is_game_running
            && let Some(controller) = resource.get()
        {
            animator.ctx = Some(controller.create_runtime(animator.default_set));
        }
        animator.resource = Some(resource);
    }

    #[must_use]
    pub fn animator_source(&self, entity: EntityRef) -> Option<Path> {
        Some(self.animators.get(entity)?.resource.as_ref()?.path().clone())
    }

    #[must_use]
    pub fn animator_controller(&self, entity: EntityRef) -> Option<ResourceRef<Controller>> {
        self.animators.get(entity)?.resource.clone()
    }

    #[must_use]
    pub fn has_animator_runtime(&self, entity: EntityRef) -> bool {
        self.animators.get(entity).is_some_and(|a| a.ctx.is_some())
    }

    /// Index of the controller input called `name`.
    #[must_use]
    pub fn animator_input_index(&self, entity: EntityRef, name: &str) -> Option<u32> {
        let controller = self.animators.get(entity)?.resource.as_ref()?.get()?;
        controller.input_index(name)
    }

    fn set_animator_input(&mut self, entity: EntityRef, index: u32, value: InputValue) {
        let Some(ctx) = self.animators.get_mut(entity).and_then(|a| a.ctx.as_mut()) else {
            return;
        };
        if !ctx.set_input(index, value) {
            match ctx.inputs.get(index as usize) {
                Some(current) => log::warn!(
                    "Animator input {index} of {entity:?} is {:?}, not {:?}",
                    current.ty(),
                    value.ty()
                ),
                None => log::warn!("Animator of {entity:?} has no input {index}"),
            }
        }
    }

    fn animator_input(&self, entity: EntityRef, index: u32) -> Option<InputValue> {
        let ctx = self.animators.get(entity)?.ctx.as_ref()?;
        ctx.inputs.get(index as usize).copied()
    }

    pub fn set_animator_float_input(&mut self, entity: EntityRef, index: u32, value: f32) {
        self.set_animator_input(entity, index, InputValue::Float(value));
    }

    pub fn set_animator_bool_input(&mut self, entity: EntityRef, index: u32, value: bool) {
        self.set_animator_input(entity, index, InputValue::Bool(value));
    }

    pub fn set_animator_i32_input(&mut self, entity: EntityRef, index: u32, value: i32) {
        self.set_animator_input(entity, index, InputValue::I32(value));
    }

    #[must_use]
    pub fn animator_float_input(&self, entity: EntityRef, index: u32) -> Option<f32> {
        match self.animator_input(entity, index)? {
            InputValue::Float(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn animator_bool_input(&self, entity: EntityRef, index: u32) -> Option<bool> {
        match self.animator_input(entity, index)? {
            InputValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn animator_i32_input(&self, entity: EntityRef, index: u32) -> Option<i32> {
        match self.animator_input(entity, index)? {
            InputValue::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Rebinds the running runtime to the animations of `set`.
    pub fn apply_animator_set(&mut self, entity: EntityRef, set: u32) {
        if let Some(ctx) = self.animators.get_mut(entity).and_then(|a| a.ctx.as_mut()) {
            ctx.apply_set(set);
        }
    }

    /// Set bound when the runtime is created.
    pub fn set_animator_default_set(&mut self, entity: EntityRef, set: u32) {
        if let Some(animator) = self.animators.get_mut(entity) {
            animator.default_set = set;
        }
    }

    #[must_use]
    pub fn animator_default_set(&self, entity: EntityRef) -> u32 {
        self.animators.get(entity).map_or(0, |a| a.default_set)
    }

    pub fn set_animator_use_root_motion(&mut self, entity: EntityRef, value: bool) {
        if let Some(animator) = self.animators.get_mut(entity) {
            animator.flags.set(AnimatorFlags::USE_ROOT_MOTION, value);
        }
    }

    #[must_use]
    pub fn animator_use_root_motion(&self, entity: EntityRef) -> bool {
        self.animators
            .get(entity)
            .is_some_and(|a| a.flags.contains(AnimatorFlags::USE_ROOT_MOTION))
    }

    /// Root motion produced by the last update of the animator.
    #[must_use]
    pub fn animator_root_motion(&self, entity: EntityRef) -> LocalRigidTransform {
        self.animators
            .get(entity)
            .map_or(LocalRigidTransform::IDENTITY, |a| a.root_motion)
    }

    /// Sets the target of IK chain `index`. The weight is clamped to
    /// `[0, 1]`; zero disables the chain.
    pub fn set_animator_ik(&mut self, entity: EntityRef, index: usize, weight: f32, target: Vec3) {
        let Some(ik) = self.animators.get_mut(entity).and_then(|a| a.ik.get_mut(index)) else {
            log::warn!("Animator of {entity:?} has no IK chain {index}");
            return;
        };
        *ik = IkTarget {
            weight: weight.clamp(0.0, 1.0),
            target,
        };
    }

    /// Events emitted by the last update of the animator.
    #[must_use]
    pub fn animator_events(&self, entity: EntityRef) -> Option<EventIter<'_>> {
        Some(self.animators.get(entity)?.ctx.as_ref()?.events())
    }

    /// Updates one animator outside the frame loop, root motion included.
    pub fn update_animator(&mut self, world: &mut World, entity: EntityRef, time_delta: f32) {
        let Some(animator) = self.animators.get_mut(entity) else {
            return;
        };
        step_animator(
            self.render.as_ref(),
            &self.settings,
            self.is_game_running,
            entity,
            animator,
            time_delta,
        );
        apply_root_motion(world, entity, animator);
    }

    // ------------------------------------------------------------------------
    // Animable
    // ------------------------------------------------------------------------

    pub fn set_animation(&mut self, entity: EntityRef, path: &Path) {
        let Some(animable) = self.animables.get_mut(entity) else {
            return;
        };
        if let Some(old) = animable.animation.take() {
            self.resources.animations.unload(&old);
        }
        animable.time = Time::ZERO;
        if !path.is_empty() {
            animable.animation = Some(self.resources.animations.load(path));
        }
    }

    #[must_use]
    pub fn animation_path(&self, entity: EntityRef) -> Option<Path> {
        Some(self.animables.get(entity)?.animation.as_ref()?.path().clone())
    }

    /// Current playback time of an animable.
    #[must_use]
    pub fn animable_time(&self, entity: EntityRef) -> Option<Time> {
        Some(self.animables.get(entity)?.time)
    }

    /// Samples one animable and advances it by `time_delta`, which may be
    /// negative.
    pub fn update_animable(&mut self, entity: EntityRef, time_delta: f32) {
        if let Some(animable) = self.animables.get_mut(entity) {
            step_animable(self.render.as_ref(), entity, animable, time_delta);
        }
    }

    /// Length in seconds of the loaded clip at `path`, `0.0` if it is not
    /// loaded.
    #[must_use]
    pub fn animation_length(&self, path: &Path) -> f32 {
        self.resources
            .animations
            .get(path)
            .and_then(|r| r.get())
            .map_or(0.0, |a| a.length().seconds())
    }

    // ------------------------------------------------------------------------
    // Property animator
    // ------------------------------------------------------------------------

    pub fn set_property_animation(&mut self, entity: EntityRef, path: &Path) {
        let Some(animator) = self.property_animators.get_mut(entity) else {
            return;
        };
        if let Some(old) = animator.animation.take() {
            self.resources.property_animations.unload(&old);
        }
        animator.time = 0.0;
        if !path.is_empty() {
            animator.animation = Some(self.resources.property_animations.load(path));
        }
    }

    #[must_use]
    pub fn property_animation_path(&self, entity: EntityRef) -> Option<Path> {
        Some(self.property_animators.get(entity)?.animation.as_ref()?.path().clone())
    }

    /// Restarts the animator from time zero. Disabling also applies the
    /// first frame, so properties rest at their initial values.
    pub fn enable_property_animator(&mut self, world: &mut World, entity: EntityRef, enabled: bool) {
        let Some(animator) = self.property_animators.get_mut(entity) else {
            return;
        };
        animator.flags.set(PropertyAnimatorFlags::DISABLED, !enabled);
        animator.time = 0.0;
        if !enabled {
            apply_property_animator(&self.property_setters, world, entity, animator);
        }
    }

    #[must_use]
    pub fn is_property_animator_enabled(&self, entity: EntityRef) -> bool {
        self.property_animators
            .get(entity)
            .is_some_and(|a| !a.flags.contains(PropertyAnimatorFlags::DISABLED))
    }

    // ------------------------------------------------------------------------
    // Frame phases
    // ------------------------------------------------------------------------

    fn update_animables(&mut self, time_delta: f32) {
        let render = self.render.as_ref();
        self.animables.for_each_mut(self.settings.parallel, |entity, animable| {
            step_animable(render, entity, animable, time_delta);
        });
    }

    fn update_property_animators(&mut self, world: &mut World, time_delta: f32) {
        for (entity, animator) in self.property_animators.iter_mut() {
            if animator.flags.contains(PropertyAnimatorFlags::DISABLED) {
                continue;
            }
            let playable = animator
                .animation
                .as_ref()
                .and_then(|r| r.get())
                .is_some_and(|a| a.curves.first().is_some_and(|c| !c.frames.is_empty()));
            if !playable {
                continue;
            }
            animator.time += time_delta;
            apply_property_animator(&self.property_setters, world, entity, animator);
        }
    }

    fn update_animators(&mut self, world: &mut World, time_delta: f32) {
        let render = self.render.as_ref();
        let settings = &self.settings;
        let running = self.is_game_running;
        self.animators.for_each_mut(settings.parallel, |entity, animator| {
            step_animator(render, settings, running, entity, animator, time_delta);
        });
        for (entity, animator) in self.animators.iter() {
            apply_root_motion(world, entity, animator);
        }
    }

    // ------------------------------------------------------------------------
    // Component lifetime
    // ------------------------------------------------------------------------

    fn destroy_animable(&mut self, entity: EntityRef) {
        if let Some(animation) = self.animables.remove(entity).and_then(|a| a.animation) {
            self.resources.animations.unload(&animation);
        }
    }

    fn destroy_property_animator(&mut self, entity: EntityRef) {
        if let Some(animation) = self.property_animators.remove(entity).and_then(|a| a.animation) {
            self.resources.property_animations.unload(&animation);
        }
    }

    fn destroy_animator(&mut self, entity: EntityRef) {
        let Some(mut animator) = self.animators.remove(entity) else {
            return;
        };
        animator.destroy_runtime(entity);
        if let Some(resource) = animator.resource {
            self.resources.unload_controller(&resource);
        }
    }

    fn load_path<T>(manager: &ResourceManager<T>, path: &str) -> Option<ResourceRef<T>> {
        (!path.is_empty()).then(|| manager.load(&Path::new(path)))
    }
}

fn write_path<T>(stream: &mut OutputMemoryStream, res: Option<&ResourceRef<T>>) {
    stream.write_string(res.map_or("", |r| r.path().as_str()));
}

impl WorldModule for AnimationModule {
    fn name(&self) -> &'static str {
        "animation"
    }

    fn component_types(&self) -> Vec<ComponentType> {
        vec![animable_type(), property_animator_type(), animator_type()]
    }

    fn create_component(&mut self, world: &mut World, ty: ComponentType, entity: EntityRef) {
        if ty == animable_type() {
            self.animables.insert(entity, Animable::default());
        } else if ty == property_animator_type() {
            self.property_animators.insert(entity, PropertyAnimator::default());
        } else if ty == animator_type() {
            self.animators.insert(entity, Animator::default());
        } else {
            log::error!("Animation module cannot create {ty:?}");
            return;
        }
        world.on_component_created(entity, ty);
    }

    fn destroy_component(&mut self, world: &mut World, ty: ComponentType, entity: EntityRef) {
        if ty == animable_type() {
            self.destroy_animable(entity);
        } else if ty == property_animator_type() {
            self.destroy_property_animator(entity);
        } else if ty == animator_type() {
            self.destroy_animator(entity);
        } else {
            log::error!("Animation module cannot destroy {ty:?}");
            return;
        }
        world.on_component_destroyed(entity, ty);
    }

    fn update(&mut self, world: &mut World, time_delta: f32) {
        if !self.is_game_running {
            return;
        }
        self.update_animables(time_delta);
        self.update_property_animators(world, time_delta);
        self.update_animators(world, time_delta);
    }

    fn start_game(&mut self, _world: &mut World) {
        self.is_game_running = true;
    }

    fn stop_game(&mut self, _world: &mut World) {
        self.is_game_running = false;
    }

    fn version(&self) -> i32 {
        AnimationModuleVersion::Latest as i32
    }

    fn serialize(&self, stream: &mut OutputMemoryStream) {
        stream.write(&(self.animables.len() as u32));
        for (entity, animable) in self.animables.iter() {
            write_entity(stream, Some(entity));
            write_path(stream, animable.animation.as_ref());
        }

        stream.write(&(self.property_animators.len() as u32));
        for (entity, animator) in self.property_animators.iter() {
            write_entity(stream, Some(entity));
            write_path(stream, animator.animation.as_ref());
            stream.write(&animator.flags.bits());
        }

        stream.write(&(self.animators.len() as u32));
        for (entity, animator) in self.animators.iter() {
            stream.write(&animator.default_set);
            write_entity(stream, Some(entity));
            stream.write(&animator.flags.bits());
            write_path(stream, animator.resource.as_ref());
        }
    }

    fn deserialize(
        &mut self,
        world: &mut World,
        stream: &mut InputMemoryStream<'_>,
        entity_map: &EntityMap,
        version: i32,
    ) -> Result<()> {
        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let entity = entity_map.get(read_entity(stream)?);
            let path = stream.read_string()?;
            let Some(entity) = entity else {
                log::warn!("Skipping animable of unmapped entity");
                continue;
            };
            let animable = Animable {
                animation: Self::load_path(&self.resources.animations, &path),
                time: Time::ZERO,
            };
            self.animables.insert(entity, animable);
            world.on_component_created(entity, animable_type());
        }

        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let entity = entity_map.get(read_entity(stream)?);
            let path = stream.read_string()?;
            let flags = PropertyAnimatorFlags::from_bits_truncate(stream.read()?);
            let Some(entity) = entity else {
                log::warn!("Skipping property animator of unmapped entity");
                continue;
            };
            let animator = PropertyAnimator {
                animation: Self::load_path(&self.resources.property_animations, &path),
                flags,
                time: 0.0,
            };
            self.property_animators.insert(entity, animator);
            world.on_component_created(entity, property_animator_type());
        }

        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let default_set = stream.read::<u32>()?;
            let entity = entity_map.get(read_entity(stream)?);
            let flags = if version > AnimationModuleVersion::UseRootMotion as i32 {
                AnimatorFlags::from_bits_truncate(stream.read()?)
            } else {
                AnimatorFlags::empty()
            };
            let path = stream.read_string()?;
            let Some(entity) = entity else {
                log::warn!("Skipping animator of unmapped entity");
                continue;
            };
            let animator = Animator {
                resource: Self::load_path(&self.resources.controllers, &path),
                default_set,
                flags,
                ..Animator::default()
            };
            self.animators.insert(entity, animator);
            world.on_component_created(entity, animator_type());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
