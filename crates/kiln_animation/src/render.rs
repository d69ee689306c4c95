//! The slice of the renderer the animation runtime talks to.
//!
//! Animation never owns poses. It asks the [`RenderModule`] for the model
//! of an entity, locks that entity's pose, writes it and hands the lock
//! back, flagging whether the pose changed. [`ModelInstances`] is an
//! in-memory implementation used by tools and tests, registered in a world
//! through [`ModelInstancesModule`].

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kiln_core::Path;
use kiln_world::{ComponentType, EntityRef, World, WorldModule, component_type};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use rustc_hash::FxHashMap;

use crate::model::{Model, Pose};
use crate::resource::{ResourceManagerHub, ResourceRef};

/// Exclusive access to one entity's pose.
pub type PoseLock = ArcMutexGuard<RawMutex, Pose>;

/// Component type of renderable model instances.
#[must_use]
pub fn model_instance_type() -> ComponentType {
    component_type("model_instance")
}

pub trait RenderModule: Send + Sync {
    /// Model rendered for `entity`, loaded or not.
    fn model(&self, entity: EntityRef) -> Option<ResourceRef<Model>>;

    /// Locks the pose of `entity`. `None` when the entity has no model
    /// instance.
    fn lock_pose(&self, entity: EntityRef) -> Option<PoseLock>;

    /// Releases a lock taken by [`RenderModule::lock_pose`]. `changed`
    /// marks the pose for re-upload.
    fn unlock_pose(&self, entity: EntityRef, pose: PoseLock, changed: bool);
}

#[derive(Debug)]
struct ModelInstance {
    model: Option<ResourceRef<Model>>,
    pose: Arc<Mutex<Pose>>,
    pose_changed: AtomicBool,
}

/// Model instances keyed by entity, each with its own lockable pose.
#[derive(Debug, Default)]
pub struct ModelInstances {
    instances: RwLock<FxHashMap<EntityRef, ModelInstance>>,
}

impl ModelInstances {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, entity: EntityRef) {
        self.instances.write().insert(
            entity,
            ModelInstance {
                model: None,
                pose: Arc::new(Mutex::new(Pose::default())),
                pose_changed: AtomicBool::new(false),
            },
        );
    }

    /// Removes the instance and returns its model reference, if any.
    pub fn destroy(&self, entity: EntityRef) -> Option<ResourceRef<Model>> {
        self.instances.write().remove(&entity)?.model
    }

    #[must_use]
    pub fn contains(&self, entity: EntityRef) -> bool {
        self.instances.read().contains_key(&entity)
    }

    /// Replaces the model of `entity`, returning the previous one.
    pub fn set_model(&self, entity: EntityRef, model: Option<ResourceRef<Model>>) -> Option<ResourceRef<Model>> {
        let mut instances = self.instances.write();
        let instance = instances.get_mut(&entity)?;
        std::mem::replace(&mut instance.model, model)
    }

    /// Whether the pose changed since the last call, clearing the flag.
    pub fn take_pose_changed(&self, entity: EntityRef) -> bool {
        self.instances
            .read()
            .get(&entity)
            .is_some_and(|i| i.pose_changed.swap(false, Ordering::AcqRel))
    }

    /// Copy of the current pose of `entity`.
    #[must_use]
    pub fn pose(&self, entity: EntityRef) -> Option<Pose> {
        let pose = Arc::clone(&self.instances.read().get(&entity)?.pose);
        let pose = pose.lock().clone();
        Some(pose)
    }
}

impl RenderModule for ModelInstances {
    fn model(&self, entity: EntityRef) -> Option<ResourceRef<Model>> {
        self.instances.read().get(&entity)?.model.clone()
    }

    fn lock_pose(&self, entity: EntityRef) -> Option<PoseLock> {
        let pose = Arc::clone(&self.instances.read().get(&entity)?.pose);
        Some(pose.lock_arc())
    }

    fn unlock_pose(&self, entity: EntityRef, pose: PoseLock, changed: bool) {
        drop(pose);
        if changed && let Some(instance) = self.instances.read().get(&entity) {
            instance.pose_changed.store(true, Ordering::Release);
        }
    }
}

/// World module owning the `model_instance` component.
pub struct ModelInstancesModule {
    instances: Arc<ModelInstances>,
    resources: Arc<ResourceManagerHub>,
}

impl ModelInstancesModule {
    #[must_use]
    pub fn new(instances: Arc<ModelInstances>, resources: Arc<ResourceManagerHub>) -> Self {
        Self { instances, resources }
    }

    #[must_use]
    pub fn instances(&self) -> &Arc<ModelInstances> {
        &self.instances
    }

    /// Points the instance on `entity` at the model at `path`.
    pub fn set_model_path(&mut self, entity: EntityRef, path: &Path) {
        let model = (!path.is_empty()).then(|| self.resources.models.load(path));
        if let Some(old) = self.instances.set_model(entity, model) {
            self.resources.models.unload(&old);
        }
    }
}

impl WorldModule for ModelInstancesModule {
    fn name(&self) -> &'static str {
        "renderer"
    }

    fn component_types(&self) -> Vec<ComponentType> {
        vec![model_instance_type()]
    }

    fn create_component(&mut self, world: &mut World, ty: ComponentType, entity: EntityRef) {
        self.instances.create(entity);
        world.on_component_created(entity, ty);
    }

    fn destroy_component(&mut self, world: &mut World, ty: ComponentType, entity: EntityRef) {
        if let Some(model) = self.instances.destroy(entity) {
            self.resources.models.unload(&model);
        }
        world.on_component_destroyed(entity, ty);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
