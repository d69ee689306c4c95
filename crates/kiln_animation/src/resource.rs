//! Reference-counted resources.
//!
//! Animations, controllers and models are loaded asynchronously by the host.
//! Components hold a [`ResourceRef`] from the moment they name a path; the
//! payload appears later, when the host calls
//! [`ResourceManager::finish_loading`]. Consumers poll [`Resource::get`] each
//! frame and simply skip work while the resource is not ready.
//!
//! # Lifecycle
//! - [`ResourceManager::load`] returns the shared resource for a path and
//!   bumps its reference count
//! - [`ResourceManager::unload`] drops one reference; the last one removes
//!   the resource from the manager and frees its payload

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use kiln_core::{Path, StableHash};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::animation::Animation;
use crate::controller::Controller;
use crate::model::Model;
use crate::property_animation::PropertyAnimation;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Empty,
    Ready,
    Failure,
}

struct Slot<T> {
    state: ResourceState,
    data: Option<Arc<T>>,
}

/// A named, possibly not yet loaded payload.
pub struct Resource<T> {
    path: Path,
    slot: RwLock<Slot<T>>,
    ref_count: AtomicU32,
}

pub type ResourceRef<T> = Arc<Resource<T>>;

impl<T> std::fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path)
            .field("state", &self.state())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl<T> Resource<T> {
    fn new(path: Path) -> Self {
        Self {
            path,
            slot: RwLock::new(Slot {
                state: ResourceState::Empty,
                data: None,
            }),
            ref_count: AtomicU32::new(0),
        }
    }

    /// Wraps already loaded data in a resource owned by nobody.
    #[must_use]
    pub fn ready(path: Path, data: T) -> ResourceRef<T> {
        let res = Self::new(path);
        res.set_data(data);
        Arc::new(res)
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.slot.read().state
    }

    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ResourceState::Ready
    }

    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.state() == ResourceState::Failure
    }

    /// The payload, if loaded.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        let slot = self.slot.read();
        match slot.state {
            ResourceState::Ready => slot.data.clone(),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    fn add_ref(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn release(&self) -> u32 {
        let prev = self.ref_count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "resource `{}` released too many times", self.path);
        if prev == 1 {
            std::sync::atomic::fence(Ordering::Acquire);
        }
        prev.saturating_sub(1)
    }

    fn set_data(&self, data: T) {
        let mut slot = self.slot.write();
        slot.data = Some(Arc::new(data));
        slot.state = ResourceState::Ready;
    }

    fn set_failed(&self) {
        let mut slot = self.slot.write();
        slot.data = None;
        slot.state = ResourceState::Failure;
    }

    fn clear(&self) {
        let mut slot = self.slot.write();
        slot.data = None;
        slot.state = ResourceState::Empty;
    }
}

/// Path-keyed registry of one resource type.
pub struct ResourceManager<T> {
    resources: RwLock<FxHashMap<StableHash, ResourceRef<T>>>,
}

impl<T> Default for ResourceManager<T> {
    fn default() -> Self {
        Self {
            resources: RwLock::default(),
        }
    }
}

impl<T> ResourceManager<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resource for `path`, creating an empty one if needed, and
    /// takes a reference on it.
    pub fn load(&self, path: &Path) -> ResourceRef<T> {
        let res = {
            let mut resources = self.resources.write();
            resources
                .entry(path.hash())
                .or_insert_with(|| {
                    log::debug!("Requested resource `{path}`");
                    Arc::new(Resource::new(path.clone()))
                })
                .clone()
        };
        res.add_ref();
        res
    }

    /// Drops one reference taken by [`ResourceManager::load`]. Returns
    /// `true` when that was the last reference and the resource was freed.
    pub fn unload(&self, res: &ResourceRef<T>) -> bool {
        if res.release() > 0 {
            return false;
        }
        let mut resources = self.resources.write();
        if let Some(existing) = resources.get(&res.path.hash())
            && Arc::ptr_eq(existing, res)
        {
            resources.remove(&res.path.hash());
        }
        res.clear();
        log::debug!("Unloaded resource `{}`", res.path);
        true
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<ResourceRef<T>> {
        self.resources.read().get(&path.hash()).cloned()
    }

    /// Installs loaded data for `path`. Creates the entry if nobody has
    /// requested it yet, without taking a reference.
    pub fn finish_loading(&self, path: &Path, data: T) -> ResourceRef<T> {
        let res = {
            let mut resources = self.resources.write();
            resources
                .entry(path.hash())
                .or_insert_with(|| Arc::new(Resource::new(path.clone())))
                .clone()
        };
        res.set_data(data);
        log::debug!("Resource `{path}` is ready");
        res
    }

    pub fn mark_failed(&self, path: &Path) {
        if let Some(res) = self.get(path) {
            log::error!("Failed to load resource `{path}`");
            res.set_failed();
        }
    }

    /// Drops the payload but keeps the entry, e.g. before a reload.
    pub fn unload_data(&self, path: &Path) {
        if let Some(res) = self.get(path) {
            res.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

/// One manager per resource type used by the animation runtime.
#[derive(Default)]
pub struct ResourceManagerHub {
    pub animations: ResourceManager<Animation>,
    pub controllers: ResourceManager<Controller>,
    pub property_animations: ResourceManager<PropertyAnimation>,
    pub models: ResourceManager<Model>,
}

impl ResourceManagerHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unloads a controller together with the clips it references once the
    /// last reference is gone.
    pub fn unload_controller(&self, res: &ResourceRef<Controller>) {
        let data = res.get();
        if self.controllers.unload(res)
            && let Some(controller) = data
        {
            controller.release_animations(&self.animations);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_shares_and_counts() {
        let manager = ResourceManager::<u32>::new();
        let path = Path::new("a.res");
        let a = manager.load(&path);
        let b = manager.load(&path);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ref_count(), 2);
        assert!(!a.is_ready());
        assert!(a.get().is_none());

        manager.finish_loading(&path, 7);
        assert_eq!(*b.get().unwrap(), 7);

        assert!(!manager.unload(&a));
        assert_eq!(manager.len(), 1);
        assert!(manager.unload(&b));
        assert!(manager.is_empty());
        assert_eq!(a.state(), ResourceState::Empty);
    }

    #[test]
    fn failure_hides_data() {
        let manager = ResourceManager::<u32>::new();
        let path = Path::new("broken.res");
        let res = manager.load(&path);
        manager.mark_failed(&path);
        assert!(res.is_failure());
        assert!(res.get().is_none());
    }
}
