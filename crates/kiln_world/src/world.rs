//! The entity store.
//!
//! A [`World`] keeps every entity in a dense table indexed by
//! [`EntityRef::index`]. Destroyed slots are threaded onto a doubly linked
//! free list and reused by later creations. Transforms live in a parallel
//! dense array; only entities that take part in a parent/child relation get
//! a record in the (sparse, swap-removed) hierarchy table.

use glam::{DVec3, Mat4, Quat, Vec3};
use kiln_core::{InputMemoryStream, OutputMemoryStream, Result, RigidTransform, Signal, Transform};

use crate::entity::{
    ComponentType, ComponentUid, EntityMap, EntityPtr, EntityRef, MAX_COMPONENT_TYPES, read_entity,
    write_entity,
};
use crate::module::WorldModule;

/// Identifies a partition: a named group of entities that can be unloaded
/// together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct PartitionHandle(pub u16);

#[derive(Debug, Clone)]
pub struct Partition {
    pub handle: PartitionHandle,
    pub name: String,
}

#[derive(Debug, Clone, Copy)]
struct EntityData {
    valid: bool,
    // Free-list links, meaningful only while `valid` is false.
    prev: Option<u32>,
    next: Option<u32>,
    hierarchy: Option<usize>,
    name: Option<usize>,
    partition: PartitionHandle,
    components: u64,
}

impl EntityData {
    const FREE: EntityData = EntityData {
        valid: false,
        prev: None,
        next: None,
        hierarchy: None,
        name: None,
        partition: PartitionHandle(0),
        components: 0,
    };
}

#[derive(Debug, Clone, Copy)]
struct Hierarchy {
    entity: EntityRef,
    parent: EntityPtr,
    first_child: EntityPtr,
    next_sibling: EntityPtr,
    local_transform: Transform,
}

impl Hierarchy {
    fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            parent: None,
            first_child: None,
            next_sibling: None,
            local_transform: Transform::IDENTITY,
        }
    }
}

#[derive(Debug, Clone)]
struct EntityName {
    entity: EntityRef,
    name: String,
}

/// Container of entities, their transforms, names and hierarchy, plus the
/// modules that attach components to them.
pub struct World {
    name: String,
    entities: Vec<EntityData>,
    transforms: Vec<Transform>,
    hierarchy: Vec<Hierarchy>,
    names: Vec<EntityName>,
    partitions: Vec<Partition>,
    partition_generator: u16,
    active_partition: PartitionHandle,
    first_free_slot: Option<u32>,

    modules: Vec<Option<Box<dyn WorldModule>>>,
    component_type_map: [Option<usize>; MAX_COMPONENT_TYPES],

    entity_created: Signal<EntityRef>,
    entity_destroyed: Signal<EntityRef>,
    entity_transformed: Signal<EntityRef>,
    component_added: Signal<ComponentUid>,
    component_destroyed: Signal<ComponentUid>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("entities", &self.entity_count())
            .field("hierarchy", &self.hierarchy.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

const RESERVED_ENTITIES_COUNT: usize = 1024;

impl World {
    #[must_use]
    pub fn new() -> Self {
        let mut world = Self {
            name: String::new(),
            entities: Vec::with_capacity(RESERVED_ENTITIES_COUNT),
            transforms: Vec::with_capacity(RESERVED_ENTITIES_COUNT),
            hierarchy: Vec::new(),
            names: Vec::new(),
            partitions: Vec::new(),
            partition_generator: 0,
            active_partition: PartitionHandle(0),
            first_free_slot: None,
            modules: Vec::new(),
            component_type_map: [None; MAX_COMPONENT_TYPES],
            entity_created: Signal::new(),
            entity_destroyed: Signal::new(),
            entity_transformed: Signal::new(),
            component_added: Signal::new(),
            component_destroyed: Signal::new(),
        };
        let main = world.create_partition("main");
        world.set_active_partition(main);
        world
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the world and its first partition.
    pub fn set_name(&mut self, name: &str) {
        name.clone_into(&mut self.name);
        if let Some(p) = self.partitions.first_mut() {
            name.clone_into(&mut p.name);
        }
    }

    // ========================================================================
    // Signals
    // ========================================================================

    pub fn entity_created(&mut self) -> &mut Signal<EntityRef> {
        &mut self.entity_created
    }

    pub fn entity_destroyed(&mut self) -> &mut Signal<EntityRef> {
        &mut self.entity_destroyed
    }

    pub fn entity_transformed(&mut self) -> &mut Signal<EntityRef> {
        &mut self.entity_transformed
    }

    pub fn component_added(&mut self) -> &mut Signal<ComponentUid> {
        &mut self.component_added
    }

    pub fn component_destroyed(&mut self) -> &mut Signal<ComponentUid> {
        &mut self.component_destroyed
    }

    // ========================================================================
    // Partitions
    // ========================================================================

    pub fn create_partition(&mut self, name: &str) -> PartitionHandle {
        let handle = PartitionHandle(self.partition_generator);
        self.partition_generator = self.partition_generator.wrapping_add(1);
        self.partitions.push(Partition {
            handle,
            name: name.to_owned(),
        });
        handle
    }

    /// Destroys every entity in the partition, then the partition itself.
    pub fn destroy_partition(&mut self, partition: PartitionHandle) {
        let doomed: Vec<EntityRef> = self
            .entities()
            .filter(|e| self.entities[e.idx()].partition == partition)
            .collect();
        for entity in doomed {
            // Destroying a parent does not destroy its children, but an
            // earlier iteration may still have freed this slot.
            if self.has_entity(entity) {
                self.destroy_entity(entity);
            }
        }
        self.partitions.retain(|p| p.handle != partition);
        if self.active_partition == partition {
            log::warn!("Destroyed the active partition {partition:?}");
        }
    }

    pub fn set_active_partition(&mut self, partition: PartitionHandle) {
        self.active_partition = partition;
    }

    #[must_use]
    pub fn active_partition(&self) -> PartitionHandle {
        self.active_partition
    }

    #[must_use]
    pub fn partition(&self, handle: PartitionHandle) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.handle == handle)
    }

    #[must_use]
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    #[must_use]
    pub fn entity_partition(&self, entity: EntityRef) -> PartitionHandle {
        self.entities[entity.idx()].partition
    }

    // ========================================================================
    // Entity Lifecycle
    // ========================================================================

    /// Creates an entity in the active partition with unit scale.
    pub fn create_entity(&mut self, position: DVec3, rotation: Quat) -> EntityRef {
        let entity = if let Some(free) = self.first_free_slot {
            let next = self.entities[free as usize].next;
            if let Some(next) = next {
                self.entities[next as usize].prev = None;
            }
            self.first_free_slot = next;
            EntityRef::new(free)
        } else {
            self.entities.push(EntityData::FREE);
            self.transforms.push(Transform::IDENTITY);
            EntityRef::new((self.entities.len() - 1) as u32)
        };

        self.transforms[entity.idx()] = Transform::new(position, rotation, Vec3::ONE);
        self.entities[entity.idx()] = EntityData {
            valid: true,
            prev: None,
            next: None,
            hierarchy: None,
            name: None,
            partition: self.active_partition,
            components: 0,
        };
        self.entity_created.invoke(&entity);
        entity
    }

    /// Makes the specific slot `entity` live, growing the table and
    /// unlinking the slot from the free list as needed. Used to recreate an
    /// entity under its previous handle.
    pub fn emplace_entity(&mut self, entity: EntityRef) {
        while self.entities.len() <= entity.idx() {
            let index = self.entities.len() as u32;
            self.entities.push(EntityData {
                next: self.first_free_slot,
                ..EntityData::FREE
            });
            self.transforms.push(Transform::IDENTITY);
            if let Some(first) = self.first_free_slot {
                self.entities[first as usize].prev = Some(index);
            }
            self.first_free_slot = Some(index);
        }
        debug_assert!(!self.entities[entity.idx()].valid, "emplacing a live entity");

        let EntityData { prev, next, .. } = self.entities[entity.idx()];
        if self.first_free_slot == Some(entity.index) {
            self.first_free_slot = next;
        }
        if let Some(prev) = prev {
            self.entities[prev as usize].next = next;
        }
        if let Some(next) = next {
            self.entities[next as usize].prev = prev;
        }

        self.transforms[entity.idx()] = Transform::IDENTITY;
        self.entities[entity.idx()] = EntityData {
            valid: true,
            partition: self.active_partition,
            ..EntityData::FREE
        };
        self.entity_created.invoke(&entity);
    }

    /// Destroys `entity`: detaches its children (they keep their world
    /// transforms), detaches it from its parent, destroys all of its
    /// components through their owning modules and frees the slot.
    pub fn destroy_entity(&mut self, entity: EntityRef) {
        debug_assert!(self.has_entity(entity), "destroying a dead entity {entity:?}");

        while let Some(child) = self.first_child(entity) {
            self.set_parent(None, child);
        }
        self.set_parent(None, entity);

        let mut mask = self.entities[entity.idx()].components;
        for i in 0..MAX_COMPONENT_TYPES {
            let ty = ComponentType { index: i as u8 };
            if mask & ty.bit() == 0 {
                continue;
            }
            let original = mask;
            self.destroy_component(entity, ty);
            mask = self.entities[entity.idx()].components;
            debug_assert_ne!(original, mask, "module did not report destruction of {ty:?}");
            if original == mask {
                self.entities[entity.idx()].components &= !ty.bit();
            }
        }

        if let Some(name_idx) = self.entities[entity.idx()].name {
            if let Some(last) = self.names.last() {
                let last_entity = last.entity;
                self.entities[last_entity.idx()].name = Some(name_idx);
            }
            self.names.swap_remove(name_idx);
        }

        let first_free = self.first_free_slot;
        if let Some(first) = first_free {
            self.entities[first as usize].prev = Some(entity.index);
        }
        self.entities[entity.idx()] = EntityData {
            next: first_free,
            ..EntityData::FREE
        };
        self.first_free_slot = Some(entity.index);
        self.entity_destroyed.invoke(&entity);
    }

    #[must_use]
    pub fn has_entity(&self, entity: EntityRef) -> bool {
        self.entities.get(entity.idx()).is_some_and(|e| e.valid)
    }

    /// Iterates live entities in index order.
    pub fn entities(&self) -> impl Iterator<Item = EntityRef> + '_ {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .map(|(i, _)| EntityRef::new(i as u32))
    }

    #[must_use]
    pub fn first_entity(&self) -> EntityPtr {
        self.entities().next()
    }

    #[must_use]
    pub fn next_entity(&self, entity: EntityRef) -> EntityPtr {
        self.entities
            .iter()
            .enumerate()
            .skip(entity.idx() + 1)
            .find(|(_, e)| e.valid)
            .map(|(i, _)| EntityRef::new(i as u32))
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.iter().filter(|e| e.valid).count()
    }

    // ========================================================================
    // Names
    // ========================================================================

    /// Setting an empty name on an unnamed entity is a no-op.
    pub fn set_entity_name(&mut self, entity: EntityRef, name: &str) {
        match self.entities[entity.idx()].name {
            Some(idx) => name.clone_into(&mut self.names[idx].name),
            None => {
                if name.is_empty() {
                    return;
                }
                self.entities[entity.idx()].name = Some(self.names.len());
                self.names.push(EntityName {
                    entity,
                    name: name.to_owned(),
                });
            }
        }
    }

    #[must_use]
    pub fn entity_name(&self, entity: EntityRef) -> &str {
        self.entities[entity.idx()]
            .name
            .map_or("", |idx| self.names[idx].name.as_str())
    }

    /// Finds a direct child of `parent` named `name`, or a named root
    /// entity when `parent` is empty.
    #[must_use]
    pub fn find_by_name(&self, parent: EntityPtr, name: &str) -> EntityPtr {
        match parent {
            Some(parent) => self.children(parent).find(|&child| self.entity_name(child) == name),
            None => self
                .names
                .iter()
                .filter(|n| n.name == name)
                .map(|n| n.entity)
                .find(|&e| self.parent(e).is_none()),
        }
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    #[must_use]
    pub fn transform(&self, entity: EntityRef) -> Transform {
        self.transforms[entity.idx()]
    }

    #[must_use]
    pub fn position(&self, entity: EntityRef) -> DVec3 {
        self.transforms[entity.idx()].pos
    }

    #[must_use]
    pub fn rotation(&self, entity: EntityRef) -> Quat {
        self.transforms[entity.idx()].rot
    }

    #[must_use]
    pub fn scale(&self, entity: EntityRef) -> Vec3 {
        self.transforms[entity.idx()].scale
    }

    #[must_use]
    pub fn relative_matrix(&self, entity: EntityRef, base_pos: DVec3) -> Mat4 {
        self.transforms[entity.idx()].relative_matrix(base_pos)
    }

    pub fn set_transform(&mut self, entity: EntityRef, transform: Transform) {
        self.transforms[entity.idx()] = transform;
        self.transform_entity(entity, true);
    }

    /// Sets position and rotation, keeping scale.
    pub fn set_rigid_transform(&mut self, entity: EntityRef, transform: RigidTransform) {
        let tr = &mut self.transforms[entity.idx()];
        tr.pos = transform.pos;
        tr.rot = transform.rot;
        self.transform_entity(entity, true);
    }

    pub fn set_position(&mut self, entity: EntityRef, pos: DVec3) {
        self.transforms[entity.idx()].pos = pos;
        self.transform_entity(entity, true);
    }

    pub fn set_rotation(&mut self, entity: EntityRef, rot: Quat) {
        self.transforms[entity.idx()].rot = rot;
        self.transform_entity(entity, true);
    }

    pub fn set_scale(&mut self, entity: EntityRef, scale: Vec3) {
        self.transforms[entity.idx()].scale = scale;
        self.transform_entity(entity, true);
    }

    /// Moves `entity` without moving its children: their local transforms
    /// are recomputed so their world transforms stay put.
    pub fn set_transform_keep_children(&mut self, entity: EntityRef, transform: Transform) {
        self.transforms[entity.idx()] = transform;
        self.entity_transformed.invoke(&entity);

        let Some(h_idx) = self.entities[entity.idx()].hierarchy else {
            return;
        };
        let h = self.hierarchy[h_idx];
        if let Some(parent) = h.parent {
            self.hierarchy[h_idx].local_transform = self.transforms[parent.idx()].inverted() * transform;
        }
        let inv = transform.inverted();
        let mut child = h.first_child;
        while let Some(c) = child {
            let c_idx = self.hierarchy_index(c);
            self.hierarchy[c_idx].local_transform = inv * self.transforms[c.idx()];
            child = self.hierarchy[c_idx].next_sibling;
        }
    }

    /// Fires `entity_transformed`, optionally refreshes the entity's local
    /// transform from its new world transform, and pushes the change down
    /// to every descendant.
    fn transform_entity(&mut self, entity: EntityRef, update_local: bool) {
        self.entity_transformed.invoke(&entity);

        let Some(h_idx) = self.entities[entity.idx()].hierarchy else {
            return;
        };
        let my_transform = self.transforms[entity.idx()];
        let h = self.hierarchy[h_idx];
        if update_local && let Some(parent) = h.parent {
            self.hierarchy[h_idx].local_transform = self.transforms[parent.idx()].inverted() * my_transform;
        }

        let mut child = h.first_child;
        while let Some(c) = child {
            let child_h = self.hierarchy[self.hierarchy_index(c)];
            self.transforms[c.idx()] = my_transform * child_h.local_transform;
            self.transform_entity(c, false);
            child = child_h.next_sibling;
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    fn hierarchy_index(&self, entity: EntityRef) -> usize {
        let idx = self.entities[entity.idx()].hierarchy;
        debug_assert!(idx.is_some(), "{entity:?} is linked but has no hierarchy record");
        idx.unwrap_or_default()
    }

    #[must_use]
    pub fn parent(&self, entity: EntityRef) -> EntityPtr {
        self.entities[entity.idx()]
            .hierarchy
            .and_then(|idx| self.hierarchy[idx].parent)
    }

    #[must_use]
    pub fn first_child(&self, entity: EntityRef) -> EntityPtr {
        self.entities[entity.idx()]
            .hierarchy
            .and_then(|idx| self.hierarchy[idx].first_child)
    }

    #[must_use]
    pub fn next_sibling(&self, entity: EntityRef) -> EntityPtr {
        self.entities[entity.idx()]
            .hierarchy
            .and_then(|idx| self.hierarchy[idx].next_sibling)
    }

    /// Iterates the direct children of `entity`, most recently attached first.
    pub fn children(&self, entity: EntityRef) -> Children<'_> {
        Children {
            world: self,
            next: self.first_child(entity),
        }
    }

    #[must_use]
    pub fn is_descendant(&self, ancestor: EntityRef, descendant: EntityRef) -> bool {
        self.children(ancestor)
            .any(|child| child == descendant || self.is_descendant(child, descendant))
    }

    /// Attaches `child` under `new_parent` (or detaches it when empty),
    /// preserving the child's world transform.
    ///
    /// A change that would introduce a cycle is logged and ignored.
    pub fn set_parent(&mut self, new_parent: EntityPtr, child: EntityRef) {
        if let Some(parent) = new_parent
            && (parent == child || self.is_descendant(child, parent))
        {
            log::error!("Hierarchy can not contain a cycle ({parent:?} -> {child:?})");
            return;
        }

        let mut child_idx = self.entities[child.idx()].hierarchy;

        if let Some(idx) = child_idx {
            if let Some(old_parent) = self.hierarchy[idx].parent {
                let old_parent_idx = self.hierarchy_index(old_parent);
                let next = self.hierarchy[idx].next_sibling;
                if self.hierarchy[old_parent_idx].first_child == Some(child) {
                    self.hierarchy[old_parent_idx].first_child = next;
                } else {
                    let mut cur = self.hierarchy[old_parent_idx].first_child;
                    while let Some(c) = cur {
                        let c_idx = self.hierarchy_index(c);
                        if self.hierarchy[c_idx].next_sibling == Some(child) {
                            self.hierarchy[c_idx].next_sibling = next;
                            break;
                        }
                        cur = self.hierarchy[c_idx].next_sibling;
                    }
                }
                self.hierarchy[idx].parent = None;
                self.hierarchy[idx].next_sibling = None;
                self.collect_garbage(old_parent);
                // Collection may have moved the child's record.
                child_idx = self.entities[child.idx()].hierarchy;
            }
        } else if new_parent.is_some() {
            child_idx = Some(self.push_hierarchy(child));
        }

        match (new_parent, child_idx) {
            (Some(parent), Some(child_idx)) => {
                let parent_idx = match self.entities[parent.idx()].hierarchy {
                    Some(idx) => idx,
                    None => self.push_hierarchy(parent),
                };
                let local = self.transforms[parent.idx()].inverted() * self.transforms[child.idx()];
                let first = self.hierarchy[parent_idx].first_child;
                let h = &mut self.hierarchy[child_idx];
                h.parent = Some(parent);
                h.local_transform = local;
                h.next_sibling = first;
                self.hierarchy[parent_idx].first_child = Some(child);
            }
            (None, Some(_)) => self.collect_garbage(child),
            _ => {}
        }
    }

    fn push_hierarchy(&mut self, entity: EntityRef) -> usize {
        let idx = self.hierarchy.len();
        self.entities[entity.idx()].hierarchy = Some(idx);
        self.hierarchy.push(Hierarchy::new(entity));
        idx
    }

    /// Drops the hierarchy record of `entity` once it has neither a parent
    /// nor children.
    fn collect_garbage(&mut self, entity: EntityRef) {
        let Some(idx) = self.entities[entity.idx()].hierarchy else {
            return;
        };
        let h = &self.hierarchy[idx];
        if h.parent.is_some() || h.first_child.is_some() {
            return;
        }
        if let Some(last) = self.hierarchy.last() {
            let last_entity = last.entity;
            self.entities[last_entity.idx()].hierarchy = Some(idx);
        }
        self.entities[entity.idx()].hierarchy = None;
        self.hierarchy.swap_remove(idx);
    }

    /// Transform relative to the parent, or the world transform for
    /// entities without a parent.
    #[must_use]
    pub fn local_transform(&self, entity: EntityRef) -> Transform {
        match self.entities[entity.idx()].hierarchy {
            Some(idx) => self.hierarchy[idx].local_transform,
            None => self.transforms[entity.idx()],
        }
    }

    #[must_use]
    pub fn local_scale(&self, entity: EntityRef) -> Vec3 {
        self.local_transform(entity).scale
    }

    pub fn set_local_position(&mut self, entity: EntityRef, pos: DVec3) {
        match self.entities[entity.idx()].hierarchy {
            Some(idx) => {
                self.hierarchy[idx].local_transform.pos = pos;
                self.update_global_transform(entity);
            }
            None => self.set_position(entity, pos),
        }
    }

    pub fn set_local_rotation(&mut self, entity: EntityRef, rot: Quat) {
        match self.entities[entity.idx()].hierarchy {
            Some(idx) => {
                self.hierarchy[idx].local_transform.rot = rot;
                self.update_global_transform(entity);
            }
            None => self.set_rotation(entity, rot),
        }
    }

    pub fn set_local_transform(&mut self, entity: EntityRef, transform: Transform) {
        match self.entities[entity.idx()].hierarchy {
            Some(idx) => {
                self.hierarchy[idx].local_transform = transform;
                self.update_global_transform(entity);
            }
            None => self.set_transform(entity, transform),
        }
    }

    fn update_global_transform(&mut self, entity: EntityRef) {
        let h = self.hierarchy[self.hierarchy_index(entity)];
        // A root with children has a record but no parent; its local
        // transform is its world transform.
        let new_tr = match h.parent {
            Some(parent) => self.transforms[parent.idx()] * h.local_transform,
            None => h.local_transform,
        };
        self.set_transform(entity, new_tr);
    }

    // ========================================================================
    // Components
    // ========================================================================

    #[must_use]
    pub fn has_component(&self, entity: EntityRef, ty: ComponentType) -> bool {
        self.entities[entity.idx()].components & ty.bit() != 0
    }

    #[must_use]
    pub fn components_mask(&self, entity: EntityRef) -> u64 {
        self.entities[entity.idx()].components
    }

    #[must_use]
    pub fn component(&self, entity: EntityRef, ty: ComponentType) -> Option<ComponentUid> {
        self.has_component(entity, ty).then_some(ComponentUid { entity, ty })
    }

    /// Iterates the components of `entity` in type-index order.
    pub fn components(&self, entity: EntityRef) -> impl Iterator<Item = ComponentUid> + '_ {
        let mask = self.entities[entity.idx()].components;
        (0..MAX_COMPONENT_TYPES as u8)
            .map(|index| ComponentType { index })
            .filter(move |ty| mask & ty.bit() != 0)
            .map(move |ty| ComponentUid { entity, ty })
    }

    /// Asks the module owning `ty` to create the component.
    pub fn create_component(&mut self, ty: ComponentType, entity: EntityRef) {
        let Some(idx) = self.component_type_map[usize::from(ty.index)] else {
            log::error!("No module registered for component type {ty:?}");
            return;
        };
        let Some(mut module) = self.modules[idx].take() else {
            log::error!("Module for {ty:?} is busy, can not create component on {entity:?}");
            return;
        };
        module.create_component(self, ty, entity);
        self.modules[idx] = Some(module);
    }

    /// Asks the module owning `ty` to destroy the component.
    pub fn destroy_component(&mut self, entity: EntityRef, ty: ComponentType) {
        let Some(idx) = self.component_type_map[usize::from(ty.index)] else {
            log::error!("No module registered for component type {ty:?}");
            return;
        };
        let Some(mut module) = self.modules[idx].take() else {
            log::error!("Module for {ty:?} is busy, can not destroy component on {entity:?}");
            return;
        };
        module.destroy_component(self, ty, entity);
        self.modules[idx] = Some(module);
    }

    /// Called by modules after they created a component.
    pub fn on_component_created(&mut self, entity: EntityRef, ty: ComponentType) {
        self.entities[entity.idx()].components |= ty.bit();
        self.component_added.invoke(&ComponentUid { entity, ty });
    }

    /// Called by modules after they destroyed a component.
    pub fn on_component_destroyed(&mut self, entity: EntityRef, ty: ComponentType) {
        let data = &mut self.entities[entity.idx()];
        debug_assert!(data.components & ty.bit() != 0, "{ty:?} not present on {entity:?}");
        data.components &= !ty.bit();
        self.component_destroyed.invoke(&ComponentUid { entity, ty });
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Adds a module and routes its component types to it.
    pub fn add_module(&mut self, module: Box<dyn WorldModule>) {
        let idx = self.modules.len();
        for ty in module.component_types() {
            let slot = &mut self.component_type_map[usize::from(ty.index)];
            if slot.is_some() {
                log::warn!("Component type {ty:?} re-registered by module `{}`", module.name());
            }
            *slot = Some(idx);
        }
        log::info!("Added world module `{}`", module.name());
        self.modules.push(Some(module));
    }

    fn module_index<M: WorldModule>(&self) -> Option<usize> {
        self.modules
            .iter()
            .position(|m| m.as_ref().is_some_and(|m| m.as_any().is::<M>()))
    }

    #[must_use]
    pub fn module<M: WorldModule>(&self) -> Option<&M> {
        self.modules
            .iter()
            .flatten()
            .find_map(|m| m.as_any().downcast_ref::<M>())
    }

    pub fn module_mut<M: WorldModule>(&mut self) -> Option<&mut M> {
        self.modules
            .iter_mut()
            .flatten()
            .find_map(|m| m.as_any_mut().downcast_mut::<M>())
    }

    /// Runs `f` with the module detached, so it can mutate the world.
    pub fn with_module<M: WorldModule, R>(&mut self, f: impl FnOnce(&mut M, &mut World) -> R) -> Option<R> {
        let idx = self.module_index::<M>()?;
        let mut module = self.modules[idx].take()?;
        let result = module.as_any_mut().downcast_mut::<M>().map(|m| f(m, self));
        self.modules[idx] = Some(module);
        result
    }

    #[must_use]
    pub fn module_by_name(&self, name: &str) -> Option<&dyn WorldModule> {
        self.modules
            .iter()
            .flatten()
            .find(|m| m.name() == name)
            .map(AsRef::as_ref)
    }

    fn for_each_module(&mut self, mut f: impl FnMut(&mut dyn WorldModule, &mut World)) {
        for idx in 0..self.modules.len() {
            if let Some(mut module) = self.modules[idx].take() {
                f(module.as_mut(), self);
                self.modules[idx] = Some(module);
            }
        }
    }

    /// Updates every module in registration order.
    pub fn update(&mut self, time_delta: f32) {
        self.for_each_module(|m, world| m.update(world, time_delta));
    }

    pub fn start_game(&mut self) {
        log::info!("Starting game in world `{}`", self.name);
        self.for_each_module(|m, world| m.start_game(world));
    }

    pub fn stop_game(&mut self) {
        log::info!("Stopping game in world `{}`", self.name);
        self.for_each_module(|m, world| m.stop_game(world));
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Writes entities, names and hierarchy.
    ///
    /// Layout: slot count, then `(entity, pos, rot, scale)` for every live
    /// entity terminated by an invalid entity, then the name table, then the
    /// hierarchy table.
    pub fn serialize(&self, stream: &mut OutputMemoryStream) {
        stream.write(&(self.entities.len() as u32));
        for entity in self.entities() {
            let tr = &self.transforms[entity.idx()];
            write_entity(stream, Some(entity));
            stream.write(&tr.pos);
            stream.write(&tr.rot);
            stream.write(&tr.scale);
        }
        write_entity(stream, None);

        stream.write(&(self.names.len() as u32));
        for name in &self.names {
            write_entity(stream, Some(name.entity));
            stream.write_string(&name.name);
        }

        stream.write(&(self.hierarchy.len() as u32));
        for h in &self.hierarchy {
            write_entity(stream, Some(h.entity));
            write_entity(stream, h.parent);
            write_entity(stream, h.first_child);
            write_entity(stream, h.next_sibling);
            stream.write(&h.local_transform.pos);
            stream.write(&h.local_transform.rot);
            stream.write(&h.local_transform.scale);
        }
    }

    /// Reads data written by [`World::serialize`], creating new entities
    /// and recording the old-to-new mapping in `entity_map`.
    ///
    /// `vec3_scale` selects the current format; legacy data stores a scalar
    /// scale plus four bytes of padding.
    pub fn deserialize(
        &mut self,
        stream: &mut InputMemoryStream<'_>,
        entity_map: &mut EntityMap,
        vec3_scale: bool,
    ) -> Result<()> {
        let to_reserve = stream.read::<u32>()?;
        entity_map.reserve(to_reserve as usize);

        while let Some(orig) = read_entity(stream)? {
            let new_e = self.create_entity(DVec3::ZERO, Quat::IDENTITY);
            entity_map.set(orig, new_e);
            let tr = Transform {
                pos: stream.read()?,
                rot: stream.read()?,
                scale: read_scale(stream, vec3_scale)?,
            };
            self.transforms[new_e.idx()] = tr;
        }

        let name_count = stream.read::<u32>()?;
        for _ in 0..name_count {
            let entity = entity_map.get(read_entity(stream)?);
            let name = stream.read_string()?;
            match entity {
                Some(entity) => {
                    self.entities[entity.idx()].name = Some(self.names.len());
                    self.names.push(EntityName { entity, name });
                }
                None => log::warn!("Dropping name `{name}` of an unmapped entity"),
            }
        }

        let hierarchy_count = stream.read::<u32>()?;
        self.hierarchy.reserve(hierarchy_count as usize);
        for _ in 0..hierarchy_count {
            let entity = entity_map.get(read_entity(stream)?);
            let parent = entity_map.get(read_entity(stream)?);
            let first_child = entity_map.get(read_entity(stream)?);
            let next_sibling = entity_map.get(read_entity(stream)?);
            let local_transform = Transform {
                pos: stream.read()?,
                rot: stream.read()?,
                scale: read_scale(stream, vec3_scale)?,
            };
            let Some(entity) = entity else {
                log::warn!("Dropping hierarchy record of an unmapped entity");
                continue;
            };
            self.entities[entity.idx()].hierarchy = Some(self.hierarchy.len());
            self.hierarchy.push(Hierarchy {
                entity,
                parent,
                first_child,
                next_sibling,
                local_transform,
            });
        }

        log::debug!(
            "Deserialized {} entities, {} names, {} hierarchy records",
            self.entity_count(),
            self.names.len(),
            self.hierarchy.len()
        );
        Ok(())
    }

    /// Writes every module as `(name, version, byte size, payload)`.
    pub fn serialize_modules(&self, stream: &mut OutputMemoryStream) {
        let modules: Vec<&dyn WorldModule> = self.modules.iter().flatten().map(AsRef::as_ref).collect();
        stream.write(&(modules.len() as u32));
        for module in modules {
            let mut blob = OutputMemoryStream::new();
            module.serialize(&mut blob);
            stream.write_string(module.name());
            stream.write(&module.version());
            stream.write_array(blob.data());
        }
    }

    /// Reads data written by [`World::serialize_modules`]. Blobs of modules
    /// this world does not have are skipped.
    pub fn deserialize_modules(&mut self, stream: &mut InputMemoryStream<'_>, entity_map: &EntityMap) -> Result<()> {
        let count = stream.read::<u32>()?;
        for _ in 0..count {
            let name = stream.read_string()?;
            let version = stream.read::<i32>()?;
            let size = stream.read::<u32>()? as usize;
            let blob = stream.read_bytes(size)?;

            let Some(idx) = self
                .modules
                .iter()
                .position(|m| m.as_ref().is_some_and(|m| m.name() == name))
            else {
                log::warn!("Skipping data of unknown module `{name}`");
                continue;
            };
            let Some(mut module) = self.modules[idx].take() else {
                continue;
            };
            let result = module.deserialize(self, &mut InputMemoryStream::new(blob), entity_map, version);
            self.modules[idx] = Some(module);
            result?;
        }
        Ok(())
    }
}

fn read_scale(stream: &mut InputMemoryStream<'_>, vec3_scale: bool) -> Result<Vec3> {
    if vec3_scale {
        stream.read()
    } else {
        let scale = stream.read::<f32>()?;
        let _padding = stream.read::<f32>()?;
        Ok(Vec3::splat(scale))
    }
}

/// Iterator over the direct children of an entity.
pub struct Children<'a> {
    world: &'a World,
    next: EntityPtr,
}

impl Iterator for Children<'_> {
    type Item = EntityRef;

    fn next(&mut self) -> Option<EntityRef> {
        let current = self.next?;
        self.next = self.world.next_sibling(current);
        Some(current)
    }
}
