//! Entity handles, component type ids and entity remapping.

use std::sync::LazyLock;

use kiln_core::{InputMemoryStream, OutputMemoryStream, Result};
use parking_lot::RwLock;

/// Handle to a live entity: a dense index into the world's entity table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef {
    pub index: u32,
}

impl EntityRef {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self { index }
    }

    #[inline]
    #[must_use]
    pub const fn idx(self) -> usize {
        self.index as usize
    }
}

/// An entity handle that may be empty.
pub type EntityPtr = Option<EntityRef>;

/// On-wire value of an empty [`EntityPtr`].
pub const INVALID_ENTITY_INDEX: i32 = -1;

/// Writes an entity pointer as a signed 32-bit index, `-1` when empty.
pub fn write_entity(stream: &mut OutputMemoryStream, entity: EntityPtr) {
    let raw = entity.map_or(INVALID_ENTITY_INDEX, |e| e.index as i32);
    stream.write(&raw);
}

pub fn read_entity(stream: &mut InputMemoryStream<'_>) -> Result<EntityPtr> {
    let raw = stream.read::<i32>()?;
    Ok(u32::try_from(raw).ok().map(EntityRef::new))
}

// ============================================================================
// Component Types
// ============================================================================

/// Maximum number of distinct component types; one bit each in the
/// per-entity component mask.
pub const MAX_COMPONENT_TYPES: usize = 64;

/// Index of a registered component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentType {
    pub index: u8,
}

impl ComponentType {
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u64 {
        1u64 << self.index
    }
}

/// A component instance: the entity it is attached to plus its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentUid {
    pub entity: EntityRef,
    pub ty: ComponentType,
}

static COMPONENT_TYPES: LazyLock<RwLock<Vec<String>>> = LazyLock::new(|| RwLock::new(Vec::new()));

/// Returns the id registered for `name`, registering it on first use.
///
/// Ids are process-global so every world agrees on them.
pub fn component_type(name: &str) -> ComponentType {
    if let Some(index) = COMPONENT_TYPES.read().iter().position(|n| n == name) {
        return ComponentType { index: index as u8 };
    }

    let mut types = COMPONENT_TYPES.write();
    // Another thread may have registered it between the two locks.
    if let Some(index) = types.iter().position(|n| n == name) {
        return ComponentType { index: index as u8 };
    }
    assert!(
        types.len() < MAX_COMPONENT_TYPES,
        "too many component types, `{name}` does not fit in the component mask"
    );
    types.push(name.to_owned());
    log::debug!("Registered component type `{name}` as {}", types.len() - 1);
    ComponentType {
        index: (types.len() - 1) as u8,
    }
}

#[must_use]
pub fn component_type_name(ty: ComponentType) -> Option<String> {
    COMPONENT_TYPES.read().get(usize::from(ty.index)).cloned()
}

// ============================================================================
// Entity Map
// ============================================================================

/// Maps entity indices found in serialized data to the entities created for
/// them on load.
#[derive(Debug, Clone, Default)]
pub struct EntityMap {
    map: Vec<EntityPtr>,
}

impl EntityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, count: usize) {
        self.map.reserve(count);
    }

    pub fn set(&mut self, src: EntityRef, dst: EntityRef) {
        if self.map.len() <= src.idx() {
            self.map.resize(src.idx() + 1, None);
        }
        self.map[src.idx()] = Some(dst);
    }

    #[must_use]
    pub fn get(&self, src: EntityPtr) -> EntityPtr {
        src.and_then(|e| self.map.get(e.idx()).copied().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_type_is_idempotent() {
        let a = component_type("entity_test_a");
        let b = component_type("entity_test_b");
        assert_ne!(a, b);
        assert_eq!(component_type("entity_test_a"), a);
        assert_eq!(component_type_name(b).as_deref(), Some("entity_test_b"));
    }

    #[test]
    fn entity_map_unknown_is_none() {
        let mut map = EntityMap::new();
        map.set(EntityRef::new(3), EntityRef::new(0));
        assert_eq!(map.get(Some(EntityRef::new(3))), Some(EntityRef::new(0)));
        assert_eq!(map.get(Some(EntityRef::new(1))), None);
        assert_eq!(map.get(Some(EntityRef::new(10))), None);
        assert_eq!(map.get(None), None);
    }

    #[test]
    fn entity_ptr_wire_format() {
        let mut out = OutputMemoryStream::new();
        write_entity(&mut out, None);
        write_entity(&mut out, Some(EntityRef::new(5)));
        assert_eq!(&out.data()[..4], &(-1i32).to_le_bytes());
        let mut input = InputMemoryStream::new(out.data());
        assert_eq!(read_entity(&mut input).unwrap(), None);
        assert_eq!(read_entity(&mut input).unwrap(), Some(EntityRef::new(5)));
    }
}
