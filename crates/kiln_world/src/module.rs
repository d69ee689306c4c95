use std::any::Any;

use kiln_core::{InputMemoryStream, OutputMemoryStream, Result};

use crate::entity::{ComponentType, EntityMap, EntityRef};
use crate::world::World;

/// A subsystem that owns one or more component types of a [`World`].
///
/// The world owns its modules and lends itself to them: while a module
/// callback runs, that module is detached from the world, so the callback
/// may freely mutate the world (create entities, report components) through
/// the `&mut World` it receives.
pub trait WorldModule: Any + Send + Sync {
    fn name(&self) -> &'static str;

    /// Component types this module creates and destroys.
    fn component_types(&self) -> Vec<ComponentType>;

    /// Creates a component of type `ty` on `entity`. Implementations must
    /// call [`World::on_component_created`].
    fn create_component(&mut self, world: &mut World, ty: ComponentType, entity: EntityRef);

    /// Destroys the component of type `ty` on `entity`. Implementations must
    /// call [`World::on_component_destroyed`].
    fn destroy_component(&mut self, world: &mut World, ty: ComponentType, entity: EntityRef);

    fn update(&mut self, _world: &mut World, _time_delta: f32) {}

    fn start_game(&mut self, _world: &mut World) {}

    fn stop_game(&mut self, _world: &mut World) {}

    /// Format version written ahead of [`WorldModule::serialize`] output.
    fn version(&self) -> i32 {
        0
    }

    fn serialize(&self, _stream: &mut OutputMemoryStream) {}

    fn deserialize(
        &mut self,
        _world: &mut World,
        _stream: &mut InputMemoryStream<'_>,
        _entity_map: &EntityMap,
        _version: i32,
    ) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
