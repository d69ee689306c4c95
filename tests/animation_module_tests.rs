//! AnimationModule tests
//!
//! Tests for:
//! - Runtime lifetime tied to the game running and the controller loading
//! - Root motion applied to entity transforms
//! - Typed animator inputs
//! - Animation events
//! - Animable playback, forwards and backwards
//! - Property animators and their setters
//! - IK targets set per animator
//! - Module serialization, current and legacy

use std::sync::{Arc, Mutex};

use glam::{DVec3, Quat, Vec3};
use kiln::animation::events::{EventWriter, event_type};
use kiln::animation::module::{animable_type, animator_type, property_animator_type};
use kiln::animation::nodes::AnimationNode;
use kiln::animation::render::model_instance_type;
use kiln::animation::{
    Animation, AnimationModule, AnimationSettings, BoneTrack, Controller, Curve, InputType, KeyframeTrack,
    Model, ModelInstances, ModelInstancesModule, PropertyAnimation, ResourceManagerHub,
};
use kiln::core::{InputMemoryStream, LocalRigidTransform, OutputMemoryStream, Path, StableHash, Time};
use kiln::world::{EntityMap, EntityRef, World, write_entity};

// ============================================================================
// Helper
// ============================================================================

const EPSILON: f32 = 1e-4;

fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn dvec3_approx(a: DVec3, b: DVec3) -> bool {
    (a - b).abs().max_element() < f64::from(EPSILON)
}

fn walk(seconds: f32, speed: f32) -> Animation {
    Animation::new(
        Time::from_seconds(seconds),
        vec![BoneTrack {
            bone: StableHash::of_str("root"),
            translation: Some(KeyframeTrack::linear(
                vec![0.0, seconds],
                vec![Vec3::ZERO, Vec3::Z * speed * seconds],
            )),
            rotation: None,
        }],
    )
}

fn skeleton() -> Model {
    Model::new([
        ("root".to_owned(), None, LocalRigidTransform::IDENTITY),
        ("spine".to_owned(), Some(0), LocalRigidTransform::new(Vec3::Y, Quat::IDENTITY)),
    ])
}

struct Scene {
    world: World,
    resources: Arc<ResourceManagerHub>,
    instances: Arc<ModelInstances>,
}

impl Scene {
    fn new(settings: AnimationSettings) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let resources = Arc::new(ResourceManagerHub::new());
        let instances = Arc::new(ModelInstances::new());
        let mut world = World::new();
        world.add_module(Box::new(ModelInstancesModule::new(
            Arc::clone(&instances),
            Arc::clone(&resources),
        )));
        world.add_module(Box::new(AnimationModule::with_settings(
            Arc::clone(&resources),
            instances.clone(),
            settings,
        )));
        Self {
            world,
            resources,
            instances,
        }
    }

    /// Entity with a model instance showing `model`.
    fn spawn(&mut self, model: Model) -> EntityRef {
        let path = Path::new("actor.mdl");
        self.resources.models.finish_loading(&path, model);
        let e = self.world.create_entity(DVec3::ZERO, Quat::IDENTITY);
        self.world.create_component(model_instance_type(), e);
        self.world
            .module_mut::<ModelInstancesModule>()
            .expect("renderer")
            .set_model_path(e, &path);
        e
    }

    /// Registers `clip` under `path` and returns a reference owned by the
    /// caller.
    fn clip(&self, path: &str, clip: Animation) -> kiln::animation::ResourceRef<Animation> {
        let path = Path::new(path);
        self.resources.animations.finish_loading(&path, clip);
        self.resources.animations.load(&path)
    }

    fn add_controller(&self, path: &str, controller: Controller) -> Path {
        let path = Path::new(path);
        self.resources.controllers.finish_loading(&path, controller);
        path
    }

    fn animation(&mut self) -> &mut AnimationModule {
        self.world.module_mut::<AnimationModule>().expect("animation module")
    }

    /// Animator on a fresh actor driven by a looping walk at `speed`.
    fn walker(&mut self, speed: f32) -> EntityRef {
        let mut controller = Controller::new();
        controller.add_input("speed", InputType::Float);
        controller.add_input("grounded", InputType::Bool);
        let slot = controller.add_animation_slot("walk");
        controller.add_animation(0, slot, self.clip("walk.ani", walk(1.0, speed)));
        controller.set_root_motion_bone(Some("root"));
        let mut node = AnimationNode::looped(slot);
        node.base.events = EventWriter::new().event(event_type("footstep"), 0.5, &[7]).build();
        controller.set_root(node);
        let source = self.add_controller("walker.ctl", controller);

        let e = self.spawn(skeleton());
        self.world.create_component(animator_type(), e);
        self.animation().set_animator_source(e, &source);
        e
    }
}

fn default_scene() -> Scene {
    Scene::new(AnimationSettings::default())
}

// ============================================================================
// Animator lifetime
// ============================================================================

#[test]
fn nothing_runs_until_game_starts() {
    let mut scene = default_scene();
    let e = scene.walker(2.0);
    scene.animation().set_animator_use_root_motion(e, true);

    scene.world.update(0.25);
    assert!(!scene.animation().has_animator_runtime(e));
    assert_eq!(scene.world.position(e), DVec3::ZERO);
    assert!(!scene.instances.take_pose_changed(e));

    scene.world.start_game();
    scene.world.update(0.25);
    assert!(scene.animation().has_animator_runtime(e));
    assert!(scene.instances.take_pose_changed(e));
}

#[test]
fn runtime_is_dropped_when_controller_unloads() {
    let mut scene = default_scene();
    let e = scene.walker(1.0);
    scene.world.start_game();
    scene.world.update(0.1);
    assert!(scene.animation().has_animator_runtime(e));

    scene.resources.controllers.unload_data(&Path::new("walker.ctl"));
    scene.world.update(0.1);
    assert!(!scene.animation().has_animator_runtime(e));
}

#[test]
fn clearing_source_releases_controller_and_clips() {
    let mut scene = default_scene();
    let e = scene.walker(1.0);
    assert_eq!(
        scene.animation().animator_source(e),
        Some(Path::new("walker.ctl"))
    );

    scene.animation().set_animator_source(e, &Path::new(""));
    assert!(scene.animation().animator_source(e).is_none());
    assert!(scene.resources.controllers.get(&Path::new("walker.ctl")).is_none());
    assert!(scene.resources.animations.get(&Path::new("walk.ani")).is_none());
}

// ============================================================================
// Root motion
// ============================================================================

fn root_motion_moves_entity(settings: AnimationSettings) {
    let mut scene = Scene::new(settings);
    let e = scene.walker(2.0);
    scene.animation().set_animator_use_root_motion(e, true);
    scene.world.set_rotation(e, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
    scene.world.start_game();

    scene.world.update(0.25);
    assert!(approx_eq(scene.animation().animator_root_motion(e).pos.z, 0.5));
    // +Z in the animation is +X for an entity turned a quarter around Y.
    assert!(dvec3_approx(scene.world.position(e), DVec3::new(0.5, 0.0, 0.0)));

    scene.world.update(0.25);
    assert!(dvec3_approx(scene.world.position(e), DVec3::new(1.0, 0.0, 0.0)));
}

#[test]
fn root_motion_moves_entity_in_parallel() {
    root_motion_moves_entity(AnimationSettings::default());
}

#[test]
fn root_motion_moves_entity_serially() {
    root_motion_moves_entity(AnimationSettings {
        parallel: false,
        ..Default::default()
    });
}

#[test]
fn root_motion_is_ignored_unless_enabled() {
    let mut scene = default_scene();
    let e = scene.walker(2.0);
    scene.world.start_game();
    scene.world.update(0.25);

    assert!(approx_eq(scene.animation().animator_root_motion(e).pos.z, 0.5));
    assert_eq!(scene.world.position(e), DVec3::ZERO);
}

// ============================================================================
// Inputs and events
// ============================================================================

#[test]
fn typed_inputs_reject_wrong_types() {
    let mut scene = default_scene();
    let e = scene.walker(1.0);
    let anim = scene.animation();
    assert_eq!(anim.animator_input_index(e, "speed"), Some(0));
    assert_eq!(anim.animator_input_index(e, "grounded"), Some(1));
    assert_eq!(anim.animator_input_index(e, "missing"), None);

    // No runtime yet.
    anim.set_animator_float_input(e, 0, 1.0);
    assert_eq!(anim.animator_float_input(e, 0), None);

    scene.world.start_game();
    scene.world.update(0.0);
    let anim = scene.animation();
    anim.set_animator_float_input(e, 0, 1.5);
    anim.set_animator_bool_input(e, 1, true);
    anim.set_animator_bool_input(e, 0, true);
    anim.set_animator_i32_input(e, 9, 3);

    assert_eq!(anim.animator_float_input(e, 0), Some(1.5));
    assert_eq!(anim.animator_bool_input(e, 1), Some(true));
    assert_eq!(anim.animator_bool_input(e, 0), None);
    assert_eq!(anim.animator_i32_input(e, 9), None);
}

#[test]
fn events_are_reported_for_the_tick_that_crosses_them() {
    let mut scene = default_scene();
    let e = scene.walker(1.0);
    scene.world.start_game();

    scene.world.update(0.25);
    assert_eq!(scene.animation().animator_events(e).map(Iterator::count), Some(0));

    scene.world.update(0.5);
    let events: Vec<_> = scene
        .animation()
        .animator_events(e)
        .expect("runtime")
        .map(|ev| (ev.type_hash, ev.payload.to_vec()))
        .collect();
    assert_eq!(events, vec![(event_type("footstep"), vec![7])]);

    scene.world.update(0.125);
    assert_eq!(scene.animation().animator_events(e).map(Iterator::count), Some(0));
}

// ============================================================================
// IK
// ============================================================================

#[test]
fn ik_target_bends_the_chain() {
    let mut scene = default_scene();
    let leg = Model::new([
        ("pelvis".to_owned(), None, LocalRigidTransform::new(Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY)),
        ("thigh".to_owned(), Some(0), LocalRigidTransform::new(Vec3::NEG_Y, Quat::IDENTITY)),
        ("calf".to_owned(), Some(1), LocalRigidTransform::new(Vec3::NEG_Y, Quat::IDENTITY)),
    ]);
    let mut controller = Controller::new();
    assert_eq!(controller.add_ik(&["pelvis", "thigh", "calf"], 5), Some(0));
    let source = scene.add_controller("leg.ctl", controller);

    let e = scene.spawn(leg);
    scene.world.create_component(animator_type(), e);
    scene.animation().set_animator_source(e, &source);
    scene
        .animation()
        .set_animator_ik(e, 0, 3.0, Vec3::new(1.0, 1.0, 0.0));
    scene.world.start_game();
    scene.world.update(0.1);

    let pose = scene.instances.pose(e).expect("pose");
    assert!(pose.is_absolute);
    assert!((pose.positions[2] - Vec3::new(1.0, 1.0, 0.0)).length() < EPSILON);

    scene.animation().set_animator_ik(e, 0, 0.0, Vec3::new(1.0, 1.0, 0.0));
    scene.world.update(0.1);
    let pose = scene.instances.pose(e).expect("pose");
    assert!((pose.positions[2] - Vec3::ZERO).length() < EPSILON);
}

// ============================================================================
// Animable
// ============================================================================

#[test]
fn animable_plays_forwards_and_backwards() {
    let mut scene = default_scene();
    let clip = scene.clip("walk.ani", walk(1.0, 2.0));
    let e = scene.spawn(skeleton());
    scene.world.create_component(animable_type(), e);
    let path = Path::new("walk.ani");
    let anim = scene.animation();
    anim.set_animation(e, &path);
    assert_eq!(anim.animation_path(e), Some(path.clone()));
    assert!(approx_eq(anim.animation_length(&path), 1.0));

    anim.update_animable(e, 0.75);
    assert_eq!(anim.animable_time(e), Some(Time::from_seconds(0.75)));

    // Samples at 0.75, then steps back to 0.25.
    anim.update_animable(e, -0.5);
    assert_eq!(anim.animable_time(e), Some(Time::from_seconds(0.25)));
    let pose = scene.instances.pose(e).expect("pose");
    assert!(approx_eq(pose.positions[0].z, 1.5));

    // Stepping back over the start wraps to the end of the clip.
    scene.animation().update_animable(e, -0.5);
    assert_eq!(scene.animation().animable_time(e), Some(Time::from_seconds(0.75)));

    scene.resources.animations.unload(&clip);
}

#[test]
fn animable_wraps_forwards_during_game() {
    let mut scene = default_scene();
    let _clip = scene.clip("walk.ani", walk(1.0, 1.0));
    let e = scene.spawn(skeleton());
    scene.world.create_component(animable_type(), e);
    scene.animation().set_animation(e, &Path::new("walk.ani"));
    scene.world.start_game();

    for _ in 0..5 {
        scene.world.update(0.25);
    }
    assert_eq!(scene.animation().animable_time(e), Some(Time::from_seconds(0.25)));
}

// ============================================================================
// Property animator
// ============================================================================

fn bob() -> PropertyAnimation {
    PropertyAnimation {
        fps: 10.0,
        curves: vec![
            Curve {
                component: "transform".to_owned(),
                property: "Position X".to_owned(),
                frames: vec![0, 10, 20],
                values: vec![0.0, 1.0, 0.0],
            },
            Curve {
                component: "light".to_owned(),
                property: "Intensity".to_owned(),
                frames: vec![0, 20],
                values: vec![0.0, 2.0],
            },
        ],
    }
}

#[test]
fn property_animator_drives_registered_setters() {
    let mut scene = default_scene();
    let path = Path::new("bob.anm");
    scene.resources.property_animations.finish_loading(&path, bob());
    let e = scene.world.create_entity(DVec3::ZERO, Quat::IDENTITY);
    scene.world.create_component(property_animator_type(), e);

    let intensity = Arc::new(Mutex::new(0.0_f32));
    {
        let intensity = Arc::clone(&intensity);
        let anim = scene.animation();
        anim.register_property_setter("light", "Intensity", move |_, _, value| {
            *intensity.lock().unwrap() = value;
        });
        anim.set_property_animation(e, &path);
        assert_eq!(anim.property_animation_path(e), Some(path.clone()));
        assert!(anim.is_property_animator_enabled(e));
    }

    scene.world.start_game();
    scene.world.update(0.5);
    assert!(dvec3_approx(scene.world.position(e), DVec3::new(0.5, 0.0, 0.0)));
    assert!(approx_eq(*intensity.lock().unwrap(), 0.5));

    scene
        .world
        .with_module::<AnimationModule, _>(|anim, world| anim.enable_property_animator(world, e, false));
    assert!(!scene.animation().is_property_animator_enabled(e));
    assert!(dvec3_approx(scene.world.position(e), DVec3::ZERO));

    scene.world.update(0.5);
    assert!(dvec3_approx(scene.world.position(e), DVec3::ZERO));
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn module_state_survives_serialization() -> anyhow::Result<()> {
    let mut scene = default_scene();
    let walker = scene.walker(1.0);
    scene.animation().set_animator_use_root_motion(walker, true);
    scene.animation().set_animator_default_set(walker, 2);

    let prop = scene.world.create_entity(DVec3::ZERO, Quat::IDENTITY);
    scene.world.create_component(property_animator_type(), prop);
    scene.animation().set_property_animation(prop, &Path::new("bob.anm"));
    scene
        .world
        .with_module::<AnimationModule, _>(|anim, world| anim.enable_property_animator(world, prop, false));

    let mut entities = OutputMemoryStream::new();
    scene.world.serialize(&mut entities);
    let mut modules = OutputMemoryStream::new();
    scene.world.serialize_modules(&mut modules);

    let mut copy = default_scene();
    let mut map = EntityMap::new();
    copy.world
        .deserialize(&mut InputMemoryStream::new(entities.data()), &mut map, true)?;
    copy.world
        .deserialize_modules(&mut InputMemoryStream::new(modules.data()), &map)?;

    let walker = map.get(Some(walker)).expect("walker");
    let prop = map.get(Some(prop)).expect("prop");
    assert!(copy.world.has_component(walker, animator_type()));
    assert!(copy.world.has_component(prop, property_animator_type()));

    let anim = copy.animation();
    assert_eq!(anim.animator_source(walker), Some(Path::new("walker.ctl")));
    assert!(anim.animator_use_root_motion(walker));
    assert_eq!(anim.animator_default_set(walker), 2);
    assert_eq!(anim.property_animation_path(prop), Some(Path::new("bob.anm")));
    assert!(!anim.is_property_animator_enabled(prop));
    Ok(())
}

#[test]
fn first_module_version_has_no_animator_flags() -> anyhow::Result<()> {
    let mut scene = default_scene();
    let e = scene.world.create_entity(DVec3::ZERO, Quat::IDENTITY);

    let mut blob = OutputMemoryStream::new();
    blob.write(&0u32); // animables
    blob.write(&0u32); // property animators
    blob.write(&1u32); // animators
    blob.write(&5u32);
    write_entity(&mut blob, Some(e));
    blob.write_string("old.ctl");

    let mut map = EntityMap::new();
    map.set(e, e);
    scene
        .world
        .with_module::<AnimationModule, _>(|anim, world| {
            kiln::WorldModule::deserialize(anim, world, &mut InputMemoryStream::new(blob.data()), &map, 0)
        })
        .expect("animation module")?;

    let anim = scene.animation();
    assert_eq!(anim.animator_source(e), Some(Path::new("old.ctl")));
    assert_eq!(anim.animator_default_set(e), 5);
    assert!(!anim.animator_use_root_motion(e));
    assert!(scene.world.has_component(e, animator_type()));
    Ok(())
}
