pub mod append_buffer;
pub mod broadphase_system;
pub mod collision_event;
pub mod dynamic_aabb_tree;
pub mod narrowphase_system;
pub mod sat;
pub mod scratch_arena;
pub mod solver_resource;
pub mod solver_system;

use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::assets::object_manager::ObjectManager;
use crate::components::broadphase_leaf_component::BroadphaseLeaf;
use crate::components::collision_aabb_component::CollisionAabbComponent;
use crate::components::object_id_component::ObjectIdComponent;
use crate::components::substep_state_component::{
    SubstepPrevState, SubstepStartState, SubstepVelocityState,
};
use crate::components::transform_component::TransformComponent;
use crate::components::velocity_component::VelocityComponent;
use crate::physics::broadphase_system::BroadphaseSystem;
use crate::physics::collision_event::{CollisionEvents, clear_collision_events};
use crate::physics::dynamic_aabb_tree::{BroadphaseBvh, LeafId};
use crate::physics::narrowphase_system::NarrowphaseSystem;
use crate::physics::scratch_arena::{ScratchArena, reset_scratch};
use crate::physics::solver_resource::{CandidateCollisions, ObjectData, SolverData};
use crate::physics::solver_system::SolverSystem;

/// Scratch vertices reserved per potential contact; bounds the per-substep
/// hull count the narrowphase arena can serve.
const SCRATCH_VERTICES_PER_CONTACT: usize = 16;

/// Inner substep pipeline, executed `num_substeps` times per outer step by
/// [`run_substeps`].
#[derive(Resource)]
pub struct SubstepSchedule {
    schedule: Schedule,
    num_substeps: u32,
}

/// Outer-pipeline stage driving the substep subgraph.
pub fn run_substeps(world: &mut World) {
    world.resource_scope(|world, mut substeps: Mut<SubstepSchedule>| {
        for _ in 0..substeps.num_substeps {
            substeps.schedule.run(world);
        }
    });
}

/// The rigid-body physics core. One instance of its resources lives in every
/// simulated world; the host steps each world's schedule once per frame, in
/// lock-step across worlds.
pub struct RigidBodyPhysicsSystem {}

impl RigidBodyPhysicsSystem {
    /// Registers every component and per-step buffer the pipeline touches.
    pub fn register_types(world: &mut World) {
        world.register_component::<TransformComponent>();
        world.register_component::<VelocityComponent>();
        world.register_component::<ObjectIdComponent>();
        world.register_component::<CollisionAabbComponent>();
        world.register_component::<BroadphaseLeaf>();
        world.register_component::<SubstepPrevState>();
        world.register_component::<SubstepStartState>();
        world.register_component::<SubstepVelocityState>();

        world.init_resource::<CandidateCollisions>();
    }

    /// Builds the per-world singletons. Configuration errors are programming
    /// errors and abort.
    pub fn init(
        world: &mut World,
        object_manager: Arc<ObjectManager>,
        delta_t: f32,
        num_substeps: u32,
        gravity: Vec3,
        max_dynamic_objects: usize,
        max_contacts_per_world: usize,
    ) {
        assert!(num_substeps > 0, "num_substeps must be at least 1");
        assert!(
            delta_t.is_finite() && delta_t > 0.0,
            "delta_t must be positive and finite, got {}",
            delta_t
        );
        assert!(gravity.is_finite(), "gravity must be finite, got {}", gravity);
        assert!(max_dynamic_objects > 0, "max_dynamic_objects must be at least 1");
        assert!(max_contacts_per_world > 0, "max_contacts_per_world must be at least 1");

        log::debug!(
            "physics init: dt={} substeps={} gravity={} max_objects={} max_contacts={}",
            delta_t,
            num_substeps,
            gravity,
            max_dynamic_objects,
            max_contacts_per_world
        );

        world.insert_resource(SolverData::new(
            max_contacts_per_world,
            delta_t,
            num_substeps,
            gravity,
        ));
        world.insert_resource(ObjectData {
            manager: object_manager,
        });
        world.insert_resource(BroadphaseBvh::with_capacity(max_dynamic_objects));
        world.insert_resource(CollisionEvents::with_capacity(max_contacts_per_world));
        world.insert_resource(ScratchArena::with_capacity(
            max_contacts_per_world.max(max_dynamic_objects) * SCRATCH_VERTICES_PER_CONTACT,
        ));
        world.init_resource::<CandidateCollisions>();
    }

    /// Drops all broadphase leaves and schedules a tree rebuild; used when
    /// the host resets a world.
    pub fn reset(world: &mut World) {
        let mut bvh = world.resource_mut::<BroadphaseBvh>();
        bvh.rebuild_on_update();
        bvh.clear_leaves();
        log::debug!("physics reset: broadphase cleared");
    }

    /// Reserves a broadphase leaf for the entity and attaches the handle.
    pub fn register_entity(world: &mut World, entity: Entity) -> LeafId {
        let leaf = world.resource_mut::<BroadphaseBvh>().reserve_leaf(entity);
        world.entity_mut(entity).insert(BroadphaseLeaf(leaf));
        leaf
    }

    /// Wires the per-step pipeline into `schedule`:
    ///
    /// ```text
    /// update_collision_aabbs -> update_tree_leaves -> update_bvh
    ///   -> find_overlaps -> run_substeps -> clear_candidates
    /// ```
    ///
    /// with the substep subgraph (integrate -> narrowphase -> solve positions
    /// -> set velocities -> solve velocities -> reset scratch) executed
    /// `num_substeps` times inside `run_substeps`.
    pub fn setup_tasks(schedule: &mut Schedule, world: &mut World, num_substeps: u32) {
        let mut substep_schedule = Schedule::default();
        substep_schedule.add_systems(
            (
                SolverSystem::substep_rigid_bodies,
                NarrowphaseSystem::run_narrowphase,
                SolverSystem::solve_positions,
                SolverSystem::set_velocities,
                SolverSystem::solve_velocities,
                reset_scratch,
            )
                .chain(),
        );
        world.insert_resource(SubstepSchedule {
            schedule: substep_schedule,
            num_substeps,
        });

        schedule.add_systems(
            (
                BroadphaseSystem::update_collision_aabbs,
                BroadphaseSystem::update_tree_leaves,
                BroadphaseSystem::update_bvh,
                BroadphaseSystem::find_overlaps,
                run_substeps,
                BroadphaseSystem::clear_candidates,
            )
                .chain(),
        );
    }

    /// Appends the terminal stage that clears collision events; hosts run it
    /// after they have observed the step's events.
    pub fn setup_cleanup_tasks(schedule: &mut Schedule) {
        schedule.add_systems(clear_collision_events);
    }
}
